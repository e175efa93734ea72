//! 黑名单
//!
//! 条目为完整目标地址，或以 `@` 开头的邮箱域名（如 `@spam.com`）。
//! 匹配大小写不敏感。

use async_trait::async_trait;
use dashmap::DashSet;

use notify_shared::error::Result;

use crate::types::SendRequest;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlacklistChecker: Send + Sync {
    async fn is_blacklisted(&self, request: &SendRequest) -> Result<bool>;
}

pub struct NoopBlacklist;

#[async_trait]
impl BlacklistChecker for NoopBlacklist {
    async fn is_blacklisted(&self, _request: &SendRequest) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: DashSet<String>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blacklist = Self::new();
        for entry in entries {
            blacklist.add(entry.as_ref());
        }
        blacklist
    }

    pub fn add(&self, entry: &str) {
        let entry = entry.trim().to_lowercase();
        if !entry.is_empty() {
            self.entries.insert(entry);
        }
    }

    pub fn remove(&self, entry: &str) -> bool {
        self.entries.remove(&entry.trim().to_lowercase()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches(&self, target: &str) -> bool {
        let target = target.trim().to_lowercase();
        if self.entries.contains(&target) {
            return true;
        }
        match target.rfind('@') {
            Some(at) => self.entries.contains(&target[at..]),
            None => false,
        }
    }
}

#[async_trait]
impl BlacklistChecker for InMemoryBlacklist {
    async fn is_blacklisted(&self, request: &SendRequest) -> Result<bool> {
        Ok(self.matches(&request.target))
    }
}
