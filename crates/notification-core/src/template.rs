//! 模板渲染
//!
//! 支持 `${name}` 占位符语法，名称只允许字母、数字和下划线。
//! 渲染前先校验：模板引用的每个名称都必须在变量表中出现，否则整体失败，
//! 错误中列出全部缺失名称。
//!
//! ```ignore
//! let variables = HashMap::from([("name".to_string(), json!("Ann"))]);
//! assert_eq!(render("hi ${name}", &variables)?, "hi Ann");
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::debug;

use crate::error::TemplateError;

/// 校验与提取使用的占位符语法
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("占位符正则合法"));

/// 替换使用的宽松语法，非单词字符的变量名只在调用方提供时被替换
static ANY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^${}]+)\}").expect("占位符正则合法"));

pub const PLACEHOLDER_TYPE: &str = "placeholder";
pub const PLAIN_TYPE: &str = "plain";

/// 模板中引用的变量名（去重、排序）
pub fn extract_variables(content: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// 未在变量表中提供的变量名，按名称排序
pub fn missing_variables(content: &str, variables: &HashMap<String, Value>) -> Vec<String> {
    extract_variables(content)
        .into_iter()
        .filter(|name| !variables.contains_key(name))
        .collect()
}

/// 变量值的字符串形式：字符串不带引号，其余按 JSON 文本输出
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 以占位符语法渲染模板
pub fn render(content: &str, variables: &HashMap<String, Value>) -> Result<String, TemplateError> {
    PlaceholderRenderer.render(content, variables)
}

pub trait TemplateRenderer: Send + Sync {
    fn template_type(&self) -> &str;

    fn validate(
        &self,
        content: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<(), TemplateError>;

    /// 已通过校验后的替换
    fn do_render(&self, content: &str, variables: &HashMap<String, Value>) -> String;

    fn render(
        &self,
        content: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        self.validate(content, variables)?;
        Ok(self.do_render(content, variables))
    }
}

/// `${name}` 占位符渲染器
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn template_type(&self) -> &str {
        PLACEHOLDER_TYPE
    }

    fn validate(
        &self,
        content: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<(), TemplateError> {
        let missing = missing_variables(content, variables);
        if missing.is_empty() {
            Ok(())
        } else {
            debug!(missing = ?missing, "模板变量缺失");
            Err(TemplateError { missing })
        }
    }

    // 单次扫描，替换进来的值不会被再次展开
    fn do_render(&self, content: &str, variables: &HashMap<String, Value>) -> String {
        if variables.is_empty() {
            return content.to_string();
        }
        ANY_TOKEN
            .replace_all(content, |caps: &Captures| match variables.get(&caps[1]) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// 原样输出，不做校验
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl TemplateRenderer for NoopRenderer {
    fn template_type(&self) -> &str {
        PLAIN_TYPE
    }

    fn validate(
        &self,
        _content: &str,
        _variables: &HashMap<String, Value>,
    ) -> Result<(), TemplateError> {
        Ok(())
    }

    fn do_render(&self, content: &str, _variables: &HashMap<String, Value>) -> String {
        content.to_string()
    }
}

/// 渲染器注册表
///
/// 按类型名（大小写不敏感）查找，未知类型回落到原样输出。
pub struct RendererRegistry {
    renderers: HashMap<String, Arc<dyn TemplateRenderer>>,
    fallback: Arc<dyn TemplateRenderer>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
            fallback: Arc::new(NoopRenderer),
        }
    }

    /// 注册内置的 placeholder 和 plain 渲染器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlaceholderRenderer));
        registry.register(Arc::new(NoopRenderer));
        registry
    }

    pub fn register(&mut self, renderer: Arc<dyn TemplateRenderer>) {
        self.renderers
            .insert(renderer.template_type().to_lowercase(), renderer);
    }

    pub fn get(&self, template_type: &str) -> Arc<dyn TemplateRenderer> {
        match self.renderers.get(&template_type.trim().to_lowercase()) {
            Some(renderer) => Arc::clone(renderer),
            None => {
                debug!(template_type, "未知模板类型，原样输出");
                Arc::clone(&self.fallback)
            }
        }
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.renderers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_basic() {
        let rendered = render("hi ${name}", &vars(&[("name", json!("Ann"))])).unwrap();
        assert_eq!(rendered, "hi Ann");
    }

    #[test]
    fn test_render_repeated_and_non_string_values() {
        let rendered = render(
            "${name}, ${name}: ${count} items, vip=${vip}",
            &vars(&[
                ("name", json!("Bob")),
                ("count", json!(3)),
                ("vip", json!(true)),
            ]),
        )
        .unwrap();
        assert_eq!(rendered, "Bob, Bob: 3 items, vip=true");
    }

    #[test]
    fn test_missing_variables_are_sorted_and_complete() {
        let err = render("${b} ${a} ${b} ${c}", &vars(&[("c", json!("x"))])).unwrap_err();
        assert_eq!(err.missing, vec!["a", "b"]);
    }

    #[test]
    fn test_extra_variables_are_ignored() {
        let rendered = render(
            "hello",
            &vars(&[("unused", json!("x")), ("other", json!(1))]),
        )
        .unwrap();
        assert_eq!(rendered, "hello");
    }

    #[test]
    fn test_empty_template() {
        assert_eq!(render("", &HashMap::new()).unwrap(), "");
    }

    #[test]
    fn test_no_recursive_substitution() {
        let rendered = render(
            "${a}-${b}",
            &vars(&[("a", json!("${b}")), ("b", json!("B"))]),
        )
        .unwrap();
        assert_eq!(rendered, "${b}-B");
    }

    #[test]
    fn test_non_word_tokens_are_not_validated() {
        // 不符合命名规则的占位符不参与校验，未提供时原样保留
        let rendered = render("a ${user.name} b", &HashMap::new()).unwrap();
        assert_eq!(rendered, "a ${user.name} b");

        let rendered = render("a ${user.name}", &vars(&[("user.name", json!("Ann"))])).unwrap();
        assert_eq!(rendered, "a Ann");
    }

    #[test]
    fn test_unicode_names_are_not_placeholders() {
        assert!(extract_variables("${名字}").is_empty());
        assert_eq!(
            extract_variables("${name_1} ${Name2} ${name_1}")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["Name2", "name_1"]
        );
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("Ann")), "Ann");
        assert_eq!(value_to_string(&json!(1.5)), "1.5");
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!(["a", 1])), r#"["a",1]"#);
    }

    #[test]
    fn test_noop_renderer_passes_through() {
        let rendered = NoopRenderer.render("hi ${name}", &HashMap::new()).unwrap();
        assert_eq!(rendered, "hi ${name}");
    }

    #[test]
    fn test_registry_lookup_and_fallback() {
        let registry = RendererRegistry::with_defaults();
        assert_eq!(registry.registered_types(), vec!["placeholder", "plain"]);

        assert_eq!(registry.get("PlaceHolder").template_type(), PLACEHOLDER_TYPE);
        assert_eq!(registry.get("freemarker").template_type(), PLAIN_TYPE);

        let empty = RendererRegistry::new();
        assert_eq!(empty.get("placeholder").template_type(), PLAIN_TYPE);
    }
}
