//! 命令模板表
//!
//! 带版本号的外部配置数据：有序模板、可调参数声明、报告变体。TOML 加载后立即校验并编译为 token 序列，
//! 运行时不再生成或修改模板。

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 当前支持的模板表格式版本
pub const TABLE_VERSION: u32 = 1;

/// 单个模板：以空白分隔的 token，占位符为 `<parameter>` `<value>` `<toggle>` `<variant>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub pattern: String,
    /// `<toggle>` 模板设置的布尔值（show -> true，hide -> false）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<bool>,
}

impl CommandTemplate {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            sets: None,
        }
    }

    pub fn toggle(pattern: &str, sets: bool) -> Self {
        Self {
            pattern: pattern.to_string(),
            sets: Some(sets),
        }
    }
}

/// 参数值类型与约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Float {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Boolean,
    Choice { values: Vec<String> },
}

/// 可通过快速通道更新的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    /// 适用的能力 id；为空表示适用于任何可视化能力
    #[serde(default)]
    pub applies_to: Vec<String>,
}

impl ParameterSpec {
    fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            applies_to: Vec::new(),
        }
    }

    pub fn applies_to(&self, capability: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|c| c == capability)
    }
}

/// 编译后的模板 token
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Literal(String),
    Parameter,
    Value,
    Toggle(bool),
    Variant,
}

/// 模板表（反序列化形态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTable {
    pub version: u32,
    #[serde(default)]
    pub variants: Vec<String>,
    pub templates: Vec<CommandTemplate>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl CommandTable {
    /// 内置默认表（version 1）
    pub fn builtin() -> Self {
        let choice = |values: &[&str]| ParamKind::Choice {
            values: values.iter().map(|v| v.to_string()).collect(),
        };
        Self {
            version: TABLE_VERSION,
            variants: vec!["brief".into(), "detailed".into(), "technical".into()],
            templates: vec![
                CommandTemplate::new("<parameter> <value>"),
                CommandTemplate::new("set <parameter> to <value>"),
                CommandTemplate::new("set <parameter> <value>"),
                CommandTemplate::toggle("show <toggle>", true),
                CommandTemplate::toggle("hide <toggle>", false),
                CommandTemplate::new("<variant> summary"),
                CommandTemplate::new("show <variant> summary"),
                CommandTemplate::new("<variant> report"),
            ],
            parameters: vec![
                ParameterSpec::new(
                    "colormap",
                    choice(&["viridis", "plasma", "inferno", "magma", "cividis", "coolwarm", "greys"]),
                ),
                ParameterSpec::new("alpha", ParamKind::Float { min: Some(0.0), max: Some(1.0) }),
                ParameterSpec::new("bins", ParamKind::Integer { min: Some(1), max: Some(500) }),
                ParameterSpec::new("line_width", ParamKind::Float { min: Some(0.1), max: Some(20.0) }),
                ParameterSpec::new("marker_size", ParamKind::Float { min: Some(0.1), max: Some(100.0) }),
                ParameterSpec::new("grid", ParamKind::Boolean),
                ParameterSpec::new("legend", ParamKind::Boolean),
            ],
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, AgentError> {
        let table: CommandTable =
            toml::from_str(s).map_err(|e| AgentError::CommandTable(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::CommandTable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// 校验版本、参数/变体声明与每个模板的形态
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.version != TABLE_VERSION {
            return Err(AgentError::CommandTable(format!(
                "unsupported table version {} (expected {})",
                self.version, TABLE_VERSION
            )));
        }

        let mut names = HashSet::new();
        for p in &self.parameters {
            if p.name.is_empty() || p.name != p.name.to_lowercase() || p.name.contains(char::is_whitespace) {
                return Err(AgentError::CommandTable(format!(
                    "parameter name '{}' must be a single lowercase word",
                    p.name
                )));
            }
            if !names.insert(p.name.as_str()) {
                return Err(AgentError::CommandTable(format!("duplicate parameter '{}'", p.name)));
            }
            if let ParamKind::Choice { values } = &p.kind {
                if values.is_empty() || values.iter().any(|v| v.is_empty() || *v != v.to_lowercase()) {
                    return Err(AgentError::CommandTable(format!(
                        "parameter '{}' needs non-empty lowercase choices",
                        p.name
                    )));
                }
            }
        }

        let mut variants = HashSet::new();
        for v in &self.variants {
            if v.is_empty() || *v != v.to_lowercase() || v.contains(char::is_whitespace) {
                return Err(AgentError::CommandTable(format!(
                    "variant '{}' must be a single lowercase word",
                    v
                )));
            }
            if !variants.insert(v.as_str()) {
                return Err(AgentError::CommandTable(format!("duplicate variant '{}'", v)));
            }
        }

        for t in &self.templates {
            compile(t)?;
        }
        Ok(())
    }

    /// 按表中顺序编译全部模板
    pub(crate) fn compiled(&self) -> Result<Vec<Vec<Token>>, AgentError> {
        self.templates.iter().map(compile).collect()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile(template: &CommandTemplate) -> Result<Vec<Token>, AgentError> {
    let err = |msg: &str| AgentError::CommandTable(format!("template '{}': {}", template.pattern, msg));

    let mut tokens = Vec::new();
    for raw in template.pattern.split_whitespace() {
        let token = match raw {
            "<parameter>" => Token::Parameter,
            "<value>" => Token::Value,
            "<toggle>" => Token::Toggle(template.sets.ok_or_else(|| err("<toggle> requires `sets`"))?),
            "<variant>" => Token::Variant,
            other if other.starts_with('<') => return Err(err("unknown placeholder")),
            other => Token::Literal(other.to_lowercase()),
        };
        tokens.push(token);
    }
    if tokens.is_empty() {
        return Err(err("empty pattern"));
    }

    let count = |pred: fn(&Token) -> bool| tokens.iter().filter(|t| pred(t)).count();
    let params = count(|t| matches!(t, Token::Parameter));
    let values = count(|t| matches!(t, Token::Value));
    let toggles = count(|t| matches!(t, Token::Toggle(_)));
    let variants = count(|t| matches!(t, Token::Variant));

    match (params, values, toggles, variants) {
        (1, 1, 0, 0) => {
            let p = tokens.iter().position(|t| *t == Token::Parameter);
            let v = tokens.iter().position(|t| *t == Token::Value);
            if p > v {
                return Err(err("<value> must follow <parameter>"));
            }
        }
        (0, 0, 1, 0) | (0, 0, 0, 1) => {}
        _ => {
            return Err(err(
                "needs exactly one of: <parameter> + <value>, <toggle>, <variant>",
            ))
        }
    }
    if template.sets.is_some() && toggles == 0 {
        return Err(err("`sets` is only valid with <toggle>"));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_is_valid() {
        let table = CommandTable::builtin();
        assert!(table.validate().is_ok());
        assert_eq!(table.compiled().unwrap().len(), table.templates.len());
    }

    #[test]
    fn test_from_toml() {
        let raw = r#"
version = 1
variants = ["brief"]

[[templates]]
pattern = "<parameter> <value>"

[[templates]]
pattern = "enable <toggle>"
sets = true

[[parameters]]
name = "alpha"
type = "float"
min = 0.0
max = 1.0

[[parameters]]
name = "grid"
type = "boolean"
applies_to = ["render_chart"]
"#;
        let table = CommandTable::from_toml_str(raw).unwrap();
        assert_eq!(table.templates.len(), 2);
        assert_eq!(
            table.parameter("alpha").unwrap().kind,
            ParamKind::Float { min: Some(0.0), max: Some(1.0) }
        );
        assert!(table.parameter("grid").unwrap().applies_to("render_chart"));
        assert!(!table.parameter("grid").unwrap().applies_to("render_map"));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let raw = "version = 2\ntemplates = []\n";
        assert!(matches!(
            CommandTable::from_toml_str(raw),
            Err(AgentError::CommandTable(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_templates() {
        for pattern in ["<value> <parameter>", "<parameter>", "show <toggle>", "<bogus> x", "<variant> <variant>"] {
            let mut table = CommandTable::builtin();
            table.templates = vec![CommandTemplate::new(pattern)];
            assert!(table.validate().is_err(), "pattern accepted: {pattern}");
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        let raw = toml::to_string(&CommandTable::builtin()).unwrap();
        std::fs::write(&path, raw).unwrap();

        let table = CommandTable::load(&path).unwrap();
        assert_eq!(table.variants, vec!["brief", "detailed", "technical"]);
    }
}
