//! 命令匹配器
//!
//! 纯函数：原始文本 -> SimpleCommand 或不匹配。先统一大小写与空白，再按模板表顺序做逐 token 精确匹配，
//! 第一个命中的模板胜出；数值/枚举参数解析失败时整句视为不匹配（静默回退到完整路径）。

use serde::Serialize;
use serde_json::Value;

use crate::commands::table::{CommandTable, ParamKind, ParameterSpec, Token};
use crate::core::AgentError;

/// 单轮内产生并消费的简单命令
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimpleCommand {
    /// 更新单个可视化参数
    UpdateParameter { name: String, value: Value },
    /// 读取缓存的报告变体
    RetrieveReport { variant: String },
}

/// 命令匹配器：持有校验并编译过的模板表
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    table: CommandTable,
    templates: Vec<Vec<Token>>,
}

impl CommandMatcher {
    pub fn new(table: CommandTable) -> Result<Self, AgentError> {
        table.validate()?;
        let templates = table.compiled()?;
        Ok(Self { table, templates })
    }

    /// 匹配一条输入；对相同输入总是返回相同结果，且不会 panic
    pub fn match_input(&self, input: &str) -> Option<SimpleCommand> {
        let words: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return None;
        }
        self.templates
            .iter()
            .find_map(|template| self.match_template(template, &words))
    }

    fn match_template(&self, template: &[Token], words: &[String]) -> Option<SimpleCommand> {
        if template.len() != words.len() {
            return None;
        }

        let mut parameter: Option<&ParameterSpec> = None;
        let mut command: Option<SimpleCommand> = None;

        for (token, word) in template.iter().zip(words) {
            match token {
                Token::Literal(lit) => {
                    if lit != word {
                        return None;
                    }
                }
                Token::Parameter => {
                    parameter = Some(self.table.parameter(word)?);
                }
                Token::Value => {
                    let spec = parameter?;
                    let value = parse_value(&spec.kind, word)?;
                    command = Some(SimpleCommand::UpdateParameter {
                        name: spec.name.clone(),
                        value,
                    });
                }
                Token::Toggle(sets) => {
                    let spec = self.table.parameter(word)?;
                    if spec.kind != ParamKind::Boolean {
                        return None;
                    }
                    command = Some(SimpleCommand::UpdateParameter {
                        name: spec.name.clone(),
                        value: Value::Bool(*sets),
                    });
                }
                Token::Variant => {
                    let variant = self.table.variants.iter().find(|v| *v == word)?;
                    command = Some(SimpleCommand::RetrieveReport {
                        variant: variant.clone(),
                    });
                }
            }
        }
        command
    }
}

impl Default for CommandMatcher {
    fn default() -> Self {
        let table = CommandTable::builtin();
        let templates = table.compiled().unwrap_or_default();
        Self { table, templates }
    }
}

/// 按声明类型解析参数值；越界、非有限数、未知枚举值都返回 None
fn parse_value(kind: &ParamKind, word: &str) -> Option<Value> {
    match kind {
        ParamKind::Float { min, max } => {
            let v: f64 = word.parse().ok()?;
            if !v.is_finite() || min.map_or(false, |m| v < m) || max.map_or(false, |m| v > m) {
                return None;
            }
            serde_json::Number::from_f64(v).map(Value::Number)
        }
        ParamKind::Integer { min, max } => {
            let v: i64 = word.parse().ok()?;
            if min.map_or(false, |m| v < m) || max.map_or(false, |m| v > m) {
                return None;
            }
            Some(Value::from(v))
        }
        ParamKind::Boolean => match word {
            "true" | "on" | "yes" => Some(Value::Bool(true)),
            "false" | "off" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        ParamKind::Choice { values } => values
            .iter()
            .find(|v| *v == word)
            .map(|v| Value::String(v.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher() -> CommandMatcher {
        CommandMatcher::new(CommandTable::builtin()).unwrap()
    }

    fn update(name: &str, value: Value) -> Option<SimpleCommand> {
        Some(SimpleCommand::UpdateParameter {
            name: name.to_string(),
            value,
        })
    }

    #[test]
    fn test_parameter_value_template() {
        let m = matcher();
        assert_eq!(m.match_input("colormap plasma"), update("colormap", json!("plasma")));
        assert_eq!(m.match_input("  Alpha   0.25 "), update("alpha", json!(0.25)));
        assert_eq!(m.match_input("set bins to 40"), update("bins", json!(40)));
        assert_eq!(m.match_input("set grid off"), update("grid", json!(false)));
    }

    #[test]
    fn test_toggle_templates() {
        let m = matcher();
        assert_eq!(m.match_input("show legend"), update("legend", json!(true)));
        assert_eq!(m.match_input("HIDE grid"), update("grid", json!(false)));
        // 非布尔参数不能作为 toggle
        assert_eq!(m.match_input("show colormap"), None);
    }

    #[test]
    fn test_variant_templates() {
        let m = matcher();
        let brief = Some(SimpleCommand::RetrieveReport { variant: "brief".into() });
        assert_eq!(m.match_input("brief summary"), brief);
        assert_eq!(m.match_input("show brief summary"), brief);
        assert_eq!(
            m.match_input("Technical report"),
            Some(SimpleCommand::RetrieveReport { variant: "technical".into() })
        );
        assert_eq!(m.match_input("executive summary"), None);
    }

    #[test]
    fn test_invalid_values_are_no_match() {
        let m = matcher();
        assert_eq!(m.match_input("alpha high"), None);
        assert_eq!(m.match_input("alpha 1.5"), None);
        assert_eq!(m.match_input("alpha NaN"), None);
        assert_eq!(m.match_input("bins 2.5"), None);
        assert_eq!(m.match_input("bins 0"), None);
        assert_eq!(m.match_input("colormap rainbow"), None);
        assert_eq!(m.match_input("grid maybe"), None);
    }

    #[test]
    fn test_no_fuzzy_or_prefix_matching() {
        let m = matcher();
        assert_eq!(m.match_input("please set colormap to plasma"), None);
        assert_eq!(m.match_input("colormap plasma now"), None);
        assert_eq!(m.match_input("colourmap plasma"), None);
        assert_eq!(m.match_input(""), None);
        assert_eq!(m.match_input("   "), None);
    }

    #[test]
    fn test_matching_is_deterministic() {
        let m = matcher();
        for input in ["colormap plasma", "brief summary", "plot the data", "alpha 9"] {
            assert_eq!(m.match_input(input), m.match_input(input));
        }
    }

    #[test]
    fn test_first_template_wins() {
        let mut table = CommandTable::builtin();
        table.templates.insert(0, crate::commands::CommandTemplate::toggle("grid <toggle>", true));
        table.parameters.push(crate::commands::ParameterSpec {
            name: "on".into(),
            kind: ParamKind::Boolean,
            applies_to: vec![],
        });
        let m = CommandMatcher::new(table).unwrap();
        // "grid on" 先命中 "grid <toggle>"（参数 on = true），而不是 "<parameter> <value>"
        assert_eq!(m.match_input("grid on"), update("on", json!(true)));
    }
}
