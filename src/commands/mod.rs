//! 快速通道命令：模板表与匹配器

pub mod matcher;
pub mod table;

pub use matcher::{CommandMatcher, SimpleCommand};
pub use table::{CommandTable, CommandTemplate, ParamKind, ParameterSpec, TABLE_VERSION};
