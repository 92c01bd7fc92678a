//! 结构化输出解析器（reasoning / action / answer 等标签字段）

pub mod xml;

pub use xml::{FieldSpec, ParsedAction, XmlParser};
