//! 结构化输出解析：XML 风格标签块的渲染与提取
//!
//! 字段定义为有序列表，每项是单个标签（字段名即标签名）或一组可互换标签（首个为规范标签，其余为别名）。
//! 解析是纯标签扫描，不做嵌套校验；残缺或未闭合的标记只会导致字段缺失，永不报错。

use std::collections::{BTreeMap, HashMap};

/// 单个字段定义：一个或多个可接受的标签名，第一个为规范名
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    tags: Vec<String>,
}

impl FieldSpec {
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            tags: vec![name.into()],
        }
    }

    /// 字段组：canonical 在前，aliases 按顺序追加
    pub fn group<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn canonical(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or("")
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        FieldSpec::tag(name)
    }
}

impl<const N: usize> From<[&str; N]> for FieldSpec {
    fn from(tags: [&str; N]) -> Self {
        FieldSpec::group(tags)
    }
}

/// 一次解析的结果：按「实际命中的标签名」存值，缺失即不存在
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedAction {
    values: BTreeMap<String, String>,
}

impl ParsedAction {
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.values.get(tag).map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// XML 风格字段解析器
#[derive(Clone, Debug)]
pub struct XmlParser {
    fields: Vec<FieldSpec>,
}

impl XmlParser {
    pub fn new<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldSpec>,
    {
        let fields = fields
            .into_iter()
            .map(Into::into)
            .filter(|f: &FieldSpec| !f.tags.is_empty())
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// 按字段顺序渲染 `<tag>\n{value}\n</tag>` 块，块间以换行分隔。
    /// 值可用组内任意标签名提供，输出一律使用规范标签；未提供的字段省略。
    pub fn format<'a, I>(&self, values: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let values: HashMap<&str, &str> = values.into_iter().collect();
        self.fields
            .iter()
            .filter_map(|field| {
                let value = field
                    .tags
                    .iter()
                    .find_map(|tag| values.get(tag.as_str()))?;
                let tag = field.canonical();
                Some(format!("<{tag}>\n{value}\n</{tag}>"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 对每个字段，取文档顺序上最先出现的（组内任一标签的）完整标签块；
    /// 值挂在实际命中的标签名下，同组其它别名保持缺失。
    pub fn parse(&self, text: &str) -> ParsedAction {
        let mut parsed = ParsedAction::default();
        for field in &self.fields {
            let earliest = field
                .tags
                .iter()
                .filter_map(|tag| find_block(text, tag).map(|(start, inner)| (start, tag, inner)))
                .min_by_key(|(start, _, _)| *start);
            if let Some((_, tag, inner)) = earliest {
                parsed.values.insert(tag.clone(), inner.trim().to_string());
            }
        }
        parsed
    }
}

/// 找到第一个 `<tag>` 及其后第一个 `</tag>`，返回起始位置与内部文本
fn find_block<'t>(text: &'t str, tag: &str) -> Option<(usize, &'t str)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)?;
    let body_start = start + open.len();
    let body_len = text[body_start..].find(&close)?;
    Some((start, &text[body_start..body_start + body_len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_plain_fields() {
        let parser = XmlParser::new(["think", "answer"]);
        let text = parser.format([("think", "step"), ("answer", "42")]);
        assert_eq!(text, "<think>\nstep\n</think>\n<answer>\n42\n</answer>");

        let parsed = parser.parse(&text);
        assert_eq!(parsed.get("think"), Some("step"));
        assert_eq!(parsed.get("answer"), Some("42"));
    }

    #[test]
    fn test_format_omits_missing_and_uses_canonical_tag() {
        let parser = XmlParser::new([FieldSpec::tag("think"), FieldSpec::group(["code", "answer"])]);
        assert_eq!(parser.format([("answer", "x")]), "<code>\nx\n</code>");
        assert_eq!(parser.format(std::iter::empty()), "");
    }

    #[test]
    fn test_alias_exclusivity() {
        let parser = XmlParser::new([FieldSpec::tag("think"), FieldSpec::group(["code", "answer"])]);

        let parsed = parser.parse("<think>\nT\n</think>\n<answer>\nX\n</answer>");
        assert_eq!(parsed.get("think"), Some("T"));
        assert_eq!(parsed.get("code"), None);
        assert_eq!(parsed.get("answer"), Some("X"));

        let parsed = parser.parse("<code>\nprint(1)\n</code>");
        assert_eq!(parsed.get("code"), Some("print(1)"));
        assert_eq!(parsed.get("answer"), None);
        assert_eq!(parsed.get("think"), None);
    }

    #[test]
    fn test_first_alias_in_document_order_wins() {
        let parser = XmlParser::new([["tool", "answer"]]);
        let parsed = parser.parse("<answer>a</answer> then <tool>t</tool>");
        assert_eq!(parsed.get("answer"), Some("a"));
        assert!(!parsed.contains("tool"));
    }

    #[test]
    fn test_malformed_input_never_panics() {
        let parser = XmlParser::new([FieldSpec::tag("think"), FieldSpec::group(["tool", "answer"])]);
        let inputs = [
            "",
            "<think>",
            "<think>unterminated <tool>{\"name\":",
            "</answer><answer>",
            "<think><tool>x</think></tool>",
            "<<think>>a</think>>",
            "<answer>ünïcödé</answer",
        ];
        for input in inputs {
            let _ = parser.parse(input);
        }

        let parsed = parser.parse("<think><tool>x</think></tool>");
        assert_eq!(parsed.get("think"), Some("<tool>x"));
        assert_eq!(parsed.get("tool"), Some("x</think>"));
        assert!(parser.parse("<think>unterminated").is_empty());
    }

    #[test]
    fn test_trims_inner_text() {
        let parser = XmlParser::new(["result"]);
        let parsed = parser.parse("prefix <result>\n\n  4  \n</result> suffix");
        assert_eq!(parsed.get("result"), Some("4"));
    }
}
