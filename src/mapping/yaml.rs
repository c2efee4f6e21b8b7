//! Registry document parsing.
//!
//! `load` uses serde_yaml when the `yaml` feature is enabled and the small
//! indentation-scoped parser in this module otherwise. Both produce the same
//! `Node` tree, so the registry model never sees which one ran.

use crate::error::ConfigError;

/// Untyped document tree. Mappings keep file order.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Str(String),
    List(Vec<Node>),
    Map(Vec<(String, Node)>),
}

impl Node {
    pub fn as_map(&self) -> Option<&[(String, Node)]> {
        match self {
            Node::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Scalar as text; `Bool` renders as `true`/`false`, `Null` as nothing.
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            Node::Str(s) => Some(s.clone()),
            Node::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Str(_) => "scalar",
            Node::List(_) => "list",
            Node::Map(_) => "mapping",
        }
    }
}

/// Parse registry text with whichever parser this build carries.
#[cfg(feature = "yaml")]
pub fn load(src: &str) -> Result<Node, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_str(src).map_err(|e| {
        let line = e.location().map(|l| l.line()).unwrap_or(0);
        ConfigError::Syntax {
            line,
            content: src
                .lines()
                .nth(line.saturating_sub(1))
                .unwrap_or_default()
                .trim()
                .to_string(),
            message: e.to_string(),
        }
    })?;
    from_serde(value)
}

#[cfg(not(feature = "yaml"))]
pub fn load(src: &str) -> Result<Node, ConfigError> {
    parse(src)
}

#[cfg(feature = "yaml")]
fn from_serde(value: serde_yaml::Value) -> Result<Node, ConfigError> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(b),
        Value::Number(n) => Node::Str(n.to_string()),
        Value::String(s) => Node::Str(s),
        Value::Sequence(items) => {
            Node::List(items.into_iter().map(from_serde).collect::<Result<_, _>>()?)
        }
        Value::Mapping(mapping) => {
            let mut entries = Vec::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = match from_serde(key)? {
                    Node::Null => String::new(),
                    scalar @ (Node::Str(_) | Node::Bool(_)) => scalar.as_scalar().unwrap_or_default(),
                    other => {
                        return Err(ConfigError::structure(
                            "<key>",
                            format!("{} used as a mapping key", other.kind()),
                        ))
                    }
                };
                entries.push((key, from_serde(value)?));
            }
            Node::Map(entries)
        }
        Value::Tagged(tagged) => from_serde(tagged.value)?,
    })
}

// ── Fallback parser ──

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
    raw: String,
}

impl Line {
    fn is_item(&self) -> bool {
        self.text == "-" || self.text.starts_with("- ")
    }

    fn error(&self, message: &str) -> ConfigError {
        ConfigError::Syntax {
            line: self.number,
            content: self.raw.trim().to_string(),
            message: message.to_string(),
        }
    }
}

/// Minimal indentation-scoped parser: nested mappings, block and flow lists,
/// quoted scalars, `true`/`false`/`null` literals and `#` comments.
pub fn parse(src: &str) -> Result<Node, ConfigError> {
    let mut lines = tokenize(src)?;
    if lines.is_empty() {
        return Ok(Node::Map(Vec::new()));
    }
    let mut pos = 0;
    let indent = lines[0].indent;
    let node = parse_block(&mut lines, &mut pos, indent)?;
    if let Some(line) = lines.get(pos) {
        return Err(line.error("unexpected indentation"));
    }
    Ok(node)
}

fn tokenize(src: &str) -> Result<Vec<Line>, ConfigError> {
    let mut lines = Vec::new();
    for (idx, raw) in src.lines().enumerate() {
        let number = idx + 1;
        let content = strip_comment(raw);
        let body = content.trim_end();
        if body.trim().is_empty() || body.trim() == "---" {
            continue;
        }
        let leading: String = body.chars().take_while(|c| c.is_whitespace()).collect();
        if leading.contains('\t') {
            return Err(ConfigError::Syntax {
                line: number,
                content: raw.trim().to_string(),
                message: "tab used for indentation".to_string(),
            });
        }
        lines.push(Line {
            number,
            indent: leading.chars().count(),
            text: body.trim_start().to_string(),
            raw: raw.to_string(),
        });
    }
    Ok(lines)
}

/// Cut a `#` comment that is outside quotes and starts the line or follows whitespace.
fn strip_comment(raw: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut last: Option<char> = None;
    for (i, c) in raw.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && starts_token(prev, last) => quote = Some(c),
            None if c == '#' && prev.map_or(true, char::is_whitespace) => return &raw[..i],
            None => {}
        }
        prev = Some(c);
        if !c.is_whitespace() {
            last = Some(c);
        }
    }
    raw
}

/// A quote opens a quoted scalar only where a token can begin: after an
/// indicator (`:`, `-`, `?`, `[`, `{`, `,`) or at the start of the line.
/// `don't` stays a plain scalar.
fn starts_token(prev: Option<char>, last: Option<char>) -> bool {
    let boundary = prev.map_or(true, |p| p.is_whitespace() || matches!(p, '[' | '{' | ','));
    boundary && last.map_or(true, |l| matches!(l, ':' | '-' | '?' | '[' | '{' | ','))
}

fn parse_block(lines: &mut [Line], pos: &mut usize, indent: usize) -> Result<Node, ConfigError> {
    if lines[*pos].is_item() {
        parse_list(lines, pos, indent, false)
    } else {
        parse_map(lines, pos, indent)
    }
}

fn parse_map(lines: &mut [Line], pos: &mut usize, indent: usize) -> Result<Node, ConfigError> {
    let mut entries: Vec<(String, Node)> = Vec::new();
    while *pos < lines.len() && lines[*pos].indent == indent {
        let line = lines[*pos].clone();
        if line.is_item() {
            return Err(line.error("list item where a mapping entry was expected"));
        }
        let (key, rest) = split_key(&line.text).ok_or_else(|| line.error("missing `:` separator"))?;
        if entries.iter().any(|(k, _)| *k == key) {
            return Err(line.error("duplicate key"));
        }
        *pos += 1;

        let next = lines.get(*pos).map(|l| (l.indent, l.is_item()));
        let value = if rest.is_empty() {
            match next {
                Some((deeper, _)) if deeper > indent => parse_block(lines, pos, deeper)?,
                Some((same, true)) if same == indent => parse_list(lines, pos, indent, true)?,
                _ => Node::Null,
            }
        } else {
            if matches!(next, Some((deeper, _)) if deeper > indent) {
                return Err(lines[*pos].error("unexpected indentation"));
            }
            parse_inline(rest, &line)?
        };
        entries.push((key, value));
    }
    Ok(Node::Map(entries))
}

/// `same_level_as_key` lists (`key:` followed by `- x` at the key's indent)
/// end at the first non-item line instead of treating it as an error.
fn parse_list(
    lines: &mut [Line],
    pos: &mut usize,
    indent: usize,
    same_level_as_key: bool,
) -> Result<Node, ConfigError> {
    let mut items = Vec::new();
    while *pos < lines.len() && lines[*pos].indent == indent {
        let line = lines[*pos].clone();
        if !line.is_item() {
            if same_level_as_key {
                break;
            }
            return Err(line.error("mapping entry where a list item was expected"));
        }
        let after_dash = &line.text[1..];
        let rest = after_dash.trim_start();

        if rest.is_empty() {
            *pos += 1;
            let item = match lines.get(*pos) {
                Some(next) if next.indent > indent => {
                    let deeper = next.indent;
                    parse_block(lines, pos, deeper)?
                }
                _ => Node::Null,
            };
            items.push(item);
            continue;
        }

        if !is_flow(rest) && split_key(rest).is_some() {
            // `- key: value` opens a mapping aligned with `key`.
            let column = indent + 1 + (after_dash.len() - rest.len());
            lines[*pos] = Line {
                indent: column,
                text: rest.to_string(),
                ..line
            };
            items.push(parse_map(lines, pos, column)?);
            continue;
        }

        *pos += 1;
        if matches!(lines.get(*pos), Some(next) if next.indent > indent) {
            return Err(lines[*pos].error("unexpected indentation"));
        }
        items.push(parse_inline(rest, &line)?);
    }
    Ok(Node::List(items))
}

fn is_flow(text: &str) -> bool {
    text.starts_with('[') || text.starts_with('{')
}

/// Split `key: rest` at the first `:` outside quotes followed by a space or end of line.
fn split_key(text: &str) -> Option<(String, &str)> {
    let mut quote: Option<char> = None;
    let bytes = text.as_bytes();
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && i == 0 => quote = Some(c),
            None if c == ':' && (i + 1 == text.len() || bytes[i + 1] == b' ') => {
                let key = text[..i].trim();
                if key.is_empty() {
                    return None;
                }
                return Some((unquote(key), text[i + 1..].trim()));
            }
            None => {}
        }
    }
    None
}

fn parse_inline(text: &str, line: &Line) -> Result<Node, ConfigError> {
    if let Some(inner) = text.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| line.error("unterminated flow list"))?;
        return Ok(Node::List(
            split_flow(inner)
                .into_iter()
                .map(|item| scalar(&item))
                .collect(),
        ));
    }
    if let Some(inner) = text.strip_prefix('{') {
        let inner = inner
            .strip_suffix('}')
            .ok_or_else(|| line.error("unterminated flow mapping"))?;
        let mut entries = Vec::new();
        for part in split_flow(inner) {
            let (key, rest) = split_key(&part).ok_or_else(|| line.error("missing `:` separator"))?;
            entries.push((key, scalar(rest)));
        }
        return Ok(Node::Map(entries));
    }
    Ok(scalar(text))
}

fn split_flow(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for c in inner.chars() {
        let last = current.trim_end().chars().last();
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && starts_token(prev, last) => quote = Some(c),
            None if c == ',' => {
                parts.push(std::mem::take(&mut current));
                prev = Some(c);
                continue;
            }
            None => {}
        }
        current.push(c);
        prev = Some(c);
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn scalar(text: &str) -> Node {
    let text = text.trim();
    if is_quoted(text) {
        return Node::Str(unquote(text));
    }
    match text {
        "true" | "True" | "TRUE" => Node::Bool(true),
        "false" | "False" | "FALSE" => Node::Bool(false),
        "null" | "Null" | "NULL" | "~" | "" => Node::Null,
        _ => Node::Str(text.to_string()),
    }
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}

fn unquote(text: &str) -> String {
    if !is_quoted(text) {
        return text.to_string();
    }
    let inner = &text[1..text.len() - 1];
    if text.starts_with('\'') {
        inner.replace("''", "'")
    } else {
        inner.replace("\\\"", "\"").replace("\\\\", "\\")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Node {
        Node::Str(v.to_string())
    }

    #[test]
    fn nested_mappings() {
        let doc = "common:\n  fields:\n    address: Address\n    lat: Coordinates.Lat\n";
        let node = parse(doc).unwrap();
        let fields = node.get("common").and_then(|c| c.get("fields")).unwrap();
        assert_eq!(fields.get("address"), Some(&s("Address")));
        assert_eq!(fields.get("lat"), Some(&s("Coordinates.Lat")));
    }

    #[test]
    fn block_lists_and_literals() {
        let doc = "stop_fields:\n  - title\n  - status\nflag: true\nnothing: null\nquoted: \"true\"\n";
        let node = parse(doc).unwrap();
        assert_eq!(node.get("stop_fields"), Some(&Node::List(vec![s("title"), s("status")])));
        assert_eq!(node.get("flag"), Some(&Node::Bool(true)));
        assert_eq!(node.get("nothing"), Some(&Node::Null));
        assert_eq!(node.get("quoted"), Some(&s("true")));
    }

    #[test]
    fn list_at_key_indent() {
        let doc = "stop_fields:\n- title\n- status\nnext: 1\n";
        let node = parse(doc).unwrap();
        assert_eq!(node.get("stop_fields"), Some(&Node::List(vec![s("title"), s("status")])));
        assert_eq!(node.get("next"), Some(&s("1")));
    }

    #[test]
    fn item_mappings() {
        let doc = "currency:\n  - BargainTerms.Currency\n  - path: BargainTerms.AgentBonus.Currency\n    requires: agent_bonus_value\n";
        let node = parse(doc).unwrap();
        let Some(Node::List(items)) = node.get("currency") else {
            panic!("expected list");
        };
        assert_eq!(items[0], s("BargainTerms.Currency"));
        assert_eq!(items[1].get("path"), Some(&s("BargainTerms.AgentBonus.Currency")));
        assert_eq!(items[1].get("requires"), Some(&s("agent_bonus_value")));
    }

    #[test]
    fn comments_outside_quotes_only() {
        let doc = "# header\nkey: value # trailing\nhash: \"a # b\"\nurl: http://x/#frag\n";
        let node = parse(doc).unwrap();
        assert_eq!(node.get("key"), Some(&s("value")));
        assert_eq!(node.get("hash"), Some(&s("a # b")));
        assert_eq!(node.get("url"), Some(&s("http://x/#frag")));
    }

    #[test]
    fn apostrophe_inside_plain_scalar() {
        let doc = "note: don't # trailing\nquoted: 'it # stays'\nlist: [rock'n'roll, 'a, b']\n";
        let node = parse(doc).unwrap();
        assert_eq!(node.get("note"), Some(&s("don't")));
        assert_eq!(node.get("quoted"), Some(&s("it # stays")));
        assert_eq!(node.get("list"), Some(&Node::List(vec![s("rock'n'roll"), s("a, b")])));
    }

    #[test]
    fn quoted_keys_and_flow_collections() {
        let doc = "values:\n  agent_bonus_is_percent:\n    \"true\": percent\n    'false': fixed\nflags: [has_tv, has_internet]\nempty: []\nnone: {}\n";
        let node = parse(doc).unwrap();
        let table = node.get("values").and_then(|v| v.get("agent_bonus_is_percent")).unwrap();
        assert_eq!(table.get("true"), Some(&s("percent")));
        assert_eq!(table.get("false"), Some(&s("fixed")));
        assert_eq!(node.get("flags"), Some(&Node::List(vec![s("has_tv"), s("has_internet")])));
        assert_eq!(node.get("empty"), Some(&Node::List(vec![])));
        assert_eq!(node.get("none"), Some(&Node::Map(vec![])));
    }

    #[test]
    fn mixed_list_and_mapping_is_error() {
        let doc = "common:\n  fields: x\n  - oops\n";
        let err = parse(doc).unwrap_err();
        match err {
            ConfigError::Syntax { line, content, .. } => {
                assert_eq!(line, 3);
                assert_eq!(content, "- oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let doc = "stop_fields:\n  - title\n  status: x\n";
        assert!(matches!(parse(doc), Err(ConfigError::Syntax { line: 3, .. })));
    }

    #[test]
    fn missing_separator_reports_line() {
        let doc = "common:\n  fields\n";
        match parse(doc).unwrap_err() {
            ConfigError::Syntax { line, content, message } => {
                assert_eq!(line, 2);
                assert_eq!(content, "fields");
                assert!(message.contains("`:`"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stray_indentation_is_error() {
        let doc = "a: 1\n    b: 2\n";
        assert!(matches!(parse(doc), Err(ConfigError::Syntax { line: 2, .. })));
    }

    #[test]
    fn tabs_rejected() {
        let doc = "a:\n\tb: 1\n";
        assert!(matches!(parse(doc), Err(ConfigError::Syntax { line: 2, .. })));
    }

    #[test]
    fn empty_document() {
        assert_eq!(parse("# only comments\n\n").unwrap(), Node::Map(vec![]));
    }

    #[test]
    fn fallback_agrees_with_load_on_builtin_registry() {
        let src = std::fs::read_to_string("registry/cian.yaml").unwrap();
        assert_eq!(parse(&src).unwrap(), load(&src).unwrap());
    }

    #[cfg(not(feature = "yaml"))]
    #[test]
    fn builtin_registry_loads_without_serde_yaml() {
        use crate::mapping::registry::{Registry, BUILTIN_SOURCE};

        assert_eq!(load(BUILTIN_SOURCE).unwrap(), parse(BUILTIN_SOURCE).unwrap());
        let registry = Registry::builtin().unwrap();
        assert!(registry.has_category("flatSale"));
        assert!(registry.plan("houseSale").is_some());
    }
}
