use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use super::yaml::{self, Node};
use crate::error::ConfigError;
use crate::record::{Field, FieldKind, Value};

/// Registry shipped with the binary.
pub const BUILTIN_SOURCE: &str = include_str!("../../registry/cian.yaml");

static BUILTIN: LazyLock<Result<Registry, ConfigError>> = LazyLock::new(load_builtin);

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap());

const TOP_LEVEL_KEYS: &[&str] = &[
    "feed_version",
    "default_category",
    "stop_fields",
    "fallbacks",
    "defaults",
    "conversions",
    "common",
    "deal_terms",
    "categories",
    "values",
];

// ── Model ──

/// Dot-delimited output location, e.g. `BargainTerms.AgentBonus.Currency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPath(Vec<String>);

impl OutputPath {
    fn parse(text: &str, at: &str) -> Result<Self, ConfigError> {
        let segments: Vec<String> = text.trim().split('.').map(str::to_string).collect();
        if segments.iter().any(|s| !SEGMENT_RE.is_match(s)) {
            return Err(ConfigError::InvalidPath {
                path: text.to_string(),
                at: at.to_string(),
            });
        }
        Ok(OutputPath(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for OutputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// One fan-out destination. `requires` names a field that must already have
/// been emitted for this record.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub path: OutputPath,
    pub requires: Option<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field: Field,
    pub targets: Vec<Target>,
}

/// Boolean attribute rendered as `<Tag>true</Tag>` when set.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub field: Field,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    pub fields: Vec<FieldRule>,
    pub flags: Vec<Flag>,
}

/// Unit conversion: when `unit_field` reads `from`, the value is divided by
/// `10^power` and the unit is re-expressed as `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub unit_field: Field,
    pub from: String,
    pub to: String,
    pub power: u32,
}

/// Enumerated translation table; `None` targets suppress the field.
pub type Table = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone)]
pub struct Registry {
    feed_version: String,
    default_category: String,
    stop_fields: BTreeSet<Field>,
    fallbacks: BTreeMap<Field, Field>,
    defaults: BTreeMap<Field, Value>,
    conversions: BTreeMap<Field, Conversion>,
    common: Section,
    deal_terms: Section,
    categories: BTreeMap<String, Section>,
    values: BTreeMap<Field, Table>,
}

impl Registry {
    /// The embedded registry, parsed once per process.
    pub fn builtin() -> Result<&'static Registry, ConfigError> {
        BUILTIN.as_ref().map_err(Clone::clone)
    }

    pub fn from_path(path: &Path) -> Result<Registry, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let registry = Registry::parse(&src)?;
        info!(
            path = %path.display(),
            categories = registry.categories.len(),
            "registry loaded"
        );
        Ok(registry)
    }

    /// A structure error that the indentation parser can pin to a line is
    /// reported as that line's syntax error instead.
    pub fn parse(src: &str) -> Result<Registry, ConfigError> {
        Registry::from_node(&yaml::load(src)?).map_err(|err| match yaml::parse(src) {
            Err(syntax @ ConfigError::Syntax { .. }) => syntax,
            _ => err,
        })
    }

    fn from_node(root: &Node) -> Result<Registry, ConfigError> {
        let entries = root
            .as_map()
            .ok_or_else(|| ConfigError::structure("<root>", "expected a mapping"))?;
        for (key, _) in entries {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::structure(key.as_str(), "unknown top-level key"));
            }
        }

        let feed_version = match root.get("feed_version") {
            None | Some(Node::Null) => "2".to_string(),
            Some(node) => scalar(node, "feed_version")?,
        };

        let stop_fields = match root.get("stop_fields") {
            None | Some(Node::Null) => BTreeSet::new(),
            Some(node) => field_list(node, "stop_fields")?.into_iter().collect(),
        };

        let fallbacks = parse_fallbacks(root.get("fallbacks"))?;
        let defaults = parse_defaults(root.get("defaults"))?;
        let conversions = parse_conversions(root.get("conversions"))?;
        let values = parse_values(root.get("values"))?;

        let common = resolve_plain(root.get("common"), "common")?;
        let deal_terms = resolve_plain(root.get("deal_terms"), "deal_terms")?;
        let categories = parse_categories(root.get("categories"))?;

        let default_category = match root.get("default_category") {
            None | Some(Node::Null) => "flatSale".to_string(),
            Some(node) => scalar(node, "default_category")?,
        };
        if !categories.contains_key(&default_category) {
            return Err(ConfigError::structure(
                "default_category",
                format!("`{default_category}` has no category table"),
            ));
        }

        // Processing order is common -> deal_terms -> category.
        let mut declared = Vec::new();
        check_order(&common, "common", &mut declared)?;
        check_order(&deal_terms, "deal_terms", &mut declared)?;
        for (code, section) in &categories {
            let mut scoped = declared.clone();
            check_order(section, &format!("categories.{code}"), &mut scoped)?;
        }

        Ok(Registry {
            feed_version,
            default_category,
            stop_fields,
            fallbacks,
            defaults,
            conversions,
            common,
            deal_terms,
            categories,
            values,
        })
    }

    // ── Accessors ──

    pub fn feed_version(&self) -> &str {
        &self.feed_version
    }

    pub fn default_category(&self) -> &str {
        &self.default_category
    }

    pub fn stop_fields(&self) -> &BTreeSet<Field> {
        &self.stop_fields
    }

    pub fn is_stop(&self, field: Field) -> bool {
        self.stop_fields.contains(&field)
    }

    pub fn fallback(&self, field: Field) -> Option<Field> {
        self.fallbacks.get(&field).copied()
    }

    /// Value used when a listing has neither the attribute nor its fallback.
    pub fn default_value(&self, field: Field) -> Option<&Value> {
        self.defaults.get(&field)
    }

    pub fn conversion(&self, value_field: Field) -> Option<&Conversion> {
        self.conversions.get(&value_field)
    }

    /// Conversion whose unit attribute is `unit_field`.
    pub fn conversion_by_unit(&self, unit_field: Field) -> Option<&Conversion> {
        self.conversions.values().find(|c| c.unit_field == unit_field)
    }

    pub fn table(&self, field: Field) -> Option<&Table> {
        self.values.get(&field)
    }

    pub fn common(&self) -> &Section {
        &self.common
    }

    pub fn deal_terms(&self) -> &Section {
        &self.deal_terms
    }

    pub fn category(&self, code: &str) -> Option<&Section> {
        self.categories.get(code)
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = (Field, Field)> + '_ {
        self.fallbacks.iter().map(|(f, fb)| (*f, *fb))
    }

    pub fn defaults(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.defaults.iter().map(|(f, v)| (*f, v))
    }

    pub fn conversions(&self) -> impl Iterator<Item = (Field, &Conversion)> {
        self.conversions.iter().map(|(f, c)| (*f, c))
    }

    pub fn has_category(&self, code: &str) -> bool {
        self.categories.contains_key(code)
    }

    pub fn category_codes(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Sections in processing order for `code`, or `None` without a table.
    pub fn plan(&self, code: &str) -> Option<[(&str, &Section); 3]> {
        let (code, category) = self.categories.get_key_value(code)?;
        Some([
            ("common", &self.common),
            ("deal_terms", &self.deal_terms),
            (code.as_str(), category),
        ])
    }
}

fn load_builtin() -> Result<Registry, ConfigError> {
    let registry = Registry::parse(BUILTIN_SOURCE)?;
    info!(
        path = "<builtin>",
        categories = registry.categories.len(),
        "registry loaded"
    );
    Ok(registry)
}

// ── Section parsing ──

type RawEntry = (Field, Option<Vec<Target>>);

#[derive(Debug, Default)]
struct RawSection {
    extends: Option<String>,
    fields: Vec<RawEntry>,
    flags: Vec<Flag>,
}

fn resolve_plain(node: Option<&Node>, at: &str) -> Result<Section, ConfigError> {
    let raw = parse_section(node, at, false)?;
    Ok(merge(Section::default(), raw))
}

fn parse_section(node: Option<&Node>, at: &str, allow_extends: bool) -> Result<RawSection, ConfigError> {
    let mut section = RawSection::default();
    let Some(node) = node.filter(|n| **n != Node::Null) else {
        return Ok(section);
    };
    let entries = node
        .as_map()
        .ok_or_else(|| ConfigError::structure(at, format!("expected a mapping, found {}", node.kind())))?;

    for (key, value) in entries {
        let here = format!("{at}.{key}");
        match key.as_str() {
            "extends" if allow_extends => section.extends = Some(scalar(value, &here)?),
            "fields" => section.fields = parse_fields(value, &here)?,
            "flags" => {
                for field in field_list(value, &here)? {
                    if field.kind() != FieldKind::Bool {
                        return Err(ConfigError::structure(
                            here.as_str(),
                            format!("flag `{field}` is not a boolean attribute"),
                        ));
                    }
                    section.flags.push(Flag {
                        field,
                        tag: camel_case(field.name()),
                    });
                }
            }
            _ => return Err(ConfigError::structure(here.as_str(), "unknown key")),
        }
    }
    Ok(section)
}

fn parse_fields(node: &Node, at: &str) -> Result<Vec<RawEntry>, ConfigError> {
    let Some(entries) = node.as_map() else {
        return match node {
            Node::Null => Ok(Vec::new()),
            other => Err(ConfigError::structure(
                at,
                format!("expected a mapping, found {}", other.kind()),
            )),
        };
    };
    let mut out = Vec::with_capacity(entries.len());
    for (name, target) in entries {
        let here = format!("{at}.{name}");
        let field = mappable_field(name, at)?;
        let targets = match target {
            Node::Null => None,
            Node::List(items) if items.is_empty() => {
                return Err(ConfigError::structure(here.as_str(), "empty target list"))
            }
            Node::List(items) => Some(
                items
                    .iter()
                    .map(|item| parse_target(item, &here))
                    .collect::<Result<_, _>>()?,
            ),
            single => Some(vec![parse_target(single, &here)?]),
        };
        out.push((field, targets));
    }
    Ok(out)
}

fn parse_target(node: &Node, at: &str) -> Result<Target, ConfigError> {
    match node {
        Node::Str(path) => Ok(Target {
            path: OutputPath::parse(path, at)?,
            requires: None,
        }),
        Node::Map(entries) => {
            let mut path = None;
            let mut requires = None;
            for (key, value) in entries {
                match key.as_str() {
                    "path" => path = Some(OutputPath::parse(&scalar(value, at)?, at)?),
                    "requires" => requires = Some(known_field(&scalar(value, at)?, at)?),
                    other => {
                        return Err(ConfigError::structure(at, format!("unknown target key `{other}`")))
                    }
                }
            }
            let path = path.ok_or_else(|| ConfigError::structure(at, "target without `path`"))?;
            Ok(Target { path, requires })
        }
        other => Err(ConfigError::structure(
            at,
            format!("target must be a path or mapping, found {}", other.kind()),
        )),
    }
}

/// Child entries replace same-named parent entries in place; new ones append.
/// A `null` target removes an inherited entry.
fn merge(mut base: Section, raw: RawSection) -> Section {
    for (field, targets) in raw.fields {
        let slot = base.fields.iter().position(|r| r.field == field);
        match (slot, targets) {
            (Some(i), Some(targets)) => base.fields[i] = FieldRule { field, targets },
            (Some(i), None) => {
                base.fields.remove(i);
            }
            (None, Some(targets)) => base.fields.push(FieldRule { field, targets }),
            (None, None) => {}
        }
    }
    for flag in raw.flags {
        if !base.flags.iter().any(|f| f.field == flag.field) {
            base.flags.push(flag);
        }
    }
    base
}

fn parse_categories(node: Option<&Node>) -> Result<BTreeMap<String, Section>, ConfigError> {
    let entries = node
        .and_then(Node::as_map)
        .ok_or_else(|| ConfigError::structure("categories", "expected a mapping of category tables"))?;
    if entries.is_empty() {
        return Err(ConfigError::structure("categories", "no category tables"));
    }

    let mut raw = BTreeMap::new();
    for (code, body) in entries {
        let at = format!("categories.{code}");
        raw.insert(code.clone(), parse_section(Some(body), &at, true)?);
    }

    let mut resolved = BTreeMap::new();
    let codes: Vec<String> = raw.keys().cloned().collect();
    for code in codes {
        let mut visiting = Vec::new();
        resolve_category(&code, &mut raw, &mut resolved, &mut visiting)?;
    }
    Ok(resolved)
}

fn resolve_category(
    code: &str,
    raw: &mut BTreeMap<String, RawSection>,
    resolved: &mut BTreeMap<String, Section>,
    visiting: &mut Vec<String>,
) -> Result<Section, ConfigError> {
    if let Some(done) = resolved.get(code) {
        return Ok(done.clone());
    }
    let Some(section) = raw.remove(code) else {
        let child = visiting.last().cloned().unwrap_or_default();
        return Err(ConfigError::Extends {
            code: child,
            parent: code.to_string(),
        });
    };
    visiting.push(code.to_string());
    let base = match &section.extends {
        Some(parent) if visiting.iter().any(|v| v == parent) => {
            return Err(ConfigError::Extends {
                code: code.to_string(),
                parent: parent.clone(),
            })
        }
        Some(parent) => resolve_category(parent, raw, resolved, visiting)?,
        None => Section::default(),
    };
    visiting.pop();
    let merged = merge(base, section);
    resolved.insert(code.to_string(), merged.clone());
    Ok(merged)
}

fn check_order(section: &Section, at: &str, declared: &mut Vec<Field>) -> Result<(), ConfigError> {
    for rule in &section.fields {
        let here = format!("{at}.fields.{}", rule.field);
        if declared.contains(&rule.field) {
            return Err(ConfigError::structure(here.as_str(), "field declared more than once"));
        }
        for target in &rule.targets {
            if let Some(required) = target.requires {
                if !declared.contains(&required) {
                    return Err(ConfigError::structure(
                        here.as_str(),
                        format!("requires `{required}`, which is not declared earlier"),
                    ));
                }
            }
        }
        declared.push(rule.field);
    }
    for flag in &section.flags {
        if declared.contains(&flag.field) {
            return Err(ConfigError::structure(
                format!("{at}.flags"),
                format!("`{}` declared more than once", flag.field),
            ));
        }
        declared.push(flag.field);
    }
    Ok(())
}

// ── Global tables ──

fn parse_fallbacks(node: Option<&Node>) -> Result<BTreeMap<Field, Field>, ConfigError> {
    let mut out = BTreeMap::new();
    for (name, source) in mapping(node, "fallbacks")? {
        let at = format!("fallbacks.{name}");
        let field = mappable_field(name, "fallbacks")?;
        let source = mappable_field(&scalar(source, &at)?, &at)?;
        if source == field {
            return Err(ConfigError::structure(at, "field falls back to itself"));
        }
        out.insert(field, source);
    }
    Ok(out)
}

fn parse_defaults(node: Option<&Node>) -> Result<BTreeMap<Field, Value>, ConfigError> {
    let mut out = BTreeMap::new();
    for (name, raw) in mapping(node, "defaults")? {
        let at = format!("defaults.{name}");
        let field = mappable_field(name, "defaults")?;
        let value = Value::parse(field, &scalar(raw, &at)?)
            .map_err(|e| ConfigError::structure(at.as_str(), e.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::structure(at, "empty default"));
        }
        out.insert(field, value);
    }
    Ok(out)
}

fn parse_conversions(node: Option<&Node>) -> Result<BTreeMap<Field, Conversion>, ConfigError> {
    let mut out = BTreeMap::new();
    for (name, body) in mapping(node, "conversions")? {
        let at = format!("conversions.{name}");
        let field = known_field(name, "conversions")?;
        if field.kind() != FieldKind::Decimal {
            return Err(ConfigError::structure(at, format!("`{field}` is not a decimal attribute")));
        }
        let get = |key: &str| {
            body.get(key)
                .ok_or_else(|| ConfigError::structure(at.as_str(), format!("missing `{key}`")))
                .and_then(|n| scalar(n, &at))
        };
        let unit_field = known_field(&get("unit_field")?, &at)?;
        if unit_field.kind() != FieldKind::Text {
            return Err(ConfigError::structure(
                at.as_str(),
                format!("`{unit_field}` is not a text attribute"),
            ));
        }
        let divisor = get("divisor")?;
        let power = power_of_ten(&divisor).ok_or_else(|| {
            ConfigError::structure(at.as_str(), format!("divisor `{divisor}` is not a power of ten"))
        })?;
        out.insert(
            field,
            Conversion {
                unit_field,
                from: get("from")?.to_lowercase(),
                to: get("to")?,
                power,
            },
        );
    }
    Ok(out)
}

fn parse_values(node: Option<&Node>) -> Result<BTreeMap<Field, Table>, ConfigError> {
    let mut out = BTreeMap::new();
    for (name, table) in mapping(node, "values")? {
        let at = format!("values.{name}");
        let field = mappable_field(name, "values")?;
        let mut translated = Table::new();
        for (raw, target) in mapping(Some(table), &at)? {
            let target = match target {
                Node::Null => None,
                other => Some(scalar(other, &at)?),
            };
            translated.insert(raw.clone(), target);
        }
        out.insert(field, translated);
    }
    Ok(out)
}

// ── Helpers ──

fn mapping<'a>(node: Option<&'a Node>, at: &str) -> Result<&'a [(String, Node)], ConfigError> {
    match node {
        None | Some(Node::Null) => Ok(&[]),
        Some(Node::Map(entries)) => Ok(entries),
        Some(other) => Err(ConfigError::structure(
            at,
            format!("expected a mapping, found {}", other.kind()),
        )),
    }
}

fn scalar(node: &Node, at: &str) -> Result<String, ConfigError> {
    node.as_scalar()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ConfigError::structure(at, format!("expected a scalar, found {}", node.kind())))
}

fn field_list(node: &Node, at: &str) -> Result<Vec<Field>, ConfigError> {
    match node {
        Node::Null => Ok(Vec::new()),
        Node::List(items) => items
            .iter()
            .map(|item| known_field(&scalar(item, at)?, at))
            .collect(),
        other => Err(ConfigError::structure(
            at,
            format!("expected a list, found {}", other.kind()),
        )),
    }
}

fn known_field(name: &str, at: &str) -> Result<Field, ConfigError> {
    name.parse().map_err(|_| ConfigError::UnknownField {
        name: name.to_string(),
        at: at.to_string(),
    })
}

/// A field that can be rendered as a scalar.
fn mappable_field(name: &str, at: &str) -> Result<Field, ConfigError> {
    let field = known_field(name, at)?;
    if field.kind() == FieldKind::Collection {
        return Err(ConfigError::structure(
            format!("{at}.{name}"),
            "collection attributes cannot be mapped to a path",
        ));
    }
    Ok(field)
}

fn power_of_ten(text: &str) -> Option<u32> {
    let zeros = text.strip_prefix('1')?;
    if !zeros.chars().all(|c| c == '0') || zeros.len() > 38 {
        return None;
    }
    Some(zeros.len() as u32)
}

/// `has_kitchen_furniture` -> `HasKitchenFurniture`.
pub fn camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
