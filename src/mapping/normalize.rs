use super::decimal;
use super::registry::{Registry, Table};
use crate::error::BuildError;
use crate::record::{Field, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Text(String),
    Suppressed,
}

/// Table lookup by raw text, then trimmed, then case-insensitively.
pub fn lookup<'t>(table: &'t Table, raw: &str) -> Option<&'t Option<String>> {
    if let Some(hit) = table.get(raw) {
        return Some(hit);
    }
    let trimmed = raw.trim();
    if let Some(hit) = table.get(trimmed) {
        return Some(hit);
    }
    let lowered = trimmed.to_lowercase();
    table
        .iter()
        .find(|(key, _)| key.trim().to_lowercase() == lowered)
        .map(|(_, target)| target)
}

/// Canonical output text for one attribute value.
///
/// An explicit translation table always wins over the generic rules for the
/// value's kind; a table miss falls through to them.
pub fn normalize(registry: &Registry, field: Field, value: &Value) -> Result<Normalized, BuildError> {
    if let Some(table) = registry.table(field) {
        match lookup(table, &value.as_text()) {
            Some(Some(output)) => return Ok(Normalized::Text(output.clone())),
            Some(None) => return Ok(Normalized::Suppressed),
            None => {}
        }
    }
    Ok(match value {
        Value::Bool(b) => Normalized::Text(b.to_string()),
        Value::Decimal(raw) => Normalized::Text(decimal::canonical(raw).map_err(|reason| {
            BuildError::Decimal {
                field: field.name(),
                value: raw.clone(),
                reason,
            }
        })?),
        Value::Int(i) => Normalized::Text(i.to_string()),
        Value::Text(raw) => Normalized::Text(raw.clone()),
    })
}
