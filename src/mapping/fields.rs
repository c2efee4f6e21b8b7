use std::collections::BTreeSet;

use super::decimal::Decimal;
use super::document::Element;
use super::normalize::{lookup, normalize, Normalized};
use super::registry::Registry;
use crate::error::BuildError;
use crate::record::{Field, Record, Value};

/// Value to export for `field` and the attribute it was actually read from.
///
/// An empty primary yields to a non-empty fallback, then to the registry
/// default. A default has no source attribute. An empty value survives only
/// when the field's table has an entry for it.
fn source_value(record: &Record, registry: &Registry, field: Field) -> Option<(Option<Field>, Value)> {
    let primary = record.get(field);
    if let Some(v) = primary.filter(|v| !v.is_empty()) {
        return Some((Some(field), v.clone()));
    }
    let fallback = registry
        .fallback(field)
        .and_then(|fb| record.get(fb).filter(|v| !v.is_empty()).map(|v| (fb, v)));
    if let Some((fb, v)) = fallback {
        return Some((Some(fb), v.clone()));
    }
    if let Some(default) = registry.default_value(field) {
        return Some((None, default.clone()));
    }
    let value = primary?;
    let table = registry.table(field)?;
    lookup(table, &value.as_text())?;
    Some((Some(field), value.clone()))
}

/// Re-express a value or its unit through the registry's unit conversions.
fn convert(record: &Record, registry: &Registry, field: Field, value: Value) -> Result<Value, BuildError> {
    let unit_matches = |unit_field: Field, from: &str| {
        record
            .text(unit_field)
            .is_some_and(|u| u.to_lowercase() == from)
    };

    if let Some(conversion) = registry.conversion(field) {
        if unit_matches(conversion.unit_field, conversion.from.as_str()) {
            let raw = value.as_text();
            let parsed = Decimal::parse(&raw).map_err(|reason| BuildError::Decimal {
                field: field.name(),
                value: raw.to_string(),
                reason,
            })?;
            return Ok(Value::Decimal(parsed.shift_down(conversion.power).to_string()));
        }
    }
    if let Some(conversion) = registry.conversion_by_unit(field) {
        if unit_matches(field, conversion.from.as_str()) {
            return Ok(Value::Text(conversion.to.clone()));
        }
    }
    Ok(value)
}

/// Emit every declared field for `code` into `object`, in processing order
/// (common, deal terms, category table). Returns the attributes consumed.
pub fn process(
    record: &Record,
    registry: &Registry,
    code: &str,
    object: &mut Element,
) -> Result<BTreeSet<Field>, BuildError> {
    let mut exported: BTreeSet<Field> = BTreeSet::new();
    let Some(plan) = registry.plan(code) else {
        return Ok(exported);
    };
    // Mapped fields that produced output; `requires` checks against this.
    let mut emitted: BTreeSet<Field> = BTreeSet::new();

    for (_, section) in plan {
        for rule in &section.fields {
            let Some((source, value)) = source_value(record, registry, rule.field) else {
                continue;
            };
            let value = convert(record, registry, rule.field, value)?;
            let Normalized::Text(text) = normalize(registry, rule.field, &value)? else {
                continue;
            };

            let mut wrote = false;
            for target in &rule.targets {
                if target.requires.is_some_and(|r| !emitted.contains(&r)) {
                    continue;
                }
                wrote |= object.emit(target.path.segments(), &text);
            }
            if wrote {
                emitted.insert(rule.field);
                exported.extend(source);
            }
        }

        for flag in &section.flags {
            if record.flag(flag.field) && object.emit(&[flag.tag.as_str()], "true") {
                emitted.insert(flag.field);
                exported.insert(flag.field);
            }
        }
    }
    Ok(exported)
}
