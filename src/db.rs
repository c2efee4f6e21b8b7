use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};
use tracing::debug;

use crate::error::RecordError;
use crate::record::{Decoded, Field, FieldKind, Photo, Record, Rejected, Value};

/// Marketplace a listing is flagged for. Both share one feed dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Marketplace {
    Cian,
    Domclick,
}

impl Marketplace {
    fn export_column(self) -> Field {
        match self {
            Marketplace::Cian => Field::ExportToCian,
            Marketplace::Domclick => Field::ExportToDomclick,
        }
    }
}

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Connect and make sure the schema exists, so a fresh file reads as empty.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = connect(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Bool | FieldKind::Int => "INTEGER",
        // Decimals are stored as text.
        FieldKind::Text | FieldKind::Decimal | FieldKind::Collection => "TEXT",
    }
}

/// `properties` gets one column per scalar attribute.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let columns: String = Field::ALL
        .iter()
        .filter(|f| f.kind() != FieldKind::Collection)
        .map(|f| format!(",\n            {} {}", f.name(), column_type(f.kind())))
        .collect();
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS properties (
            id         INTEGER PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now')){columns}
        );
        CREATE INDEX IF NOT EXISTS idx_properties_archived ON properties(is_archived);

        CREATE TABLE IF NOT EXISTS photos (
            id          INTEGER PRIMARY KEY,
            property_id INTEGER NOT NULL REFERENCES properties(id),
            url         TEXT NOT NULL,
            is_default  BOOLEAN NOT NULL DEFAULT 0,
            sort        INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_photos_property ON photos(property_id);
        "
    ))?;
    Ok(())
}

fn read_value(field: Field, raw: ValueRef<'_>) -> Result<Option<Value>, RecordError> {
    let invalid = |value: String| RecordError::InvalidValue {
        field: field.name(),
        expected: field.kind().describe(),
        value,
    };
    let value = match (raw, field.kind()) {
        (ValueRef::Null, _) => return Ok(None),
        (ValueRef::Integer(i), FieldKind::Bool) => Value::Bool(i != 0),
        (ValueRef::Integer(i), FieldKind::Int) => Value::Int(i),
        (ValueRef::Integer(i), _) => Value::parse(field, &i.to_string())?,
        (ValueRef::Real(r), FieldKind::Int) if r.fract() == 0.0 => Value::Int(r as i64),
        (ValueRef::Real(r), FieldKind::Text | FieldKind::Decimal) => Value::parse(field, &r.to_string())?,
        (ValueRef::Real(r), _) => return Err(invalid(r.to_string())),
        (ValueRef::Text(bytes), _) => {
            let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
            Value::parse(field, text)?
        }
        (ValueRef::Blob(_), _) => return Err(invalid("<blob>".to_string())),
    };
    Ok(Some(value))
}

/// Decode one row. Every column is read even after a failure so the
/// rejection still carries the external id.
fn decode_row(row: &Row<'_>, columns: &[(usize, Field)]) -> rusqlite::Result<Decoded> {
    let mut record = Record::new();
    let mut failure: Option<RecordError> = None;
    for (idx, field) in columns {
        let read = read_value(*field, row.get_ref(*idx)?)
            .and_then(|value| value.map_or(Ok(()), |v| record.set(*field, v)));
        if let Err(e) = read {
            failure = failure.or(Some(e));
        }
    }
    Ok(match failure {
        None => Ok(record),
        Some(err) => Err(Rejected {
            external_id: record.external_id(),
            reason: err.to_string(),
        }),
    })
}

/// Active listings flagged for `marketplace`, ordered by id, with photos
/// attached. A row that does not fit the schema comes back as `Err(Rejected)`
/// in its place; only database failures abort the fetch.
pub fn fetch_records(conn: &Connection, marketplace: Marketplace) -> Result<Vec<Decoded>> {
    let sql = format!(
        "SELECT * FROM properties
         WHERE {} = 1 AND COALESCE(is_archived, 0) = 0
         ORDER BY id",
        marketplace.export_column().name()
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut id_idx = None;
    let mut columns = Vec::new();
    for (idx, name) in stmt.column_names().into_iter().enumerate() {
        if name == "id" {
            id_idx = Some(idx);
        }
        match name.parse::<Field>() {
            Ok(field) if field.kind() != FieldKind::Collection => columns.push((idx, field)),
            _ => debug!(column = name, "column not in listing schema"),
        }
    }
    let id_idx = id_idx.ok_or_else(|| anyhow::anyhow!("properties table has no id column"))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(id_idx)?, decode_row(row, &columns)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let positions: HashMap<i64, usize> = rows.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
    let mut records: Vec<Decoded> = rows.into_iter().map(|(_, r)| r).collect();

    let mut stmt = conn.prepare(
        "SELECT property_id, url, is_default, sort FROM photos ORDER BY property_id, id",
    )?;
    let photos = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Photo {
                    url: row.get(1)?,
                    is_default: row.get(2)?,
                    sort: row.get(3)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (property_id, photo) in photos {
        if let Some(Ok(record)) = positions.get(&property_id).map(|&pos| &mut records[pos]) {
            record.push_photo(photo);
        }
    }
    Ok(records)
}
