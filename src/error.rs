use thiserror::Error;

/// Registry loading failures. Always fatal: no feed can be built without a registry.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("cannot read registry {path}: {message}")]
    Read { path: String, message: String },

    /// Line-level syntax problem; `content` is the offending line as written.
    #[error("registry syntax error on line {line}: {message}: `{content}`")]
    Syntax {
        line: usize,
        content: String,
        message: String,
    },

    #[error("registry structure error at `{at}`: {message}")]
    Structure { at: String, message: String },

    #[error("unknown field `{name}` referenced at `{at}`")]
    UnknownField { name: String, at: String },

    #[error("invalid output path `{path}` at `{at}`")]
    InvalidPath { path: String, at: String },

    #[error("category `{code}` extends unknown or cyclic parent `{parent}`")]
    Extends { code: String, parent: String },
}

impl ConfigError {
    pub(crate) fn structure(at: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Structure {
            at: at.into(),
            message: message.into(),
        }
    }
}

/// Problems decoding a listing from JSON or SQLite into the closed schema.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown listing attribute `{0}`")]
    UnknownField(String),

    #[error("attribute `{field}` expects {expected}, got `{value}`")]
    InvalidValue {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("invalid photo entry: {0}")]
    Photo(String),
}

/// Per-record conversion failure. The assembler skips the record and keeps going.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// Resolved category code has no registry table; the record is left out.
    #[error("no category table for `{code}`")]
    Unmapped { code: String },

    /// Listing failed to decode from its source; it never reached the mapper.
    #[error("invalid listing: {reason}")]
    Invalid { reason: String },

    #[error("attribute `{field}`: cannot read `{value}` as a decimal ({reason})")]
    Decimal {
        field: &'static str,
        value: String,
        reason: String,
    },
}
