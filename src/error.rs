//! Unified engine error model.
//! Every variant is terminal for the request that produced it: the engine
//! never retries internally and never returns a partial pipeline result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Download failed: network, timeout or non-success HTTP status.
    #[error("download failed for resource {resource_id}: {message}")]
    Transport { resource_id: u64, message: String },

    /// Declared or sniffed format is outside the supported set, or the
    /// catalog entry is not a downloadable file.
    #[error("resource {resource_id} is not usable as tabular data: {message}")]
    UnsupportedFormat { resource_id: u64, message: String },

    /// The cached file could not be read as its claimed format.
    #[error("cannot read resource {resource_id} as {format}: {message}")]
    SchemaRead {
        resource_id: u64,
        format: String,
        message: String,
    },

    /// Filter expression (after alias rewriting) uses syntax outside the
    /// sanctioned grammar, or an operation spec field failed validation.
    #[error("invalid expression '{expression}': {message}")]
    Translation { expression: String, message: String },

    /// A referenced column resolved to nothing: the alias was out of range
    /// and the literal token is not a real column either.
    #[error("unknown column '{column}' in {stage} stage")]
    UnknownColumn { column: String, stage: String },

    /// Stage-level execution failure: type mismatch in an aggregation,
    /// invalid predicate operand, and similar.
    #[error("execution failed for resource {resource_id} in {stage}: {message}")]
    Exec {
        resource_id: u64,
        stage: String,
        message: String,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn transport<S: Into<String>>(resource_id: u64, msg: S) -> Self {
        EngineError::Transport { resource_id, message: msg.into() }
    }

    pub fn unsupported<S: Into<String>>(resource_id: u64, msg: S) -> Self {
        EngineError::UnsupportedFormat { resource_id, message: msg.into() }
    }

    pub fn schema_read<S: Into<String>>(resource_id: u64, format: S, msg: S) -> Self {
        EngineError::SchemaRead { resource_id, format: format.into(), message: msg.into() }
    }

    pub fn translation<S: Into<String>>(expression: S, msg: S) -> Self {
        EngineError::Translation { expression: expression.into(), message: msg.into() }
    }

    pub fn unknown_column<S: Into<String>>(column: S, stage: S) -> Self {
        EngineError::UnknownColumn { column: column.into(), stage: stage.into() }
    }

    pub fn exec<S: Into<String>>(resource_id: u64, stage: S, msg: S) -> Self {
        EngineError::Exec { resource_id, stage: stage.into(), message: msg.into() }
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        EngineError::Internal { message: msg.into() }
    }

    /// Stable short tag for result envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Transport { .. } => "transport_error",
            EngineError::UnsupportedFormat { .. } => "unsupported_format",
            EngineError::SchemaRead { .. } => "schema_read_error",
            EngineError::Translation { .. } => "translation_error",
            EngineError::UnknownColumn { .. } => "unknown_column",
            EngineError::Exec { .. } => "execution_error",
            EngineError::Internal { .. } => "internal_error",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal { message: err.to_string() }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags() {
        assert_eq!(EngineError::transport(7, "timed out").kind(), "transport_error");
        assert_eq!(EngineError::unknown_column("colx", "sort").kind(), "unknown_column");
        assert_eq!(EngineError::translation("a ;; b", "bad token").kind(), "translation_error");
    }

    #[test]
    fn messages_carry_context() {
        let e = EngineError::exec(42, "group_aggregate", "cannot sum a string column");
        let s = e.to_string();
        assert!(s.contains("42"));
        assert!(s.contains("group_aggregate"));
    }
}
