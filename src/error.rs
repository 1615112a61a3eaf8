//! Rich diagnostic error types for the seshat engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it. Rule-DSL compilation errors live in
//! [`crate::rule::error`] next to the compiler passes that raise them.

use miette::Diagnostic;
use thiserror::Error;

use crate::fact::FactId;
use crate::rule::error::CompileError;

/// Top-level error type for the seshat engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum SeshatError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fact(#[from] FactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Fact errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FactError {
    #[error("confidence {confidence} is outside [0.0, 1.0]")]
    #[diagnostic(
        code(seshat::fact::invalid_confidence),
        help(
            "Fact confidence must be a finite value between 0.0 and 1.0 inclusive. \
             Asserted facts default to 1.0 when no confidence is given."
        )
    )]
    InvalidConfidence { confidence: f32 },

    #[error("fact allocator exhausted: cannot allocate more than u64::MAX facts")]
    #[diagnostic(
        code(seshat::fact::exhausted),
        help(
            "The fact ID space is exhausted. This is extremely unlikely in \
             practice (requires 2^64 allocations). If you see this error, \
             something is very wrong — check for ID allocation loops."
        )
    )]
    AllocatorExhausted,
}

// ---------------------------------------------------------------------------
// Store errors (external collaborator boundary)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("fact store unavailable: {message}")]
    #[diagnostic(
        code(seshat::store::unavailable),
        help(
            "The external fact store could not be reached. A run aborts before \
             any mutation when the load fails; retry once the store is back."
        )
    )]
    Unavailable { message: String },

    #[error("schema mismatch: {message}")]
    #[diagnostic(
        code(seshat::store::schema_mismatch),
        help(
            "The store rejected a fact that does not fit its schema. \
             Re-read the schema with `Engine::schema` and recompile rules \
             that reference renamed types."
        )
    )]
    SchemaMismatch { message: String },

    #[error("fact not found: {fact_id}")]
    #[diagnostic(
        code(seshat::store::not_found),
        help("The requested fact does not exist in this scope. Verify the fact ID.")
    )]
    NotFound { fact_id: FactId },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(
        "persisted {persisted} derived fact(s) but {} failed to persist",
        .unpersisted.len()
    )]
    #[diagnostic(
        code(seshat::engine::persist_incomplete),
        help(
            "Derivation completed but some facts could not be written to the \
             fact store. The unpersisted facts are enumerated on this error; \
             retry persistence without recomputing the run."
        )
    )]
    PersistIncomplete {
        persisted: usize,
        /// IDs of derived facts that were computed but never persisted.
        unpersisted: Vec<FactId>,
        #[source]
        source: StoreError,
    },

    #[error("rule not found: {rule_id}")]
    #[diagnostic(
        code(seshat::engine::rule_not_found),
        help("No rule with this ID is registered. List rules via `Engine::rules`.")
    )]
    RuleNotFound { rule_id: crate::rule::RuleId },

    #[error("rule \"{name}\" failed to compile with {} error(s)", .errors.len())]
    #[diagnostic(
        code(seshat::engine::compile_failed),
        help("Each compile error is attached below with its own code and location.")
    )]
    CompileFailed {
        name: String,
        #[related]
        errors: Vec<CompileError>,
    },
}

/// Convenience alias for functions returning seshat results.
pub type SeshatResult<T> = std::result::Result<T, SeshatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_error_converts_to_seshat_error() {
        let err = FactError::InvalidConfidence { confidence: 2.0 };
        let top: SeshatError = err.into();
        assert!(matches!(
            top,
            SeshatError::Fact(FactError::InvalidConfidence { .. })
        ));
    }

    #[test]
    fn store_error_converts_to_seshat_error() {
        let err = StoreError::Unavailable {
            message: "connection refused".into(),
        };
        let top: SeshatError = err.into();
        assert!(matches!(top, SeshatError::Store(StoreError::Unavailable { .. })));
    }

    #[test]
    fn persist_incomplete_counts_unpersisted() {
        let err = EngineError::PersistIncomplete {
            persisted: 2,
            unpersisted: vec![FactId::new(9).unwrap(), FactId::new(10).unwrap()],
            source: StoreError::Unavailable {
                message: "timeout".into(),
            },
        };
        let msg = format!("{err}");
        assert!(msg.contains('2'), "{msg}");
        assert!(msg.contains("failed to persist"), "{msg}");
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = FactError::InvalidConfidence { confidence: -0.5 };
        assert!(format!("{err}").contains("-0.5"));
    }
}
