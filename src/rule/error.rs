//! Rich diagnostic error types for the rule DSL compiler.
//!
//! Follows the seshat miette pattern: every error variant carries
//! `#[diagnostic(code(...), help(...))]` so rule authors know exactly what
//! went wrong and how to fix it. Every variant maps to one of the four
//! compiler phases via [`CompileError::phase`]; most carry the line and
//! column of the offending clause for editor feedback.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::lexer::Span;

/// The compiler pass an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilePhase {
    Parse,
    Validate,
    Generate,
    Optimize,
}

impl std::fmt::Display for CompilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilePhase::Parse => write!(f, "parse"),
            CompilePhase::Validate => write!(f, "validate"),
            CompilePhase::Generate => write!(f, "generate"),
            CompilePhase::Optimize => write!(f, "optimize"),
        }
    }
}

/// Errors produced while compiling a rule.
///
/// Lexical errors stop compilation immediately; all other phases accumulate
/// errors so a rule author sees every problem in one round trip.
#[derive(Debug, Clone, Error, Diagnostic, Serialize, Deserialize)]
pub enum CompileError {
    #[error("malformed token at {line}:{column}: {message}")]
    #[diagnostic(
        code(seshat::compile::lex),
        help(
            "The lexer could not form a token here. Variables are `?name`, \
             strings are double-quoted, and relations appear as `-[NAME]->`."
        )
    )]
    Lex {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("parse error at {line}:{column}: {message}")]
    #[diagnostic(
        code(seshat::compile::parse),
        help(
            "The clause did not match any known shape. Condition clauses are \
             `?a -[REL]-> ?b`, `?a TYPE \"T\"`, `?a HAS prop = value`, \
             `NOT <clause>`, or `?a != ?b`; conclusions start with DERIVE."
        )
    )]
    Parse {
        message: String,
        line: u32,
        column: u32,
        /// The offending source line, when available.
        context: Option<String>,
    },

    #[error("variable ?{variable} at {line}:{column} is never bound by a positive condition clause")]
    #[diagnostic(
        code(seshat::compile::unbound_variable),
        help(
            "Every variable used in a conclusion or comparison must be bound by \
             a non-negated condition clause. Add a positive clause that matches \
             ?{variable}."
        )
    )]
    UnboundVariable {
        variable: String,
        line: u32,
        column: u32,
    },

    #[error("self-comparison of ?{variable} at {line}:{column}")]
    #[diagnostic(
        code(seshat::compile::self_comparison),
        help(
            "`?{variable} == ?{variable}` is always true and \
             `?{variable} != ?{variable}` is always false; \
             compare two different variables or a variable and a literal."
        )
    )]
    SelfComparison {
        variable: String,
        line: u32,
        column: u32,
    },

    #[error("negated clause introduces new variable ?{variable} at {line}:{column}")]
    #[diagnostic(
        code(seshat::compile::negation_binds),
        help(
            "Negation checks the absence of a match and cannot establish \
             bindings. Bind ?{variable} in a positive clause first."
        )
    )]
    NegationBinds {
        variable: String,
        line: u32,
        column: u32,
    },

    #[error("condition contains only negated clauses")]
    #[diagnostic(
        code(seshat::compile::all_negative),
        help(
            "At least one positive clause is required: negation alone cannot \
             establish candidate bindings to check against."
        )
    )]
    AllNegative,

    #[error("unknown entity type \"{name}\" at {line}:{column}")]
    #[diagnostic(
        code(seshat::compile::unknown_entity_type),
        help("The schema does not declare this entity type. Check the spelling against the fact store schema.")
    )]
    UnknownEntityType {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("unknown relationship type \"{name}\" at {line}:{column}")]
    #[diagnostic(
        code(seshat::compile::unknown_relationship),
        help("The schema does not declare this relationship type. Check the spelling against the fact store schema.")
    )]
    UnknownRelationship {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("unknown property \"{name}\" at {line}:{column}")]
    #[diagnostic(
        code(seshat::compile::unknown_property),
        help("No entity type in the schema declares this property. Check the spelling against the fact store schema.")
    )]
    UnknownProperty {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("empty {section} text")]
    #[diagnostic(
        code(seshat::compile::empty_section),
        help("Both the condition and the conclusion of a rule must contain at least one clause.")
    )]
    EmptySection {
        /// "condition" or "conclusion".
        section: String,
    },

    #[error("code generation failed: {message}")]
    #[diagnostic(
        code(seshat::compile::generate),
        help("The validated AST could not be lowered to instructions. This is an engine defect; please report it with the rule text.")
    )]
    Generate { message: String },
}

impl CompileError {
    /// The compiler phase this error belongs to.
    pub fn phase(&self) -> CompilePhase {
        match self {
            CompileError::Lex { .. } | CompileError::Parse { .. } => CompilePhase::Parse,
            CompileError::UnboundVariable { .. }
            | CompileError::SelfComparison { .. }
            | CompileError::NegationBinds { .. }
            | CompileError::AllNegative
            | CompileError::UnknownEntityType { .. }
            | CompileError::UnknownRelationship { .. }
            | CompileError::UnknownProperty { .. }
            | CompileError::EmptySection { .. } => CompilePhase::Validate,
            CompileError::Generate { .. } => CompilePhase::Generate,
        }
    }

    pub(crate) fn parse_at(message: impl Into<String>, span: Span, context: Option<String>) -> Self {
        CompileError::Parse {
            message: message.into(),
            line: span.line,
            column: span.column,
            context,
        }
    }
}

/// Result type for compiler internals that accumulate errors.
pub type CompileResult<T> = std::result::Result<T, Vec<CompileError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_assigned() {
        let lex = CompileError::Lex {
            message: "stray '#'".into(),
            line: 1,
            column: 2,
        };
        assert_eq!(lex.phase(), CompilePhase::Parse);

        let unbound = CompileError::UnboundVariable {
            variable: "x".into(),
            line: 3,
            column: 8,
        };
        assert_eq!(unbound.phase(), CompilePhase::Validate);

        let generate = CompileError::Generate {
            message: "oops".into(),
        };
        assert_eq!(generate.phase(), CompilePhase::Generate);
    }

    #[test]
    fn messages_name_the_offender() {
        let err = CompileError::UnknownEntityType {
            name: "NonExistentType".into(),
            line: 2,
            column: 4,
        };
        assert!(format!("{err}").contains("NonExistentType"));

        let err = CompileError::SelfComparison {
            variable: "a".into(),
            line: 1,
            column: 1,
        };
        assert!(format!("{err}").contains("?a"));
    }
}
