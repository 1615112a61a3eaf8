//! seshat: a forward-chaining inference engine over a mutable fact graph.
//!
//! Rules are authored in a small pattern DSL, compiled through lex, parse,
//! semantic analysis, and code generation into flat instruction lists, and
//! evaluated to fixpoint against an indexed working memory. Every derived
//! fact is recorded in a provenance DAG, so any conclusion can be explained
//! back to its asserted premises and any retraction cascades through exactly
//! the facts that depended on it. External graph changes re-derive
//! incrementally: only the rules reading the touched names run, and only
//! over the changed neighborhood.
//!
//! The [`engine::Engine`] facade ties it together:
//!
//! ```
//! use std::sync::Arc;
//! use seshat::chain::ChainOptions;
//! use seshat::engine::Engine;
//! use seshat::fact::{FactBody, Scope};
//! use seshat::rule::{RuleId, grandparent_inference};
//! use seshat::store::MemoryFactStore;
//!
//! # fn main() -> Result<(), seshat::error::SeshatError> {
//! let engine = Engine::new(Arc::new(MemoryFactStore::new()));
//! engine.upsert_rule(grandparent_inference(RuleId::new(1).unwrap()))?;
//!
//! let scope = Scope::Global;
//! engine.assert_fact(FactBody::relationship("alice", "PARENT_OF", "bob"), &scope)?;
//! engine.assert_fact(FactBody::relationship("bob", "PARENT_OF", "carol"), &scope)?;
//!
//! let run = engine.infer(&scope, &ChainOptions::default())?;
//! assert_eq!(run.facts_derived, 1);
//!
//! let why = engine.explain(run.derived[0].id).unwrap();
//! assert_eq!(why.rule_name, "Grandparent Inference");
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod engine;
pub mod error;
pub mod event;
pub mod fact;
pub mod incremental;
pub mod memory;
pub mod provenance;
pub mod rule;
pub mod store;

pub use engine::{Engine, InferenceRun};
pub use error::{SeshatError, SeshatResult};
pub use fact::{Fact, FactBody, FactId, Scope};
