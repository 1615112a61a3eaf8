//! Inference rules and the DSL compiler.
//!
//! A rule arrives as DSL text ([`InferenceRule`]) and is lowered through four
//! passes — lex, parse, semantic analysis, code generation — into a
//! [`CompiledRule`]: flat instruction lists the forward chainer interprets
//! directly. Instructions are a tagged-variant sequence, not a virtual
//! machine; there is no dynamic code generation.
//!
//! Pipeline modules:
//! - [`lexer`]: DSL text → tokens with line/column spans (fail-fast)
//! - [`parser`]: tokens → clause ASTs (errors accumulate, per-line recovery)
//! - [`semantic`]: binding analysis + schema validation (errors accumulate)
//! - [`codegen`]: lowering, selectivity reorder, constant folding
//! - [`cache`]: compiled-rule snapshots with atomic generation swap
//! - [`source`]: rule definitions loaded from TOML

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::fact::{EntityId, PropertyValue, Scope};

pub mod cache;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod source;

pub use cache::{RuleCache, RuleSnapshot};
pub use codegen::{CompileOutput, CompileWarning, compile, compile_batch};

/// Unique, niche-optimized identifier for an inference rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RuleId(NonZeroU64);

impl RuleId {
    /// Create a `RuleId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(RuleId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// A named, prioritized condition → conclusion pair, as authored.
///
/// `condition` and `conclusion` hold DSL text; the executable form is the
/// [`CompiledRule`] produced by [`compile`]. On priority ties the lower rule
/// ID runs first, so agenda order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRule {
    pub id: RuleId,
    pub name: String,
    /// `WHEN` clauses, newline-separated (implicit AND).
    pub condition: String,
    /// `THEN` clauses, newline-separated, each an optional `DERIVE` prefix.
    pub conclusion: String,
    /// Higher runs first within an iteration.
    pub priority: i32,
    pub enabled: bool,
    /// Which facts this rule may read.
    pub scope: Scope,
}

impl InferenceRule {
    /// Create an enabled, global-scope rule with priority 0.
    pub fn new(
        id: RuleId,
        name: impl Into<String>,
        condition: impl Into<String>,
        conclusion: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            condition: condition.into(),
            conclusion: conclusion.into(),
            priority: 0,
            enabled: true,
            scope: Scope::Global,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The built-in "Grandparent Inference" rule.
///
/// `?a -[PARENT_OF]-> ?b` and `?b -[PARENT_OF]-> ?c` derive
/// `?a -[GRANDPARENT_OF]-> ?c`.
pub fn grandparent_inference(id: RuleId) -> InferenceRule {
    InferenceRule::new(
        id,
        "Grandparent Inference",
        "?a -[PARENT_OF]-> ?b\n?b -[PARENT_OF]-> ?c",
        "DERIVE ?a -[GRANDPARENT_OF]-> ?c",
    )
}

// ---------------------------------------------------------------------------
// Instruction forms
// ---------------------------------------------------------------------------

/// An entity position in an instruction: a variable or a literal entity ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    Var(String),
    Entity(EntityId),
}

impl Term {
    /// The variable name, if this term is a variable.
    pub fn var(&self) -> Option<&str> {
        match self {
            Term::Var(name) => Some(name),
            Term::Entity(_) => None,
        }
    }
}

/// A property-value position: a variable or a constant value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueTerm {
    Var(String),
    Const(PropertyValue),
}

impl ValueTerm {
    pub fn var(&self) -> Option<&str> {
        match self {
            ValueTerm::Var(name) => Some(name),
            ValueTerm::Const(_) => None,
        }
    }
}

/// Comparison operator in the DSL (`==` / `!=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Ne => write!(f, "!="),
        }
    }
}

/// One side of a comparison instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Var(String),
    Const(PropertyValue),
}

/// One condition instruction. Each source clause lowers to exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CondInstr {
    /// Enumerate relationship facts matching the partially-bound triple.
    MatchRelationship {
        source: Term,
        relation: String,
        target: Term,
    },
    /// Enumerate entities whose `type` property equals `entity_type`.
    MatchType { var: String, entity_type: String },
    /// Enumerate property facts matching entity/name/value.
    MatchProperty {
        entity: Term,
        name: String,
        value: ValueTerm,
    },
    /// Succeeds per candidate binding iff the inner instruction matches nothing.
    Negate(Box<CondInstr>),
    /// Filter candidate bindings by an equality/inequality test.
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

impl CondInstr {
    /// Variables this instruction can introduce when matched positively.
    ///
    /// Negations and comparisons never bind; they only consume.
    pub fn binds(&self) -> Vec<&str> {
        match self {
            CondInstr::MatchRelationship { source, target, .. } => {
                source.var().into_iter().chain(target.var()).collect()
            }
            CondInstr::MatchType { var, .. } => vec![var.as_str()],
            CondInstr::MatchProperty { entity, value, .. } => {
                entity.var().into_iter().chain(value.var()).collect()
            }
            CondInstr::Negate(_) | CondInstr::Compare { .. } => Vec::new(),
        }
    }

    /// All variables mentioned anywhere in this instruction.
    pub fn mentions(&self) -> Vec<&str> {
        match self {
            CondInstr::Negate(inner) => inner.mentions(),
            CondInstr::Compare { left, right, .. } => {
                let mut vars = Vec::new();
                if let Operand::Var(name) = left {
                    vars.push(name.as_str());
                }
                if let Operand::Var(name) = right {
                    vars.push(name.as_str());
                }
                vars
            }
            _ => self.binds(),
        }
    }
}

/// One conclusion instruction: materialize a fact from a complete binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeriveInstr {
    Relationship {
        source: Term,
        relation: String,
        target: Term,
    },
    Property {
        entity: Term,
        name: String,
        value: ValueTerm,
    },
}

impl DeriveInstr {
    /// Variables referenced by this instruction.
    pub fn mentions(&self) -> Vec<&str> {
        match self {
            DeriveInstr::Relationship { source, target, .. } => {
                source.var().into_iter().chain(target.var()).collect()
            }
            DeriveInstr::Property { entity, value, .. } => {
                entity.var().into_iter().chain(value.var()).collect()
            }
        }
    }
}

/// Per-variable compilation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarInfo {
    /// Index of the condition instruction that first binds this variable
    /// (post-reorder).
    pub first_bound_at: usize,
    /// Entity type required by a `TYPE` clause on this variable, if any.
    pub type_constraint: Option<String>,
    /// Whether any conclusion instruction references this variable.
    pub used_in_conclusion: bool,
}

/// Executable, cached artifact of an [`InferenceRule`].
///
/// Invalidated and recompiled whenever the rule text or schema changes.
/// Invariant: every variable a conclusion references appears in `bindings`
/// with `used_in_conclusion = true` — compilation fails otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
    pub rule_id: RuleId,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub scope: Scope,
    /// Condition instructions in execution order (selectivity-reordered).
    pub conditions: Vec<CondInstr>,
    /// Conclusion instructions in source order.
    pub conclusions: Vec<DeriveInstr>,
    /// Variable-binding table.
    pub bindings: BTreeMap<String, VarInfo>,
    /// Relationship types the conditions read (set-intersection test for
    /// incremental rule selection).
    pub referenced_relations: BTreeSet<String>,
    /// Entity types the conditions read.
    pub referenced_entity_types: BTreeSet<String>,
    /// Property names the conditions read.
    pub referenced_properties: BTreeSet<String>,
    /// A constant comparison folded to false; the rule can never fire and is
    /// excluded from chaining.
    pub always_false: bool,
}

impl CompiledRule {
    /// Whether the rule participates in chaining for a run in `run_scope`.
    pub fn fires_in(&self, run_scope: &Scope) -> bool {
        self.enabled && !self.always_false && self.scope.visible_to(run_scope)
    }

    /// Whether any condition reads one of the given touched names.
    ///
    /// Used by the incremental engine to skip rules that cannot be affected
    /// by a change batch.
    pub fn touches(
        &self,
        relations: &BTreeSet<String>,
        entity_types: &BTreeSet<String>,
        properties: &BTreeSet<String>,
    ) -> bool {
        !self.referenced_relations.is_disjoint(relations)
            || !self.referenced_entity_types.is_disjoint(entity_types)
            || !self.referenced_properties.is_disjoint(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<RuleId>>(),
            std::mem::size_of::<RuleId>()
        );
    }

    #[test]
    fn rule_builder_defaults() {
        let rule = InferenceRule::new(RuleId::new(1).unwrap(), "r", "c", "d");
        assert_eq!(rule.priority, 0);
        assert!(rule.enabled);
        assert_eq!(rule.scope, Scope::Global);

        let rule = rule.with_priority(5).disabled();
        assert_eq!(rule.priority, 5);
        assert!(!rule.enabled);
    }

    #[test]
    fn cond_instr_binds() {
        let instr = CondInstr::MatchRelationship {
            source: Term::Var("a".into()),
            relation: "R".into(),
            target: Term::Entity("x".into()),
        };
        assert_eq!(instr.binds(), vec!["a"]);

        let negated = CondInstr::Negate(Box::new(instr));
        assert!(negated.binds().is_empty());
        assert_eq!(negated.mentions(), vec!["a"]);
    }

    #[test]
    fn compare_mentions_both_sides() {
        let instr = CondInstr::Compare {
            left: Operand::Var("a".into()),
            op: CompareOp::Ne,
            right: Operand::Var("b".into()),
        };
        assert!(instr.binds().is_empty());
        assert_eq!(instr.mentions(), vec!["a", "b"]);
    }

    #[test]
    fn grandparent_rule_text() {
        let rule = grandparent_inference(RuleId::new(1).unwrap());
        assert_eq!(rule.name, "Grandparent Inference");
        assert!(rule.condition.contains("PARENT_OF"));
        assert!(rule.conclusion.contains("GRANDPARENT_OF"));
    }
}
