//! Forward chaining to fixpoint.
//!
//! Naive semi-exhaustive evaluation: every iteration walks the agenda in
//! priority order, evaluates each rule's condition instructions against
//! working memory, and admits the conclusions that state something new.
//! Iteration stops at fixpoint (an iteration that admits nothing), at the
//! iteration cap, on timeout, or on cancellation.
//!
//! Derived facts carry a confidence equal to the product of their premise
//! confidences and a depth of 1 + the deepest derived premise. Conclusions
//! exceeding the depth cap are discarded with a warning rather than failing
//! the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::fact::{
    AtomicFactIdAllocator, EntityId, Fact, FactBody, FactId, FactPattern, PropertyValue,
    TYPE_PROPERTY,
};
use crate::memory::WorkingMemory;
use crate::rule::{CompareOp, CompiledRule, CondInstr, DeriveInstr, Operand, RuleId, Term, ValueTerm};

/// Tunables for one reasoning run.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Fixpoint iteration cap. Hitting it with facts still flowing reports
    /// [`InferenceStatus::CycleDetected`].
    pub max_iterations: u32,
    /// Derivation depth cap; deeper conclusions are discarded with a warning.
    pub max_depth: u32,
    /// Wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Evaluate and report without persisting or recording provenance.
    pub dry_run: bool,
    /// Cooperative cancellation flag, checked at iteration boundaries and
    /// around fact store access.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ChainOptions {
    /// Whether the cancellation flag has been raised.
    pub fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_depth: 10,
            timeout: Duration::from_secs(30),
            dry_run: false,
            cancel: None,
        }
    }
}

/// How a reasoning run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    /// Fixpoint reached.
    Success,
    /// Stopped early (timeout); results so far are valid.
    PartialSuccess,
    /// Iteration cap hit with facts still being derived.
    CycleDetected,
    /// A systemic failure (such as fact ID allocation) stopped the run.
    RuleError,
    /// Cancelled cooperatively.
    Cancelled,
}

/// A non-fatal finding from a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainWarning {
    pub message: String,
    /// The rule being evaluated, when attributable.
    pub rule: Option<RuleId>,
}

impl std::fmt::Display for ChainWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.rule {
            Some(rule) => write!(f, "{} ({rule})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// One derived fact together with what produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub fact: Fact,
    pub rule: RuleId,
    pub rule_name: String,
    /// Premise fact IDs, deduplicated, in ascending order.
    pub premises: Vec<FactId>,
}

/// Everything a run produced, before persistence.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub status: InferenceStatus,
    pub derivations: Vec<Derivation>,
    pub warnings: Vec<ChainWarning>,
    pub iterations: u32,
    pub rules_evaluated: usize,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Evaluation state
// ---------------------------------------------------------------------------

/// A value bound to a variable during condition evaluation. Entities and
/// property values live in one namespace; an entity compares as its ID string.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Entity(EntityId),
    Value(PropertyValue),
}

impl Bound {
    /// The entity ID, if this binding can stand in an entity position.
    fn as_entity(&self) -> Option<&str> {
        match self {
            Bound::Entity(id) => Some(id),
            Bound::Value(PropertyValue::Str(s)) => Some(s),
            Bound::Value(_) => None,
        }
    }

    /// The binding as a property value.
    fn as_value(&self) -> PropertyValue {
        match self {
            Bound::Entity(id) => PropertyValue::Str(id.clone()),
            Bound::Value(v) => v.clone(),
        }
    }
}

type Binding = BTreeMap<String, Bound>;

/// One partial solution: a consistent binding plus the facts that justify it.
#[derive(Debug, Clone)]
struct Candidate {
    binding: Binding,
    premises: Vec<FactId>,
}

impl Candidate {
    fn root() -> Self {
        Self {
            binding: Binding::new(),
            premises: Vec::new(),
        }
    }

    /// Extend with a new variable binding; fails on conflict.
    fn bind(&self, var: &str, value: Bound) -> Option<Self> {
        match self.binding.get(var) {
            Some(existing) if *existing != value => None,
            Some(_) => Some(self.clone()),
            None => {
                let mut next = self.clone();
                next.binding.insert(var.to_string(), value);
                Some(next)
            }
        }
    }

    fn with_premise(mut self, fact_id: FactId) -> Self {
        self.premises.push(fact_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Chainer
// ---------------------------------------------------------------------------

/// Runs agendas of compiled rules against a working memory until fixpoint.
pub struct ForwardChainer<'a> {
    memory: &'a WorkingMemory,
    allocator: &'a AtomicFactIdAllocator,
    options: &'a ChainOptions,
}

impl<'a> ForwardChainer<'a> {
    pub fn new(
        memory: &'a WorkingMemory,
        allocator: &'a AtomicFactIdAllocator,
        options: &'a ChainOptions,
    ) -> Self {
        Self {
            memory,
            allocator,
            options,
        }
    }

    /// Run the agenda to fixpoint. Working memory is mutated in place; the
    /// outcome lists every admitted derivation for persistence and
    /// provenance recording.
    pub fn run(&self, agenda: &[Arc<CompiledRule>]) -> ChainOutcome {
        let start = Instant::now();
        let mut derivations: Vec<Derivation> = Vec::new();
        let mut warnings: Vec<ChainWarning> = Vec::new();
        let mut rules_evaluated = 0usize;
        let mut status = InferenceStatus::Success;
        let mut iterations = 0u32;

        'fixpoint: while iterations < self.options.max_iterations {
            if self.cancelled() {
                status = InferenceStatus::Cancelled;
                break;
            }
            if start.elapsed() >= self.options.timeout {
                warnings.push(ChainWarning {
                    message: format!(
                        "timeout after {:?}; results so far are valid but incomplete",
                        self.options.timeout
                    ),
                    rule: None,
                });
                status = InferenceStatus::PartialSuccess;
                break;
            }

            iterations += 1;
            let mut admitted_this_iteration = 0usize;

            for rule in agenda {
                rules_evaluated += 1;
                let candidates = self.evaluate_conditions(rule);
                trace!(rule = %rule.rule_id, candidates = candidates.len(), "rule evaluated");

                for candidate in candidates {
                    for conclusion in &rule.conclusions {
                        let body = match self.materialize(conclusion, &candidate.binding) {
                            Ok(body) => body,
                            // Runtime type mismatch: this conclusion is
                            // skipped, the run itself stays valid.
                            Err(message) => {
                                warnings.push(ChainWarning {
                                    message,
                                    rule: Some(rule.rule_id),
                                });
                                continue;
                            }
                        };
                        if self.memory.contains_body(&body) {
                            continue;
                        }

                        let (confidence, depth, premises) = self.justification(&candidate);
                        if depth > self.options.max_depth {
                            warnings.push(ChainWarning {
                                message: format!(
                                    "conclusion {body} at depth {depth} exceeds the depth cap {}; discarded",
                                    self.options.max_depth
                                ),
                                rule: Some(rule.rule_id),
                            });
                            continue;
                        }

                        let id = match self.allocator.next_id() {
                            Ok(id) => id,
                            Err(err) => {
                                warnings.push(ChainWarning {
                                    message: format!("fact ID allocation failed: {err}"),
                                    rule: Some(rule.rule_id),
                                });
                                status = InferenceStatus::RuleError;
                                break 'fixpoint;
                            }
                        };
                        let fact = match Fact::derived(
                            id,
                            body,
                            confidence,
                            rule.rule_id,
                            unix_now(),
                            depth,
                        ) {
                            Ok(fact) => fact,
                            Err(err) => {
                                warnings.push(ChainWarning {
                                    message: format!("conclusion rejected: {err}"),
                                    rule: Some(rule.rule_id),
                                });
                                continue;
                            }
                        };

                        if self.memory.insert(fact.clone()) {
                            debug!(fact = %fact.body, rule = %rule.rule_id, depth, "fact derived");
                            derivations.push(Derivation {
                                fact,
                                rule: rule.rule_id,
                                rule_name: rule.name.clone(),
                                premises,
                            });
                            admitted_this_iteration += 1;
                        }
                    }
                }
            }

            if admitted_this_iteration == 0 {
                break;
            }
            if iterations == self.options.max_iterations {
                // Still deriving when the cap ran out; likely a cycle.
                warnings.push(ChainWarning {
                    message: format!(
                        "iteration cap {} reached with facts still being derived",
                        self.options.max_iterations
                    ),
                    rule: None,
                });
                status = InferenceStatus::CycleDetected;
            }
        }

        ChainOutcome {
            status,
            derivations,
            warnings,
            iterations,
            rules_evaluated,
            duration: start.elapsed(),
        }
    }

    fn cancelled(&self) -> bool {
        self.options.cancel_requested()
    }

    /// Evaluate a rule's condition instructions, threading a set of partial
    /// candidates through each one.
    fn evaluate_conditions(&self, rule: &CompiledRule) -> Vec<Candidate> {
        let mut candidates = vec![Candidate::root()];
        for instr in &rule.conditions {
            if candidates.is_empty() {
                return candidates;
            }
            candidates = match instr {
                CondInstr::MatchRelationship {
                    source,
                    relation,
                    target,
                } => self.match_relationship(&candidates, source, relation, target),
                CondInstr::MatchType { var, entity_type } => {
                    self.match_type(&candidates, var, entity_type)
                }
                CondInstr::MatchProperty {
                    entity,
                    name,
                    value,
                } => self.match_property(&candidates, entity, name, value),
                CondInstr::Negate(inner) => candidates
                    .into_iter()
                    .filter(|c| !self.instr_holds(inner, &c.binding))
                    .collect(),
                CondInstr::Compare { left, op, right } => candidates
                    .into_iter()
                    .filter(|c| compare_holds(left, *op, right, &c.binding))
                    .collect(),
            };
        }
        candidates
    }

    fn match_relationship(
        &self,
        candidates: &[Candidate],
        source: &Term,
        relation: &str,
        target: &Term,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for candidate in candidates {
            let pattern = FactPattern::Relationship {
                source: resolve_term(source, &candidate.binding),
                relation: Some(relation.to_string()),
                target: resolve_term(target, &candidate.binding),
            };
            for fact in self.memory.candidates(&pattern) {
                let FactBody::Relationship {
                    source: fs,
                    target: ft,
                    ..
                } = &fact.body
                else {
                    continue;
                };
                let Some(next) = bind_term(candidate, source, fs)
                    .and_then(|c| bind_term(&c, target, ft))
                else {
                    continue;
                };
                out.push(next.with_premise(fact.id));
            }
        }
        out
    }

    fn match_type(
        &self,
        candidates: &[Candidate],
        var: &str,
        entity_type: &str,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for candidate in candidates {
            let entity = candidate
                .binding
                .get(var)
                .and_then(|b| b.as_entity().map(str::to_string));
            let pattern = FactPattern::Property {
                entity,
                name: Some(TYPE_PROPERTY.to_string()),
                value: Some(PropertyValue::Str(entity_type.to_string())),
            };
            for fact in self.memory.candidates(&pattern) {
                let FactBody::Property { entity, .. } = &fact.body else {
                    continue;
                };
                let Some(next) = candidate.bind(var, Bound::Entity(entity.clone())) else {
                    continue;
                };
                out.push(next.with_premise(fact.id));
            }
        }
        out
    }

    fn match_property(
        &self,
        candidates: &[Candidate],
        entity: &Term,
        name: &str,
        value: &ValueTerm,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for candidate in candidates {
            let pattern = FactPattern::Property {
                entity: resolve_term(entity, &candidate.binding),
                name: Some(name.to_string()),
                value: resolve_value_term(value, &candidate.binding),
            };
            for fact in self.memory.candidates(&pattern) {
                let FactBody::Property {
                    entity: fe,
                    value: fv,
                    ..
                } = &fact.body
                else {
                    continue;
                };
                let Some(next) = bind_term(candidate, entity, fe)
                    .and_then(|c| bind_value_term(&c, value, fv))
                else {
                    continue;
                };
                out.push(next.with_premise(fact.id));
            }
        }
        out
    }

    /// Whether a (fully bound) instruction matches anything in memory.
    /// Negation support; validation guarantees no unbound variables here.
    fn instr_holds(&self, instr: &CondInstr, binding: &Binding) -> bool {
        match instr {
            CondInstr::MatchRelationship {
                source,
                relation,
                target,
            } => self.memory.matches_any(&FactPattern::Relationship {
                source: resolve_term(source, binding),
                relation: Some(relation.to_string()),
                target: resolve_term(target, binding),
            }),
            CondInstr::MatchType { var, entity_type } => {
                self.memory.matches_any(&FactPattern::Property {
                    entity: binding
                        .get(var)
                        .and_then(|b| b.as_entity().map(str::to_string)),
                    name: Some(TYPE_PROPERTY.to_string()),
                    value: Some(PropertyValue::Str(entity_type.to_string())),
                })
            }
            CondInstr::MatchProperty {
                entity,
                name,
                value,
            } => self.memory.matches_any(&FactPattern::Property {
                entity: resolve_term(entity, binding),
                name: Some(name.to_string()),
                value: resolve_value_term(value, binding),
            }),
            CondInstr::Negate(inner) => !self.instr_holds(inner, binding),
            CondInstr::Compare { left, op, right } => compare_holds(left, *op, right, binding),
        }
    }

    /// Confidence, depth, and ordered premise list for a complete candidate.
    fn justification(&self, candidate: &Candidate) -> (f32, u32, Vec<FactId>) {
        let mut premises: Vec<FactId> = candidate.premises.clone();
        premises.sort();
        premises.dedup();

        let mut confidence = 1.0f32;
        let mut max_depth = 0u32;
        for premise in &premises {
            if let Some(fact) = self.memory.get(*premise) {
                confidence *= fact.confidence;
                max_depth = max_depth.max(fact.depth());
            }
        }
        (confidence, max_depth + 1, premises)
    }

    /// Build the concluded fact body from a complete binding.
    fn materialize(&self, instr: &DeriveInstr, binding: &Binding) -> Result<FactBody, String> {
        match instr {
            DeriveInstr::Relationship {
                source,
                relation,
                target,
            } => Ok(FactBody::Relationship {
                source: entity_from_term(source, binding)?,
                relation: relation.clone(),
                target: entity_from_term(target, binding)?,
            }),
            DeriveInstr::Property {
                entity,
                name,
                value,
            } => Ok(FactBody::Property {
                entity: entity_from_term(entity, binding)?,
                name: name.clone(),
                value: match value {
                    ValueTerm::Const(v) => v.clone(),
                    ValueTerm::Var(var) => binding
                        .get(var)
                        .map(Bound::as_value)
                        .ok_or_else(|| format!("conclusion variable ?{var} is unbound"))?,
                },
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Binding helpers
// ---------------------------------------------------------------------------

fn entity_from_term(term: &Term, binding: &Binding) -> Result<EntityId, String> {
    match term {
        Term::Entity(id) => Ok(id.clone()),
        Term::Var(var) => match binding.get(var) {
            Some(bound) => bound
                .as_entity()
                .map(str::to_string)
                .ok_or_else(|| format!("variable ?{var} holds a non-entity value")),
            None => Err(format!("conclusion variable ?{var} is unbound")),
        },
    }
}

fn resolve_term(term: &Term, binding: &Binding) -> Option<EntityId> {
    match term {
        Term::Entity(id) => Some(id.clone()),
        Term::Var(var) => binding
            .get(var)
            .and_then(|b| b.as_entity().map(str::to_string)),
    }
}

fn resolve_value_term(term: &ValueTerm, binding: &Binding) -> Option<PropertyValue> {
    match term {
        ValueTerm::Const(v) => Some(v.clone()),
        ValueTerm::Var(var) => binding.get(var).map(Bound::as_value),
    }
}

fn bind_term(candidate: &Candidate, term: &Term, entity: &EntityId) -> Option<Candidate> {
    match term {
        // Literal positions were already constrained by the pattern.
        Term::Entity(_) => Some(candidate.clone()),
        Term::Var(var) => candidate.bind(var, Bound::Entity(entity.clone())),
    }
}

fn bind_value_term(
    candidate: &Candidate,
    term: &ValueTerm,
    value: &PropertyValue,
) -> Option<Candidate> {
    match term {
        ValueTerm::Const(_) => Some(candidate.clone()),
        ValueTerm::Var(var) => candidate.bind(var, Bound::Value(value.clone())),
    }
}

fn compare_holds(left: &Operand, op: CompareOp, right: &Operand, binding: &Binding) -> bool {
    let Some(lhs) = resolve_operand(left, binding) else {
        return false;
    };
    let Some(rhs) = resolve_operand(right, binding) else {
        return false;
    };
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
    }
}

fn resolve_operand(operand: &Operand, binding: &Binding) -> Option<PropertyValue> {
    match operand {
        Operand::Const(v) => Some(v.clone()),
        Operand::Var(var) => binding.get(var).map(Bound::as_value),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
