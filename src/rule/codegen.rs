//! Code generation: validated ASTs → condition/conclusion instructions.
//!
//! Lowering is 1:1 — each source clause becomes one instruction in source
//! order. The optimizer then:
//!
//! 1. folds constant-vs-constant comparisons to an immediate true/false —
//!    a false fold marks the whole rule always-false (excluded from chaining,
//!    with a warning) and drops the now-unreachable instructions;
//! 2. reorders condition instructions so the ones binding the most distinct
//!    new variables execute earliest (greedy selectivity heuristic, not
//!    optimal). Negations and comparisons bind nothing, so they naturally
//!    sink behind the positive clauses that feed them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::CompileError;
use super::lexer::Span;
use super::parser::{self, ConclusionClause, ConditionClause};
use super::semantic::{self, SemanticInfo};
use super::{
    CompareOp, CompiledRule, CondInstr, DeriveInstr, InferenceRule, Operand, VarInfo,
};
use crate::fact::TYPE_PROPERTY;
use crate::store::SchemaView;

/// A non-fatal finding from compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileWarning {
    pub message: String,
    pub span: Option<Span>,
}

impl std::fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} (at {}:{})", self.message, span.line, span.column),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A successful compilation: the executable rule plus any warnings.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub rule: Arc<CompiledRule>,
    pub warnings: Vec<CompileWarning>,
}

/// Compile one rule against the store schema.
///
/// Errors accumulate across the parse, validate, and generate passes; only a
/// lexical error stops the pipeline immediately.
pub fn compile(
    rule: &InferenceRule,
    schema: &SchemaView,
) -> Result<CompileOutput, Vec<CompileError>> {
    let mut errors = Vec::new();

    let conditions = match parser::parse_conditions(&rule.condition) {
        Ok(clauses) => clauses,
        Err(mut errs) => {
            errors.append(&mut errs);
            Vec::new()
        }
    };
    let conclusions = match parser::parse_conclusions(&rule.conclusion) {
        Ok(clauses) => clauses,
        Err(mut errs) => {
            errors.append(&mut errs);
            Vec::new()
        }
    };
    if !errors.is_empty() {
        // Parsed fragments are unreliable; don't pile on misleading
        // validation errors for clauses that never existed.
        return Err(errors);
    }

    let info = semantic::analyze(&conditions, &conclusions, schema)?;

    let cond_instrs: Vec<(CondInstr, Span)> = conditions
        .iter()
        .map(|c| (lower_condition(c), c.span()))
        .collect();
    let concl_instrs: Vec<DeriveInstr> = conclusions.iter().map(lower_conclusion).collect();

    let mut warnings = Vec::new();
    let (cond_instrs, always_false) = fold_constants(cond_instrs, &mut warnings);
    let cond_instrs = reorder_by_selectivity(cond_instrs);

    let bindings = binding_table(&cond_instrs, &info);

    let (referenced_relations, referenced_entity_types, referenced_properties) =
        referenced_names(&conditions);

    let compiled = CompiledRule {
        rule_id: rule.id,
        name: rule.name.clone(),
        priority: rule.priority,
        enabled: rule.enabled,
        scope: rule.scope.clone(),
        conditions: cond_instrs,
        conclusions: concl_instrs,
        bindings,
        referenced_relations,
        referenced_entity_types,
        referenced_properties,
        always_false,
    };

    Ok(CompileOutput {
        rule: Arc::new(compiled),
        warnings,
    })
}

/// Compile a batch of rules independently and in parallel.
///
/// One rule's failure never blocks its siblings; results come back as a
/// parallel list in input order.
pub fn compile_batch(
    rules: &[InferenceRule],
    schema: &SchemaView,
) -> Vec<Result<CompileOutput, Vec<CompileError>>> {
    rules.par_iter().map(|rule| compile(rule, schema)).collect()
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

fn lower_condition(clause: &ConditionClause) -> CondInstr {
    match clause {
        ConditionClause::Relationship {
            source,
            relation,
            target,
            ..
        } => CondInstr::MatchRelationship {
            source: source.clone(),
            relation: relation.clone(),
            target: target.clone(),
        },
        ConditionClause::TypeCheck {
            var, entity_type, ..
        } => CondInstr::MatchType {
            var: var.clone(),
            entity_type: entity_type.clone(),
        },
        ConditionClause::PropertyCheck {
            entity,
            name,
            value,
            ..
        } => CondInstr::MatchProperty {
            entity: entity.clone(),
            name: name.clone(),
            value: value.clone(),
        },
        ConditionClause::Negated { inner, .. } => {
            CondInstr::Negate(Box::new(lower_condition(inner)))
        }
        ConditionClause::Comparison {
            left, op, right, ..
        } => CondInstr::Compare {
            left: left.clone(),
            op: *op,
            right: right.clone(),
        },
    }
}

fn lower_conclusion(clause: &ConclusionClause) -> DeriveInstr {
    match clause {
        ConclusionClause::Relationship {
            source,
            relation,
            target,
            ..
        } => DeriveInstr::Relationship {
            source: source.clone(),
            relation: relation.clone(),
            target: target.clone(),
        },
        ConclusionClause::Property {
            entity,
            name,
            value,
            ..
        } => DeriveInstr::Property {
            entity: entity.clone(),
            name: name.clone(),
            value: value.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Optimization
// ---------------------------------------------------------------------------

/// Fold constant-vs-constant comparisons. Returns the surviving instructions
/// and whether the rule folded to always-false.
fn fold_constants(
    instrs: Vec<(CondInstr, Span)>,
    warnings: &mut Vec<CompileWarning>,
) -> (Vec<CondInstr>, bool) {
    let mut out = Vec::with_capacity(instrs.len());
    for (instr, span) in instrs {
        if let CondInstr::Compare {
            left: Operand::Const(lhs),
            op,
            right: Operand::Const(rhs),
        } = &instr
        {
            let holds = match op {
                CompareOp::Eq => lhs == rhs,
                CompareOp::Ne => lhs != rhs,
            };
            if holds {
                // Always true: the instruction constrains nothing.
                warnings.push(CompileWarning {
                    message: format!("comparison {lhs} {op} {rhs} is always true; removed"),
                    span: Some(span),
                });
                continue;
            }
            // Always false: the rule can never fire. Remaining instructions
            // are unreachable and dropped.
            warnings.push(CompileWarning {
                message: format!(
                    "comparison {lhs} {op} {rhs} is always false; rule will never fire"
                ),
                span: Some(span),
            });
            return (Vec::new(), true);
        }
        out.push(instr);
    }
    (out, false)
}

/// Greedy selectivity reorder: repeatedly pick the instruction that binds the
/// most distinct not-yet-bound variables, ties broken by source order.
fn reorder_by_selectivity(mut instrs: Vec<CondInstr>) -> Vec<CondInstr> {
    let mut bound: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::with_capacity(instrs.len());

    while !instrs.is_empty() {
        let mut best_idx = 0;
        let mut best_count = 0;
        for (idx, instr) in instrs.iter().enumerate() {
            let new_vars = instr
                .binds()
                .iter()
                .filter(|v| !bound.contains(**v))
                .collect::<BTreeSet<_>>()
                .len();
            // Strict > keeps ties in source order.
            if idx == 0 || new_vars > best_count {
                best_idx = idx;
                best_count = new_vars;
            }
        }
        let instr = instrs.remove(best_idx);
        for var in instr.binds() {
            bound.insert(var.to_string());
        }
        out.push(instr);
    }
    out
}

/// Build the variable-binding table against the final instruction order.
fn binding_table(
    instrs: &[CondInstr],
    info: &SemanticInfo,
) -> BTreeMap<String, VarInfo> {
    let mut table: BTreeMap<String, VarInfo> = BTreeMap::new();
    for (idx, instr) in instrs.iter().enumerate() {
        for var in instr.binds() {
            table.entry(var.to_string()).or_insert_with(|| VarInfo {
                first_bound_at: idx,
                type_constraint: info.type_constraints.get(var).cloned(),
                used_in_conclusion: info.conclusion_vars.contains(var),
            });
        }
    }
    table
}

/// Names a rule's conditions read, for incremental rule selection.
fn referenced_names(
    conditions: &[ConditionClause],
) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let mut relations = BTreeSet::new();
    let mut entity_types = BTreeSet::new();
    let mut properties = BTreeSet::new();

    fn visit(
        clause: &ConditionClause,
        relations: &mut BTreeSet<String>,
        entity_types: &mut BTreeSet<String>,
        properties: &mut BTreeSet<String>,
    ) {
        match clause {
            ConditionClause::Relationship { relation, .. } => {
                relations.insert(relation.clone());
            }
            ConditionClause::TypeCheck { entity_type, .. } => {
                entity_types.insert(entity_type.clone());
                // Type checks read the reserved type property.
                properties.insert(TYPE_PROPERTY.to_string());
            }
            ConditionClause::PropertyCheck { name, .. } => {
                properties.insert(name.clone());
            }
            ConditionClause::Negated { inner, .. } => {
                visit(inner, relations, entity_types, properties);
            }
            ConditionClause::Comparison { .. } => {}
        }
    }

    for clause in conditions {
        visit(clause, &mut relations, &mut entity_types, &mut properties);
    }
    (relations, entity_types, properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleId;

    fn rid(raw: u64) -> RuleId {
        RuleId::new(raw).unwrap()
    }

    fn rule(condition: &str, conclusion: &str) -> InferenceRule {
        InferenceRule::new(rid(1), "test", condition, conclusion)
    }

    #[test]
    fn grandparent_rule_compiles() {
        let out = compile(
            &super::super::grandparent_inference(rid(1)),
            &SchemaView::open(),
        )
        .unwrap();
        let compiled = &out.rule;
        assert_eq!(compiled.conditions.len(), 2);
        assert_eq!(compiled.conclusions.len(), 1);
        assert!(!compiled.always_false);
        assert!(out.warnings.is_empty());

        // Every conclusion variable is flagged in the binding table.
        for var in ["a", "c"] {
            assert!(compiled.bindings[var].used_in_conclusion, "?{var}");
        }
        assert!(!compiled.bindings["b"].used_in_conclusion);
        assert_eq!(
            compiled.referenced_relations,
            BTreeSet::from(["PARENT_OF".to_string()])
        );
    }

    #[test]
    fn selectivity_reorder_puts_wide_binders_first() {
        // The comparison and the single-variable property check should sink
        // behind the two-variable relationship pattern.
        let out = compile(
            &rule(
                "?a HAS age = 4\n?a != ?b\n?a -[KNOWS]-> ?b",
                "DERIVE ?a -[PEER_OF]-> ?b",
            ),
            &SchemaView::open(),
        )
        .unwrap();
        let conditions = &out.rule.conditions;
        assert!(matches!(
            conditions[0],
            CondInstr::MatchRelationship { .. }
        ));
        // Binding table reflects post-reorder indices.
        assert_eq!(out.rule.bindings["a"].first_bound_at, 0);
        assert_eq!(out.rule.bindings["b"].first_bound_at, 0);
    }

    #[test]
    fn false_constant_comparison_disables_rule() {
        let out = compile(
            &rule("?a -[R]-> ?b\n1 == 2", "DERIVE ?a -[S]-> ?b"),
            &SchemaView::open(),
        )
        .unwrap();
        assert!(out.rule.always_false);
        assert!(out.rule.conditions.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("never fire"));
        assert!(!out.rule.fires_in(&crate::fact::Scope::Global));
    }

    #[test]
    fn true_constant_comparison_folds_away() {
        let out = compile(
            &rule("?a -[R]-> ?b\n1 == 1", "DERIVE ?a -[S]-> ?b"),
            &SchemaView::open(),
        )
        .unwrap();
        assert!(!out.rule.always_false);
        assert_eq!(out.rule.conditions.len(), 1);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("always true"));
    }

    #[test]
    fn type_constraint_lands_in_binding_table() {
        let out = compile(
            &rule("?p TYPE \"Person\"\n?p -[KNOWS]-> ?q", "DERIVE ?p -[LINKED]-> ?q"),
            &SchemaView::open(),
        )
        .unwrap();
        assert_eq!(
            out.rule.bindings["p"].type_constraint.as_deref(),
            Some("Person")
        );
        assert!(out.rule.referenced_entity_types.contains("Person"));
        assert!(out.rule.referenced_properties.contains(TYPE_PROPERTY));
    }

    #[test]
    fn batch_compiles_independently() {
        let rules = vec![
            rule("?a -[R]-> ?b", "DERIVE ?a -[S]-> ?b"),
            rule("?a -[R ?b", "DERIVE ?a -[S]-> ?b"), // malformed
            rule("?a -[R]-> ?b", "DERIVE ?a -[S]-> ?b"),
        ];
        let results = compile_batch(&rules, &SchemaView::open());
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn schema_validation_flows_through() {
        let schema = SchemaView::default().with_relationship_type("PARENT_OF");
        let errs = compile(
            &rule("?a TYPE \"NonExistentType\"", "DERIVE ?a -[PARENT_OF]-> ?a"),
            &schema,
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| format!("{e}").contains("NonExistentType")));
    }

    #[test]
    fn negation_sinks_behind_positives() {
        let out = compile(
            &rule(
                "NOT ?a -[BLOCKED]-> ?b\n?a -[KNOWS]-> ?b",
                "DERIVE ?a -[TRUSTS]-> ?b",
            ),
            &SchemaView::open(),
        )
        .unwrap();
        assert!(matches!(out.rule.conditions[0], CondInstr::MatchRelationship { .. }));
        assert!(matches!(out.rule.conditions[1], CondInstr::Negate(_)));
    }
}
