//! Semantic analysis: binding checks and schema validation.
//!
//! Runs after parsing and before code generation. All checks accumulate —
//! a rule author sees every unbound variable and every unknown schema name
//! in a single compile, one error per invalid reference.
//!
//! Binding rules:
//! - positive (non-negated) clauses establish variable bindings;
//! - negated clauses may use already-bound variables but never introduce new
//!   ones (negation checks absence, it cannot enumerate);
//! - comparisons consume bound variables only;
//! - a condition made entirely of negated clauses is rejected.

use std::collections::{BTreeMap, BTreeSet};

use super::error::CompileError;
use super::parser::{ConclusionClause, ConditionClause};
use super::{CompareOp, Operand, Term, ValueTerm};
use crate::store::SchemaView;

/// Facts the code generator needs from the analysis.
#[derive(Debug, Clone, Default)]
pub struct SemanticInfo {
    /// Variables bound by positive condition clauses.
    pub bound: BTreeSet<String>,
    /// `TYPE` constraints per variable.
    pub type_constraints: BTreeMap<String, String>,
    /// Variables referenced by any conclusion clause.
    pub conclusion_vars: BTreeSet<String>,
}

/// Validate a parsed rule. Returns analysis metadata or every error found.
pub fn analyze(
    conditions: &[ConditionClause],
    conclusions: &[ConclusionClause],
    schema: &SchemaView,
) -> Result<SemanticInfo, Vec<CompileError>> {
    let mut errors = Vec::new();

    if conditions.is_empty() {
        errors.push(CompileError::EmptySection {
            section: "condition".into(),
        });
    }
    if conclusions.is_empty() {
        errors.push(CompileError::EmptySection {
            section: "conclusion".into(),
        });
    }

    let mut info = SemanticInfo::default();

    // Pass 1: bindings from positive clauses, order-insensitive.
    for clause in conditions.iter().filter(|c| !c.is_negated()) {
        collect_positive_bindings(clause, &mut info);
    }

    if !conditions.is_empty() && conditions.iter().all(|c| c.is_negated()) {
        errors.push(CompileError::AllNegative);
    }

    // Pass 2: per-clause checks.
    for clause in conditions {
        check_condition(clause, &info.bound, schema, &mut errors);
    }

    // Pass 3: conclusions.
    for clause in conclusions {
        check_conclusion(clause, &info.bound, schema, &mut errors);
        for var in conclusion_variables(clause) {
            info.conclusion_vars.insert(var.to_string());
        }
    }

    if errors.is_empty() { Ok(info) } else { Err(errors) }
}

fn collect_positive_bindings(clause: &ConditionClause, info: &mut SemanticInfo) {
    match clause {
        ConditionClause::Relationship { source, target, .. } => {
            for term in [source, target] {
                if let Term::Var(name) = term {
                    info.bound.insert(name.clone());
                }
            }
        }
        ConditionClause::TypeCheck {
            var, entity_type, ..
        } => {
            info.bound.insert(var.clone());
            info.type_constraints
                .insert(var.clone(), entity_type.clone());
        }
        ConditionClause::PropertyCheck { entity, value, .. } => {
            if let Term::Var(name) = entity {
                info.bound.insert(name.clone());
            }
            if let ValueTerm::Var(name) = value {
                info.bound.insert(name.clone());
            }
        }
        // Negations and comparisons never bind.
        ConditionClause::Negated { .. } | ConditionClause::Comparison { .. } => {}
    }
}

fn check_condition(
    clause: &ConditionClause,
    bound: &BTreeSet<String>,
    schema: &SchemaView,
    errors: &mut Vec<CompileError>,
) {
    match clause {
        ConditionClause::Relationship { relation, span, .. } => {
            if !schema.has_relationship_type(relation) {
                errors.push(CompileError::UnknownRelationship {
                    name: relation.clone(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
        ConditionClause::TypeCheck {
            entity_type, span, ..
        } => {
            if !schema.has_entity_type(entity_type) {
                errors.push(CompileError::UnknownEntityType {
                    name: entity_type.clone(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
        ConditionClause::PropertyCheck { name, span, .. } => {
            if !schema.has_property(name) {
                errors.push(CompileError::UnknownProperty {
                    name: name.clone(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
        ConditionClause::Negated { inner, span } => {
            // A negated clause may only consume bindings.
            for var in condition_variables(inner) {
                if !bound.contains(var) {
                    errors.push(CompileError::NegationBinds {
                        variable: var.to_string(),
                        line: span.line,
                        column: span.column,
                    });
                }
            }
            // Schema names inside the negation still validate.
            check_condition(inner, bound, schema, errors);
        }
        ConditionClause::Comparison {
            left,
            op,
            right,
            span,
        } => {
            if let (Operand::Var(a), Operand::Var(b)) = (left, right)
                && a == b
                && matches!(op, CompareOp::Eq | CompareOp::Ne)
            {
                errors.push(CompileError::SelfComparison {
                    variable: a.clone(),
                    line: span.line,
                    column: span.column,
                });
                return;
            }
            for operand in [left, right] {
                if let Operand::Var(name) = operand
                    && !bound.contains(name)
                {
                    errors.push(CompileError::UnboundVariable {
                        variable: name.clone(),
                        line: span.line,
                        column: span.column,
                    });
                }
            }
        }
    }
}

fn check_conclusion(
    clause: &ConclusionClause,
    bound: &BTreeSet<String>,
    schema: &SchemaView,
    errors: &mut Vec<CompileError>,
) {
    match clause {
        ConclusionClause::Relationship { relation, span, .. } => {
            if !schema.has_relationship_type(relation) {
                errors.push(CompileError::UnknownRelationship {
                    name: relation.clone(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
        ConclusionClause::Property { name, span, .. } => {
            if !schema.has_property(name) {
                errors.push(CompileError::UnknownProperty {
                    name: name.clone(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
    }
    let span = clause.span();
    for var in conclusion_variables(clause) {
        if !bound.contains(var) {
            errors.push(CompileError::UnboundVariable {
                variable: var.to_string(),
                line: span.line,
                column: span.column,
            });
        }
    }
}

/// Variables mentioned anywhere in a condition clause (recursing through
/// negation).
fn condition_variables(clause: &ConditionClause) -> Vec<&str> {
    match clause {
        ConditionClause::Relationship { source, target, .. } => [source, target]
            .into_iter()
            .filter_map(|t| t.var())
            .collect(),
        ConditionClause::TypeCheck { var, .. } => vec![var.as_str()],
        ConditionClause::PropertyCheck { entity, value, .. } => entity
            .var()
            .into_iter()
            .chain(value.var())
            .collect(),
        ConditionClause::Negated { inner, .. } => condition_variables(inner),
        ConditionClause::Comparison { left, right, .. } => [left, right]
            .into_iter()
            .filter_map(|o| match o {
                Operand::Var(name) => Some(name.as_str()),
                Operand::Const(_) => None,
            })
            .collect(),
    }
}

fn conclusion_variables(clause: &ConclusionClause) -> Vec<&str> {
    match clause {
        ConclusionClause::Relationship { source, target, .. } => [source, target]
            .into_iter()
            .filter_map(|t| t.var())
            .collect(),
        ConclusionClause::Property { entity, value, .. } => entity
            .var()
            .into_iter()
            .chain(value.var())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::parser::{parse_conclusions, parse_conditions};

    fn analyze_texts(
        condition: &str,
        conclusion: &str,
        schema: &SchemaView,
    ) -> Result<SemanticInfo, Vec<CompileError>> {
        let conditions = parse_conditions(condition).unwrap();
        let conclusions = parse_conclusions(conclusion).unwrap();
        analyze(&conditions, &conclusions, schema)
    }

    #[test]
    fn valid_rule_passes() {
        let info = analyze_texts(
            "?a -[PARENT_OF]-> ?b\n?b -[PARENT_OF]-> ?c",
            "DERIVE ?a -[GRANDPARENT_OF]-> ?c",
            &SchemaView::open(),
        )
        .unwrap();
        assert_eq!(info.bound.len(), 3);
        assert_eq!(info.conclusion_vars.len(), 2);
    }

    #[test]
    fn unbound_conclusion_variable_named() {
        let errs = analyze_texts(
            "?a -[R]-> ?b",
            "DERIVE ?a -[S]-> ?zzz",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            CompileError::UnboundVariable { variable, .. } if variable == "zzz"
        )));
    }

    #[test]
    fn self_comparison_rejected() {
        let errs = analyze_texts(
            "?a -[R]-> ?b\n?a != ?a",
            "DERIVE ?a -[S]-> ?b",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, CompileError::SelfComparison { variable, .. } if variable == "a")));

        // Same for ==.
        let errs = analyze_texts(
            "?a -[R]-> ?b\n?a == ?a",
            "DERIVE ?a -[S]-> ?b",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::SelfComparison { .. })));
    }

    #[test]
    fn all_negative_condition_rejected() {
        let errs = analyze_texts(
            "NOT ?a -[R]-> ?b",
            "DERIVE ?a -[S]-> ?b",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::AllNegative)));
    }

    #[test]
    fn negation_may_not_introduce_bindings() {
        let errs = analyze_texts(
            "?a -[R]-> ?b\nNOT ?a -[S]-> ?new",
            "DERIVE ?a -[T]-> ?b",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            CompileError::NegationBinds { variable, .. } if variable == "new"
        )));
    }

    #[test]
    fn negation_over_bound_variables_is_fine() {
        analyze_texts(
            "?a -[R]-> ?b\nNOT ?a -[S]-> ?b",
            "DERIVE ?a -[T]-> ?b",
            &SchemaView::open(),
        )
        .unwrap();
    }

    #[test]
    fn schema_errors_collect_one_per_reference() {
        let schema = SchemaView::default()
            .with_entity_type("Person")
            .with_relationship_type("PARENT_OF");
        let errs = analyze_texts(
            "?a TYPE \"NonExistentType\"\n?a -[UNKNOWN_REL]-> ?b\n?a HAS bogus = 1",
            "DERIVE ?a -[PARENT_OF]-> ?b",
            &schema,
        )
        .unwrap_err();
        assert_eq!(errs.len(), 3);
        assert!(errs.iter().any(|e| format!("{e}").contains("NonExistentType")));
        assert!(errs.iter().any(|e| format!("{e}").contains("UNKNOWN_REL")));
        assert!(errs.iter().any(|e| format!("{e}").contains("bogus")));
    }

    #[test]
    fn type_constraint_recorded() {
        let schema = SchemaView::open();
        let info = analyze_texts(
            "?p TYPE \"Person\"\n?p -[KNOWS]-> ?q",
            "DERIVE ?p -[CONNECTED]-> ?q",
            &schema,
        )
        .unwrap();
        assert_eq!(info.type_constraints.get("p").unwrap(), "Person");
    }

    #[test]
    fn empty_sections_rejected() {
        let errs = analyze(&[], &[], &SchemaView::open()).unwrap_err();
        assert_eq!(
            errs.iter()
                .filter(|e| matches!(e, CompileError::EmptySection { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn unbound_comparison_variable_rejected() {
        let errs = analyze_texts(
            "?a -[R]-> ?b\n?a != ?ghost",
            "DERIVE ?a -[S]-> ?b",
            &SchemaView::open(),
        )
        .unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            CompileError::UnboundVariable { variable, .. } if variable == "ghost"
        )));
    }
}
