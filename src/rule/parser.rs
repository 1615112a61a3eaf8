//! Parser for the rule DSL: tokens → clause ASTs.
//!
//! Clauses are newline-separated (implicit AND). Each line is parsed
//! independently so that one malformed clause does not hide errors in the
//! rest of the rule: errors accumulate and parsing recovers at the next
//! line boundary.
//!
//! Condition clause shapes:
//! - relationship pattern: `?a -[REL]-> ?b` (either side may be a literal)
//! - type check:           `?a TYPE "TypeName"`
//! - property check:       `?a HAS prop = value`
//! - negation:             `NOT <clause>`
//! - comparison:           `?a != ?b`, `?a == literal`, `1 == 2`
//!
//! Conclusion clauses start with an optional `DERIVE` keyword and are either
//! a relationship pattern or `?a HAS prop := value` (plain `=` accepted).

use super::error::CompileError;
use super::lexer::{self, Span, Token, TokenKind};
use super::{CompareOp, Operand, Term, ValueTerm};
use crate::fact::PropertyValue;

/// A parsed condition clause, carrying its source position.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionClause {
    Relationship {
        source: Term,
        relation: String,
        target: Term,
        span: Span,
    },
    TypeCheck {
        var: String,
        entity_type: String,
        span: Span,
    },
    PropertyCheck {
        entity: Term,
        name: String,
        value: ValueTerm,
        span: Span,
    },
    Negated {
        inner: Box<ConditionClause>,
        span: Span,
    },
    Comparison {
        left: Operand,
        op: CompareOp,
        right: Operand,
        span: Span,
    },
}

impl ConditionClause {
    /// Source position of the clause.
    pub fn span(&self) -> Span {
        match self {
            ConditionClause::Relationship { span, .. }
            | ConditionClause::TypeCheck { span, .. }
            | ConditionClause::PropertyCheck { span, .. }
            | ConditionClause::Negated { span, .. }
            | ConditionClause::Comparison { span, .. } => *span,
        }
    }

    /// Whether this clause is wrapped in (any depth of) negation.
    pub fn is_negated(&self) -> bool {
        matches!(self, ConditionClause::Negated { .. })
    }
}

/// A parsed conclusion clause.
#[derive(Debug, Clone, PartialEq)]
pub enum ConclusionClause {
    Relationship {
        source: Term,
        relation: String,
        target: Term,
        span: Span,
    },
    Property {
        entity: Term,
        name: String,
        value: ValueTerm,
        span: Span,
    },
}

impl ConclusionClause {
    pub fn span(&self) -> Span {
        match self {
            ConclusionClause::Relationship { span, .. }
            | ConclusionClause::Property { span, .. } => *span,
        }
    }
}

/// A full `RULE "<name>" WHEN ... THEN ...` document.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDocument {
    pub name: String,
    pub conditions: Vec<ConditionClause>,
    pub conclusions: Vec<ConclusionClause>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse condition text into clauses, accumulating errors.
pub fn parse_conditions(text: &str) -> Result<Vec<ConditionClause>, Vec<CompileError>> {
    let tokens = lexer::tokenize(text).map_err(|e| vec![e])?;
    let mut clauses = Vec::new();
    let mut errors = Vec::new();
    for line in split_lines(&tokens) {
        match parse_condition_clause_line(line) {
            Ok(clause) => clauses.push(clause),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() { Ok(clauses) } else { Err(errors) }
}

/// Parse conclusion text into clauses, accumulating errors.
pub fn parse_conclusions(text: &str) -> Result<Vec<ConclusionClause>, Vec<CompileError>> {
    let tokens = lexer::tokenize(text).map_err(|e| vec![e])?;
    let mut clauses = Vec::new();
    let mut errors = Vec::new();
    for line in split_lines(&tokens) {
        match parse_conclusion_clause_line(line) {
            Ok(clause) => clauses.push(clause),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() { Ok(clauses) } else { Err(errors) }
}

/// Parse a full rule document: `RULE "<name>"` / `WHEN` clauses / `THEN` clauses.
pub fn parse_rule_document(text: &str) -> Result<RuleDocument, Vec<CompileError>> {
    let tokens = lexer::tokenize(text).map_err(|e| vec![e])?;
    let lines: Vec<&[Token]> = split_lines(&tokens).collect();
    let mut errors = Vec::new();

    let mut name = None;
    let mut conditions = Vec::new();
    let mut conclusions = Vec::new();

    #[derive(PartialEq)]
    enum Section {
        Header,
        When,
        Then,
    }
    let mut section = Section::Header;

    for line in lines {
        match (&section, &line[0].kind) {
            (Section::Header, TokenKind::Rule) => {
                if let [_, Token { kind: TokenKind::Str(n), .. }] = line {
                    name = Some(n.clone());
                } else {
                    errors.push(CompileError::parse_at(
                        "expected RULE \"<name>\"",
                        line[0].span,
                        None,
                    ));
                }
            }
            (_, TokenKind::When) => section = Section::When,
            (_, TokenKind::Then) => section = Section::Then,
            (Section::When, _) => match parse_condition_clause_line(line) {
                Ok(clause) => conditions.push(clause),
                Err(err) => errors.push(err),
            },
            (Section::Then, _) => match parse_conclusion_clause_line(line) {
                Ok(clause) => conclusions.push(clause),
                Err(err) => errors.push(err),
            },
            (Section::Header, _) => {
                errors.push(CompileError::parse_at(
                    "expected RULE header before clauses",
                    line[0].span,
                    None,
                ));
            }
        }
    }

    let Some(name) = name else {
        errors.push(CompileError::parse_at(
            "missing RULE \"<name>\" header",
            Span::new(1, 1),
            None,
        ));
        return Err(errors);
    };

    if errors.is_empty() {
        Ok(RuleDocument {
            name,
            conditions,
            conclusions,
        })
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

fn split_lines(tokens: &[Token]) -> impl Iterator<Item = &[Token]> {
    tokens
        .split(|t| t.kind == TokenKind::Newline)
        .filter(|line| !line.is_empty())
}

/// Cursor over one clause line.
struct Line<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Line<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or(Span::new(1, 1))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::parse_at(message, self.span(), None)
    }

    fn expect_end(&self) -> Result<(), CompileError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing tokens in clause"))
        }
    }
}

fn parse_condition_clause_line(tokens: &[Token]) -> Result<ConditionClause, CompileError> {
    let mut line = Line::new(tokens);
    let clause = parse_condition_clause(&mut line)?;
    line.expect_end()?;
    Ok(clause)
}

fn parse_condition_clause(line: &mut Line<'_>) -> Result<ConditionClause, CompileError> {
    let start = line.span();
    if matches!(line.peek().map(|t| &t.kind), Some(TokenKind::Not)) {
        line.next();
        let inner = parse_condition_clause(line)?;
        return Ok(ConditionClause::Negated {
            inner: Box::new(inner),
            span: start,
        });
    }

    // A literal head can only open a comparison: `1 == 2`, `true != ?x`.
    if matches!(
        line.peek().map(|t| &t.kind),
        Some(TokenKind::Num(_) | TokenKind::Bool(_) | TokenKind::Null)
    ) {
        let left = parse_operand(line)?;
        let op = match line.next().map(|t| &t.kind) {
            Some(TokenKind::EqEq) => CompareOp::Eq,
            Some(TokenKind::NotEq) => CompareOp::Ne,
            _ => return Err(line.error("expected '==' or '!=' after literal operand")),
        };
        let right = parse_operand(line)?;
        return Ok(ConditionClause::Comparison {
            left,
            op,
            right,
            span: start,
        });
    }

    let first = parse_term(line)?;
    match line.peek().map(|t| &t.kind) {
        Some(TokenKind::RelOpen) => {
            let (relation, target) = parse_relation_tail(line)?;
            Ok(ConditionClause::Relationship {
                source: first,
                relation,
                target,
                span: start,
            })
        }
        Some(TokenKind::Type) => {
            line.next();
            let Term::Var(var) = first else {
                return Err(line.error("TYPE clause requires a variable subject"));
            };
            match line.next().map(|t| &t.kind) {
                Some(TokenKind::Str(name)) => Ok(ConditionClause::TypeCheck {
                    var,
                    entity_type: name.clone(),
                    span: start,
                }),
                _ => Err(line.error("expected quoted type name after TYPE")),
            }
        }
        Some(TokenKind::Has) => {
            line.next();
            let name = parse_property_name(line)?;
            match line.next().map(|t| &t.kind) {
                Some(TokenKind::Assign) => {}
                _ => return Err(line.error("expected '=' after property name")),
            }
            let value = parse_value_term(line)?;
            Ok(ConditionClause::PropertyCheck {
                entity: first,
                name,
                value,
                span: start,
            })
        }
        Some(TokenKind::EqEq) | Some(TokenKind::NotEq) => {
            let op = match line.next().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => CompareOp::Eq,
                _ => CompareOp::Ne,
            };
            let left = term_to_operand(first);
            let right = parse_operand(line)?;
            Ok(ConditionClause::Comparison {
                left,
                op,
                right,
                span: start,
            })
        }
        _ => Err(line.error(
            "expected '-[', 'TYPE', 'HAS', '==' or '!=' after clause subject",
        )),
    }
}

fn parse_conclusion_clause_line(tokens: &[Token]) -> Result<ConclusionClause, CompileError> {
    let mut line = Line::new(tokens);
    // Optional DERIVE prefix.
    if matches!(line.peek().map(|t| &t.kind), Some(TokenKind::Derive)) {
        line.next();
    }
    let start = line.span();
    let first = parse_term(&mut line)?;
    let clause = match line.peek().map(|t| &t.kind) {
        Some(TokenKind::RelOpen) => {
            let (relation, target) = parse_relation_tail(&mut line)?;
            ConclusionClause::Relationship {
                source: first,
                relation,
                target,
                span: start,
            }
        }
        Some(TokenKind::Has) => {
            line.next();
            let name = parse_property_name(&mut line)?;
            match line.next().map(|t| &t.kind) {
                Some(TokenKind::Assign) | Some(TokenKind::DeriveAssign) => {}
                _ => return Err(line.error("expected '=' or ':=' after property name")),
            }
            let value = parse_value_term(&mut line)?;
            ConclusionClause::Property {
                entity: first,
                name,
                value,
                span: start,
            }
        }
        _ => return Err(line.error("expected '-[' or 'HAS' in conclusion clause")),
    };
    line.expect_end()?;
    Ok(clause)
}

// ---------------------------------------------------------------------------
// Shared fragments
// ---------------------------------------------------------------------------

fn parse_term(line: &mut Line<'_>) -> Result<Term, CompileError> {
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::Variable(name)) => Ok(Term::Var(name.clone())),
        Some(TokenKind::Ident(id)) => Ok(Term::Entity(id.clone())),
        Some(TokenKind::Str(id)) => Ok(Term::Entity(id.clone())),
        _ => Err(line.error("expected variable or entity identifier")),
    }
}

fn parse_relation_tail(line: &mut Line<'_>) -> Result<(String, Term), CompileError> {
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::RelOpen) => {}
        _ => return Err(line.error("expected '-['")),
    }
    let relation = match line.next().map(|t| &t.kind) {
        Some(TokenKind::Ident(name)) => name.clone(),
        _ => return Err(line.error("expected relation name inside '-[ ]->'")),
    };
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::RelClose) => {}
        _ => return Err(line.error("expected ']->' after relation name")),
    }
    let target = parse_term(line)?;
    Ok((relation, target))
}

fn parse_property_name(line: &mut Line<'_>) -> Result<String, CompileError> {
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::Ident(name)) => Ok(name.clone()),
        Some(TokenKind::Str(name)) => Ok(name.clone()),
        _ => Err(line.error("expected property name after HAS")),
    }
}

fn parse_value_term(line: &mut Line<'_>) -> Result<ValueTerm, CompileError> {
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::Variable(name)) => Ok(ValueTerm::Var(name.clone())),
        Some(TokenKind::Str(s)) => Ok(ValueTerm::Const(PropertyValue::Str(s.clone()))),
        Some(TokenKind::Num(n)) => Ok(ValueTerm::Const(PropertyValue::Num(*n))),
        Some(TokenKind::Bool(b)) => Ok(ValueTerm::Const(PropertyValue::Bool(*b))),
        Some(TokenKind::Null) => Ok(ValueTerm::Const(PropertyValue::Null)),
        Some(TokenKind::Ident(s)) => Ok(ValueTerm::Const(PropertyValue::Str(s.clone()))),
        _ => Err(line.error("expected value (literal or variable)")),
    }
}

fn parse_operand(line: &mut Line<'_>) -> Result<Operand, CompileError> {
    match line.next().map(|t| &t.kind) {
        Some(TokenKind::Variable(name)) => Ok(Operand::Var(name.clone())),
        Some(TokenKind::Str(s)) => Ok(Operand::Const(PropertyValue::Str(s.clone()))),
        Some(TokenKind::Ident(s)) => Ok(Operand::Const(PropertyValue::Str(s.clone()))),
        Some(TokenKind::Num(n)) => Ok(Operand::Const(PropertyValue::Num(*n))),
        Some(TokenKind::Bool(b)) => Ok(Operand::Const(PropertyValue::Bool(*b))),
        Some(TokenKind::Null) => Ok(Operand::Const(PropertyValue::Null)),
        _ => Err(line.error("expected comparison operand")),
    }
}

fn term_to_operand(term: Term) -> Operand {
    match term {
        Term::Var(name) => Operand::Var(name),
        Term::Entity(id) => Operand::Const(PropertyValue::Str(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_condition() {
        let clauses = parse_conditions("?a -[PARENT_OF]-> ?b").unwrap();
        assert_eq!(clauses.len(), 1);
        match &clauses[0] {
            ConditionClause::Relationship {
                source,
                relation,
                target,
                ..
            } => {
                assert_eq!(source, &Term::Var("a".into()));
                assert_eq!(relation, "PARENT_OF");
                assert_eq!(target, &Term::Var("b".into()));
            }
            other => panic!("expected relationship, got {other:?}"),
        }
    }

    #[test]
    fn literal_entity_in_pattern() {
        let clauses = parse_conditions("alice -[KNOWS]-> ?x").unwrap();
        match &clauses[0] {
            ConditionClause::Relationship { source, .. } => {
                assert_eq!(source, &Term::Entity("alice".into()));
            }
            other => panic!("expected relationship, got {other:?}"),
        }
    }

    #[test]
    fn type_check_clause() {
        let clauses = parse_conditions("?p TYPE \"Person\"").unwrap();
        assert_eq!(
            clauses[0],
            ConditionClause::TypeCheck {
                var: "p".into(),
                entity_type: "Person".into(),
                span: Span::new(1, 1),
            }
        );
    }

    #[test]
    fn property_check_with_variable_value() {
        let clauses = parse_conditions("?p HAS age = ?n").unwrap();
        match &clauses[0] {
            ConditionClause::PropertyCheck { name, value, .. } => {
                assert_eq!(name, "age");
                assert_eq!(value, &ValueTerm::Var("n".into()));
            }
            other => panic!("expected property check, got {other:?}"),
        }
    }

    #[test]
    fn negated_clause() {
        let clauses = parse_conditions("NOT ?a -[BLOCKED]-> ?b").unwrap();
        assert!(clauses[0].is_negated());
    }

    #[test]
    fn comparison_clauses() {
        let clauses = parse_conditions("?a != ?b\n?a == \"alice\"").unwrap();
        assert_eq!(clauses.len(), 2);
        match &clauses[1] {
            ConditionClause::Comparison { op, right, .. } => {
                assert_eq!(*op, CompareOp::Eq);
                assert_eq!(right, &Operand::Const(PropertyValue::Str("alice".into())));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn literal_headed_comparison() {
        let clauses = parse_conditions("1 == 2\ntrue != ?flag").unwrap();
        assert_eq!(clauses.len(), 2);
        match &clauses[0] {
            ConditionClause::Comparison { left, op, right, .. } => {
                assert_eq!(left, &Operand::Const(PropertyValue::Num(1.0)));
                assert_eq!(*op, CompareOp::Eq);
                assert_eq!(right, &Operand::Const(PropertyValue::Num(2.0)));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
        match &clauses[1] {
            ConditionClause::Comparison { left, right, .. } => {
                assert_eq!(left, &Operand::Const(PropertyValue::Bool(true)));
                assert_eq!(right, &Operand::Var("flag".into()));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn literal_head_requires_comparison_tail() {
        let errs = parse_conditions("1 -[R]-> ?b").unwrap_err();
        assert!(format!("{}", errs[0]).contains("'==' or '!='"));
    }

    #[test]
    fn conclusion_with_and_without_derive() {
        let clauses =
            parse_conclusions("DERIVE ?a -[GRANDPARENT_OF]-> ?c\n?a HAS flagged := true").unwrap();
        assert_eq!(clauses.len(), 2);
        assert!(matches!(clauses[0], ConclusionClause::Relationship { .. }));
        assert!(matches!(clauses[1], ConclusionClause::Property { .. }));
    }

    #[test]
    fn errors_accumulate_across_lines() {
        let errs = parse_conditions("?a -[R ?b\n?c TYPE\n?d -[S]-> ?e").unwrap_err();
        // Two bad lines, one good one.
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn trailing_tokens_rejected() {
        let errs = parse_conditions("?a -[R]-> ?b ?c").unwrap_err();
        assert!(format!("{}", errs[0]).contains("trailing"));
    }

    #[test]
    fn full_document() {
        let doc = parse_rule_document(
            "RULE \"Grandparent Inference\"\nWHEN\n  ?a -[PARENT_OF]-> ?b\n  ?b -[PARENT_OF]-> ?c\nTHEN\n  DERIVE ?a -[GRANDPARENT_OF]-> ?c",
        )
        .unwrap();
        assert_eq!(doc.name, "Grandparent Inference");
        assert_eq!(doc.conditions.len(), 2);
        assert_eq!(doc.conclusions.len(), 1);
    }

    #[test]
    fn document_without_header_fails() {
        let errs = parse_rule_document("WHEN\n?a -[R]-> ?b\nTHEN\n?a -[S]-> ?b").unwrap_err();
        assert!(errs.iter().any(|e| format!("{e}").contains("RULE")));
    }
}
