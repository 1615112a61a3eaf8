//! Lexer for the rule DSL: text → tokens with line/column spans.
//!
//! The lexer is hand-rolled for full control over error messages and the
//! small fixed grammar. Unlike the later passes, lexical errors fail fast:
//! a malformed token makes every downstream diagnosis unreliable, so the
//! first one is returned immediately with its position.
//!
//! Variables are identifiers prefixed with `?`. Newlines are significant —
//! they separate clauses (implicit AND) — so the token stream carries
//! explicit `Newline` tokens with runs collapsed. Lines starting with `#`
//! are comments.

use serde::{Deserialize, Serialize};

use super::error::CompileError;

/// Line/column position of a token start (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A lexical token of the rule DSL.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Rule,
    When,
    Then,
    Derive,
    Not,
    Type,
    Has,

    // Values
    Variable(String),
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,

    // Punctuation
    /// `-[` opening a relation name.
    RelOpen,
    /// `]->` closing a relation name.
    RelClose,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `=`
    Assign,
    /// `:=`
    DeriveAssign,

    /// Clause separator (one per run of newlines).
    Newline,
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError::Lex {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize DSL text. Returns the first lexical error encountered.
pub fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut scanner = Scanner::new(input);
    let mut tokens: Vec<Token> = Vec::new();

    while let Some(c) = scanner.peek() {
        let span = scanner.span();
        match c {
            '\n' => {
                scanner.bump();
                // Collapse newline runs into one separator, and skip a
                // leading separator entirely.
                if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Newline) | None) {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        span,
                    });
                }
            }
            c if c.is_whitespace() => {
                scanner.bump();
            }
            '#' => {
                // Comment to end of line.
                while let Some(c) = scanner.peek() {
                    if c == '\n' {
                        break;
                    }
                    scanner.bump();
                }
            }
            '?' => {
                scanner.bump();
                let mut name = String::new();
                while let Some(c) = scanner.peek() {
                    if is_ident_continue(c) {
                        name.push(c);
                        scanner.bump();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(scanner.error("expected variable name after '?'", span));
                }
                tokens.push(Token {
                    kind: TokenKind::Variable(name),
                    span,
                });
            }
            '"' => {
                scanner.bump();
                let mut text = String::new();
                loop {
                    match scanner.bump() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(scanner.error("unterminated string literal", span));
                        }
                        Some(c) => text.push(c),
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    span,
                });
            }
            '-' => {
                scanner.bump();
                match scanner.peek() {
                    Some('[') => {
                        scanner.bump();
                        tokens.push(Token {
                            kind: TokenKind::RelOpen,
                            span,
                        });
                    }
                    Some(c) if c.is_ascii_digit() => {
                        let num = lex_number(&mut scanner, span, true)?;
                        tokens.push(Token {
                            kind: TokenKind::Num(num),
                            span,
                        });
                    }
                    _ => return Err(scanner.error("expected '[' or digit after '-'", span)),
                }
            }
            ']' => {
                scanner.bump();
                if scanner.bump() != Some('-') || scanner.bump() != Some('>') {
                    return Err(scanner.error("expected ']->' to close relation", span));
                }
                tokens.push(Token {
                    kind: TokenKind::RelClose,
                    span,
                });
            }
            '=' => {
                scanner.bump();
                if scanner.peek() == Some('=') {
                    scanner.bump();
                    tokens.push(Token {
                        kind: TokenKind::EqEq,
                        span,
                    });
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Assign,
                        span,
                    });
                }
            }
            '!' => {
                scanner.bump();
                if scanner.peek() == Some('=') {
                    scanner.bump();
                    tokens.push(Token {
                        kind: TokenKind::NotEq,
                        span,
                    });
                } else {
                    return Err(scanner.error("expected '=' after '!'", span));
                }
            }
            ':' => {
                scanner.bump();
                if scanner.peek() == Some('=') {
                    scanner.bump();
                    tokens.push(Token {
                        kind: TokenKind::DeriveAssign,
                        span,
                    });
                } else {
                    return Err(scanner.error("expected '=' after ':'", span));
                }
            }
            c if c.is_ascii_digit() => {
                let num = lex_number(&mut scanner, span, false)?;
                tokens.push(Token {
                    kind: TokenKind::Num(num),
                    span,
                });
            }
            c if is_ident_start(c) => {
                let mut word = String::new();
                while let Some(c) = scanner.peek() {
                    if is_ident_continue(c) {
                        word.push(c);
                        scanner.bump();
                    } else {
                        break;
                    }
                }
                let kind = match word.as_str() {
                    "RULE" => TokenKind::Rule,
                    "WHEN" => TokenKind::When,
                    "THEN" => TokenKind::Then,
                    "DERIVE" => TokenKind::Derive,
                    "NOT" => TokenKind::Not,
                    "TYPE" => TokenKind::Type,
                    "HAS" => TokenKind::Has,
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(word),
                };
                tokens.push(Token { kind, span });
            }
            other => {
                return Err(scanner.error(format!("unexpected character '{other}'"), span));
            }
        }
    }

    // Drop a trailing separator so parsers see clean clause boundaries.
    if matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Newline)) {
        tokens.pop();
    }

    Ok(tokens)
}

fn lex_number(scanner: &mut Scanner<'_>, span: Span, negative: bool) -> Result<f64, CompileError> {
    let mut text = String::new();
    if negative {
        text.push('-');
    }
    let mut seen_dot = false;
    while let Some(c) = scanner.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            scanner.bump();
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            text.push(c);
            scanner.bump();
        } else if c == '.' || is_ident_start(c) {
            return Err(scanner.error(format!("malformed number '{text}{c}'"), span));
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map_err(|_| scanner.error(format!("malformed number '{text}'"), span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn relationship_clause() {
        assert_eq!(
            kinds("?a -[PARENT_OF]-> ?b"),
            vec![
                TokenKind::Variable("a".into()),
                TokenKind::RelOpen,
                TokenKind::Ident("PARENT_OF".into()),
                TokenKind::RelClose,
                TokenKind::Variable("b".into()),
            ]
        );
    }

    #[test]
    fn type_and_property_clauses() {
        assert_eq!(
            kinds("?x TYPE \"Person\"\n?x HAS age = 42"),
            vec![
                TokenKind::Variable("x".into()),
                TokenKind::Type,
                TokenKind::Str("Person".into()),
                TokenKind::Newline,
                TokenKind::Variable("x".into()),
                TokenKind::Has,
                TokenKind::Ident("age".into()),
                TokenKind::Assign,
                TokenKind::Num(42.0),
            ]
        );
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("?a != ?b\n?a == \"x\""),
            vec![
                TokenKind::Variable("a".into()),
                TokenKind::NotEq,
                TokenKind::Variable("b".into()),
                TokenKind::Newline,
                TokenKind::Variable("a".into()),
                TokenKind::EqEq,
                TokenKind::Str("x".into()),
            ]
        );
    }

    #[test]
    fn derive_assign_and_literals() {
        assert_eq!(
            kinds("?e HAS flagged := true"),
            vec![
                TokenKind::Variable("e".into()),
                TokenKind::Has,
                TokenKind::Ident("flagged".into()),
                TokenKind::DeriveAssign,
                TokenKind::Bool(true),
            ]
        );
        assert_eq!(kinds("null"), vec![TokenKind::Null]);
        assert_eq!(kinds("-3.5"), vec![TokenKind::Num(-3.5)]);
    }

    #[test]
    fn newline_runs_collapse() {
        assert_eq!(
            kinds("\n\n?a TYPE \"T\"\n\n\n?b TYPE \"T\"\n\n"),
            vec![
                TokenKind::Variable("a".into()),
                TokenKind::Type,
                TokenKind::Str("T".into()),
                TokenKind::Newline,
                TokenKind::Variable("b".into()),
                TokenKind::Type,
                TokenKind::Str("T".into()),
            ]
        );
    }

    #[test]
    fn comments_skipped() {
        assert_eq!(
            kinds("# header\n?a TYPE \"T\" # trailing"),
            vec![
                TokenKind::Variable("a".into()),
                TokenKind::Type,
                TokenKind::Str("T".into()),
            ]
        );
    }

    #[test]
    fn bare_question_mark_fails_fast() {
        let err = tokenize("? -[R]-> ?b").unwrap_err();
        assert!(format!("{err}").contains("variable name"));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = tokenize("?a TYPE \"Person").unwrap_err();
        match err {
            CompileError::Lex { line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(column, 9);
            }
            other => panic!("expected Lex error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_number_rejected() {
        assert!(tokenize("?a HAS x = 1.2.3").is_err());
        assert!(tokenize("?a HAS x = 12abc").is_err());
    }

    #[test]
    fn stray_character_rejected() {
        let err = tokenize("?a @ ?b").unwrap_err();
        assert!(format!("{err}").contains('@'));
    }

    #[test]
    fn spans_track_lines() {
        let tokens = tokenize("?a TYPE \"T\"\n?b TYPE \"T\"").unwrap();
        let second_line: Vec<_> = tokens
            .iter()
            .filter(|t| t.span.line == 2)
            .collect();
        assert_eq!(second_line.len(), 3);
        assert_eq!(second_line[0].span.column, 1);
    }
}
