//! Positioned token tree produced by the reader.
//!
//! Every [`Token`] carries a [`Span`]: start and end [`Position`]s plus the exact source
//! text between them. Tokens are immutable once produced; macro expansion builds new
//! trees instead of editing existing ones.

use crate::value::Value;
use std::rc::Rc;

/// A point in the source text.
///
/// `line` and `column` are 1-based and count characters; a `\r`, `\n` or `\r\n` pair ends a
/// line. `index` is the byte offset into the source, so `&source[start.index..end.index]`
/// is always the raw text of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub index: usize,
}

impl Position {
    pub const START: Position = Position {
        line: 1,
        column: 1,
        index: 0,
    };
}

impl Default for Position {
    fn default() -> Self {
        Position::START
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: Position,
    pub end: Position,
    /// Source text covered by the span, delimiters included
    pub raw: Rc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal payload: number, string, boolean, `null` or `undefined`
    Value(Value),
    Identifier(String),
    List(Vec<Token>),
    /// Only produced transiently while reading; never returned by the reader
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&[Token]> {
        match &self.kind {
            TokenKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::Comment(_))
    }

    pub fn raw(&self) -> &str {
        &self.span.raw
    }
}

/// Renders the token structure, independent of the source text it came from.
impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TokenKind::Value(value) => write!(f, "{value}"),
            TokenKind::Identifier(name) => write!(f, "{name}"),
            TokenKind::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            TokenKind::Comment(text) => write!(f, ";{text}"),
        }
    }
}
