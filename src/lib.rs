//! sxlang - a small S-expression scripting language
//!
//! This crate provides a reader that turns source text into a positioned token tree,
//! chained lexical environments, and a recursive evaluator that distinguishes ordinary
//! functions (eager, evaluated arguments) from macros and special forms (raw, unevaluated
//! token arguments).
//!
//! ```text
//! (function fac (x)
//!   (if ((= x 1) x)
//!       (true (* x (fac (- x 1))))))
//! (fac 10)   ; 3628800
//! ```
//!
//! ## Evaluation model
//!
//! - Values evaluate to themselves, identifiers are looked up in the current frame chain.
//! - A list evaluates its head first. If the resulting callable is macro-flagged it receives
//!   the remaining tokens unevaluated; otherwise the arguments are evaluated left to right.
//! - User macros are unhygienic: their body is rewritten by token substitution and then
//!   evaluated in the caller's frame.
//!
//! ## Errors
//!
//! Reader failures are reported as [`ParseError`] with a point position. Evaluation failures
//! are reported as [`Error`], carrying the span of the innermost token being evaluated when
//! the failure happened.
//!
//! ## Modules
//!
//! - `reader`: source text to tokens
//! - `ast`: positions, spans and tokens
//! - `value`: runtime values and callables
//! - `environment`: lexical frames with variables, constants and macro flags
//! - `substitute`: macro template rewriting
//! - `reclaim`: reclamation of frames kept alive only by reference cycles
//! - `evaluator`: the interpreter and its special forms
//! - `builtinops`: registry of core functions and special forms
//! - `module`: library modules injected before a program runs

use crate::ast::{Position, Span};
use crate::builtinops::Arity;

/// Default maximum list nesting accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 512;

/// Default maximum depth of the evaluation stack
/// Deep recursion below this limit is serviced by growing the native stack on demand
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Minimum native stack to keep available before recursing (100KB red zone)
const RED_ZONE: usize = 100 * 1024;

/// Native stack allocated whenever the red zone is reached (1MB)
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, switching to a fresh stack segment first if the current one is nearly full.
/// Every recursion over nested values or tokens goes through here.
pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// Categorizes malformed input found by the reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("Unexpected end of list")]
    UnexpectedEndOfList,
    #[error("Unexpected end of string")]
    UnexpectedEndOfString,
    #[error("Unexpected character '{0}'")]
    UnexpectedCharacter(char),
    /// A `'` that is not followed by an expression
    #[error("Expected an expression after quote")]
    ExpectedQuotedExpression,
    #[error("Expression nested too deeply (max: {0})")]
    TooDeeplyNested(usize),
}

/// A reader failure reported at a single point of the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at line {}, column {}", .position.line, .position.column)]
pub struct ParseError {
    pub position: Position,
    pub kind: SyntaxErrorKind,
}

impl ParseError {
    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }

    /// Byte offset of the failure in the source
    pub fn index(&self) -> usize {
        self.position.index
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// Closed set of evaluation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("\"{0}\" is not defined")]
    NotDefined(String),
    #[error("\"{0}\" is already defined")]
    AlreadyDefined(String),
    #[error("Cannot assign new value to constant \"{0}\"")]
    AssignToConstant(String),
    #[error("Expected an identifier")]
    ExpectedIdentifier,
    #[error("Expected a list")]
    ExpectedList,
    /// A `let` declaration that is not a `(name expr)` pair
    #[error("Expected a declaration of the form (name value)")]
    MalformedBinding,
    #[error("Duplicate parameter \"{0}\"")]
    DuplicateParameter(String),
    #[error("Expected {expected} arguments, got {got}")]
    ArityMismatch { expected: Arity, got: usize },
    #[error("Caller is not a function: {0}")]
    NotCallable(String),
    #[error("Cannot evaluate an empty list")]
    EmptyList,
    #[error("Unknown token type")]
    UnknownTokenType,
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Evaluation depth limit exceeded (max: {0})")]
    DepthLimitExceeded(usize),
    /// Raised by a program through the `error` function
    #[error("{0}")]
    Raised(String),
}

/// An evaluation failure, positioned by the span of the token being evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub span: Option<Span>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, span: None }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::TypeError(message.into()))
    }

    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::new(ErrorKind::ArityMismatch { expected, got })
    }

    /// Attach `span` unless a more precise one is already present
    pub fn or_span(mut self, span: &Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span.clone());
        }
        self
    }

    pub fn with_span(mut self, span: &Span) -> Self {
        self.span = Some(span.clone());
        self
    }

    pub fn start(&self) -> Option<Position> {
        self.span.as_ref().map(|span| span.start)
    }

    pub fn end(&self) -> Option<Position> {
        self.span.as_ref().map(|span| span.end)
    }

    pub fn raw(&self) -> Option<&str> {
        self.span.as_ref().map(|span| span.raw.as_ref())
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.span {
            Some(span) => write!(
                f,
                "{} at line {}, column {}: {}",
                self.kind, span.start.line, span.start.column, span.raw
            ),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// Either of the two error shapes a host program can observe.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("SyntaxError: {0}")]
    Parse(#[from] ParseError),
    #[error("EvaluationError: {0}")]
    Eval(#[from] Error),
}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod module;
pub mod reader;
mod reclaim;
pub mod substitute;
pub mod value;

pub use evaluator::{Interpreter, InterpreterConfig};
pub use reader::{ReaderConfig, parse};
pub use value::Value;
