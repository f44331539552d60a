//! Reader: source text to positioned tokens.
//!
//! The grammar is dispatched on a single character of lookahead:
//!
//! - `(` starts a list, closed by `)`
//! - `;` starts a comment running to the end of the line; comments are dropped
//! - `"` starts a string; a backslash keeps itself and the next character verbatim
//! - `'` quotes the following expression, reading as `(quote expr)`
//! - anything else starts a symbol: the longest run of characters other than
//!   `( ) " '` and whitespace. `true`, `false`, `null` and `undefined` are literals,
//!   decimal numbers become number literals, everything else is an identifier.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize},
    error::ErrorKind,
    sequence::{pair, preceded},
};

use crate::ast::{Position, Span, Token, TokenKind};
use crate::value::Value;
use crate::{MAX_PARSE_DEPTH, ParseError, SyntaxErrorKind};
use std::cell::Cell;

/// Reader limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Maximum nesting of lists and quotes
    pub max_depth: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// nom error carrying the reader's own error kinds
#[derive(Debug, PartialEq)]
struct ReadError<'a> {
    input: &'a str,
    kind: SyntaxErrorKind,
}

impl<'a> nom::error::ParseError<&'a str> for ReadError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        ReadError {
            input,
            kind: match input.chars().next() {
                Some(c) => SyntaxErrorKind::UnexpectedCharacter(c),
                None => SyntaxErrorKind::UnexpectedEndOfList,
            },
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type ReadResult<'a, T> = IResult<&'a str, T, ReadError<'a>>;

fn failure(input: &str, kind: SyntaxErrorKind) -> nom::Err<ReadError<'_>> {
    nom::Err::Failure(ReadError { input, kind })
}

fn is_symbol_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '\'')
}

fn whitespace(input: &str) -> ReadResult<'_, &str> {
    take_while(char::is_whitespace).parse(input)
}

/// Decimal number: optional sign, digits with an optional fraction (or a bare fraction),
/// optional exponent
fn decimal(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        opt(one_of("+-")),
        pair(
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(pair(one_of("eE"), pair(opt(one_of("+-")), digit1))),
        ),
    ))
    .parse(input)
}

fn parse_number(text: &str) -> Option<f64> {
    match decimal(text) {
        Ok(("", digits)) => digits.parse().ok(),
        _ => None,
    }
}

/// Classify the text of a symbol run
fn classify_symbol(text: &str) -> TokenKind {
    match text {
        "true" => TokenKind::Value(Value::Bool(true)),
        "false" => TokenKind::Value(Value::Bool(false)),
        "null" => TokenKind::Value(Value::Null),
        "undefined" => TokenKind::Value(Value::Undefined),
        _ => match parse_number(text) {
            Some(n) => TokenKind::Value(Value::Number(n)),
            None => TokenKind::Identifier(text.to_owned()),
        },
    }
}

fn parse_symbol(input: &str) -> ReadResult<'_, TokenKind> {
    let (rest, text) = take_while1(is_symbol_char).parse(input)?;
    Ok((rest, classify_symbol(text)))
}

fn parse_comment(input: &str) -> ReadResult<'_, TokenKind> {
    let (rest, text) = preceded(char(';'), take_till(|c| c == '\r' || c == '\n')).parse(input)?;
    Ok((rest, TokenKind::Comment(text.to_owned())))
}

fn parse_string(input: &str) -> ReadResult<'_, TokenKind> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                return Ok((char_iter.as_str(), TokenKind::Value(Value::String(text))));
            }
            Some('\\') => {
                // Escapes are kept as written
                text.push('\\');
                match char_iter.next() {
                    Some(escaped) => text.push(escaped),
                    None => {
                        return Err(failure(
                            char_iter.as_str(),
                            SyntaxErrorKind::UnexpectedEndOfString,
                        ));
                    }
                }
            }
            Some(ch) => text.push(ch),
            None => {
                return Err(failure(remaining, SyntaxErrorKind::UnexpectedEndOfString));
            }
        }
        remaining = char_iter.as_str();
    }
}

/// Byte offsets at which each line starts; `\r\n` counts as a single line break
fn line_starts(source: &str) -> Vec<usize> {
    let bytes = source.as_bytes();
    let mut starts = vec![0];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                i += 2;
                starts.push(i);
            }
            b'\r' | b'\n' => {
                i += 1;
                starts.push(i);
            }
            _ => i += 1,
        }
    }
    starts
}

struct Reader<'s> {
    source: &'s str,
    line_starts: Vec<usize>,
    /// Most recently computed position. Positions are requested in source order, so
    /// columns are counted forward from here.
    last: Cell<Position>,
    config: ReaderConfig,
}

impl<'s> Reader<'s> {
    fn new(source: &'s str, config: ReaderConfig) -> Self {
        Reader {
            source,
            line_starts: line_starts(source),
            last: Cell::new(Position::START),
            config,
        }
    }

    fn offset(&self, rest: &str) -> usize {
        self.source.len() - rest.len()
    }

    fn position(&self, index: usize) -> Position {
        let line = self.line_starts.partition_point(|&start| start <= index);
        let line_start = self.line_starts[line - 1];
        let last = self.last.get();
        let column = if last.line == line && last.index <= index {
            last.column + self.source[last.index..index].chars().count()
        } else {
            self.source[line_start..index].chars().count() + 1
        };
        let position = Position {
            line,
            column,
            index,
        };
        self.last.set(position);
        position
    }

    /// Span from `start` to the text remaining at `after`
    fn span(&self, start: Position, after: &str) -> Span {
        let end = self.position(self.offset(after));
        Span {
            start,
            end,
            raw: self.source[start.index..end.index].into(),
        }
    }

    fn error(&self, err: nom::Err<ReadError<'_>>) -> ParseError {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => ParseError {
                position: self.position(self.offset(e.input)),
                kind: e.kind,
            },
            nom::Err::Incomplete(_) => ParseError {
                position: self.position(self.source.len()),
                kind: SyntaxErrorKind::UnexpectedEndOfList,
            },
        }
    }

    fn program(&self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut input = self.source;
        loop {
            let (rest, _) = whitespace(input).map_err(|e| self.error(e))?;
            if rest.is_empty() {
                return Ok(tokens);
            }
            let (rest, token) = self.expression(rest, 0).map_err(|e| self.error(e))?;
            if !token.is_comment() {
                tokens.push(token);
            }
            input = rest;
        }
    }

    /// One expression with its surrounding whitespace
    fn expression(&self, input: &'s str, depth: usize) -> ReadResult<'s, Token> {
        let (input, _) = whitespace(input)?;
        let (input, token) = self.datum(input, depth)?;
        let (input, _) = whitespace(input)?;
        Ok((input, token))
    }

    /// Dispatch on the first character. Callers check for end of input first.
    fn datum(&self, input: &'s str, depth: usize) -> ReadResult<'s, Token> {
        let start = self.position(self.offset(input));
        let (rest, kind) = match input.chars().next() {
            Some('(') => self.parse_list(input, depth)?,
            Some(';') => parse_comment(input)?,
            Some('"') => parse_string(input)?,
            Some('\'') => self.parse_quote(input, depth)?,
            Some(c) if is_symbol_char(c) => parse_symbol(input)?,
            Some(c) => return Err(failure(input, SyntaxErrorKind::UnexpectedCharacter(c))),
            None => return Err(failure(input, SyntaxErrorKind::UnexpectedEndOfList)),
        };
        Ok((rest, Token::new(kind, self.span(start, rest))))
    }

    fn parse_list(&self, input: &'s str, depth: usize) -> ReadResult<'s, TokenKind> {
        if depth >= self.config.max_depth {
            return Err(failure(
                input,
                SyntaxErrorKind::TooDeeplyNested(self.config.max_depth),
            ));
        }
        let (mut input, _) = char('(').parse(input)?;
        let mut items = Vec::new();

        loop {
            let (rest, _) = whitespace(input)?;
            match rest.chars().next() {
                Some(')') => {
                    let (rest, _) = char(')').parse(rest)?;
                    return Ok((rest, TokenKind::List(items)));
                }
                None => return Err(failure(rest, SyntaxErrorKind::UnexpectedEndOfList)),
                Some(_) => {
                    let (rest, token) = self.expression(rest, depth + 1)?;
                    if !token.is_comment() {
                        items.push(token);
                    }
                    input = rest;
                }
            }
        }
    }

    /// `'expr` reads as `(quote expr)`; the `quote` identifier spans the apostrophe
    fn parse_quote(&self, input: &'s str, depth: usize) -> ReadResult<'s, TokenKind> {
        if depth >= self.config.max_depth {
            return Err(failure(
                input,
                SyntaxErrorKind::TooDeeplyNested(self.config.max_depth),
            ));
        }
        let start = self.position(self.offset(input));
        let (rest, _) = char('\'').parse(input)?;
        match rest.chars().next() {
            Some(c) if c != ';' && (matches!(c, '(' | '"' | '\'') || is_symbol_char(c)) => {}
            _ => return Err(failure(rest, SyntaxErrorKind::ExpectedQuotedExpression)),
        }

        let quote = Token::new(
            TokenKind::Identifier("quote".to_owned()),
            self.span(start, rest),
        );
        let (rest, quoted) = self.datum(rest, depth + 1)?;
        Ok((rest, TokenKind::List(vec![quote, quoted])))
    }
}

/// Read every top-level expression in `source`, dropping comments.
pub fn parse(source: &str) -> Result<Vec<Token>, ParseError> {
    parse_with_config(source, ReaderConfig::default())
}

#[tracing::instrument(level = "debug", skip_all, fields(bytes = source.len()))]
pub fn parse_with_config(source: &str, config: ReaderConfig) -> Result<Vec<Token>, ParseError> {
    let tokens = Reader::new(source, config).program()?;
    tracing::debug!(tokens = tokens.len(), "parsed source");
    Ok(tokens)
}
