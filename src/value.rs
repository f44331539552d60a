//! Runtime values produced by evaluation.
//!
//! [`Value`] covers every datum a program can observe: the two "no value" markers
//! (`undefined` and `null`), booleans, double-precision numbers, strings, symbols produced
//! by quoting identifiers, lists, shared mutable objects and callables. Callables compare
//! by identity, which is what the environment's macro flags are keyed on.
//!
//! Lists are immutable and share their storage, so copying a value never copies its
//! elements. Nesting can be arbitrarily deep: dropping a value unrolls nested lists,
//! objects and closures onto a work list instead of recursing, and rendering grows the
//! native stack on demand. Objects can contain themselves; rendering prints `[Circular]`
//! where an object is met again inside itself.
//!
//! Helper functions such as [`val`] and the `From` implementations make it easy to build
//! values from Rust literals in code and tests.

use crate::ast::{Span, Token, TokenKind};
use crate::environment::Environment;
use crate::evaluator::intooperation::{MacroFn, OperationFn};
use crate::{Error, ErrorKind};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Shared, mutable string-keyed map. Every holder observes `set` immediately.
pub type ObjectRef = Rc<RefCell<Fields>>;

/// Core runtime value
#[derive(Clone)]
pub enum Value {
    /// The "no value" marker: missing parameters, empty bodies, absent elements
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Identifier captured by `quote`
    Symbol(String),
    List(List),
    Object(ObjectRef),
    Callable(Callable),
}

/// Immutable list storage, shared by every copy of the value
#[derive(Clone, Default)]
pub struct List(Rc<Vec<Value>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        List(Rc::new(items))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// The elements, copied only when the storage is shared
    pub fn into_vec(mut self) -> Vec<Value> {
        Rc::unwrap_or_clone(std::mem::take(&mut self.0))
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Move the elements onto `pending` if no other copy exists
    fn drain_unique(&mut self, pending: &mut Vec<Value>) {
        if let Some(items) = Rc::get_mut(&mut self.0) {
            pending.append(items);
        }
    }
}

impl Drop for List {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.drain_unique(&mut pending);
        release(pending);
    }
}

impl std::ops::Deref for List {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        List::new(items)
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        List::new(iter.into_iter().collect())
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || crate::with_stack(|| self.as_slice() == other.as_slice())
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_debug_list(self, f, &mut Visiting::default())
    }
}

/// Entries of an object, ordered by key
#[derive(Default)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    pub(crate) fn take_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.0).into_values().collect()
    }
}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl Drop for Fields {
    fn drop(&mut self) {
        release(self.take_values());
    }
}

impl std::ops::Deref for Fields {
    type Target = BTreeMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Fields {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Drop `pending` together with everything only it keeps alive.
///
/// Nested lists, objects, closures and bound calls that have no other owner are taken
/// apart onto `pending`, so the nesting depth never turns into native recursion.
pub(crate) fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(mut list) => list.drain_unique(&mut pending),
            Value::Object(object) => {
                if Rc::strong_count(&object) == 1 {
                    if let Ok(mut fields) = object.try_borrow_mut() {
                        pending.extend(fields.take_values());
                    }
                }
            }
            Value::Callable(Callable::Lambda(closure) | Callable::Macro(closure)) => {
                if let Ok(closure) = Rc::try_unwrap(closure) {
                    closure.env.drain_unique(&mut pending);
                }
            }
            Value::Callable(Callable::Bound(bound)) => {
                if let Ok(bound) = Rc::try_unwrap(bound) {
                    pending.push(Value::Callable(bound.target));
                    pending.extend(bound.args);
                }
            }
            _ => {}
        }
    }
}

/// A value that can appear at the head of a list.
#[derive(Clone)]
pub enum Callable {
    /// Host function receiving evaluated arguments
    Builtin(Rc<Builtin>),
    /// Host special form receiving raw tokens
    SpecialForm(Rc<SpecialForm>),
    /// User `lambda` or `function`
    Lambda(Rc<Closure>),
    /// User `macro`
    Macro(Rc<Closure>),
    /// Partial application produced by `bind`
    Bound(Rc<BoundCall>),
}

pub struct Builtin {
    pub id: String,
    pub func: Arc<OperationFn>,
}

pub struct SpecialForm {
    pub id: String,
    pub func: Rc<MacroFn>,
}

/// Parameters and body paired with the frame that was current at definition time.
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<[Token]>,
    pub env: Environment,
}

pub struct BoundCall {
    pub target: Callable,
    pub args: Vec<Value>,
}

/// Allocation identity of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableId(usize);

impl Callable {
    pub fn builtin(id: impl Into<String>, func: Arc<OperationFn>) -> Self {
        Callable::Builtin(Rc::new(Builtin {
            id: id.into(),
            func,
        }))
    }

    pub fn special_form(id: impl Into<String>, func: Rc<MacroFn>) -> Self {
        Callable::SpecialForm(Rc::new(SpecialForm {
            id: id.into(),
            func,
        }))
    }

    /// `target` with `args` prepended to every call
    pub fn bound(target: Callable, args: Vec<Value>) -> Self {
        Callable::Bound(Rc::new(BoundCall { target, args }))
    }

    pub fn id(&self) -> CallableId {
        let ptr = match self {
            Callable::Builtin(builtin) => Rc::as_ptr(builtin) as *const (),
            Callable::SpecialForm(form) => Rc::as_ptr(form) as *const (),
            Callable::Lambda(closure) | Callable::Macro(closure) => {
                Rc::as_ptr(closure) as *const ()
            }
            Callable::Bound(bound) => Rc::as_ptr(bound) as *const (),
        };
        CallableId(ptr as usize)
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Builtin(builtin) => &builtin.id,
            Callable::SpecialForm(form) => &form.id,
            Callable::Lambda(closure) => closure.name.as_deref().unwrap_or("lambda"),
            Callable::Macro(closure) => closure.name.as_deref().unwrap_or("macro"),
            Callable::Bound(bound) => bound.target.name(),
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Builtin(builtin) => write!(f, "Builtin({})", builtin.id),
            Callable::SpecialForm(form) => write!(f, "SpecialForm({})", form.id),
            Callable::Lambda(closure) => write!(f, "Lambda(params={:?})", closure.params),
            Callable::Macro(closure) => write!(f, "Macro(params={:?})", closure.params),
            Callable::Bound(bound) => {
                write!(f, "Bound({:?}, args={})", bound.target, bound.args.len())
            }
        }
    }
}

impl std::fmt::Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Builtin(builtin) => write!(f, "#<builtin-function:{}>", builtin.id),
            Callable::SpecialForm(form) => write!(f, "#<special-form:{}>", form.id),
            Callable::Lambda(_) => write!(f, "#<function:{}>", self.name()),
            Callable::Macro(_) => write!(f, "#<macro:{}>", self.name()),
            Callable::Bound(_) => write!(f, "#<bound:{}>", self.name()),
        }
    }
}

impl Value {
    /// `false`, `0`, `NaN`, `""`, `null` and `undefined` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Symbol(_) | Value::List(_) | Value::Object(_) | Value::Callable(_) => true,
        }
    }

    /// Result of the `type` function
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Null | Value::List(_) | Value::Object(_) => "object",
            Value::Callable(_) => "function",
        }
    }

    /// Precise kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::List(_) => "list",
            other => other.type_of(),
        }
    }

    /// String conversion used by `string`, `join`, `print` and string concatenation.
    ///
    /// Objects convert to `[object Object]` without looking at their entries.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) | Value::Symbol(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::List(items) => crate::with_stack(|| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_text(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }),
            Value::Object(_) => "[object Object]".to_owned(),
            other => other.to_string(),
        }
    }

    /// Literal payload of a token, without evaluating it
    pub fn quote(token: &Token) -> Result<Value, Error> {
        match &token.kind {
            TokenKind::Value(value) => Ok(value.clone()),
            TokenKind::Identifier(name) => Ok(Value::Symbol(name.clone())),
            TokenKind::List(items) => items
                .iter()
                .map(Value::quote)
                .collect::<Result<List, _>>()
                .map(Value::List),
            TokenKind::Comment(_) => {
                Err(Error::new(ErrorKind::UnknownTokenType).with_span(&token.span))
            }
        }
    }

    /// Inverse of [`Value::quote`]: symbols become identifiers and lists become list tokens.
    /// Every produced token carries `span`.
    ///
    /// Lists nested deeper than `max_depth` are refused, as the reader refuses them.
    pub fn into_token(self, span: &Span, max_depth: usize) -> Result<Token, Error> {
        self.into_nested_token(span, max_depth, 0)
    }

    fn into_nested_token(self, span: &Span, max_depth: usize, depth: usize) -> Result<Token, Error> {
        let kind = match self {
            Value::Symbol(name) => TokenKind::Identifier(name),
            Value::List(items) => {
                if depth >= max_depth {
                    return Err(Error::new(ErrorKind::DepthLimitExceeded(max_depth)));
                }
                TokenKind::List(
                    items
                        .into_vec()
                        .into_iter()
                        .map(|item| item.into_nested_token(span, max_depth, depth + 1))
                        .collect::<Result<_, _>>()?,
                )
            }
            other => TokenKind::Value(other),
        };
        Ok(Token::new(kind, span.clone()))
    }
}

/// Formats a number the way the language prints it: integral values without a
/// fractional part, `Infinity` and `NaN` spelled out.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_owned()
    } else {
        n.to_string()
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Undefined
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Callable(callable)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as f64)
            }
        }
    };
}

// i64 and u64 are deliberately absent: they do not fit an f64 losslessly
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);
impl_from_integer!(usize);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::<Value>::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(Into::<Value>::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(Into::<Value>::into).collect())
    }
}

// Fallible conversions from `Value` back into Rust types, used by the typed builtin adapters.

fn expected(kind: &str, value: &Value) -> Error {
    Error::type_error(format!("expected {kind}, got {}", value.kind_name()))
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64, Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(expected("number", &other)),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(expected("boolean", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String, Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(expected("string", &other)),
        }
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::List(list)
    }
}

impl TryFrom<Value> for List {
    type Error = Error;

    fn try_from(value: Value) -> Result<List, Error> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(expected("list", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Vec<Value>, Error> {
        List::try_from(value).map(List::into_vec)
    }
}

impl TryFrom<Value> for Callable {
    type Error = Error;

    fn try_from(value: Value) -> Result<Callable, Error> {
        match value {
            Value::Callable(callable) => Ok(callable),
            other => Err(expected("function", &other)),
        }
    }
}

impl TryFrom<Value> for ObjectRef {
    type Error = Error;

    fn try_from(value: Value) -> Result<ObjectRef, Error> {
        match value {
            Value::Object(object) => Ok(object),
            other => Err(expected("object", &other)),
        }
    }
}

/// Helper function for creating Values - works great in mixed lists!
/// Accepts any type that can be converted to Value
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating quoted symbols
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Objects currently being rendered. Meeting one of them again means it contains itself.
#[derive(Default)]
struct Visiting(HashSet<*const RefCell<Fields>>);

impl Visiting {
    /// Render `object` with `f` unless it is already open, in which case `[Circular]`
    /// is written instead
    fn object(
        &mut self,
        object: &ObjectRef,
        out: &mut fmt::Formatter<'_>,
        f: impl FnOnce(&mut Self, &mut fmt::Formatter<'_>) -> fmt::Result,
    ) -> fmt::Result {
        let ptr = Rc::as_ptr(object);
        if !self.0.insert(ptr) {
            return write!(out, "[Circular]");
        }
        let result = crate::with_stack(|| f(self, out));
        self.0.remove(&ptr);
        result
    }
}

fn write_debug(value: &Value, f: &mut fmt::Formatter<'_>, visiting: &mut Visiting) -> fmt::Result {
    match value {
        Value::Undefined => write!(f, "Undefined"),
        Value::Null => write!(f, "Null"),
        Value::Bool(b) => write!(f, "Bool({b})"),
        Value::Number(n) => write!(f, "Number({n})"),
        Value::String(s) => write!(f, "String({s:?})"),
        Value::Symbol(s) => write!(f, "Symbol({s})"),
        Value::List(list) => write_debug_list(list, f, visiting),
        Value::Object(object) => visiting.object(object, f, |visiting, f| {
            write!(f, "Object({{")?;
            for (i, (key, value)) in object.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key:?}: ")?;
                write_debug(value, f, visiting)?;
            }
            write!(f, "}})")
        }),
        Value::Callable(callable) => write!(f, "{callable:?}"),
    }
}

fn write_debug_list(list: &List, f: &mut fmt::Formatter<'_>, visiting: &mut Visiting) -> fmt::Result {
    crate::with_stack(|| {
        write!(f, "List(")?;
        for (i, v) in list.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write_debug(v, f, visiting)?;
        }
        write!(f, ")")
    })
}

fn write_display(value: &Value, f: &mut fmt::Formatter<'_>, visiting: &mut Visiting) -> fmt::Result {
    match value {
        Value::Undefined => write!(f, "undefined"),
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write!(f, "{}", format_number(*n)),
        Value::Symbol(s) => write!(f, "{s}"),
        Value::String(s) => {
            write!(f, "\"")?;
            for ch in s.chars() {
                match ch {
                    '"' => write!(f, "\\\"")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    '\t' => write!(f, "\\t")?,
                    '\r' => write!(f, "\\r")?,
                    c => write!(f, "{c}")?,
                }
            }
            write!(f, "\"")
        }
        Value::List(elements) => crate::with_stack(|| {
            write!(f, "(")?;
            for (i, elem) in elements.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_display(elem, f, visiting)?;
            }
            write!(f, ")")
        }),
        Value::Object(object) => visiting.object(object, f, |visiting, f| {
            write!(f, "{{")?;
            for (i, (key, value)) in object.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: ")?;
                write_display(value, f, visiting)?;
            }
            write!(f, "}}")
        }),
        Value::Callable(callable) => write!(f, "{callable}"),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_debug(self, f, &mut Visiting::default())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(self, f, &mut Visiting::default())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Objects are shared references and compare by identity
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => a == b,
            _ => false,
        }
    }
}
