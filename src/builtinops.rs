//! Built-in operations registry.
//!
//! This module provides the registry of core functions and special forms installed into the
//! global frame of every [`Interpreter`].
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: receive their arguments evaluated left to right (e.g., `+`, `not`, `map`)
//! - **Special Forms**: receive their arguments as raw tokens and decide what to evaluate
//!   (e.g., `if`, `let`, `lambda`). They are installed as constants and flagged as macros.
//!
//! ## Coercions
//!
//! Numbers are double-precision floats and follow IEEE semantics: `(/ 1 0)` is `Infinity`,
//! `(% 5 0)` is `NaN`. The only implicit conversion is string concatenation in `+` when
//! either operand is a string. Every other operator rejects operands of the wrong kind with
//! a type error rather than producing `NaN`.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with a typed signature such as `fn(f64, NumIter) -> f64`,
//!    or `fn(&mut Interpreter, Vec<Value>) -> Result<Value, Error>` if it needs to call back
//!    into the interpreter
//! 2. **Add it to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use crate::ast::Token;
use crate::evaluator::Interpreter;
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, SpecialFormFn, StringIter,
    ValueIter,
};
use crate::evaluator::special_forms;
use crate::value::{Callable, List, ObjectRef, Value};
use crate::{Error, ErrorKind};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(&self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(*self, count))
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "between {min} and {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Represents the implementation of a built-in operation (function or special form)
#[derive(Clone)]
pub enum OpKind {
    /// Regular function that takes evaluated arguments and returns a value
    Function(Arc<OperationFn>),
    /// Special form that receives the raw argument tokens
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

impl PartialEq for OpKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpKind::Function(f1), OpKind::Function(f2)) => Arc::ptr_eq(f1, f2),
            (OpKind::SpecialForm(f1), OpKind::SpecialForm(f2)) => {
                std::ptr::fn_addr_eq(*f1, *f2)
            }
            _ => false,
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier the operation is bound to in the global frame
    pub id: &'static str,
    /// The implementation of this operation (function or special form)
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// The callable value bound to `id`, validating the arity on every call
    pub(crate) fn to_callable(&self) -> Callable {
        let arity = self.arity;
        match &self.op_kind {
            OpKind::Function(func) => {
                let func = Arc::clone(func);
                Callable::builtin(
                    self.id,
                    Arc::new(move |interpreter: &mut Interpreter, args: Vec<Value>| {
                        arity.validate(args.len())?;
                        func(interpreter, args)
                    }),
                )
            }
            OpKind::SpecialForm(form) => {
                let form = *form;
                Callable::special_form(
                    self.id,
                    Rc::new(move |interpreter: &mut Interpreter, tokens: &[Token]| {
                        arity.validate(tokens.len())?;
                        form(interpreter, tokens)
                    }),
                )
            }
        }
    }
}

//
// Builtin Function Implementations
//

fn builtin_error(args: ValueIter) -> Result<Value, Error> {
    let parts: Vec<String> = args.map(|value| value.to_text()).collect();

    let message = if parts.is_empty() {
        "Error".to_owned()
    } else {
        parts.join(" ")
    };

    Err(Error::new(ErrorKind::Raised(message)))
}

fn builtin_print(args: ValueIter) -> Value {
    let parts: Vec<String> = args.map(|value| value.to_text()).collect();
    println!("{}", parts.join(" "));
    Value::Undefined
}

// Arithmetic

fn builtin_add(first: Value, mut rest: ValueIter) -> Result<Value, Error> {
    rest.try_fold(first, |acc, operand| match (acc, operand) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (a @ Value::String(_), b) | (a, b @ Value::String(_)) => {
            Ok(Value::String(a.to_text() + &b.to_text()))
        }
        (a, b) => Err(Error::type_error(format!(
            "cannot add {} and {}",
            a.kind_name(),
            b.kind_name()
        ))),
    })
}

// Macro to generate left folds over numeric arguments
macro_rules! numeric_fold {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(first: f64, rest: NumIter) -> f64 {
            rest.fold(first, |$a, $b| $body)
        }
    };
}

numeric_fold!(builtin_sub, |a, b| a - b);
numeric_fold!(builtin_mul, |a, b| a * b);
numeric_fold!(builtin_div, |a, b| a / b);
numeric_fold!(builtin_rem, |a, b| a % b);
numeric_fold!(builtin_pow, |a, b| a.powf(b));
numeric_fold!(builtin_min, |a, b| a.min(b));
numeric_fold!(builtin_max, |a, b| a.max(b));

/// Truncates, then wraps modulo 2^32 into the signed 32-bit range
fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    if wrapped >= 2_147_483_648.0 {
        (wrapped - 4_294_967_296.0) as i32
    } else {
        wrapped as i32
    }
}

// Macro to generate left folds over 32-bit integer views of the arguments
macro_rules! bitwise_fold {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(first: f64, rest: NumIter) -> f64 {
            let result = rest.fold(to_int32(first), |$a, n| {
                let $b = to_int32(n);
                $body
            });
            f64::from(result)
        }
    };
}

bitwise_fold!(builtin_bit_and, |a, b| a & b);
bitwise_fold!(builtin_bit_or, |a, b| a | b);
bitwise_fold!(builtin_shl, |a, b| a.wrapping_shl(b as u32 & 31));
bitwise_fold!(builtin_shr, |a, b| a.wrapping_shr(b as u32 & 31));

fn builtin_abs(n: f64) -> f64 {
    n.abs()
}

/// Rounds half-way cases towards positive infinity
fn builtin_round(n: f64) -> f64 {
    let floor = n.floor();
    if n - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

fn builtin_floor(n: f64) -> f64 {
    n.floor()
}

fn builtin_ceil(n: f64) -> f64 {
    n.ceil()
}

// Comparison

fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>, Error> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.partial_cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => Err(Error::type_error(format!(
            "cannot compare {} with {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

// Macro to generate chained comparison functions: every adjacent pair must satisfy the
// relation, and the first failing pair ends the scan
macro_rules! chained_comparison {
    ($name:ident, |$a:ident, $b:ident| $test:expr) => {
        fn $name(args: ValueIter) -> Result<bool, Error> {
            let args: Vec<Value> = args.collect();
            for pair in args.windows(2) {
                let ($a, $b) = (&pair[0], &pair[1]);
                if !$test {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    };
}

chained_comparison!(builtin_eq, |a, b| a == b);
chained_comparison!(builtin_ne, |a, b| a != b);
chained_comparison!(builtin_lt, |a, b| matches!(compare(a, b)?, Some(Ordering::Less)));
chained_comparison!(builtin_le, |a, b| matches!(
    compare(a, b)?,
    Some(Ordering::Less | Ordering::Equal)
));
chained_comparison!(builtin_gt, |a, b| matches!(compare(a, b)?, Some(Ordering::Greater)));
chained_comparison!(builtin_ge, |a, b| matches!(
    compare(a, b)?,
    Some(Ordering::Greater | Ordering::Equal)
));

fn builtin_equals(base: Value, mut rest: ValueIter) -> bool {
    rest.all(|value| value == base)
}

// Logic

fn builtin_and(mut args: ValueIter) -> bool {
    args.all(|value| value.is_truthy())
}

fn builtin_or(mut args: ValueIter) -> bool {
    args.any(|value| value.is_truthy())
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

// Lists

fn builtin_list(args: ValueIter) -> Value {
    Value::List(args.collect())
}

fn builtin_first(list: List) -> Value {
    list.first().cloned().unwrap_or(Value::Undefined)
}

fn builtin_last(list: List) -> Value {
    list.last().cloned().unwrap_or(Value::Undefined)
}

fn builtin_rest(list: List) -> Value {
    Value::List(list.iter().skip(1).cloned().collect())
}

fn builtin_reverse(list: List) -> Value {
    let mut items = list.into_vec();
    items.reverse();
    Value::List(items.into())
}

/// Concatenates its arguments, splicing list arguments one level deep
fn builtin_append(args: ValueIter) -> Value {
    let mut result = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => result.extend(items.iter().cloned()),
            other => result.push(other),
        }
    }
    Value::List(result.into())
}

/// Resolves a possibly negative index against `len`, clamping to `0..=len`
fn relative_index(index: f64, len: usize) -> usize {
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    if index < 0.0 {
        (len as f64 + index).max(0.0) as usize
    } else {
        index.min(len as f64) as usize
    }
}

fn builtin_slice(list: List, start: f64, end: NumIter) -> Value {
    let len = list.len();
    let start = relative_index(start, len);
    let end = end.last().map_or(len, |end| relative_index(end, len));
    if start >= end {
        return Value::List(List::default());
    }
    Value::List(list[start..end].iter().cloned().collect())
}

fn builtin_map(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let list = List::try_from(next_arg(&mut args))?;
    let func = Callable::try_from(next_arg(&mut args))?;

    list.iter()
        .map(|item| interpreter.call(&func, vec![item.clone()]))
        .collect::<Result<List, _>>()
        .map(Value::List)
}

fn builtin_reduce(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let list = List::try_from(next_arg(&mut args))?;
    let func = Callable::try_from(next_arg(&mut args))?;

    let mut items = list.iter().cloned();
    let initial = match args.next() {
        Some(initial) => initial,
        None => items.next().ok_or_else(|| {
            Error::type_error("reduce of empty list with no initial value")
        })?,
    };
    items.try_fold(initial, |carry, item| {
        interpreter.call(&func, vec![carry, item])
    })
}

// Strings

/// Joins list elements with `separator` (default `,`); `null` and `undefined` elements
/// become empty strings
fn builtin_join(list: List, separator: StringIter) -> String {
    let separator = separator.last().unwrap_or_else(|| ",".to_owned());
    list.iter()
        .map(|item| match item {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_text(),
        })
        .collect::<Vec<_>>()
        .join(&separator)
}

fn builtin_split(text: String, separator: String) -> Value {
    if separator.is_empty() {
        return Value::List(text.chars().map(|c| Value::String(c.to_string())).collect());
    }
    Value::List(text.split(separator.as_str()).map(Value::from).collect())
}

fn builtin_char(text: String, position: f64) -> Value {
    let chars: Vec<char> = text.chars().collect();
    let index = if position < 0.0 {
        chars.len() as f64 + position.trunc()
    } else {
        position.trunc()
    };
    if index < 0.0 || index.is_nan() {
        return Value::Undefined;
    }
    chars
        .get(index as usize)
        .map_or(Value::Undefined, |c| Value::String(c.to_string()))
}

fn builtin_lower(text: String) -> String {
    text.to_lowercase()
}

fn builtin_upper(text: String) -> String {
    text.to_uppercase()
}

fn builtin_trim(text: String) -> String {
    text.trim().to_owned()
}

/// Replaces the first occurrence of `search`
fn builtin_replace(text: String, search: String, replacement: String) -> String {
    text.replacen(&search, &replacement, 1)
}

// Objects

fn builtin_get(target: Value, key: Value) -> Result<Value, Error> {
    match (&target, &key) {
        (Value::Object(object), Value::String(key)) => {
            Ok(object.borrow().get(key).cloned().unwrap_or(Value::Undefined))
        }
        (Value::List(items), Value::Number(index)) => Ok(element_at(items, *index)
            .cloned()
            .unwrap_or(Value::Undefined)),
        (Value::String(text), Value::Number(index)) => Ok(integer_index(*index)
            .and_then(|index| text.chars().nth(index))
            .map_or(Value::Undefined, |c| Value::String(c.to_string()))),
        _ => Err(Error::type_error(format!(
            "cannot get {} of {}",
            key.kind_name(),
            target.kind_name()
        ))),
    }
}

fn integer_index(index: f64) -> Option<usize> {
    (index >= 0.0 && index.fract() == 0.0).then_some(index as usize)
}

fn element_at(items: &[Value], index: f64) -> Option<&Value> {
    integer_index(index).and_then(|index| items.get(index))
}

fn builtin_set(object: ObjectRef, key: String, value: Value) -> Value {
    object.borrow_mut().insert(key, value.clone());
    value
}

fn builtin_keys(object: ObjectRef) -> Value {
    Value::List(object.borrow().keys().cloned().map(Value::String).collect())
}

fn builtin_values(object: ObjectRef) -> Value {
    Value::List(object.borrow().values().cloned().collect())
}

// Conversions and reflection

fn builtin_type(value: Value) -> String {
    value.type_of().to_owned()
}

/// Numeric conversion: booleans become 0/1, strings are parsed after trimming (an empty
/// string is 0), `null` is 0 and everything else is `NaN`
fn builtin_number(value: Value) -> f64 {
    match value {
        Value::Number(n) => n,
        Value::Bool(b) => f64::from(u8::from(b)),
        Value::Null => 0.0,
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                0.0
            } else {
                parse_numeric_text(text)
            }
        }
        _ => f64::NAN,
    }
}

fn parse_numeric_text(text: &str) -> f64 {
    match text {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust also accepts "inf" and "nan" spellings, which are not numbers here
        _ if text.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) => {
            f64::NAN
        }
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

fn builtin_string(value: Value) -> String {
    value.to_text()
}

fn builtin_boolean(value: Value) -> bool {
    value.is_truthy()
}

/// `(eval expr...)`: converts each value back into a token and evaluates the sequence in
/// the caller's frame
fn builtin_eval(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
    let tokens = interpreter.tokens_from_values(args)?;
    interpreter.evaluate_all(&tokens)
}

fn builtin_call(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let func = Callable::try_from(next_arg(&mut args))?;
    interpreter.call(&func, args.collect())
}

fn builtin_apply(interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let func = Callable::try_from(next_arg(&mut args))?;
    let list = Vec::<Value>::try_from(next_arg(&mut args))?;
    interpreter.call(&func, list)
}

/// Partial application: `((bind f 1) 2)` calls `(f 1 2)`
fn builtin_bind(func: Callable, args: ValueIter) -> Callable {
    Callable::bound(func, args.collect())
}

fn next_arg(args: &mut std::vec::IntoIter<Value>) -> Value {
    args.next().unwrap_or(Value::Undefined)
}

// Macro to generate type predicates
macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(value: Value) -> bool {
            matches!(value, $pattern)
        }
    };
}

type_predicate!(builtin_is_number, Value::Number(_));
type_predicate!(builtin_is_string, Value::String(_));
type_predicate!(builtin_is_boolean, Value::Bool(_));
type_predicate!(builtin_is_function, Value::Callable(_));
type_predicate!(builtin_is_list, Value::List(_));
type_predicate!(builtin_is_object, Value::Null | Value::List(_) | Value::Object(_));
type_predicate!(builtin_is_null, Value::Null);
type_predicate!(builtin_is_undefined, Value::Undefined);

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection of `BuiltinOp` values for ease of
/// auditing. Typed implementations are wired through the same adapter layer used for
/// host registration, once, at initialization time.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> OpKind
    where
        F: IntoOperation<Args>,
    {
        OpKind::Function(<F as IntoOperation<Args>>::into_operation(f))
    }

    fn builtin_variadic<Args, F>(f: F) -> OpKind
    where
        F: IntoVariadicOperation<Args>,
    {
        OpKind::Function(<F as IntoVariadicOperation<Args>>::into_variadic_operation(f))
    }

    fn builtin_raw(f: fn(&mut Interpreter, Vec<Value>) -> Result<Value, Error>) -> OpKind {
        OpKind::Function(Arc::new(f))
    }

    fn op(id: &'static str, op_kind: OpKind, arity: Arity) -> BuiltinOp {
        BuiltinOp { id, op_kind, arity }
    }

    use Arity::{Any, AtLeast, Exact, Range};
    use OpKind::SpecialForm;

    vec![
        // Special forms
        op("quote", SpecialForm(special_forms::eval_quote), Exact(1)),
        op("var", SpecialForm(special_forms::eval_var), AtLeast(1)),
        op("const", SpecialForm(special_forms::eval_const), AtLeast(1)),
        op("assign", SpecialForm(special_forms::eval_assign), AtLeast(1)),
        op("let", SpecialForm(special_forms::eval_let), AtLeast(1)),
        op("lambda", SpecialForm(special_forms::eval_lambda), AtLeast(1)),
        op("function", SpecialForm(special_forms::eval_function), AtLeast(2)),
        op("macro", SpecialForm(special_forms::eval_macro), AtLeast(2)),
        op("if", SpecialForm(special_forms::eval_if), Any),
        op("while", SpecialForm(special_forms::eval_while), AtLeast(1)),
        op("loop", SpecialForm(special_forms::eval_loop), AtLeast(1)),
        op("object", SpecialForm(special_forms::eval_object), Any),
        // Arithmetic
        op("+", builtin_variadic::<(Value, ValueIter), _>(builtin_add), AtLeast(1)),
        op("-", builtin_variadic::<(f64, NumIter), _>(builtin_sub), AtLeast(1)),
        op("*", builtin_variadic::<(f64, NumIter), _>(builtin_mul), AtLeast(1)),
        op("/", builtin_variadic::<(f64, NumIter), _>(builtin_div), AtLeast(1)),
        op("%", builtin_variadic::<(f64, NumIter), _>(builtin_rem), AtLeast(1)),
        op("**", builtin_variadic::<(f64, NumIter), _>(builtin_pow), AtLeast(1)),
        op("pow", builtin_variadic::<(f64, NumIter), _>(builtin_pow), AtLeast(1)),
        op("&", builtin_variadic::<(f64, NumIter), _>(builtin_bit_and), AtLeast(1)),
        op("|", builtin_variadic::<(f64, NumIter), _>(builtin_bit_or), AtLeast(1)),
        op("<<", builtin_variadic::<(f64, NumIter), _>(builtin_shl), AtLeast(1)),
        op(">>", builtin_variadic::<(f64, NumIter), _>(builtin_shr), AtLeast(1)),
        op("min", builtin_variadic::<(f64, NumIter), _>(builtin_min), AtLeast(1)),
        op("max", builtin_variadic::<(f64, NumIter), _>(builtin_max), AtLeast(1)),
        op("abs", builtin_fixed::<(f64,), _>(builtin_abs), Exact(1)),
        op("round", builtin_fixed::<(f64,), _>(builtin_round), Exact(1)),
        op("floor", builtin_fixed::<(f64,), _>(builtin_floor), Exact(1)),
        op("ceil", builtin_fixed::<(f64,), _>(builtin_ceil), Exact(1)),
        // Comparison
        op("=", builtin_variadic::<(ValueIter,), _>(builtin_eq), Any),
        op("!=", builtin_variadic::<(ValueIter,), _>(builtin_ne), Any),
        op("<", builtin_variadic::<(ValueIter,), _>(builtin_lt), Any),
        op("<=", builtin_variadic::<(ValueIter,), _>(builtin_le), Any),
        op(">", builtin_variadic::<(ValueIter,), _>(builtin_gt), Any),
        op(">=", builtin_variadic::<(ValueIter,), _>(builtin_ge), Any),
        op("equals", builtin_variadic::<(Value, ValueIter), _>(builtin_equals), AtLeast(1)),
        // Logic
        op("and", builtin_variadic::<(ValueIter,), _>(builtin_and), Any),
        op("or", builtin_variadic::<(ValueIter,), _>(builtin_or), Any),
        op("not", builtin_fixed::<(Value,), _>(builtin_not), Exact(1)),
        // Lists
        op("list", builtin_variadic::<(ValueIter,), _>(builtin_list), Any),
        op("first", builtin_fixed::<(List,), _>(builtin_first), Exact(1)),
        op("last", builtin_fixed::<(List,), _>(builtin_last), Exact(1)),
        op("rest", builtin_fixed::<(List,), _>(builtin_rest), Exact(1)),
        op("reverse", builtin_fixed::<(List,), _>(builtin_reverse), Exact(1)),
        op("append", builtin_variadic::<(ValueIter,), _>(builtin_append), Any),
        op(
            "slice",
            builtin_variadic::<(List, f64, NumIter), _>(builtin_slice),
            Range(2, 3),
        ),
        op("map", builtin_raw(builtin_map), Exact(2)),
        op("reduce", builtin_raw(builtin_reduce), Range(2, 3)),
        // Strings
        op(
            "join",
            builtin_variadic::<(List, StringIter), _>(builtin_join),
            Range(1, 2),
        ),
        op("split", builtin_fixed::<(String, String), _>(builtin_split), Exact(2)),
        op("char", builtin_fixed::<(String, f64), _>(builtin_char), Exact(2)),
        op("lower", builtin_fixed::<(String,), _>(builtin_lower), Exact(1)),
        op("upper", builtin_fixed::<(String,), _>(builtin_upper), Exact(1)),
        op("trim", builtin_fixed::<(String,), _>(builtin_trim), Exact(1)),
        op(
            "replace",
            builtin_fixed::<(String, String, String), _>(builtin_replace),
            Exact(3),
        ),
        // Objects
        op("get", builtin_fixed::<(Value, Value), _>(builtin_get), Exact(2)),
        op("set", builtin_fixed::<(ObjectRef, String, Value), _>(builtin_set), Exact(3)),
        op("keys", builtin_fixed::<(ObjectRef,), _>(builtin_keys), Exact(1)),
        op("values", builtin_fixed::<(ObjectRef,), _>(builtin_values), Exact(1)),
        // Conversions and reflection
        op("type", builtin_fixed::<(Value,), _>(builtin_type), Exact(1)),
        op("number", builtin_fixed::<(Value,), _>(builtin_number), Exact(1)),
        op("string", builtin_fixed::<(Value,), _>(builtin_string), Exact(1)),
        op("boolean", builtin_fixed::<(Value,), _>(builtin_boolean), Exact(1)),
        op("eval", builtin_raw(builtin_eval), Any),
        op("call", builtin_raw(builtin_call), AtLeast(1)),
        op("apply", builtin_raw(builtin_apply), Exact(2)),
        op("bind", builtin_variadic::<(Callable, ValueIter), _>(builtin_bind), AtLeast(1)),
        // Predicates
        op("number?", builtin_fixed::<(Value,), _>(builtin_is_number), Exact(1)),
        op("string?", builtin_fixed::<(Value,), _>(builtin_is_string), Exact(1)),
        op("boolean?", builtin_fixed::<(Value,), _>(builtin_is_boolean), Exact(1)),
        op("function?", builtin_fixed::<(Value,), _>(builtin_is_function), Exact(1)),
        op("list?", builtin_fixed::<(Value,), _>(builtin_is_list), Exact(1)),
        op("object?", builtin_fixed::<(Value,), _>(builtin_is_object), Exact(1)),
        op("null?", builtin_fixed::<(Value,), _>(builtin_is_null), Exact(1)),
        op("undefined?", builtin_fixed::<(Value,), _>(builtin_is_undefined), Exact(1)),
        // Output and failure
        op("print", builtin_variadic::<(ValueIter,), _>(builtin_print), Any),
        op("error", builtin_variadic::<(ValueIter,), _>(builtin_error), Any),
    ]
});

/// Constants installed next to the operations
pub(crate) const BUILTIN_CONSTANTS: [(&str, f64); 2] =
    [("PI", std::f64::consts::PI), ("E", std::f64::consts::E)];

/// Lazy static map from id to BuiltinOp (private - use find_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.id, op)).collect()
    });

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub fn find_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Names of the special forms, for tools that highlight or complete them
pub fn special_form_names() -> impl Iterator<Item = &'static str> {
    get_builtin_ops()
        .iter()
        .filter(|op| op.is_special_form())
        .map(|op| op.id)
}
