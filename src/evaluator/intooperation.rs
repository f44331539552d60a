use crate::Error;
use crate::ast::Token;
use crate::builtinops::Arity;
use crate::evaluator::Interpreter;
use crate::value::{Callable, List, ObjectRef, Value};
use std::iter::FusedIterator;
use std::sync::Arc;

// NOTE: This module is plumbing for the evaluator.
// It defines the adapter layer that turns strongly-typed Rust
// functions into the erased `OperationFn` stored in builtin callables.
//
// Hosts interact with it through the registration methods on
// `Environment`; the traits are public only so that those methods
// can name them in their bounds.

/// Canonical erased builtin function type used by the evaluator.
///
/// Builtins receive ownership of their already-evaluated argument vector
/// and a handle to the interpreter, which higher-order builtins such as
/// `map` use to call back into user code.
pub type OperationFn =
    dyn Fn(&mut Interpreter, Vec<Value>) -> Result<Value, Error> + Send + Sync;

/// Erased special form: receives the raw argument tokens of its call.
pub type MacroFn = dyn Fn(&mut Interpreter, &[Token]) -> Result<Value, Error>;

/// Plain function pointer form of [`MacroFn`], used by the static registry.
pub type SpecialFormFn = fn(&mut Interpreter, &[Token]) -> Result<Value, Error>;

// =====================================================================
// Argument conversion
// =====================================================================

/// Converts one evaluated argument into a strongly-typed parameter.
///
/// All supported parameter types are listed in this module so that
/// they are easy to audit. A failed conversion is a type error naming
/// the expected and the actual kind.
pub trait FromParam: Sized {
    fn from_arg(value: Value) -> Result<Self, Error>;
}

impl FromParam for Value {
    fn from_arg(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

macro_rules! impl_from_param_via_try_from {
    ($( $t:ty ),+) => {
        $(
            impl FromParam for $t {
                fn from_arg(value: Value) -> Result<Self, Error> {
                    <$t>::try_from(value)
                }
            }
        )+
    };
}

impl_from_param_via_try_from!(f64, bool, String, Vec<Value>, List, Callable, ObjectRef);

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Iterator over the trailing arguments of a variadic builtin.
///
/// Every element is converted before the builtin runs, so a type error
/// in any position is reported without partially executing the builtin.
pub struct RestIter<T>(std::vec::IntoIter<T>);

impl<T> Iterator for RestIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<T> DoubleEndedIterator for RestIter<T> {
    fn next_back(&mut self) -> Option<T> {
        self.0.next_back()
    }
}

impl<T> ExactSizeIterator for RestIter<T> {}
impl<T> FusedIterator for RestIter<T> {}

/// Trailing arguments of any kind
pub type ValueIter = RestIter<Value>;

/// Trailing arguments that must all be numbers
pub type NumIter = RestIter<f64>;

/// Trailing arguments that must all be strings
pub type StringIter = RestIter<String>;

/// Builds a rest parameter from the arguments left after the fixed prefix.
pub trait FromRest: Sized {
    fn from_rest(values: std::vec::IntoIter<Value>) -> Result<Self, Error>;
}

impl<T: FromParam> FromRest for RestIter<T> {
    fn from_rest(values: std::vec::IntoIter<Value>) -> Result<Self, Error> {
        let converted = values.map(T::from_arg).collect::<Result<Vec<_>, _>>()?;
        Ok(RestIter(converted.into_iter()))
    }
}

// =====================================================================
// Return-type adaptation for builtin functions
// =====================================================================

/// Normalizes builtin return types to the canonical `Result<Value, Error>`.
///
/// Builtins return either a plain value type or `Result<T, Error>` for
/// some `T` that converts into a [`Value`].
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

macro_rules! impl_into_value_result_for_plain {
    ($( $t:ty ),+) => {
        $(
            impl IntoValueResult for $t {
                fn into_value_result(self) -> Result<Value, Error> {
                    Ok(self.into())
                }
            }
        )+
    };
}

impl_into_value_result_for_plain!(Value, f64, bool, String, Vec<Value>, List, Callable, ());

/// Converts a strongly-typed Rust function into the erased
/// [`OperationFn`], parameterized by its argument tuple type.
///
/// The number of parameters is the arity, enforced on every call.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Converts a Rust function whose last parameter is a [`RestIter`]
/// into the erased [`OperationFn`].
///
/// The adapter only enforces that the fixed prefix is present; callers
/// wrap it with the full [`Arity`] of the operation.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

// =====================================================================
// Variadic adapters
// =====================================================================

/// Adapter for functions consisting only of a rest parameter.
impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: Fn(I) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |_: &mut Interpreter, args: Vec<Value>| {
            let rest = I::from_rest(args.into_iter())?;
            (self)(rest).into_value_result()
        })
    }
}

/// Implements `IntoVariadicOperation` for a fixed prefix of `FromParam`
/// parameters followed by a single rest parameter.
macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: Fn( $( $A ),+, I ) -> R + Send + Sync + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |_: &mut Interpreter, args: Vec<Value>| {
                    if args.len() < $prefix {
                        return Err(Error::arity_error(Arity::AtLeast($prefix), args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = <$A as FromParam>::from_arg(
                            args.next().unwrap_or(Value::Undefined),
                        )?;
                    )+
                    let rest = I::from_rest(args)?;
                    (self)( $( $p ),+, rest ).into_value_result()
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, p0: A1);
impl_into_variadic_operation_for_prefix_and_rest!(2, p0: A1, p1: A2);
impl_into_variadic_operation_for_prefix_and_rest!(3, p0: A1, p1: A2, p2: A3);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Implements `IntoOperation` for functions of a given arity.
///
/// The argument count is checked up front, then each owned argument is
/// converted in order, so the first ill-typed argument is the one reported.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + Send + Sync + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |_: &mut Interpreter, args: Vec<Value>| {
                    if args.len() != $arity {
                        return Err(Error::arity_error(Arity::Exact($arity), args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = <$A as FromParam>::from_arg(
                            args.next().unwrap_or(Value::Undefined),
                        )?;
                    )+
                    (self)( $( $p ),+ ).into_value_result()
                })
            }
        }
    };
}

// 0-arg functions / closures
impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |_: &mut Interpreter, args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(Arity::Exact(0), args.len()));
            }
            (self)().into_value_result()
        })
    }
}

impl_into_operation_for_arity!(1, p0: A1);
impl_into_operation_for_arity!(2, p0: A1, p1: A2);
impl_into_operation_for_arity!(3, p0: A1, p1: A2, p2: A3);
impl_into_operation_for_arity!(4, p0: A1, p1: A2, p2: A3, p3: A4);
impl_into_operation_for_arity!(5, p0: A1, p1: A2, p2: A3, p3: A4, p4: A5);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::value::val;

    fn call(op: &Arc<OperationFn>, args: Vec<Value>) -> Result<Value, Error> {
        let mut interpreter = Interpreter::new();
        op(&mut interpreter, args)
    }

    fn hypot(a: f64, b: f64) -> f64 {
        a.hypot(b)
    }

    fn shout(text: String, times: f64) -> Result<String, Error> {
        if times < 0.0 {
            return Err(Error::type_error("negative repeat count"));
        }
        Ok(text.to_uppercase().repeat(times as usize))
    }

    fn total(first: f64, rest: NumIter) -> f64 {
        rest.fold(first, |acc, n| acc + n)
    }

    fn count(rest: ValueIter) -> f64 {
        rest.len() as f64
    }

    #[test]
    fn test_fixed_arity_adapter() {
        let op = hypot.into_operation();
        assert_eq!(call(&op, vec![val(3), val(4)]).unwrap(), val(5));

        let err = call(&op, vec![val(3)]).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::ArityMismatch {
                expected: Arity::Exact(2),
                got: 1
            }
        );

        let err = call(&op, vec![val(3), val("4")]).unwrap_err();
        assert_eq!(err.message(), "Type error: expected number, got string");
    }

    #[test]
    fn test_result_returning_adapter() {
        let op = shout.into_operation();
        assert_eq!(call(&op, vec![val("ab"), val(2)]).unwrap(), val("ABAB"));
        assert!(matches!(
            call(&op, vec![val("ab"), val(-1)]).unwrap_err().kind,
            ErrorKind::TypeError(_)
        ));
    }

    #[test]
    fn test_variadic_adapters() {
        let op = total.into_variadic_operation();
        assert_eq!(call(&op, vec![val(1)]).unwrap(), val(1));
        assert_eq!(call(&op, vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert!(call(&op, vec![]).is_err());
        assert!(call(&op, vec![val(1), val(2), val(true)]).is_err());

        let op = count.into_variadic_operation();
        assert_eq!(call(&op, vec![]).unwrap(), val(0));
        assert_eq!(
            call(&op, vec![val(1), Value::Null, val("x")]).unwrap(),
            val(3)
        );
    }

    #[test]
    fn test_closure_adapter() {
        let op = (|| Value::Null).into_operation();
        assert_eq!(call(&op, vec![]).unwrap(), Value::Null);
        assert!(call(&op, vec![val(1)]).is_err());
    }
}
