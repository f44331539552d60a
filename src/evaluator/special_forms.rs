//! Special forms: builtins that receive the raw tokens of their call.
//!
//! Each form decides what to evaluate, how often and in which frame. They are installed
//! as constants of the global frame and flagged as macros, so the evaluator hands them
//! their arguments unevaluated.

use crate::ast::Token;
use crate::builtinops::Arity;
use crate::evaluator::Interpreter;
use crate::value::{Callable, Closure, ObjectRef, Value};
use crate::{Error, ErrorKind};
use std::rc::Rc;

fn expect_identifier(token: &Token) -> Result<&str, Error> {
    token
        .identifier()
        .ok_or_else(|| Error::new(ErrorKind::ExpectedIdentifier).with_span(&token.span))
}

fn expect_list(token: &Token) -> Result<&[Token], Error> {
    token
        .list()
        .ok_or_else(|| Error::new(ErrorKind::ExpectedList).with_span(&token.span))
}

/// Splits off the leading token, which every binding form requires
fn split_head(args: &[Token]) -> Result<(&Token, &[Token]), Error> {
    args.split_first()
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), 0))
}

/// A parameter list: distinct identifiers
fn parse_params(token: &Token) -> Result<Vec<String>, Error> {
    let mut params: Vec<String> = Vec::new();
    for param in expect_list(token)? {
        let name = expect_identifier(param)?;
        if params.iter().any(|existing| existing == name) {
            return Err(
                Error::new(ErrorKind::DuplicateParameter(name.to_owned())).with_span(&param.span)
            );
        }
        params.push(name.to_owned());
    }
    Ok(params)
}

fn closure(
    interpreter: &Interpreter,
    name: Option<&str>,
    params: &Token,
    body: &[Token],
) -> Result<Closure, Error> {
    Ok(Closure {
        name: name.map(str::to_owned),
        params: parse_params(params)?,
        body: Rc::from(body),
        env: interpreter.environment().clone(),
    })
}

/// `(quote expr)`
pub(crate) fn eval_quote(_interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    match args {
        [expr] => Value::quote(expr),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// `(var name expr...)`
pub(crate) fn eval_var(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (name, body) = split_head(args)?;
    let name = expect_identifier(name)?;
    let value = interpreter.evaluate_all(body)?;
    interpreter
        .environment()
        .define_variable(name, value.clone())?;
    Ok(value)
}

/// `(const name expr...)`
pub(crate) fn eval_const(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (name, body) = split_head(args)?;
    let name = expect_identifier(name)?;
    let value = interpreter.evaluate_all(body)?;
    interpreter
        .environment()
        .define_constant(name, value.clone())?;
    Ok(value)
}

/// `(assign name expr...)`
pub(crate) fn eval_assign(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (name, body) = split_head(args)?;
    let name = expect_identifier(name)?;
    let value = interpreter.evaluate_all(body)?;
    interpreter.environment().assign(name, value.clone())?;
    Ok(value)
}

/// `(let ((name expr) ...) body...)`
///
/// Every `expr` is evaluated in the enclosing frame, so bindings do not see each other.
pub(crate) fn eval_let(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (declarations, body) = split_head(args)?;

    let mut bindings = Vec::new();
    for declaration in expect_list(declarations)? {
        let [name, expr] = expect_list(declaration)? else {
            return Err(Error::new(ErrorKind::MalformedBinding).with_span(&declaration.span));
        };
        let name = expect_identifier(name)?;
        bindings.push((name, interpreter.evaluate(expr)?));
    }

    let frame = interpreter.new_frame(interpreter.environment().clone());
    for (name, value) in bindings {
        frame.define_variable(name, value)?;
    }
    interpreter.with_scope(frame, |interpreter| interpreter.evaluate_all(body))
}

/// `(lambda (params...) body...)`
pub(crate) fn eval_lambda(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (params, body) = split_head(args)?;
    let closure = closure(interpreter, None, params, body)?;
    Ok(Value::Callable(Callable::Lambda(Rc::new(closure))))
}

/// `(function name (params...) body...)`
///
/// The name is bound in the frame the closure captures, so the body can call itself.
pub(crate) fn eval_function(
    interpreter: &mut Interpreter,
    args: &[Token],
) -> Result<Value, Error> {
    let [name, params, body @ ..] = args else {
        return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
    };
    let name = expect_identifier(name)?;
    let closure = closure(interpreter, Some(name), params, body)?;

    let value = Value::Callable(Callable::Lambda(Rc::new(closure)));
    interpreter
        .environment()
        .define_variable(name, value.clone())?;
    Ok(value)
}

/// `(macro name (params...) body...)`
pub(crate) fn eval_macro(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let [name, params, body @ ..] = args else {
        return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
    };
    let name = expect_identifier(name)?;
    let closure = closure(interpreter, Some(name), params, body)?;

    let callable = Callable::Macro(Rc::new(closure));
    let env = interpreter.environment();
    env.define_variable(name, Value::Callable(callable.clone()))?;
    env.register_macro(&callable);
    Ok(Value::Callable(callable))
}

/// `(if (condition body...) ...)`: the body of the first truthy clause
pub(crate) fn eval_if(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    for clause in args {
        let [condition, body @ ..] = expect_list(clause)? else {
            return Err(Error::new(ErrorKind::EmptyList).with_span(&clause.span));
        };
        if interpreter.evaluate(condition)?.is_truthy() {
            return interpreter.evaluate_all(body);
        }
    }
    Ok(Value::Undefined)
}

/// `(while condition body...)`
pub(crate) fn eval_while(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (condition, body) = split_head(args)?;
    let mut result = Value::Undefined;
    while interpreter.evaluate(condition)?.is_truthy() {
        result = interpreter.evaluate_all(body)?;
    }
    Ok(result)
}

/// `(loop (index start end step?) body...)`
///
/// The bounds are evaluated once, in the enclosing frame. The index lives in one child
/// frame shared by every pass and runs inclusively towards `end`.
pub(crate) fn eval_loop(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let (header, body) = split_head(args)?;
    let (index, start, end, step) = match expect_list(header)? {
        [index, start, end] => (index, start, end, None),
        [index, start, end, step] => (index, start, end, Some(step)),
        items => {
            return Err(
                Error::arity_error(Arity::Range(3, 4), items.len()).with_span(&header.span)
            );
        }
    };

    let index = expect_identifier(index)?;
    let start = loop_bound(interpreter, start)?;
    let end = loop_bound(interpreter, end)?;
    let step = match step {
        Some(step) => loop_bound(interpreter, step)?,
        None => 1.0,
    };
    if step == 0.0 || step.is_nan() {
        return Err(Error::type_error("loop step must be a non-zero number"));
    }

    let frame = interpreter.new_frame(interpreter.environment().clone());
    frame.define_variable(index, Value::Undefined)?;

    interpreter.with_scope(frame.clone(), |interpreter| {
        let mut result = Value::Undefined;
        let mut i = start;
        while (step > 0.0 && i <= end) || (step < 0.0 && i >= end) {
            frame.assign(index, Value::Number(i))?;
            result = interpreter.evaluate_all(body)?;
            i += step;
        }
        Ok(result)
    })
}

fn loop_bound(interpreter: &mut Interpreter, token: &Token) -> Result<f64, Error> {
    f64::try_from(interpreter.evaluate(token)?).map_err(|err| err.with_span(&token.span))
}

/// `(object (key expr...) ...)`: keys are identifiers or strings
pub(crate) fn eval_object(interpreter: &mut Interpreter, args: &[Token]) -> Result<Value, Error> {
    let object = ObjectRef::default();
    for entry in args {
        let [key, body @ ..] = expect_list(entry)? else {
            return Err(Error::new(ErrorKind::MalformedBinding).with_span(&entry.span));
        };
        let key = match Value::quote(key)? {
            Value::Symbol(name) | Value::String(name) => name,
            _ => return Err(Error::new(ErrorKind::ExpectedIdentifier).with_span(&key.span)),
        };
        let value = interpreter.evaluate_all(body)?;
        object.borrow_mut().insert(key, value);
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::{List, sym, val};
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> Result<Value, Error> {
        let mut interpreter = Interpreter::new();
        match interpreter.run_source(source) {
            Ok(value) => Ok(value),
            Err(crate::RunError::Eval(err)) => Err(err),
            Err(crate::RunError::Parse(err)) => panic!("unexpected parse error: {err}"),
        }
    }

    fn success<T: Into<Value>>(value: T) -> Result<Value, ErrorKind> {
        Ok(val(value))
    }

    fn failure(kind: ErrorKind) -> Result<Value, ErrorKind> {
        Err(kind)
    }

    fn arity(expected: Arity, got: usize) -> Result<Value, ErrorKind> {
        failure(ErrorKind::ArityMismatch { expected, got })
    }

    fn type_error(message: &str) -> Result<Value, ErrorKind> {
        failure(ErrorKind::TypeError(message.to_owned()))
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_special_forms_data_driven() {
        let not_defined = |name: &str| failure(ErrorKind::NotDefined(name.to_owned()));

        let test_cases = vec![
            // === QUOTE ===
            ("(quote x)", Ok(sym("x"))),
            ("(quote (1 (2 x)))", Ok(val(vec![val(1), val(vec![val(2), sym("x")])]))),
            ("(quote \"s\")", success("s")),
            ("(quote)", arity(Arity::Exact(1), 0)),
            ("(quote 1 2)", arity(Arity::Exact(1), 2)),
            // === VAR / CONST / ASSIGN ===
            ("(var x 1)", success(1)),
            ("(var x)", Ok(Value::Undefined)),
            ("(var x 1 2 3) x", success(3)),
            ("(var x (+ 1 1)) (var y (* x 10)) y", success(20)),
            ("(var \"x\" 1)", failure(ErrorKind::ExpectedIdentifier)),
            ("(var (x) 1)", failure(ErrorKind::ExpectedIdentifier)),
            ("(var)", arity(Arity::AtLeast(1), 0)),
            ("(var x 1) (const x 2)", failure(ErrorKind::AlreadyDefined("x".into()))),
            ("(const k 5) k", success(5)),
            ("(const k 5) (assign k 6)", failure(ErrorKind::AssignToConstant("k".into()))),
            ("(var x 1) (assign x 2)", success(2)),
            ("(var x 1) (assign x (+ x 1)) (assign x (+ x 1)) x", success(3)),
            ("(assign nope 1)", not_defined("nope")),
            // A failing body defines nothing
            ("(var x (error \"no\")) x", failure(ErrorKind::Raised("no".into()))),
            // === LET ===
            ("(let () 1)", success(1)),
            ("(let ((a 1) (b 2)) (+ a b))", success(3)),
            ("(let ((a 1)))", Ok(Value::Undefined)),
            ("(let ((a 1) (b a)) b)", not_defined("a")),
            ("(let ((a 1)) a) a", not_defined("a")),
            ("(var a 1) (let ((a 2) (b a)) (list a b))", success([2, 1])),
            ("(let ((a 1)) (let ((b (+ a 1))) (list a b)))", success([1, 2])),
            ("(let ((a 1)) (var b 2) (+ a b)) b", not_defined("b")),
            ("(let ((a 1) (a 2)) a)", failure(ErrorKind::AlreadyDefined("a".into()))),
            ("(let (a) a)", failure(ErrorKind::ExpectedList)),
            ("(let ((a)) a)", failure(ErrorKind::MalformedBinding)),
            ("(let ((a 1 2)) a)", failure(ErrorKind::MalformedBinding)),
            ("(let ((1 2)) 3)", failure(ErrorKind::ExpectedIdentifier)),
            ("(let x 1)", failure(ErrorKind::ExpectedList)),
            // === LAMBDA ===
            ("((lambda () 7))", success(7)),
            ("((lambda ()))", Ok(Value::Undefined)),
            ("((lambda (a b) (- a b)) 10 3)", success(7)),
            ("((lambda (a) (var b 1) (+ a b)) 1)", success(2)),
            ("(type (lambda (x) x))", success("function")),
            ("(lambda (a a) a)", failure(ErrorKind::DuplicateParameter("a".into()))),
            ("(lambda (1) 1)", failure(ErrorKind::ExpectedIdentifier)),
            ("(lambda x x)", failure(ErrorKind::ExpectedList)),
            // Closures capture the defining frame
            ("(var adder (let ((n 10)) (lambda (x) (+ x n)))) (adder 5)", success(15)),
            (
                "(function make-adder (n) (lambda (x) (+ x n))) ((make-adder 3) 4)",
                success(7),
            ),
            // === FUNCTION ===
            ("(function sq (x) (* x x)) (sq 9)", success(81)),
            ("(function sq (x) (* x x)) (string sq)", success("#<function:sq>")),
            ("(function noop ()) (noop)", Ok(Value::Undefined)),
            ("(function 1 () 1)", failure(ErrorKind::ExpectedIdentifier)),
            ("(function f)", arity(Arity::AtLeast(2), 1)),
            (
                "(function f (x) x) (function f (y) y)",
                failure(ErrorKind::AlreadyDefined("f".into())),
            ),
            (
                "(function sum-to (n) (if ((= n 0) 0) (true (+ n (sum-to (- n 1)))))) (sum-to 100)",
                success(5050),
            ),
            // === MACRO ===
            ("(macro id (a) a) (id (+ 1 2))", success(3)),
            ("(macro const-one () 1) (const-one)", success(1)),
            ("(macro m (a) a) (string m)", success("#<macro:m>")),
            ("(macro m (a a) a)", failure(ErrorKind::DuplicateParameter("a".into()))),
            ("(macro m (a) (let ((a 1)) a)) (m 99)", success(1)),
            ("(macro m (a) (let ((b a)) (+ a b))) (m 4)", success(8)),
            ("(macro m (a) a) (m 1 2)", arity(Arity::Exact(1), 2)),
            // Unhygienic: the expansion sees the caller's names
            ("(macro use-y () y) (let ((y 3)) (use-y))", success(3)),
            (
                "(macro inc! (name) (assign name (+ name 1))) (var n 1) (inc! n) (inc! n) n",
                success(3),
            ),
            // === IF ===
            ("(if (true 1))", success(1)),
            ("(if (false 1))", Ok(Value::Undefined)),
            ("(if)", Ok(Value::Undefined)),
            ("(if (false 1) (0 2) (\"\" 3) (null 4) (\"x\" 5))", success(5)),
            ("(if (1 2 3))", success(3)),
            ("(if (1))", Ok(Value::Undefined)),
            ("(if (false (error \"skipped\")) (true 1))", success(1)),
            ("(if (true 1) (error \"not a clause\"))", success(1)),
            ("(if ())", failure(ErrorKind::EmptyList)),
            ("(if 1)", failure(ErrorKind::ExpectedList)),
            ("(if (false 1) 2)", failure(ErrorKind::ExpectedList)),
            ("(var x 0) (if (false (assign x 1))) x", success(0)),
            // === WHILE ===
            ("(while false 1)", Ok(Value::Undefined)),
            ("(var i 0) (while (< i 5) (assign i (+ i 1)))", success(5)),
            (
                "(var i 0) (var s \"\") (while (< i 3) (assign i (+ i 1)) (assign s (+ s i))) s",
                success("123"),
            ),
            // The body runs in the current frame
            ("(var i 0) (while (< i 1) (assign i 1) (var inner 2)) inner", success(2)),
            ("(while)", arity(Arity::AtLeast(1), 0)),
            // === LOOP ===
            ("(var s 0) (loop (i 1 10) (assign s (+ s i))) s", success(55)),
            ("(loop (i 1 3) i)", success(3)),
            ("(loop (i 3 1) i)", Ok(Value::Undefined)),
            ("(loop (i 0 10 5) i)", success(10)),
            ("(loop (i 0 9 5) i)", success(5)),
            ("(loop (i 0 1 0.25) i)", success(1)),
            (
                "(var xs (list)) (loop (i 3 1 -1) (assign xs (append xs i))) xs",
                success([3, 2, 1]),
            ),
            ("(loop (i 1 3) i) i", not_defined("i")),
            // Bounds are evaluated once, in the enclosing frame
            (
                "(var n 3) (var c 0) (loop (i 1 n) (assign n 100) (assign c (+ c 1))) c",
                success(3),
            ),
            // Assigning the index does not change the iteration
            ("(var c 0) (loop (i 1 3) (assign i 10) (assign c (+ c 1))) c", success(3)),
            ("(loop (i 1 3 0) i)", type_error("loop step must be a non-zero number")),
            ("(loop (i 1) i)", arity(Arity::Range(3, 4), 2)),
            ("(loop (1 1 3) 1)", failure(ErrorKind::ExpectedIdentifier)),
            ("(loop (i \"a\" 3) i)", type_error("expected number, got string")),
            ("(loop i 1)", failure(ErrorKind::ExpectedList)),
            // === OBJECT ===
            ("(keys (object (b 2) (\"a\" 1)))", success(["a", "b"])),
            ("(get (object (total (+ 1 2))) \"total\")", success(3)),
            ("(get (object (k)) \"k\")", Ok(Value::Undefined)),
            ("(keys (object))", Ok(Value::List(List::default()))),
            ("(object (1 2))", failure(ErrorKind::ExpectedIdentifier)),
            ("(object ())", failure(ErrorKind::MalformedBinding)),
            ("(object k)", failure(ErrorKind::ExpectedList)),
        ];

        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            let actual = run(input).map_err(|err| err.kind);
            match (&actual, &expected) {
                (Ok(actual), Ok(expected)) => {
                    assert!(
                        actual == expected,
                        "#{} {input}: expected {expected:?}, got {actual:?}",
                        i + 1
                    );
                }
                _ => assert_eq!(actual, expected, "#{} {input}", i + 1),
            }
        }
    }

    #[test]
    fn test_closures_share_their_frame() {
        let mut interpreter = Interpreter::new();
        interpreter
            .run_source(
                "(function make-account (balance)
                   (object
                     (deposit (lambda (n) (assign balance (+ balance n))))
                     (balance (lambda () balance))))
                 (var account (make-account 100))",
            )
            .unwrap();
        let result = interpreter
            .run_source("((get account \"deposit\") 50) ((get account \"balance\"))")
            .unwrap();
        assert_eq!(result, val(150));
    }

    #[test]
    fn test_macro_flag_is_frame_scoped() {
        let mut interpreter = Interpreter::new();
        // Defined inside a let, the macro flag lives in the let frame; the callable
        // escapes as a value and, outside that frame, is called like a function with
        // its arguments evaluated and turned back into tokens
        let result = interpreter
            .run_source(
                "(var escaped (let () (macro twice (e) (list e e))))
                 (escaped (+ 1 2))",
            )
            .unwrap();
        assert_eq!(result, val([3, 3]));
    }

    #[test]
    fn test_error_positions_inside_forms() {
        let source = "(let ((a 1) (b oops)) a)";
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotDefined("oops".into()));
        assert_eq!(err.raw(), Some("oops"));
        assert_eq!(err.start().map(|p| p.column), Some(16));

        let err = run("(lambda (a b a) 1)").unwrap_err();
        assert_eq!(err.raw(), Some("a"));
        assert_eq!(err.start().map(|p| p.column), Some(14));

        let err = run("(loop (i 1) i)").unwrap_err();
        assert_eq!(err.raw(), Some("(i 1)"));
    }
}
