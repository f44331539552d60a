//! Lexical environments.
//!
//! An [`Environment`] is a shared handle to one frame of the scope chain. Frames hold three
//! namespaces: mutable variables, write-once constants and the set of macro-flagged
//! callables. Cloning the handle shares the frame, so closures observe later assignments
//! made through any other handle.
//!
//! Frames link only to their parent, but a `function` or `macro` is stored in the frame it
//! captures, which closes a reference cycle. Frames the interpreter creates are therefore
//! tracked by weak handles and reclaimed by trial deletion once nothing outside such
//! cycles refers to them (see `reclaim`).

use crate::ast::Token;
use crate::builtinops::Arity;
use crate::evaluator::Interpreter;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::reclaim::Tracer;
use crate::value::{Callable, CallableId, Value, release};
use crate::{Error, ErrorKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

#[derive(Default)]
struct Frame {
    parent: Option<Environment>,
    variables: HashMap<String, Value>,
    constants: HashMap<String, Value>,
    /// Keyed by identity; holding the callable keeps its identity stable
    macros: HashMap<CallableId, Callable>,
}

impl Frame {
    fn take_bindings(&mut self) -> Vec<Value> {
        let mut values: Vec<Value> = self.variables.drain().map(|(_, value)| value).collect();
        values.extend(self.constants.drain().map(|(_, value)| value));
        values.extend(self.macros.drain().map(|(_, callable)| Value::Callable(callable)));
        values
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        release(self.take_bindings());
    }
}

/// Shared handle to a frame of the scope chain
#[derive(Clone, Default)]
pub struct Environment(Rc<RefCell<Frame>>);

/// Handle that does not keep its frame alive
#[derive(Clone)]
pub(crate) struct WeakEnvironment(Weak<RefCell<Frame>>);

impl WeakEnvironment {
    pub(crate) fn upgrade(&self) -> Option<Environment> {
        self.0.upgrade().map(Environment)
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Environment")
            .field("variables", &frame.variables.len())
            .field("constants", &frame.constants.len())
            .field("macros", &frame.macros.len())
            .field("has_parent", &frame.parent.is_some())
            .finish()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Environment {
    /// A root frame with no bindings
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            parent: Some(parent.clone()),
            variables: HashMap::new(),
            constants: HashMap::new(),
            macros: HashMap::new(),
        })))
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// True if `name` is bound in this frame or any ancestor
    pub fn exists(&self, name: &str) -> bool {
        self.defines(name) || self.parent().is_some_and(|parent| parent.exists(name))
    }

    /// True if `name` is bound in this frame itself
    pub fn defines(&self, name: &str) -> bool {
        let frame = self.0.borrow();
        frame.variables.contains_key(name) || frame.constants.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            {
                let frame = env.0.borrow();
                if let Some(value) = frame.variables.get(name).or_else(|| frame.constants.get(name))
                {
                    return Ok(value.clone());
                }
            }
            current = env.parent();
        }
        Err(Error::new(ErrorKind::NotDefined(name.to_owned())))
    }

    pub fn define_variable(&self, name: &str, value: Value) -> Result<(), Error> {
        self.ensure_unbound(name)?;
        self.0.borrow_mut().variables.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn define_constant(&self, name: &str, value: Value) -> Result<(), Error> {
        self.ensure_unbound(name)?;
        self.0.borrow_mut().constants.insert(name.to_owned(), value);
        Ok(())
    }

    /// Unchecked definition used while building the global frame
    pub(crate) fn insert_variable(&self, name: &str, value: Value) {
        self.0.borrow_mut().variables.insert(name.to_owned(), value);
    }

    pub(crate) fn insert_constant(&self, name: &str, value: Value) {
        self.0.borrow_mut().constants.insert(name.to_owned(), value);
    }

    fn ensure_unbound(&self, name: &str) -> Result<(), Error> {
        if self.defines(name) {
            return Err(Error::new(ErrorKind::AlreadyDefined(name.to_owned())));
        }
        Ok(())
    }

    /// Replace the value of the nearest binding of `name`
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            {
                let mut frame = env.0.borrow_mut();
                if let Some(slot) = frame.variables.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                if frame.constants.contains_key(name) {
                    return Err(Error::new(ErrorKind::AssignToConstant(name.to_owned())));
                }
            }
            current = env.parent();
        }
        Err(Error::new(ErrorKind::NotDefined(name.to_owned())))
    }

    /// True if `callable` was flagged in this frame or any ancestor
    pub fn is_macro(&self, callable: &Callable) -> bool {
        let id = callable.id();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if env.0.borrow().macros.contains_key(&id) {
                return true;
            }
            current = env.parent();
        }
        false
    }

    /// Flag `callable` for raw-token dispatch wherever this frame is visible
    pub fn register_macro(&self, callable: &Callable) {
        self.0
            .borrow_mut()
            .macros
            .insert(callable.id(), callable.clone());
    }

    pub(crate) fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment(Rc::downgrade(&self.0))
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Report the parent and every binding to `tracer`; `false` if the frame is borrowed
    pub(crate) fn trace(&self, tracer: &mut Tracer) -> bool {
        let Ok(frame) = self.0.try_borrow() else {
            return false;
        };
        if let Some(parent) = &frame.parent {
            tracer.frame(parent);
        }
        for value in frame.variables.values().chain(frame.constants.values()) {
            tracer.value(value);
        }
        for callable in frame.macros.values() {
            tracer.callable(callable);
        }
        true
    }

    /// Remove every binding, keeping the parent link
    pub(crate) fn take_bindings(&self) -> Vec<Value> {
        match self.0.try_borrow_mut() {
            Ok(mut frame) => frame.take_bindings(),
            Err(_) => Vec::new(),
        }
    }

    /// Move the bindings onto `pending` if this is the only handle to the frame
    pub(crate) fn drain_unique(&self, pending: &mut Vec<Value>) {
        if self.strong_count() == 1 {
            pending.extend(self.take_bindings());
        }
    }

    /// Register a custom builtin function working directly on the argument vector.
    ///
    /// This is the low-level API; most host functions are easier to write against
    /// [`Environment::register_builtin_operation`].
    ///
    /// # Example
    /// ```
    /// use sxlang::{Interpreter, Value};
    /// use sxlang::Error;
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Number(args.len() as f64))
    /// }
    ///
    /// let mut interpreter = Interpreter::new();
    /// interpreter
    ///     .environment()
    ///     .register_builtin_function("count-args", count_args)
    ///     .unwrap();
    /// assert_eq!(interpreter.run_source("(count-args 1 2 3)").unwrap(), Value::Number(3.0));
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) -> Result<(), Error> {
        let wrapped: Arc<OperationFn> =
            Arc::new(move |_: &mut Interpreter, args: Vec<Value>| func(&args));
        self.define_variable(name, Value::Callable(Callable::builtin(name, wrapped)))
    }

    /// Register a strongly-typed Rust function as a builtin.
    ///
    /// ```rust,ignore
    /// fn hypot(a: f64, b: f64) -> f64 { a.hypot(b) }
    /// interpreter.environment().register_builtin_operation("hypot", hypot)?;
    /// ```
    ///
    /// Supported parameter types: `Value`, `f64`, `bool`, `String`, `Vec<Value>` (a list
    /// argument), `Callable` and `ObjectRef`. Supported return types are anything that
    /// converts into a [`Value`], or a `Result` of one with [`Error`] as the error type.
    ///
    /// Arity is the number of parameters and is enforced on every call. Conversion
    /// failures are reported as type errors.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F) -> Result<(), Error>
    where
        F: IntoOperation<Args> + 'static,
    {
        let wrapped = func.into_operation();
        self.define_variable(name, Value::Callable(Callable::builtin(name, wrapped)))
    }

    /// Register a builtin whose last parameter receives the remaining arguments.
    ///
    /// The rest parameter is one of the iterator aliases in
    /// [`crate::evaluator::intooperation`], for example `fn(f64, NumIter) -> f64`. The
    /// provided [`Arity`] is checked on every call, since the Rust signature alone does
    /// not bound the number of arguments.
    pub fn register_variadic_builtin_operation<F, Args>(
        &self,
        name: &str,
        arity: Arity,
        func: F,
    ) -> Result<(), Error>
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Arc<OperationFn> =
            Arc::new(move |interpreter: &mut Interpreter, args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(interpreter, args)
            });
        self.define_variable(name, Value::Callable(Callable::builtin(name, wrapped)))
    }

    /// Register a host special form: a constant that receives its raw argument tokens.
    pub fn register_special_form<F>(&self, name: &str, func: F) -> Result<(), Error>
    where
        F: Fn(&mut Interpreter, &[Token]) -> Result<Value, Error> + 'static,
    {
        let callable = Callable::special_form(name, Rc::new(func));
        self.define_constant(name, Value::Callable(callable.clone()))?;
        self.register_macro(&callable);
        Ok(())
    }

    /// All bindings visible from this frame, inner frames shadowing outer ones,
    /// sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = match self.parent() {
            Some(parent) => parent.get_all_bindings().into_iter().collect(),
            None => HashMap::new(),
        };

        let frame = self.0.borrow();
        for (name, value) in frame.variables.iter().chain(frame.constants.iter()) {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::val;

    fn kind(result: Result<impl std::fmt::Debug, Error>) -> ErrorKind {
        result.unwrap_err().kind
    }

    #[test]
    fn test_define_and_get() {
        let root = Environment::new();
        root.define_variable("x", val(1)).unwrap();
        root.define_constant("LIMIT", val(2.5)).unwrap();

        assert_eq!(root.get("x").unwrap(), val(1));
        assert_eq!(root.get("LIMIT").unwrap(), val(2.5));
        assert!(root.exists("x"));
        assert!(!root.exists("y"));
        assert_eq!(kind(root.get("y")), ErrorKind::NotDefined("y".into()));
    }

    #[test]
    fn test_redefinition_in_same_frame_fails_across_namespaces() {
        let root = Environment::new();
        root.define_variable("x", val(1)).unwrap();

        let test_cases = vec![
            root.define_variable("x", val(2)),
            root.define_constant("x", val(2)),
        ];
        for result in test_cases {
            assert_eq!(kind(result), ErrorKind::AlreadyDefined("x".into()));
        }

        root.define_constant("c", val(1)).unwrap();
        assert_eq!(
            kind(root.define_variable("c", val(2))),
            ErrorKind::AlreadyDefined("c".into())
        );
        assert_eq!(root.get("x").unwrap(), val(1));
    }

    #[test]
    fn test_shadowing_in_child_frame() {
        let root = Environment::new();
        root.define_constant("x", val(1)).unwrap();

        let child = Environment::with_parent(&root);
        child.define_variable("x", val(2)).unwrap();
        assert_eq!(child.get("x").unwrap(), val(2));
        assert_eq!(root.get("x").unwrap(), val(1));

        // The child's variable is the nearest binding, so assignment succeeds
        child.assign("x", val(3)).unwrap();
        assert_eq!(child.get("x").unwrap(), val(3));
        assert_eq!(root.get("x").unwrap(), val(1));
    }

    #[test]
    fn test_assign_walks_up_the_chain() {
        let root = Environment::new();
        root.define_variable("counter", val(0)).unwrap();
        root.define_constant("limit", val(10)).unwrap();

        let child = Environment::with_parent(&root);
        let grandchild = Environment::with_parent(&child);

        grandchild.assign("counter", val(5)).unwrap();
        assert_eq!(root.get("counter").unwrap(), val(5));

        assert_eq!(
            kind(grandchild.assign("limit", val(11))),
            ErrorKind::AssignToConstant("limit".into())
        );
        assert_eq!(
            kind(grandchild.assign("missing", val(1))),
            ErrorKind::NotDefined("missing".into())
        );
    }

    #[test]
    fn test_frames_are_shared_by_reference() {
        let root = Environment::new();
        let alias = root.clone();
        root.define_variable("x", val(1)).unwrap();
        alias.assign("x", val(2)).unwrap();
        assert_eq!(root.get("x").unwrap(), val(2));
        assert_eq!(root, alias);
        assert_ne!(root, Environment::with_parent(&root));
    }

    #[test]
    fn test_macro_flags_follow_identity() {
        fn identity(args: &[Value]) -> Result<Value, Error> {
            Ok(args.first().cloned().unwrap_or(Value::Undefined))
        }

        let root = Environment::new();
        root.register_builtin_function("id", identity).unwrap();
        root.register_builtin_function("other", identity).unwrap();

        let Value::Callable(flagged) = root.get("id").unwrap() else {
            panic!("expected callable");
        };
        let Value::Callable(plain) = root.get("other").unwrap() else {
            panic!("expected callable");
        };

        let child = Environment::with_parent(&root);
        assert!(!child.is_macro(&flagged));

        root.register_macro(&flagged);
        assert!(child.is_macro(&flagged));
        assert!(!child.is_macro(&plain));

        // A copy of the same callable value is the same identity
        let copy = flagged.clone();
        assert!(root.is_macro(&copy));

        // Flags registered in a child are not visible to the parent
        child.register_macro(&plain);
        assert!(child.is_macro(&plain));
        assert!(!root.is_macro(&plain));
    }

    #[test]
    fn test_get_all_bindings_shadows_and_sorts() {
        let root = Environment::new();
        root.define_variable("b", val(1)).unwrap();
        root.define_constant("a", val(2)).unwrap();
        let child = Environment::with_parent(&root);
        child.define_variable("b", val(3)).unwrap();

        let bindings = child.get_all_bindings();
        assert_eq!(
            bindings,
            vec![("a".to_owned(), val(2)), ("b".to_owned(), val(3))]
        );
    }
}
