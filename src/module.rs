//! Library modules.
//!
//! A [`Module`] collects host-provided bindings under a name and is installed with
//! [`Interpreter::load_module`]. Loading creates one new frame under the current root
//! holding every binding; special forms are defined as constants and flagged as macros.
//!
//! ```
//! use sxlang::{Interpreter, Value};
//! use sxlang::module::Module;
//!
//! fn square(x: f64) -> f64 {
//!     x * x
//! }
//!
//! let geometry = Module::new("geometry")
//!     .constant("TAU", std::f64::consts::TAU)
//!     .function("square", square);
//!
//! let mut interpreter = Interpreter::new();
//! interpreter.load_module(geometry).unwrap();
//! assert_eq!(interpreter.run_source("(square 3)").unwrap(), Value::Number(9.0));
//! ```

use crate::Error;
use crate::ast::Token;
use crate::builtinops::Arity;
use crate::evaluator::Interpreter;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, MacroFn, OperationFn};
use crate::value::{Callable, Value};
use std::rc::Rc;
use std::sync::Arc;

/// Named set of bindings injected into an interpreter before a program runs
pub struct Module {
    pub(crate) name: String,
    pub(crate) variables: Vec<(String, Value)>,
    pub(crate) constants: Vec<(String, Value)>,
    pub(crate) special_forms: Vec<(String, Rc<MacroFn>)>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            variables: Vec::new(),
            constants: Vec::new(),
            special_forms: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A mutable binding
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.push((name.into(), value.into()));
        self
    }

    /// A strongly-typed Rust function, bound as a variable like the core functions
    pub fn function<F, Args>(self, name: impl Into<String>, func: F) -> Self
    where
        F: IntoOperation<Args> + 'static,
    {
        let name = name.into();
        let callable = Callable::builtin(name.as_str(), func.into_operation());
        self.variable(name, callable)
    }

    /// A Rust function with a rest parameter; `arity` is checked on every call
    pub fn variadic_function<F, Args>(self, name: impl Into<String>, arity: Arity, func: F) -> Self
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Arc<OperationFn> =
            Arc::new(move |interpreter: &mut Interpreter, args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(interpreter, args)
            });
        let name = name.into();
        let callable = Callable::builtin(name.as_str(), wrapped);
        self.variable(name, callable)
    }

    /// A form receiving the raw tokens of its call
    pub fn special_form<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Token]) -> Result<Value, Error> + 'static,
    {
        self.special_forms.push((name.into(), Rc::new(func)));
        self
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |bindings: &[(String, Value)]| -> Vec<String> {
            bindings.iter().map(|(name, _)| name.clone()).collect()
        };
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("variables", &names(&self.variables))
            .field("constants", &names(&self.constants))
            .field(
                "special_forms",
                &self
                    .special_forms
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
