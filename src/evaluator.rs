use crate::ast::{Position, Span, Token, TokenKind};
use crate::builtinops::{Arity, BUILTIN_CONSTANTS, get_builtin_ops};
use crate::environment::Environment;
use crate::module::Module;
use crate::reader::{ReaderConfig, parse_with_config};
use crate::reclaim::FrameRegistry;
use crate::substitute::{Substitutions, substitute};
use crate::value::{Callable, Closure, Value};
use crate::{Error, ErrorKind, MAX_EVAL_DEPTH, RunError};
use std::rc::Rc;

pub mod intooperation;
pub(crate) mod special_forms;

/// Interpreter limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Maximum number of tokens under evaluation at once
    pub max_depth: usize,
    /// Limits applied by [`Interpreter::run_source`] when reading
    pub reader: ReaderConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_depth: MAX_EVAL_DEPTH,
            reader: ReaderConfig::default(),
        }
    }
}

/// Tree-walking evaluator.
///
/// The interpreter owns the ambient frame that evaluation runs in and the diagnostic
/// stack: the spans of the tokens currently being evaluated, innermost last. Special
/// forms swap the ambient frame with [`Interpreter::with_scope`] to open blocks and
/// function bodies.
///
/// Every frame the interpreter opens is registered, so frames kept alive only by closures
/// stored in them are reclaimed after each run and whenever enough new frames piled up.
pub struct Interpreter {
    root: Environment,
    env: Environment,
    stack: Vec<Span>,
    config: InterpreterConfig,
    frames: FrameRegistry,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    /// An interpreter whose root frame holds the core library
    pub fn new() -> Self {
        Interpreter::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let root = create_global_env();
        Interpreter {
            env: root.clone(),
            root,
            stack: Vec::new(),
            config,
            frames: FrameRegistry::default(),
        }
    }

    /// The ambient frame
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The outermost frame programs run in
    pub fn root(&self) -> &Environment {
        &self.root
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Span of the innermost token being evaluated.
    ///
    /// Outside of evaluation this is an empty span at the start of the source.
    pub fn current_span(&self) -> Span {
        self.stack.last().cloned().unwrap_or_else(|| Span {
            start: Position::START,
            end: Position::START,
            raw: Rc::from(""),
        })
    }

    /// Evaluate a single token in the ambient frame.
    ///
    /// An error raised anywhere below is positioned at the innermost token that was
    /// being evaluated when it happened.
    pub fn evaluate(&mut self, token: &Token) -> Result<Value, Error> {
        if self.stack.len() >= self.config.max_depth {
            return Err(Error::new(ErrorKind::DepthLimitExceeded(self.config.max_depth))
                .with_span(&token.span));
        }

        self.stack.push(token.span.clone());
        tracing::trace!(depth = self.stack.len(), token = %token.span.raw, "evaluate");
        let result = crate::with_stack(|| self.evaluate_token(token));
        self.stack.pop();

        result.map_err(|err| err.or_span(&token.span))
    }

    fn evaluate_token(&mut self, token: &Token) -> Result<Value, Error> {
        match &token.kind {
            TokenKind::Value(value) => Ok(value.clone()),
            TokenKind::Identifier(name) => self.env.get(name),
            TokenKind::List(items) => {
                let [head, rest @ ..] = items.as_slice() else {
                    return Err(Error::new(ErrorKind::EmptyList));
                };

                let callable = match self.evaluate(head)? {
                    Value::Callable(callable) => callable,
                    other => return Err(Error::new(ErrorKind::NotCallable(other.to_string()))),
                };

                if self.env.is_macro(&callable) {
                    return self.call_with_tokens(&callable, rest);
                }

                let args = rest
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&callable, args)
            }
            TokenKind::Comment(_) => Err(Error::new(ErrorKind::UnknownTokenType)),
        }
    }

    /// Evaluate tokens in order, returning the value of the last one
    pub fn evaluate_all(&mut self, tokens: &[Token]) -> Result<Value, Error> {
        let mut result = Value::Undefined;
        for token in tokens {
            result = self.evaluate(token)?;
        }
        Ok(result)
    }

    /// Run a program in the ambient frame
    #[tracing::instrument(level = "debug", skip_all, fields(tokens = tokens.len()))]
    pub fn run(&mut self, tokens: &[Token]) -> Result<Value, Error> {
        let result = self.evaluate_all(tokens);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "run failed");
        }
        if self.frames.has_new_frames() {
            self.reclaim_frames();
        }
        result
    }

    /// Read and run `source`
    pub fn run_source(&mut self, source: &str) -> Result<Value, RunError> {
        let tokens = parse_with_config(source, self.config.reader)?;
        Ok(self.run(&tokens)?)
    }

    /// A child of `parent`, registered for reclamation
    pub(crate) fn new_frame(&mut self, parent: Environment) -> Environment {
        if self.frames.is_due() {
            self.reclaim_frames();
        }
        let frame = Environment::with_parent(&parent);
        self.frames.track(&frame);
        frame
    }

    /// Free the frames that are kept alive only by closures defined in them, directly or
    /// through other such frames and objects. Returns the number of frames freed.
    pub fn reclaim_frames(&mut self) -> usize {
        self.frames.collect()
    }

    /// Run `f` with `env` as the ambient frame; the previous frame is restored afterwards
    pub fn with_scope<T>(&mut self, env: Environment, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.env, env);
        let result = f(self);
        self.env = previous;
        result
    }

    /// Invoke `callable` with already evaluated arguments.
    ///
    /// Special forms and macros normally receive raw tokens; called this way their
    /// arguments are turned back into tokens first, as `eval` does.
    pub fn call(&mut self, callable: &Callable, args: Vec<Value>) -> Result<Value, Error> {
        match callable {
            Callable::Builtin(builtin) => (builtin.func)(self, args),
            Callable::Lambda(closure) => self.call_closure(closure, args),
            Callable::Bound(bound) => {
                let mut all = bound.args.clone();
                all.extend(args);
                self.call(&bound.target, all)
            }
            Callable::SpecialForm(_) | Callable::Macro(_) => {
                let tokens = self.tokens_from_values(args)?;
                self.call_with_tokens(callable, &tokens)
            }
        }
    }

    /// Turn values back into tokens positioned at the current span, nesting no deeper
    /// than the reader accepts
    pub(crate) fn tokens_from_values(&self, values: Vec<Value>) -> Result<Vec<Token>, Error> {
        let span = self.current_span();
        values
            .into_iter()
            .map(|value| value.into_token(&span, self.config.reader.max_depth))
            .collect()
    }

    /// Invoke a macro-flagged `callable` with the raw tokens of its call
    pub fn call_with_tokens(
        &mut self,
        callable: &Callable,
        tokens: &[Token],
    ) -> Result<Value, Error> {
        match callable {
            Callable::SpecialForm(form) => (form.func)(self, tokens),
            Callable::Macro(closure) => self.expand_macro(closure, tokens),
            Callable::Builtin(_) | Callable::Lambda(_) | Callable::Bound(_) => {
                let args = tokens
                    .iter()
                    .map(Value::quote)
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(callable, args)
            }
        }
    }

    /// Binds parameters positionally in a child of the captured frame; missing arguments
    /// are `undefined` and extra ones are ignored
    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, Error> {
        let frame = self.new_frame(closure.env.clone());
        let mut args = args.into_iter();
        for param in &closure.params {
            frame.define_variable(param, args.next().unwrap_or(Value::Undefined))?;
        }
        let body = Rc::clone(&closure.body);
        self.with_scope(frame, |interpreter| interpreter.evaluate_all(&body))
    }

    /// Substitutes the raw arguments into the body and evaluates the result in the
    /// caller's frame
    fn expand_macro(&mut self, closure: &Closure, tokens: &[Token]) -> Result<Value, Error> {
        Arity::Exact(closure.params.len()).validate(tokens.len())?;

        let substitutions: Substitutions<'_> = closure
            .params
            .iter()
            .map(String::as_str)
            .zip(tokens)
            .collect();
        let expanded = substitute(&closure.body, &substitutions);
        tracing::trace!(
            name = closure.name.as_deref().unwrap_or("macro"),
            forms = expanded.len(),
            "macro expanded"
        );
        self.evaluate_all(&expanded)
    }

    /// Install a library module.
    ///
    /// The module's bindings live in one new child of the current root, which then
    /// becomes the root and the ambient frame.
    pub fn load_module(&mut self, module: Module) -> Result<(), Error> {
        let frame = self.new_frame(self.root.clone());
        let Module {
            name,
            variables,
            constants,
            special_forms,
        } = module;

        for (name, value) in variables {
            frame.define_variable(&name, value)?;
        }
        for (name, value) in constants {
            frame.define_constant(&name, value)?;
        }
        for (name, form) in special_forms {
            let callable = Callable::special_form(name.as_str(), form);
            frame.define_constant(&name, Value::Callable(callable.clone()))?;
            frame.register_macro(&callable);
        }

        tracing::debug!(module = %name, "module loaded");
        self.root = frame.clone();
        self.env = frame;
        Ok(())
    }
}

/// Create a root frame holding the core functions, special forms and constants
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for op in get_builtin_ops() {
        let callable = op.to_callable();
        if op.is_special_form() {
            env.insert_constant(op.id, Value::Callable(callable.clone()));
            env.register_macro(&callable);
        } else {
            env.insert_variable(op.id, Value::Callable(callable));
        }
    }

    for (name, value) in BUILTIN_CONSTANTS {
        env.insert_constant(name, Value::Number(value));
    }

    env
}
