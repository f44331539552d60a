use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use sxlang::builtinops::special_form_names;
use sxlang::environment::Environment;
use sxlang::value::Callable;
use sxlang::{Error, Interpreter, RunError, SyntaxErrorKind, Value};

fn main() {
    init_tracing();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Log to stderr when RUST_LOG is set, for example `RUST_LOG=sxlang=trace`
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_repl() {
    println!("sxlang S-expression interpreter");
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut interpreter = Interpreter::new();

    // Register custom function that can be called from user code for demonstration purposes
    interpreter
        .environment()
        .register_builtin_operation::<_, ()>("help", print_help)
        .expect("help is not a core binding");

    // Lines of an expression that is still open
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "sxlang> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }

                    // Handle special commands
                    match command {
                        ":help" => {
                            _ = print_help().is_ok();
                            let _ = rl.add_history_entry(command);
                            continue;
                        }
                        ":env" => {
                            print_environment(interpreter.environment());
                            let _ = rl.add_history_entry(command);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                match interpreter.run_source(&pending) {
                    // Keep reading until the expression is closed
                    Err(RunError::Parse(err))
                        if matches!(
                            err.kind,
                            SyntaxErrorKind::UnexpectedEndOfList
                                | SyntaxErrorKind::UnexpectedEndOfString
                        ) =>
                    {
                        continue;
                    }
                    Ok(result) => {
                        // Don't print undefined values (e.g., from print)
                        if !matches!(result, Value::Undefined) {
                            println!("{result}");
                        }
                    }
                    Err(e) => println!("{e}"),
                }

                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                // Abandon the open expression
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() -> Result<Value, Error> {
    println!("sxlang REPL:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Abandon an open expression, or exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  {}", special_form_names().collect::<Vec<_>>().join(" "));
    println!();
    println!("Examples:");
    println!("  (+ 1 2 3)");
    println!("  (var total (* 6 7))");
    println!("  (function fac (x) (if ((= x 1) x) (true (* x (fac (- x 1))))))");
    println!("  (map (list 1 2 3) (lambda (x) (* x x)))");
    println!("  (macro unless (c body) (if ((not c) body)))");
    println!();

    Ok(Value::Undefined)
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in operations from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Callable(Callable::Builtin(_) | Callable::SpecialForm(_)) => {
                builtins.push(name);
            }
            _ => user_defined.push((name, value)),
        }
    }

    // Print built-in operations
    if !builtins.is_empty() {
        println!("Built-in operations ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    // Print user-defined values
    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
