//! Sandboxed expression evaluator
//!
//! Formulas are written in a small JavaScript-like language. They are parsed
//! once into a [`Program`] and evaluated by an [`Interpreter`] that can only
//! see read-only math built-ins and the bindings it is handed for a row.
//! There is no path from a formula to the host process: no globals object,
//! no module loading, no I/O.

pub mod evaluator;
pub mod parser;
pub mod stdlib;
pub mod tokenizer;
pub mod value;

pub use evaluator::{EvalError, EvalErrorKind, Interpreter, NativeHost, NoHost};
pub use parser::{parse_program, ParseError, ParseErrorKind, Program};
pub use value::{Native, Value};

use tracing::debug;

/// Wrap formula text in an immediately invoked function so a top-level
/// `return` becomes legal
pub fn wrap_in_iife(source: &str) -> String {
    format!("(function() {{\n{}\n}})()", source)
}

/// Parse formula text into a program.
///
/// Formulas may use `return` at the top level. When the plain parse fails for
/// that reason alone the text is re-parsed as the body of an immediately
/// invoked function, so the program's completion value is what it returns.
pub fn compile(source: &str) -> Result<Program, ParseError> {
    match parse_program(source) {
        Err(err) if err.kind == ParseErrorKind::ReturnOutsideFunction => {
            debug!("top-level return, compiling formula as function body");
            parse_program(&wrap_in_iife(source))
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineOptions;
    use std::rc::Rc;

    fn run(source: &str) -> Value {
        let program = compile(source).unwrap();
        Interpreter::new(Rc::new(program), &EngineOptions::default())
            .run(Vec::<(String, Value)>::new(), &mut NoHost)
            .unwrap()
    }

    #[test]
    fn test_compile_plain_expression() {
        assert!(matches!(run("1 + 1"), Value::Number(n) if n == 2.0));
    }

    #[test]
    fn test_compile_top_level_return() {
        let value = run("var x = 5\nif (x > 3) { return x * 2 }\nreturn 0");
        assert!(matches!(value, Value::Number(n) if n == 10.0));
    }

    #[test]
    fn test_compile_syntax_error_is_not_retried() {
        let err = compile("1 +").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
    }

    #[test]
    fn test_compile_error_inside_wrapped_body() {
        let err = compile("return (").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
    }
}
