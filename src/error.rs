use thiserror::Error;

use crate::core::sandbox::{EvalError, ParseError};

pub type FormulaResult<T> = Result<T, FormulaError>;

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// The formula text is not valid, even after the return-wrapping retry
    #[error("Parse error in formula `{text}`: {source}")]
    Parse { text: String, source: ParseError },

    /// The formula produced something other than a number, null or undefined
    #[error("Formula must evaluate to a number, got {type_name} at row {row}: {row_data}")]
    NonNumericResult {
        row: usize,
        type_name: String,
        row_data: String,
    },

    /// A substitution token has no matching field
    #[error("Unknown field reference: {0}")]
    UnknownFieldReference(String),

    #[error("Formula evaluation error at row {row}: {source}")]
    Eval { row: usize, source: EvalError },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl FormulaError {
    pub fn parse(text: impl Into<String>, source: ParseError) -> Self {
        FormulaError::Parse {
            text: text.into(),
            source,
        }
    }

    /// True for the errors that mean the formula itself is broken
    pub fn is_formula_error(&self) -> bool {
        matches!(
            self,
            FormulaError::Parse { .. }
                | FormulaError::NonNumericResult { .. }
                | FormulaError::Eval { .. }
        )
    }
}
