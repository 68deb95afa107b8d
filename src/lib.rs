//! calcframe - custom-calculation formulas over dataframes
//!
//! Formulas are authored against field display labels, for example
//! `Sales - Regional + Sales`. The engine rewrites them so that no label can
//! be partially matched by another, maps each field to a sandbox identifier,
//! parses the result once and evaluates it row by row in an interpreter that
//! sees nothing but the row and a few math built-ins.
//!
//! # Features
//!
//! - Label-safe field substitution (longest label first, opaque tokens)
//! - Backend (id-based) and execution (identifier-based) formula forms
//! - Sandboxed JavaScript-subset interpreter with a step budget
//! - Dataframe helpers: sum, moving average, cumulative sum,
//!   difference from previous, per-dimension lookups
//! - Immutable formula state with a memoized compiled formula
//!
//! # Example
//!
//! ```
//! use calcframe::core::FormulaCalculator;
//! use calcframe::model::FormulaState;
//! use calcframe::types::{Cell, DataFrame, FieldReference, FormulaText};
//!
//! let state = FormulaState::new(
//!     FormulaText::from_source("Sales - Cost"),
//!     vec![
//!         FieldReference::new("sales", "Sales"),
//!         FieldReference::new("cost", "Cost"),
//!     ],
//! );
//! let frame = DataFrame::from_rows(vec![
//!     [("sales".to_string(), Cell::from(10.0)), ("cost".to_string(), Cell::from(4.0))]
//!         .into_iter()
//!         .collect(),
//! ]);
//!
//! let mut calculator = FormulaCalculator::new();
//! let results = calculator.evaluate(&state, &frame)?;
//! assert_eq!(results, vec![Some(6.0)]);
//! # Ok::<(), calcframe::error::FormulaError>(())
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod error;
pub mod model;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use crate::core::FormulaCalculator;
pub use error::{FormulaError, FormulaResult};
pub use model::FormulaState;
pub use types::{
    Cell, DataFrame, DataFrameKey, DataFrameRow, EngineOptions, EvaluationResult,
    FieldConfiguration, FieldConfigurations, FieldReference, FormulaText,
};
