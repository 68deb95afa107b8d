//! Formula evaluation engine: reference resolution, identifier mapping,
//! the sandboxed interpreter and the dataframe-aware runtime

pub mod calculator;
pub mod identifiers;
pub mod references;
pub mod runtime;
pub mod sandbox;

pub use calculator::{ExecutableFormula, FieldBinding, FormulaCalculator};
pub use identifiers::{
    from_backend_form, to_backend_form, to_eval_identifier, to_execution_form, translate,
    FieldSurface,
};
pub use references::{resolve, ResolvedFormula};
pub use runtime::{references_dataframe, DataframeRuntime};
