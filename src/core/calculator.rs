//! Formula pipeline: resolve labels, compile once, evaluate against a dataframe

use std::rc::Rc;

use tracing::{debug, warn};

use super::identifiers::{substitute_tokens, FieldSurface};
use super::references::resolve;
use super::runtime::{references_dataframe, DataframeRuntime};
use super::sandbox::{self, Program};
use crate::error::{FormulaError, FormulaResult};
use crate::model::{FormulaSource, FormulaState};
use crate::types::{DataFrame, EngineOptions, EvaluationResult};

/// A field the compiled formula reads, and the name it is bound under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub field_id: String,
    pub identifier: String,
}

/// Formula text in execution form plus its parsed program
#[derive(Debug, Clone)]
pub struct ExecutableFormula {
    /// Text with every field label replaced by its evaluation identifier
    pub text: String,
    pub program: Rc<Program>,
    /// Referenced fields, longest label first
    pub bindings: Vec<FieldBinding>,
    /// Whether the formula reads the whole dataset
    pub uses_dataframe: bool,
}

impl ExecutableFormula {
    /// Resolve labels, substitute identifiers and parse
    pub fn compile(source: &FormulaSource) -> FormulaResult<Self> {
        let lines = source.text.clean_lines();
        let resolved = resolve(&lines, &source.fields);
        let text = substitute_tokens(&resolved, &source.fields, FieldSurface::Execution)?;

        let program = sandbox::compile(&text).map_err(|err| {
            warn!(error = %err, "formula rejected by parser");
            FormulaError::parse(text.clone(), err)
        })?;

        let bindings: Vec<FieldBinding> = resolved
            .referenced_fields()
            .into_iter()
            .map(|field| FieldBinding {
                field_id: field.id.clone(),
                identifier: field.eval_identifier(),
            })
            .collect();
        let uses_dataframe = references_dataframe(&text);

        debug!(
            fields = bindings.len(),
            uses_dataframe,
            "formula compiled"
        );

        Ok(Self {
            text,
            program: Rc::new(program),
            bindings,
            uses_dataframe,
        })
    }
}

/// End-to-end formula pipeline: compile the state, evaluate it against a
/// dataframe.
///
/// A calculator keeps the prepared dataframe between calls, so evaluating
/// several formulas against the same [`DataFrameKey`](crate::types::DataFrameKey)
/// prepares it once. It is not `Send`; use one per thread.
#[derive(Debug, Default)]
pub struct FormulaCalculator {
    options: EngineOptions,
    runtime: DataframeRuntime,
}

impl FormulaCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            runtime: DataframeRuntime::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Compile the formula without evaluating it
    pub fn validate(&self, state: &FormulaState) -> FormulaResult<Rc<ExecutableFormula>> {
        state.executable()
    }

    /// Evaluate the formula for every row of `frame`; one result per input row
    pub fn evaluate(
        &mut self,
        state: &FormulaState,
        frame: &DataFrame,
    ) -> FormulaResult<EvaluationResult> {
        let executable = state.executable()?;
        self.runtime.evaluate(
            &executable,
            state.configurations(),
            state.dimensions(),
            frame,
            &self.options,
        )
    }

    /// Whether the prepared form of `frame` is cached
    pub fn is_prepared(&self, frame: &DataFrame) -> bool {
        self.runtime.cache().is_cached(&frame.key)
    }

    pub fn clear_cache(&mut self) {
        self.runtime.clear_cache();
    }
}
