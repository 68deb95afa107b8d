//! Dataframe-aware runtime
//!
//! Binds one row at a time into the sandbox and runs the compiled formula.
//! Formulas that mention `rowValues` or `rowSet` get the whole dataset,
//! sorted by its dimensions and prepared once per [`DataFrameKey`], plus
//! cross-row helpers that read it. Results always come back in input row order.
//!
//! [`DataFrameKey`]: crate::types::DataFrameKey

pub mod frame;
pub mod helpers;

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use self::frame::{cell_value, FrameCache, PreparedFrame};
use self::helpers::HelperCache;
use crate::core::calculator::ExecutableFormula;
use crate::core::identifiers::to_eval_identifier;
use crate::core::sandbox::{EvalError, Interpreter, Native, NativeHost, Value};
use crate::error::{FormulaError, FormulaResult};
use crate::types::{DataFrame, EngineOptions, EvaluationResult, FieldConfigurations};

/// Column arrays of the sorted dataset
pub const ROW_VALUES: &str = "rowValues";
/// Row objects of the sorted dataset
pub const ROW_SET: &str = "rowSet";
/// Position of the current row in sorted order
pub const ROW_NUM: &str = "rowNum";

pub const SUM: &str = "sum";
pub const DIFFERENCE_FROM_PREVIOUS: &str = "differenceFromPrevious";
pub const MOVING_AVERAGE: &str = "movingAverage";
pub const CUMULATIVE_SUM: &str = "cumulativeSum";
pub const VALUES_WITH_DIMENSION: &str = "valuesWithDimension";
pub const VALUES_BY_DIMENSION: &str = "valuesByDimension";

/// Helper functions bound into every row scope
pub const HELPERS: [&str; 6] = [
    SUM,
    DIFFERENCE_FROM_PREVIOUS,
    MOVING_AVERAGE,
    CUMULATIVE_SUM,
    VALUES_WITH_DIMENSION,
    VALUES_BY_DIMENSION,
];

/// Whether formula text reads the whole dataset.
///
/// A textual check: a false positive only costs a dataset preparation.
pub fn references_dataframe(text: &str) -> bool {
    text.contains(ROW_VALUES) || text.contains(ROW_SET)
}

/// Host side of the helper functions for one row
struct RowHost<'a> {
    frame: Option<&'a PreparedFrame>,
    cache: &'a mut HelperCache,
    row_num: usize,
}

impl RowHost<'_> {
    fn values_arg(name: &str, args: &[Value]) -> Result<Rc<Vec<Value>>, EvalError> {
        match args.first() {
            Some(Value::Array(values)) => Ok(Rc::clone(values)),
            Some(other) => Err(EvalError::type_error(format!(
                "{} expects an array of values, got {}",
                name,
                other.type_name()
            ))),
            None => Err(EvalError::type_error(format!(
                "{} expects an array of values",
                name
            ))),
        }
    }

    /// Numeric argument, defaulting to the current row when omitted
    fn index_arg(&self, args: &[Value], position: usize) -> f64 {
        match args.get(position) {
            None | Some(Value::Undefined) => self.row_num as f64,
            Some(value) => value.to_number(),
        }
    }

    fn string_arg(name: &str, args: &[Value], position: usize) -> Result<String, EvalError> {
        match args.get(position) {
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(value) if !value.is_nullish() => Ok(value.to_js_string()),
            _ => Err(EvalError::type_error(format!(
                "{} expects a dimension id",
                name
            ))),
        }
    }

    /// Rows argument, defaulting to the current dataset
    fn rows_arg(
        &self,
        name: &str,
        args: &[Value],
        position: usize,
    ) -> Result<Rc<Vec<Value>>, EvalError> {
        match args.get(position) {
            Some(Value::Array(rows)) => Ok(Rc::clone(rows)),
            None | Some(Value::Undefined) => self
                .frame
                .map(|frame| Rc::clone(&frame.rows))
                .ok_or_else(|| {
                    EvalError::type_error(format!(
                        "{} needs rows: reference {} or {} in the formula",
                        name, ROW_VALUES, ROW_SET
                    ))
                }),
            Some(other) => Err(EvalError::type_error(format!(
                "{} expects an array of rows, got {}",
                name,
                other.type_name()
            ))),
        }
    }
}

impl NativeHost for RowHost<'_> {
    fn call_host(&mut self, name: &'static str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            SUM => {
                let values = Self::values_arg(name, args)?;
                Ok(Value::Number(self.cache.sum(&values)))
            }
            DIFFERENCE_FROM_PREVIOUS => {
                let values = Self::values_arg(name, args)?;
                let index = self.index_arg(args, 1);
                Ok(Value::from_option(helpers::difference_from_previous(
                    &values, index,
                )))
            }
            MOVING_AVERAGE => {
                let values = Self::values_arg(name, args)?;
                let window = args.get(1).map_or(f64::NAN, Value::to_number);
                let index = self.index_arg(args, 2);
                Ok(Value::from_option(helpers::moving_average(
                    &values, window, index,
                )))
            }
            CUMULATIVE_SUM => {
                let values = Self::values_arg(name, args)?;
                let last = self.index_arg(args, 1);
                Ok(Value::Number(helpers::cumulative_sum(&values, last)))
            }
            VALUES_WITH_DIMENSION => {
                let values = Self::values_arg(name, args)?;
                let dimension = Self::string_arg(name, args, 1)?;
                let wanted = args.get(2).cloned().unwrap_or_default();
                let rows = self.rows_arg(name, args, 3)?;
                let positions = self.cache.matching_rows(&rows, &dimension, &wanted);
                Ok(Value::array(helpers::select(&values, &positions)))
            }
            VALUES_BY_DIMENSION => {
                let values = Self::values_arg(name, args)?;
                let dimension = Self::string_arg(name, args, 1)?;
                let rows = self.rows_arg(name, args, 2)?;
                let groups = helpers::values_by_dimension(&values, &rows, &dimension);
                Ok(Value::object(
                    groups
                        .into_iter()
                        .map(|(key, group)| (key, Value::array(group)))
                        .collect::<BTreeMap<_, _>>(),
                ))
            }
            _ => Err(EvalError::reference(format!("{} is not defined", name))),
        }
    }
}

/// Evaluates compiled formulas against dataframes, row by row
#[derive(Debug, Default)]
pub struct DataframeRuntime {
    cache: FrameCache,
}

impl DataframeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Drop the prepared dataframe and every helper memo
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Evaluate `formula` for every row of `frame`.
    ///
    /// The result has one entry per input row, in input order, whatever order
    /// the rows were evaluated in.
    pub fn evaluate(
        &mut self,
        formula: &ExecutableFormula,
        configurations: &FieldConfigurations,
        dimensions: &[String],
        frame: &DataFrame,
        options: &EngineOptions,
    ) -> FormulaResult<EvaluationResult> {
        let row_count = frame.rows.len();
        let prepared = if formula.uses_dataframe {
            Some(self.cache.prepare(frame, dimensions))
        } else {
            self.cache.invalidate_unless(&frame.key);
            None
        };
        let order: Vec<usize> = match &prepared {
            Some(prepared) => prepared.order.clone(),
            None => (0..row_count).collect(),
        };
        let (row_values, row_set) = match &prepared {
            Some(prepared) => (prepared.row_values(), prepared.row_set()),
            None => (Value::Undefined, Value::Undefined),
        };

        let mut interpreter = Interpreter::new(Rc::clone(&formula.program), options);
        let mut results: EvaluationResult = vec![None; row_count];
        let mut skipped = 0usize;

        for (row_num, &row_index) in order.iter().enumerate() {
            let row = &frame.rows[row_index];
            let mut bindings: Vec<(String, Value)> = Vec::with_capacity(
                dimensions.len() + formula.bindings.len() + HELPERS.len() + 3,
            );

            for dimension in dimensions {
                if let Some(cell) = row.get(dimension) {
                    bindings.push((to_eval_identifier(dimension), cell_value(Some(cell))));
                }
            }

            let mut any_finite = false;
            for binding in &formula.bindings {
                let mut value = cell_value(row.get(&binding.field_id));
                if value.finite_number().is_none()
                    && configurations.treat_missing_as_zero(&binding.field_id)
                {
                    value = Value::Number(0.0);
                }
                any_finite |= value.finite_number().is_some();
                bindings.push((binding.identifier.clone(), value));
            }

            if !formula.bindings.is_empty() && !any_finite && !formula.uses_dataframe {
                trace!(row = row_index, "all referenced fields missing, skipping");
                skipped += 1;
                continue;
            }

            bindings.push((ROW_NUM.to_string(), Value::Number(row_num as f64)));
            if prepared.is_some() {
                bindings.push((ROW_VALUES.to_string(), row_values.clone()));
                bindings.push((ROW_SET.to_string(), row_set.clone()));
            }
            for helper in HELPERS {
                bindings.push((helper.to_string(), Value::Native(Native::Host(helper))));
            }

            let mut host = RowHost {
                frame: prepared.as_deref(),
                cache: self.cache.helpers_mut(),
                row_num,
            };
            let value = interpreter
                .run(bindings, &mut host)
                .map_err(|source| FormulaError::Eval {
                    row: row_index,
                    source,
                })?;
            trace!(row = row_index, steps = interpreter.steps(), "row evaluated");

            results[row_index] = match value {
                Value::Undefined | Value::Null => None,
                Value::Number(n) => Some(n),
                other if options.abort_on_non_numeric => {
                    return Err(FormulaError::NonNumericResult {
                        row: row_index,
                        type_name: other.type_name().to_string(),
                        row_data: serde_json::to_string(row)
                            .unwrap_or_else(|_| format!("{:?}", row)),
                    });
                }
                other => {
                    warn!(
                        row = row_index,
                        result = %other,
                        "formula produced a non-numeric value, recording null"
                    );
                    None
                }
            };
        }

        if skipped > 0 {
            warn!(skipped, rows = row_count, "rows skipped: all referenced fields missing");
        }
        debug!(rows = row_count, sorted = prepared.is_some(), "formula evaluated");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_dataframe() {
        assert!(references_dataframe("sum(rowValues.sales)"));
        assert!(references_dataframe("rowSet.length"));
        assert!(!references_dataframe("sales * 2 + rowNum"));
        // textual check, so a string literal counts too
        assert!(references_dataframe("'rowValues'; 1"));
    }

    #[test]
    fn test_row_host_defaults_to_current_row() {
        let mut cache = HelperCache::default();
        let mut host = RowHost {
            frame: None,
            cache: &mut cache,
            row_num: 2,
        };
        let values = Value::array(vec![
            Value::Number(1.0),
            Value::Null,
            Value::Number(4.0),
        ]);
        let total = host.call_host(CUMULATIVE_SUM, &[values.clone()]).unwrap();
        assert!(matches!(total, Value::Number(n) if n == 5.0));

        let diff = host.call_host(DIFFERENCE_FROM_PREVIOUS, &[values]).unwrap();
        assert!(matches!(diff, Value::Null));

        let err = host
            .call_host(VALUES_BY_DIMENSION, &[Value::array(vec![]), Value::str("region")])
            .unwrap_err();
        assert!(err.message.contains("needs rows"));
    }

    #[test]
    fn test_row_host_rejects_non_arrays() {
        let mut cache = HelperCache::default();
        let mut host = RowHost {
            frame: None,
            cache: &mut cache,
            row_num: 0,
        };
        let err = host.call_host(SUM, &[Value::Number(3.0)]).unwrap_err();
        assert!(err.message.contains("expects an array"));
    }
}
