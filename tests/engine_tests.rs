//! End-to-end formula engine tests
//!
//! Each test builds a formula state and a dataframe the way an embedding
//! application would, then checks the per-row results.

use calcframe::core::{
    from_backend_form, to_backend_form, to_eval_identifier, to_execution_form, translate,
    FieldSurface,
};
use calcframe::error::FormulaError;
use calcframe::{
    Cell, DataFrame, DataFrameKey, DataFrameRow, EngineOptions, FieldReference,
    FormulaCalculator, FormulaState, FormulaText,
};
use pretty_assertions::assert_eq;

fn row(cells: &[(&str, Cell)]) -> DataFrameRow {
    cells
        .iter()
        .map(|(key, cell)| (key.to_string(), cell.clone()))
        .collect()
}

fn sales_fields() -> Vec<FieldReference> {
    vec![
        FieldReference::new("sales", "Sales"),
        FieldReference::new("sales-regional", "Sales - Regional"),
        FieldReference::new("cost", "Cost"),
    ]
}

fn state(formula: &str, fields: Vec<FieldReference>) -> FormulaState {
    FormulaState::new(FormulaText::from_source(formula), fields)
}

/// Months deliberately out of order
fn monthly_frame() -> DataFrame {
    DataFrame::new(
        DataFrameKey::new("monthly", 1),
        vec![
            row(&[("month", 3.0.into()), ("sales", 30.0.into())]),
            row(&[("month", 1.0.into()), ("sales", 10.0.into())]),
            row(&[("month", 2.0.into()), ("sales", 20.0.into())]),
        ],
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// FIELD REFERENCES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_label_that_contains_another_label_is_substituted_whole() {
    let lines = vec!["Sales - Regional + Sales".to_string()];
    assert_eq!(
        to_execution_form(&lines, &sales_fields()).unwrap(),
        "sales_regional + sales"
    );
}

#[test]
fn test_backend_form_round_trip() {
    let lines = vec!["(Sales - Regional + Sales) / Cost".to_string()];
    let backend = to_backend_form(&lines, &sales_fields()).unwrap();
    assert_eq!(backend, "(sales-regional + sales) / cost");
    assert_eq!(
        from_backend_form(&backend, &sales_fields()).unwrap(),
        lines[0]
    );
}

#[test]
fn test_label_substring_rows_evaluate_against_the_right_field() {
    let state = state("Sales - Regional + Sales", sales_fields());
    let frame = DataFrame::from_rows(vec![row(&[
        ("sales", 100.0.into()),
        ("sales-regional", 7.0.into()),
    ])]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(107.0)]);
}

#[test]
fn test_multiline_formula_from_editor() {
    let text = FormulaText::new(vec![
        "var margin = Sales - Cost\u{200B}".to_string(),
        "margin / Sales".to_string(),
    ]);
    let state = FormulaState::new(text, sales_fields());
    let frame = DataFrame::from_rows(vec![row(&[
        ("sales", 200.0.into()),
        ("cost", 150.0.into()),
    ])]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(0.25)]);
}

/// Ids that differ only in non-word characters share an identifier
#[test]
fn test_identifier_collision_is_preserved() {
    assert_eq!(to_eval_identifier("a-b"), "a_b");
    assert_eq!(to_eval_identifier("a.b"), to_eval_identifier("a-b"));
    assert_eq!(to_eval_identifier("Revenue (EUR)"), "Revenue__EUR_");
}

#[test]
fn test_single_letter_ids_survive_builtin_calls() {
    let fields = vec![
        FieldReference::new("a", "Sales"),
        FieldReference::new("b", "Sales - Regional"),
    ];
    let original = "Sales - Regional + Math.abs(Sales)";
    let lines = vec![original.to_string()];

    let backend = to_backend_form(&lines, &fields).unwrap();
    let executable = to_execution_form(&lines, &fields).unwrap();
    assert_eq!(backend, "b + Math.abs(a)");
    assert_eq!(executable, "b + Math.abs(a)");
    assert_eq!(from_backend_form(&backend, &fields).unwrap(), original);
    assert_eq!(
        translate(&executable, &fields, FieldSurface::Execution, FieldSurface::Label).unwrap(),
        original
    );

    let frame = DataFrame::from_rows(vec![row(&[("a", (-3.0).into()), ("b", 10.0.into())])]);
    let results = FormulaCalculator::new()
        .evaluate(&state(original, fields), &frame)
        .unwrap();
    assert_eq!(results, vec![Some(13.0)]);
}

#[test]
fn test_row_values_reference_round_trips_through_ids() {
    let fields = vec![FieldReference::new("a", "Sales")];
    let original = "Sales / sum(rowValues.Sales)";
    let backend = to_backend_form(&[original.to_string()], &fields).unwrap();
    assert_eq!(backend, "a / sum(rowValues.a)");
    assert_eq!(from_backend_form(&backend, &fields).unwrap(), original);
}

// ═══════════════════════════════════════════════════════════════════════════
// MISSING DATA
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_row_with_every_referenced_field_missing_has_no_result() {
    let state = state("Sales - Cost", sales_fields());
    let frame = DataFrame::from_rows(vec![
        row(&[("sales", 10.0.into()), ("cost", 4.0.into())]),
        row(&[("sales", Cell::Null)]),
        row(&[("sales", 5.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(6.0), None, Some(5.0)]);
}

#[test]
fn test_treat_missing_as_zero_evaluates_empty_rows() {
    let state = state("Sales - Cost", sales_fields())
        .set_treat_missing_as_zero("sales", true)
        .set_treat_missing_as_zero("cost", true);
    let frame = DataFrame::from_rows(vec![row(&[("sales", Cell::Null)]), row(&[])]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(0.0), Some(0.0)]);
}

#[test]
fn test_text_cell_is_not_a_number() {
    let state = state("Sales * 2", sales_fields());
    let frame = DataFrame::from_rows(vec![row(&[("sales", "n/a".into())])]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![None]);
}

// ═══════════════════════════════════════════════════════════════════════════
// DATAFRAME HELPERS AND ORDER
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_results_follow_input_order_after_dimension_sort() {
    let state = state("cumulativeSum(rowValues.Sales)", sales_fields())
        .with_dimensions(vec!["month".to_string()]);

    let results = FormulaCalculator::new()
        .evaluate(&state, &monthly_frame())
        .unwrap();
    assert_eq!(results, vec![Some(60.0), Some(10.0), Some(30.0)]);
}

#[test]
fn test_difference_from_previous_has_no_value_for_first_row() {
    let state = state("differenceFromPrevious(rowValues.Sales)", sales_fields())
        .with_dimensions(vec!["month".to_string()]);

    let results = FormulaCalculator::new()
        .evaluate(&state, &monthly_frame())
        .unwrap();
    assert_eq!(results, vec![Some(10.0), None, Some(10.0)]);
}

#[test]
fn test_moving_average_window() {
    let state = state("movingAverage(rowValues.Sales, 2)", sales_fields())
        .with_dimensions(vec!["month".to_string()]);

    let results = FormulaCalculator::new()
        .evaluate(&state, &monthly_frame())
        .unwrap();
    assert_eq!(results, vec![Some(25.0), Some(10.0), Some(15.0)]);
}

#[test]
fn test_share_of_total() {
    let state = state("Sales / sum(rowValues.Sales)", sales_fields());
    let frame = DataFrame::from_rows(vec![
        row(&[("sales", 40.0.into())]),
        row(&[("sales", 60.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(0.4), Some(0.6)]);
}

#[test]
fn test_values_with_dimension_groups_by_region() {
    let state = state(
        "sum(valuesWithDimension(rowValues.Sales, \"region\", region))",
        sales_fields(),
    )
    .with_dimensions(vec!["region".to_string(), "month".to_string()]);
    let frame = DataFrame::from_rows(vec![
        row(&[("region", "North".into()), ("month", 1.0.into()), ("sales", 10.0.into())]),
        row(&[("region", "South".into()), ("month", 1.0.into()), ("sales", 5.0.into())]),
        row(&[("region", "North".into()), ("month", 2.0.into()), ("sales", 20.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(30.0), Some(5.0), Some(30.0)]);
}

#[test]
fn test_values_by_dimension_indexed_by_row_dimension() {
    let state = state(
        "sum(valuesByDimension(rowValues.Sales, 'region')[region])",
        sales_fields(),
    )
    .with_dimensions(vec!["region".to_string(), "month".to_string()]);
    let frame = DataFrame::from_rows(vec![
        row(&[("region", "North".into()), ("month", 1.0.into()), ("sales", 10.0.into())]),
        row(&[("region", "South".into()), ("month", 1.0.into()), ("sales", 5.0.into())]),
        row(&[("region", "North".into()), ("month", 2.0.into()), ("sales", 20.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(30.0), Some(5.0), Some(30.0)]);
}

#[test]
fn test_empty_frame_with_dataframe_formula_has_no_results() {
    let state = state("cumulativeSum(rowValues.Sales) / sum(rowValues.Cost)", sales_fields())
        .with_dimensions(vec!["month".to_string()]);

    let results = FormulaCalculator::new()
        .evaluate(&state, &DataFrame::from_rows(vec![]))
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_row_num_is_sorted_position() {
    let state = state("rowSet.length > 0 ? rowNum : -1", vec![])
        .with_dimensions(vec!["month".to_string()]);

    let results = FormulaCalculator::new()
        .evaluate(&state, &monthly_frame())
        .unwrap();
    assert_eq!(results, vec![Some(2.0), Some(0.0), Some(1.0)]);
}

#[test]
fn test_re_evaluation_is_idempotent_and_reuses_prepared_frame() {
    let state = state("cumulativeSum(rowValues.Sales)", sales_fields())
        .with_dimensions(vec!["month".to_string()]);
    let frame = monthly_frame();
    let mut calculator = FormulaCalculator::new();

    let first = calculator.evaluate(&state, &frame).unwrap();
    assert!(calculator.is_prepared(&frame));
    let second = calculator.evaluate(&state, &frame).unwrap();
    assert_eq!(first, second);

    let other = DataFrame::new(DataFrameKey::new("monthly", 2), frame.rows.clone());
    calculator.evaluate(&state, &other).unwrap();
    assert!(!calculator.is_prepared(&frame));
    assert!(calculator.is_prepared(&other));
}

// ═══════════════════════════════════════════════════════════════════════════
// PARSING AND THE SANDBOX
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_top_level_return_is_accepted() {
    let state = state("return Sales + Cost;", sales_fields());
    let frame = DataFrame::from_rows(vec![row(&[
        ("sales", 1.0.into()),
        ("cost", 2.0.into()),
    ])]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(3.0)]);
}

#[test]
fn test_conditional_with_return_statements() {
    let state = state(
        "if (Sales > Cost) {\n  return Sales - Cost;\n}\nreturn 0;",
        sales_fields(),
    );
    let frame = DataFrame::from_rows(vec![
        row(&[("sales", 9.0.into()), ("cost", 4.0.into())]),
        row(&[("sales", 1.0.into()), ("cost", 4.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(5.0), Some(0.0)]);
}

#[test]
fn test_syntax_error_is_a_parse_error() {
    let state = state("Sales +", sales_fields());
    let err = FormulaCalculator::new().validate(&state).unwrap_err();
    assert!(matches!(err, FormulaError::Parse { .. }));
    assert!(err.is_formula_error());
}

#[test]
fn test_host_globals_are_not_reachable() {
    let state = state("window.alert(Sales)", sales_fields());
    let frame = DataFrame::from_rows(vec![row(&[("sales", 1.0.into())])]);

    let err = FormulaCalculator::new()
        .evaluate(&state, &frame)
        .unwrap_err();
    match err {
        FormulaError::Eval { row, source } => {
            assert_eq!(row, 0);
            assert!(source.to_string().starts_with("ReferenceError"));
        }
        other => panic!("expected an evaluation error, got {:?}", other),
    }
}

#[test]
fn test_non_numeric_result_aborts_by_default() {
    let state = state("typeof process", vec![]);
    let frame = DataFrame::from_rows(vec![row(&[])]);

    let err = FormulaCalculator::new()
        .evaluate(&state, &frame)
        .unwrap_err();
    assert!(matches!(err, FormulaError::NonNumericResult { row: 0, .. }));
}

#[test]
fn test_non_numeric_result_recorded_as_null_when_not_aborting() {
    let options = EngineOptions {
        abort_on_non_numeric: false,
        ..EngineOptions::default()
    };
    let state = state("Sales > 1 ? 'big' : Sales", sales_fields());
    let frame = DataFrame::from_rows(vec![
        row(&[("sales", 5.0.into())]),
        row(&[("sales", 1.0.into())]),
    ]);

    let results = FormulaCalculator::with_options(options)
        .evaluate(&state, &frame)
        .unwrap();
    assert_eq!(results, vec![None, Some(1.0)]);
}

#[test]
fn test_runaway_recursion_hits_step_budget() {
    let options = EngineOptions {
        max_steps: Some(50),
        ..EngineOptions::default()
    };
    let state = state(
        "function f(n) { return n <= 0 ? 0 : f(n - 1) + 1 }\nf(Sales)",
        sales_fields(),
    );
    let frame = DataFrame::from_rows(vec![row(&[("sales", 60.0.into())])]);

    let err = FormulaCalculator::with_options(options)
        .evaluate(&state, &frame)
        .unwrap_err();
    assert!(err.to_string().contains("StepLimitError"));
}

#[test]
fn test_rows_do_not_share_variables() {
    let state = state(
        "var seen = (typeof seen == 'undefined') ? 0 : seen + 1\nSales + seen",
        sales_fields(),
    );
    let frame = DataFrame::from_rows(vec![
        row(&[("sales", 1.0.into())]),
        row(&[("sales", 2.0.into())]),
    ]);

    let results = FormulaCalculator::new().evaluate(&state, &frame).unwrap();
    assert_eq!(results, vec![Some(1.0), Some(2.0)]);
}

// ═══════════════════════════════════════════════════════════════════════════
// FORMULA STATE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_editing_text_recompiles_only_the_new_state() {
    let original = state("Sales", sales_fields());
    original.executable().unwrap();
    assert!(original.is_compiled());

    let edited = original.with_text(FormulaText::from_source("Sales * 2"));
    assert!(!edited.is_compiled());
    assert_eq!(edited.executable().unwrap().text, "sales * 2");
    assert_eq!(original.executable().unwrap().text, "sales");
    assert_eq!(original.text().lines(), ["Sales".to_string()]);
}

#[test]
fn test_prune_unused_fields_keeps_referenced() {
    let state = state("Sales + Cost", sales_fields())
        .set_treat_missing_as_zero("sales-regional", true)
        .prune_unused_fields();

    let mut ids: Vec<&str> = state.fields().iter().map(|f| f.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["cost", "sales"]);
    assert!(state.configurations().get("sales-regional").is_none());
}
