use crate::core::{translate as translate_text, FieldSurface, FormulaCalculator};
use crate::error::{FormulaError, FormulaResult};
use crate::parser::{self, FormulaSession};
use crate::types::{Cell, DataFrameRow, EngineOptions, EvaluationResult};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Format a number for display, removing unnecessary decimal places
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    // Round to 6 decimal places for display
    let rounded = (n * 1e6).round() / 1e6;
    let formatted = format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string();
    if formatted == "-0" {
        "0".to_string()
    } else {
        formatted
    }
}

fn format_result(value: Option<f64>) -> String {
    value.map_or_else(|| "null".to_string(), format_number)
}

fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Null => "null".to_string(),
        Cell::Number(n) => format_number(*n),
        Cell::Text(s) => s.clone(),
    }
}

/// `dim=value` pairs identifying a row in the output
fn describe_row(row: &DataFrameRow, dimensions: &[String]) -> String {
    dimensions
        .iter()
        .filter_map(|dim| row.get(dim).map(|cell| format!("{}={}", dim, format_cell(cell))))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Options for a session: `--config` file, then the session's own `options`
/// block, then `--max-steps`
fn resolve_options(
    session: &FormulaSession,
    config: Option<&Path>,
    max_steps: Option<u64>,
) -> FormulaResult<EngineOptions> {
    let base = match config {
        Some(path) => parser::load_options(path)?,
        None => EngineOptions::default(),
    };
    let mut options = session.options_or(&base);
    if max_steps.is_some() {
        options.max_steps = max_steps;
    }
    Ok(options)
}

#[derive(Serialize)]
struct EvaluateOutput<'a> {
    formula: String,
    execution_form: &'a str,
    results: &'a EvaluationResult,
}

/// Execute the evaluate command
pub fn evaluate(
    file: PathBuf,
    config: Option<PathBuf>,
    max_steps: Option<u64>,
    json: bool,
    verbose: bool,
) -> FormulaResult<()> {
    let session = parser::parse_session(&file)?;
    let options = resolve_options(&session, config.as_deref(), max_steps)?;
    let state = session.state();
    let frame = session.dataframe();

    let mut calculator = FormulaCalculator::with_options(options);
    let executable = calculator.validate(&state)?;
    let results = calculator.evaluate(&state, &frame)?;

    if json {
        let output = EvaluateOutput {
            formula: state.text().to_source(),
            execution_form: &executable.text,
            results: &results,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "🧮 calcframe - Evaluating formula".bold().green());
    println!("   File: {}", file.display());
    println!("   Formula: {}", state.text().to_source().bright_blue());
    println!();

    if verbose {
        println!("{}", "📖 Compiled formula:".cyan());
        println!("   Execution form: {}", executable.text);
        let referenced: Vec<&str> = executable
            .bindings
            .iter()
            .map(|binding| binding.field_id.as_str())
            .collect();
        println!("   Fields referenced: {}", referenced.join(", "));
        if executable.uses_dataframe {
            println!(
                "   Reads the whole dataset (sorted by: {})",
                session.dimensions.join(", ")
            );
        }
        println!();
    }

    println!(
        "{}",
        format!("✅ Results ({} rows):", results.len()).bold().green()
    );
    for (i, (row, value)) in frame.rows.iter().zip(&results).enumerate() {
        let label = describe_row(row, &session.dimensions);
        let rendered = match value {
            Some(_) => format_result(*value).bold(),
            None => format_result(*value).dimmed(),
        };
        if label.is_empty() {
            println!("   [{}] {}", i, rendered);
        } else {
            println!("   [{}] {} → {}", i, label.cyan(), rendered);
        }
    }
    let missing = results.iter().filter(|value| value.is_none()).count();
    if missing > 0 {
        println!(
            "\n{}",
            format!("⚠️  {} rows produced no result", missing).yellow()
        );
    }

    Ok(())
}

/// Execute the validate command: check that each session loads and its
/// formula compiles
pub fn validate(files: Vec<PathBuf>) -> FormulaResult<()> {
    println!("{}", "✅ Validating formulas".bold().green());
    println!();

    let mut failures = 0;
    for file in &files {
        let outcome = parser::parse_session(file).and_then(|session| {
            let calculator = FormulaCalculator::new();
            calculator.validate(&session.state()).map(|_| session)
        });

        match outcome {
            Ok(session) => {
                let unused: Vec<String> = {
                    let state = session.state();
                    let referenced = state.referenced_field_ids();
                    state
                        .fields()
                        .iter()
                        .filter(|field| !referenced.contains(&field.id))
                        .map(|field| field.display_label.clone())
                        .collect()
                };
                println!("   {} {}", "✅".green(), file.display());
                if !unused.is_empty() {
                    println!(
                        "      {}",
                        format!("unused fields: {}", unused.join(", ")).yellow()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                println!("   {} {}", "❌".red(), file.display());
                println!("      {}", e.to_string().red());
            }
        }
    }

    println!();
    if failures == 0 {
        println!(
            "{}",
            format!("✅ All {} formulas are valid!", files.len())
                .bold()
                .green()
        );
        Ok(())
    } else {
        println!(
            "{}",
            format!("❌ {} of {} formulas failed validation", failures, files.len())
                .bold()
                .red()
        );
        Err(FormulaError::Validation(format!(
            "{} of {} formulas failed validation",
            failures,
            files.len()
        )))
    }
}

/// Execute the translate command: print the formula with field references in
/// the requested spelling
pub fn translate(file: PathBuf, from: FieldSurface, to: FieldSurface) -> FormulaResult<()> {
    let session = parser::parse_session(&file)?;
    let text = session.formula.to_source();
    let translated = translate_text(&text, &session.fields, from, to)?;
    println!("{}", translated);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_session(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    const SESSION: &str = r#"
formula: "Sales - Cost"
fields:
  - { id: sales, label: Sales }
  - { id: cost, label: Cost }
dimensions: [month]
rows:
  - { month: 1, sales: 10, cost: 4 }
"#;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(100.0), "100");
        assert_eq!(format_number(-2.75), "-2.75");
        assert_eq!(format_number(0.123456789), "0.123457");
        assert_eq!(format_number(-0.0000001), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_describe_row() {
        let row: DataFrameRow = [
            ("month".to_string(), Cell::from(3.0)),
            ("region".to_string(), Cell::from("east")),
            ("sales".to_string(), Cell::from(1.0)),
        ]
        .into_iter()
        .collect();
        let dims = vec!["region".to_string(), "month".to_string()];
        assert_eq!(describe_row(&row, &dims), "region=east month=3");
    }

    #[test]
    fn test_resolve_options_precedence() {
        let dir = TempDir::new().unwrap();
        let config = write_session(&dir, "config.yaml", "max_steps: 10\nmax_call_depth: 5\n");
        let mut session = parser::parse_session_str(SESSION).unwrap();

        let options = resolve_options(&session, Some(config.as_path()), None).unwrap();
        assert_eq!(options.max_steps, Some(10));
        assert_eq!(options.max_call_depth, 5);

        let options = resolve_options(&session, Some(config.as_path()), Some(99)).unwrap();
        assert_eq!(options.max_steps, Some(99));

        session.options = Some(EngineOptions {
            max_call_depth: 7,
            ..EngineOptions::default()
        });
        let options = resolve_options(&session, Some(config.as_path()), None).unwrap();
        assert_eq!(options.max_call_depth, 7);
    }

    #[test]
    fn test_evaluate_and_validate_commands() {
        let dir = TempDir::new().unwrap();
        let good = write_session(&dir, "good.yaml", SESSION);
        assert!(evaluate(good.clone(), None, None, false, true).is_ok());
        assert!(evaluate(good.clone(), None, None, true, false).is_ok());

        let bad = write_session(
            &dir,
            "bad.yaml",
            "formula: \"Sales +\"\nfields: [{ id: sales, label: Sales }]\n",
        );
        assert!(validate(vec![good.clone()]).is_ok());
        let err = validate(vec![good, bad]).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
    }

    #[test]
    fn test_translate_command() {
        let dir = TempDir::new().unwrap();
        let file = write_session(&dir, "session.yaml", SESSION);
        assert!(translate(file, FieldSurface::Label, FieldSurface::Backend).is_ok());
    }
}
