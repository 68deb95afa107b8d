use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::identifiers::to_eval_identifier;

//==============================================================================
// Fields
//==============================================================================

/// A field usable inside a formula
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldReference {
    /// Stable backend identifier
    pub id: String,
    /// Human-readable label shown in the formula editor
    #[serde(alias = "label")]
    pub display_label: String,
}

impl FieldReference {
    pub fn new(id: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_label: display_label.into(),
        }
    }

    /// Identifier safe to use as a variable name inside the sandbox
    pub fn eval_identifier(&self) -> String {
        to_eval_identifier(&self.id)
    }
}

/// Per-field evaluation behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfiguration {
    /// Coerce a missing or non-finite row value to 0 instead of null
    #[serde(default)]
    pub treat_missing_as_zero: bool,
}

/// Field configurations keyed by field id (at most one per field)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldConfigurations(BTreeMap<String, FieldConfiguration>);

impl FieldConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldConfiguration> {
        self.0.get(field_id)
    }

    /// Absent entries behave as `treat_missing_as_zero = false`
    pub fn treat_missing_as_zero(&self, field_id: &str) -> bool {
        self.0
            .get(field_id)
            .map_or(false, |config| config.treat_missing_as_zero)
    }

    pub fn set(&mut self, field_id: impl Into<String>, config: FieldConfiguration) {
        self.0.insert(field_id.into(), config);
    }

    /// Create the default entry for a newly referenced field, keeping any existing one
    pub fn ensure(&mut self, field_id: &str) {
        self.0.entry(field_id.to_string()).or_default();
    }

    pub fn remove(&mut self, field_id: &str) -> Option<FieldConfiguration> {
        self.0.remove(field_id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|id, _| keep(id));
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//==============================================================================
// Formula text
//==============================================================================

/// Characters the formula editor inserts that never belong to the formula
const EDITOR_ONLY_CHARS: [char; 3] = ['\u{200B}', '\u{2060}', '\u{FEFF}'];

/// The formula as authored, one entry per editor line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FormulaTextRepr", into = "Vec<String>")]
pub struct FormulaText {
    lines: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormulaTextRepr {
    Single(String),
    Lines(Vec<String>),
}

impl From<FormulaTextRepr> for FormulaText {
    fn from(repr: FormulaTextRepr) -> Self {
        match repr {
            FormulaTextRepr::Single(text) => FormulaText::from_source(&text),
            FormulaTextRepr::Lines(lines) => FormulaText::new(lines),
        }
    }
}

impl From<FormulaText> for Vec<String> {
    fn from(text: FormulaText) -> Self {
        text.lines
    }
}

impl FormulaText {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Split source text into editor lines
    pub fn from_source(source: &str) -> Self {
        Self {
            lines: source.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Editor lines with editor-only markup removed
    pub fn clean_lines(&self) -> Vec<String> {
        self.lines.iter().map(|line| strip_editor_markup(line)).collect()
    }

    /// The text handed to the field reference resolver
    pub fn to_source(&self) -> String {
        self.clean_lines().join("\n")
    }
}

fn strip_editor_markup(line: &str) -> String {
    line.chars()
        .filter(|c| !EDITOR_ONLY_CHARS.contains(c))
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect()
}

//==============================================================================
// DataFrame
//==============================================================================

/// One cell of a dataframe row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// The value when it is a finite number
    pub fn finite_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Sort order used for dimension sorting: null < numbers < text
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Null => 0,
                Cell::Number(_) => 1,
                Cell::Text(_) => 2,
            }
        }
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<Option<f64>> for Cell {
    fn from(n: Option<f64>) -> Self {
        n.map_or(Cell::Null, Cell::Number)
    }
}

/// A row maps field ids and dimension ids to cells
pub type DataFrameRow = BTreeMap<String, Cell>;

/// Stable identity of a dataset, supplied by the caller.
/// Prepared-frame caches are keyed by this instead of object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataFrameKey {
    pub id: String,
    #[serde(default)]
    pub version: u64,
}

impl DataFrameKey {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// A key no other dataframe shares
    pub fn unique() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), 0)
    }
}

/// The tabular dataset a formula is evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub key: DataFrameKey,
    pub rows: Vec<DataFrameRow>,
}

impl DataFrame {
    pub fn new(key: DataFrameKey, rows: Vec<DataFrameRow>) -> Self {
        Self { key, rows }
    }

    /// Dataframe with a freshly generated key
    pub fn from_rows(rows: Vec<DataFrameRow>) -> Self {
        Self::new(DataFrameKey::unique(), rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One entry per input row, in input row order
pub type EvaluationResult = Vec<Option<f64>>;

//==============================================================================
// Engine options
//==============================================================================

/// Tunables for formula evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Step budget for a single row evaluation (None = unbounded)
    pub max_steps: Option<u64>,
    /// Abort the whole run when a row evaluates to a non-number
    pub abort_on_non_numeric: bool,
    /// Maximum nesting of user-defined function calls
    pub max_call_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_steps: Some(100_000),
            abort_on_non_numeric: true,
            max_call_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_text_strips_editor_markup() {
        let text = FormulaText::new(vec![
            "Sales\u{200B} +".to_string(),
            "\u{FEFF}Cost\u{00A0}* 2".to_string(),
        ]);
        assert_eq!(text.to_source(), "Sales +\nCost * 2");
    }

    #[test]
    fn test_formula_text_deserializes_string_or_lines() {
        let single: FormulaText = serde_json::from_str("\"a\\nb\"").unwrap();
        let lines: FormulaText = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(single, lines);
        assert_eq!(single.lines().len(), 2);
    }

    #[test]
    fn test_configurations_default_to_false() {
        let mut configs = FieldConfigurations::new();
        assert!(!configs.treat_missing_as_zero("sales"));
        configs.set(
            "sales",
            FieldConfiguration {
                treat_missing_as_zero: true,
            },
        );
        configs.ensure("sales");
        assert!(configs.treat_missing_as_zero("sales"));
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn test_cell_deserialization() {
        let row: DataFrameRow =
            serde_json::from_str(r#"{"sales": 4.5, "region": "North", "cost": null}"#).unwrap();
        assert_eq!(row["sales"], Cell::Number(4.5));
        assert_eq!(row["region"], Cell::Text("North".to_string()));
        assert_eq!(row["cost"], Cell::Null);
    }

    #[test]
    fn test_cell_sort_order() {
        assert_eq!(Cell::Null.sort_cmp(&Cell::Number(-1.0)), Ordering::Less);
        assert_eq!(Cell::Number(9.0).sort_cmp(&"a".into()), Ordering::Less);
        assert_eq!(Cell::from("b").sort_cmp(&"a".into()), Ordering::Greater);
    }

    #[test]
    fn test_engine_options_partial_yaml() {
        let options: EngineOptions = serde_yaml::from_str("max_steps: 50").unwrap();
        assert_eq!(options.max_steps, Some(50));
        assert!(options.abort_on_non_numeric);
        assert_eq!(options.max_call_depth, 64);
    }
}
