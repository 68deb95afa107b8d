use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{FormulaError, FormulaResult};
use crate::model::FormulaState;
use crate::types::{
    DataFrame, DataFrameKey, DataFrameRow, EngineOptions, FieldConfigurations, FieldReference,
    FormulaText,
};

/// A formula together with everything needed to evaluate it: the fields it
/// may reference, their configuration, the dimensions and the rows.
///
/// # Example
/// ```yaml
/// formula: "Sales - Cost"
/// fields:
///   - { id: sales, label: Sales }
///   - { id: cost, label: Cost }
/// configuration:
///   cost: { treat_missing_as_zero: true }
/// dimensions: [month]
/// rows:
///   - { month: 1, sales: 100, cost: 40 }
///   - { month: 2, sales: 120, cost: null }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaSession {
    /// Formula text: one string, or a list of editor lines
    pub formula: FormulaText,
    #[serde(default)]
    pub fields: Vec<FieldReference>,
    #[serde(default)]
    pub configuration: FieldConfigurations,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub rows: Vec<DataFrameRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<EngineOptions>,
    /// Identity of the dataset; a fresh key is generated when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataframe_key: Option<DataFrameKey>,
}

impl FormulaSession {
    /// Check the field list and configuration for contract violations
    pub fn validate(&self) -> FormulaResult<()> {
        let mut ids = HashSet::new();
        let mut labels = HashSet::new();

        for field in &self.fields {
            if field.id.is_empty() {
                return Err(FormulaError::Validation(format!(
                    "Field labelled '{}' has an empty id",
                    field.display_label
                )));
            }
            if field.display_label.is_empty() {
                return Err(FormulaError::Validation(format!(
                    "Field '{}' has an empty label",
                    field.id
                )));
            }
            if !ids.insert(field.id.as_str()) {
                return Err(FormulaError::Validation(format!(
                    "Duplicate field id '{}'",
                    field.id
                )));
            }
            if !labels.insert(field.display_label.as_str()) {
                return Err(FormulaError::Validation(format!(
                    "Duplicate field label '{}'",
                    field.display_label
                )));
            }
        }

        for field_id in self.configuration.field_ids() {
            if !ids.contains(field_id) {
                return Err(FormulaError::Validation(format!(
                    "Configuration for unknown field '{}'",
                    field_id
                )));
            }
        }

        Ok(())
    }

    /// The formula state this session describes
    pub fn state(&self) -> FormulaState {
        let mut state = FormulaState::new(self.formula.clone(), self.fields.clone())
            .with_dimensions(self.dimensions.clone());
        for field in &self.fields {
            if let Some(config) = self.configuration.get(&field.id) {
                state = state.with_configuration(&field.id, *config);
            }
        }
        state
    }

    /// The session's rows as a dataframe
    pub fn dataframe(&self) -> DataFrame {
        let key = self
            .dataframe_key
            .clone()
            .unwrap_or_else(DataFrameKey::unique);
        DataFrame::new(key, self.rows.clone())
    }

    /// Options from the session, falling back to `defaults`
    pub fn options_or(&self, defaults: &EngineOptions) -> EngineOptions {
        self.options.clone().unwrap_or_else(|| defaults.clone())
    }
}

/// Parse a session from YAML (JSON is accepted too, being valid YAML)
pub fn parse_session_str(content: &str) -> FormulaResult<FormulaSession> {
    let session: FormulaSession = serde_yaml::from_str(content)?;
    session.validate()?;
    Ok(session)
}

/// Load a session file; `.json` files are read as JSON, anything else as YAML
pub fn parse_session(path: &Path) -> FormulaResult<FormulaSession> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let session: FormulaSession = serde_json::from_str(&content)?;
        session.validate()?;
        Ok(session)
    } else {
        parse_session_str(&content)
    }
}

/// Load engine options from a YAML or JSON file
pub fn load_options(path: &Path) -> FormulaResult<EngineOptions> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}
