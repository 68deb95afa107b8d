//! Identifier mapping
//!
//! Every field has three spellings: the display label the author edits, the
//! backend id that gets persisted, and the sandbox identifier used at execution
//! time. Translation between any two goes through the token pass in
//! [`super::references`] so substring relationships between spellings never
//! corrupt the result.

use serde::{Deserialize, Serialize};

use super::references::{resolve_surface, ResolvedFormula, TOKEN_OPEN};
use crate::error::{FormulaError, FormulaResult};
use crate::types::FieldReference;

/// Sandbox-safe identifier for a field id.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`. Two ids that differ only
/// in such characters (`a-b`, `a.b`) map to the same identifier.
pub fn to_eval_identifier(field_id: &str) -> String {
    field_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Which spelling of a field a piece of formula text uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSurface {
    /// Display labels, as edited by the author
    Label,
    /// Canonical ids, for persistence
    Backend,
    /// Sandbox identifiers, for execution
    Execution,
}

impl FieldSurface {
    /// The text this surface uses for `field`
    pub fn render(self, field: &FieldReference) -> String {
        match self {
            FieldSurface::Label => field.display_label.clone(),
            FieldSurface::Backend => field.id.clone(),
            FieldSurface::Execution => field.eval_identifier(),
        }
    }
}

impl std::str::FromStr for FieldSurface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "label" => Ok(FieldSurface::Label),
            "backend" | "id" => Ok(FieldSurface::Backend),
            "execution" | "eval" => Ok(FieldSurface::Execution),
            other => Err(format!(
                "Unknown field surface '{}' (expected label, backend or execution)",
                other
            )),
        }
    }
}

/// Replace each token in `resolved` with the `target` spelling of its field.
///
/// `fields` must contain every field the tokens were generated for; a token
/// left over afterwards is an [`FormulaError::UnknownFieldReference`].
pub fn substitute_tokens(
    resolved: &ResolvedFormula,
    fields: &[FieldReference],
    target: FieldSurface,
) -> FormulaResult<String> {
    let mut text = resolved.text();

    for (field, token) in resolved.substitutions() {
        let current = fields
            .iter()
            .find(|candidate| candidate.id == field.id)
            .ok_or_else(|| FormulaError::UnknownFieldReference(field.id.clone()))?;
        if text.contains(token.as_str()) {
            text = text.replace(token.as_str(), &target.render(current));
        }
    }

    if text.contains(TOKEN_OPEN) {
        return Err(FormulaError::UnknownFieldReference(
            "unmapped substitution token left in formula".to_string(),
        ));
    }

    Ok(text)
}

/// Rewrite `text` from one field spelling to another
pub fn translate(
    text: &str,
    fields: &[FieldReference],
    from: FieldSurface,
    to: FieldSurface,
) -> FormulaResult<String> {
    let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let resolved = resolve_surface(&lines, fields, from);
    substitute_tokens(&resolved, fields, to)
}

/// Label-based lines to the form the sandbox executes
pub fn to_execution_form(lines: &[String], fields: &[FieldReference]) -> FormulaResult<String> {
    let resolved = resolve_surface(lines, fields, FieldSurface::Label);
    substitute_tokens(&resolved, fields, FieldSurface::Execution)
}

/// Label-based lines to the form the backend stores
pub fn to_backend_form(lines: &[String], fields: &[FieldReference]) -> FormulaResult<String> {
    let resolved = resolve_surface(lines, fields, FieldSurface::Label);
    substitute_tokens(&resolved, fields, FieldSurface::Backend)
}

/// Stored (id-based) text back to the label form the author edits
pub fn from_backend_form(text: &str, fields: &[FieldReference]) -> FormulaResult<String> {
    translate(text, fields, FieldSurface::Backend, FieldSurface::Label)
}
