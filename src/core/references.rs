//! Field reference resolution
//!
//! Formula text refers to fields by their display labels, and one label can be a
//! substring of another ("Sales" inside "Sales - Regional"). Before any label is
//! rewritten into an identifier, every occurrence is swapped for an opaque token:
//! longest labels first, with tokens that cannot contain any label.

use std::collections::BTreeMap;

use tracing::trace;
use uuid::Uuid;

use super::identifiers::FieldSurface;
use super::runtime::ROW_VALUES;
use crate::types::FieldReference;

/// Opening delimiter of a substitution token (private use area)
pub const TOKEN_OPEN: char = '\u{E000}';
/// Closing delimiter of a substitution token (private use area)
pub const TOKEN_CLOSE: char = '\u{E001}';

/// Shortest random token body accepted after label stripping
const MIN_TOKEN_BODY: usize = 8;
/// Random attempts before falling back to a counter-based token
const MAX_TOKEN_ATTEMPTS: usize = 16;

/// Formula lines with every field reference replaced by its token
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFormula {
    /// Tokenized lines
    pub lines: Vec<String>,
    /// Surface text (label, id or identifier) -> token
    pub tokens: BTreeMap<String, String>,
    /// Fields paired with their token, in substitution order
    pub(crate) substitutions: Vec<(FieldReference, String)>,
}

impl ResolvedFormula {
    /// Tokenized lines joined back into one text
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Fields paired with their token, longest surface text first
    pub fn substitutions(&self) -> &[(FieldReference, String)] {
        &self.substitutions
    }

    /// Fields whose token occurs in the formula, in substitution order
    pub fn referenced_fields(&self) -> Vec<&FieldReference> {
        self.substitutions
            .iter()
            .filter(|(_, token)| self.lines.iter().any(|line| line.contains(token.as_str())))
            .map(|(field, _)| field)
            .collect()
    }
}

/// Order in which fields are substituted: longest surface text first, ties by
/// reverse lexicographic evaluation identifier.
pub fn substitution_order(fields: &[FieldReference], surface: FieldSurface) -> Vec<&FieldReference> {
    let mut ordered: Vec<&FieldReference> = fields.iter().collect();
    ordered.sort_by(|a, b| {
        let len_a = surface.render(a).chars().count();
        let len_b = surface.render(b).chars().count();
        len_b
            .cmp(&len_a)
            .then_with(|| b.eval_identifier().cmp(&a.eval_identifier()))
    });
    ordered
}

/// Replace every display label in `lines` with an unambiguous token
pub fn resolve(lines: &[String], fields: &[FieldReference]) -> ResolvedFormula {
    resolve_surface(lines, fields, FieldSurface::Label)
}

/// Replace every occurrence of the fields' `surface` text with a token.
///
/// Labels match anywhere. Ids and identifiers only match as whole names, so
/// `a` is not found inside `Math.abs`. Total over any input: fields whose
/// surface text is empty are skipped and a surface text with no occurrences
/// simply goes unused.
pub fn resolve_surface(
    lines: &[String],
    fields: &[FieldReference],
    surface: FieldSurface,
) -> ResolvedFormula {
    let surfaces: Vec<String> = fields.iter().map(|field| surface.render(field)).collect();
    let forbidden: Vec<&str> = surfaces
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();

    let mut lines = lines.to_vec();
    let mut tokens = BTreeMap::new();
    let mut substitutions = Vec::new();

    for (index, field) in substitution_order(fields, surface).into_iter().enumerate() {
        let text = surface.render(field);
        if text.is_empty() {
            continue;
        }
        let token = generate_token(&forbidden, index);
        trace!(field = %field.id, "assigned substitution token");

        for line in lines.iter_mut() {
            if !line.contains(text.as_str()) {
                continue;
            }
            *line = match surface {
                FieldSurface::Label => line.replace(text.as_str(), &token),
                FieldSurface::Backend | FieldSurface::Execution => {
                    replace_names(line, &text, &token)
                }
            };
        }

        tokens.insert(text, token.clone());
        substitutions.push((field.clone(), token));
    }

    ResolvedFormula {
        lines,
        tokens,
        substitutions,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Whether `line[start..end]` stands alone as a name.
///
/// A property access (`x.name`) is not a field reference, except on
/// `rowValues`, whose properties are column keys.
fn is_whole_name(line: &str, start: usize, end: usize) -> bool {
    let before = &line[..start];
    if line[end..].chars().next().is_some_and(is_name_char) {
        return false;
    }
    match before.chars().next_back() {
        Some(c) if is_name_char(c) => false,
        Some('.') => {
            let object = before[..before.len() - 1].trim_end_matches(is_name_char);
            before[object.len()..before.len() - 1] == *ROW_VALUES
        }
        _ => true,
    }
}

/// Replace each whole-name occurrence of `name` in `line` with `token`
fn replace_names(line: &str, name: &str, token: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut copied = 0;
    for (start, _) in line.match_indices(name) {
        if start < copied {
            continue;
        }
        let end = start + name.len();
        if is_whole_name(line, start, end) {
            out.push_str(&line[copied..start]);
            out.push_str(token);
            copied = end;
        }
    }
    out.push_str(&line[copied..]);
    out
}

/// Random delimited token that contains none of the `forbidden` strings.
///
/// Labels found inside a candidate are stripped out of it; a candidate that
/// gets too short is thrown away and a new one drawn.
fn generate_token(forbidden: &[&str], index: usize) -> String {
    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let mut body = Uuid::new_v4().simple().to_string();
        loop {
            let before = body.len();
            for label in forbidden {
                if body.contains(label) {
                    body = body.replace(label, "");
                }
            }
            if body.len() == before {
                break;
            }
        }
        if body.len() < MIN_TOKEN_BODY {
            continue;
        }
        let token = format!("{TOKEN_OPEN}{body}{TOKEN_CLOSE}");
        if !forbidden.iter().any(|label| token.contains(label)) {
            return token;
        }
    }
    counter_token(index)
}

/// Token built only from private use characters, unique per substitution index
fn counter_token(index: usize) -> String {
    let digits: String = index
        .to_string()
        .chars()
        .filter_map(|d| d.to_digit(10))
        .filter_map(|d| char::from_u32(0xE010 + d))
        .collect();
    format!("{TOKEN_OPEN}{TOKEN_OPEN}{digits}{TOKEN_CLOSE}")
}
