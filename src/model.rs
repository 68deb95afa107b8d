//! Immutable formula state
//!
//! [`FormulaState`] is a value object: every `with_*` method returns a new
//! state and leaves the receiver untouched. Parts that did not change are
//! shared (`Rc`), and the compiled formula is a memoized derived value that
//! is recomputed only when the formula text or the field list changes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::calculator::ExecutableFormula;
use crate::core::references::resolve;
use crate::error::FormulaResult;
use crate::types::{FieldConfiguration, FieldConfigurations, FieldReference, FormulaText};

/// How a memo decides that its dependencies are unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Equality {
    /// Same allocation (`Rc::ptr_eq`)
    Identity,
    /// Equal values (`PartialEq`)
    #[default]
    Structural,
}

/// A derived value cached against the dependencies it was computed from.
///
/// Holds one entry; asking with different dependencies recomputes and
/// replaces it.
pub struct Memo<D, V> {
    equality: Equality,
    slot: RefCell<Option<(Rc<D>, Rc<V>)>>,
}

impl<D: PartialEq, V> Memo<D, V> {
    pub fn new(equality: Equality) -> Self {
        Self {
            equality,
            slot: RefCell::new(None),
        }
    }

    fn same(&self, cached: &Rc<D>, deps: &Rc<D>) -> bool {
        match self.equality {
            Equality::Identity => Rc::ptr_eq(cached, deps),
            Equality::Structural => Rc::ptr_eq(cached, deps) || **cached == **deps,
        }
    }

    /// Whether a value computed from `deps` is cached
    pub fn is_current(&self, deps: &Rc<D>) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|(cached, _)| self.same(cached, deps))
    }

    /// Cached value for `deps`, computing it with `init` on a miss
    pub fn get_or_try_init<E>(
        &self,
        deps: &Rc<D>,
        init: impl FnOnce(&D) -> Result<V, E>,
    ) -> Result<Rc<V>, E> {
        if let Some((cached, value)) = self.slot.borrow().as_ref() {
            if self.same(cached, deps) {
                return Ok(Rc::clone(value));
            }
        }
        let value = Rc::new(init(deps)?);
        *self.slot.borrow_mut() = Some((Rc::clone(deps), Rc::clone(&value)));
        Ok(value)
    }

    pub fn invalidate(&self) {
        self.slot.borrow_mut().take();
    }
}

impl<D, V> fmt::Debug for Memo<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("equality", &self.equality)
            .field("cached", &self.slot.borrow().is_some())
            .finish()
    }
}

/// Editor cursor position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: usize,
    pub column: usize,
}

/// What the compiled formula depends on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaSource {
    pub text: FormulaText,
    pub fields: Vec<FieldReference>,
}

/// Everything the authoring session knows about one formula
#[derive(Debug, Clone)]
pub struct FormulaState {
    source: Rc<FormulaSource>,
    configurations: FieldConfigurations,
    dimensions: Rc<Vec<String>>,
    cursor: Cursor,
    executable: Rc<Memo<FormulaSource, ExecutableFormula>>,
}

impl Default for FormulaState {
    fn default() -> Self {
        Self {
            source: Rc::new(FormulaSource::default()),
            configurations: FieldConfigurations::new(),
            dimensions: Rc::new(Vec::new()),
            cursor: Cursor::default(),
            executable: Rc::new(Memo::new(Equality::Structural)),
        }
    }
}

impl FormulaState {
    /// State for `text` over `fields`; every field gets the default
    /// configuration
    pub fn new(text: FormulaText, fields: Vec<FieldReference>) -> Self {
        let mut configurations = FieldConfigurations::new();
        for field in &fields {
            configurations.ensure(&field.id);
        }
        Self {
            source: Rc::new(FormulaSource { text, fields }),
            configurations,
            ..Self::default()
        }
    }

    pub fn text(&self) -> &FormulaText {
        &self.source.text
    }

    pub fn fields(&self) -> &[FieldReference] {
        &self.source.fields
    }

    pub fn source(&self) -> &Rc<FormulaSource> {
        &self.source
    }

    pub fn configurations(&self) -> &FieldConfigurations {
        &self.configurations
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn with_text(&self, text: FormulaText) -> Self {
        let mut next = self.clone();
        next.source = Rc::new(FormulaSource {
            text,
            fields: self.source.fields.clone(),
        });
        next
    }

    /// Replace the field list. New fields get a default configuration and
    /// configurations of dropped fields are removed.
    pub fn with_fields(&self, fields: Vec<FieldReference>) -> Self {
        let mut next = self.clone();
        next.configurations
            .retain(|id| fields.iter().any(|field| field.id == id));
        for field in &fields {
            next.configurations.ensure(&field.id);
        }
        next.source = Rc::new(FormulaSource {
            text: self.source.text.clone(),
            fields,
        });
        next
    }

    /// Add a field (replacing one with the same id)
    pub fn add_field(&self, field: FieldReference) -> Self {
        let mut fields: Vec<FieldReference> = self
            .fields()
            .iter()
            .filter(|existing| existing.id != field.id)
            .cloned()
            .collect();
        fields.push(field);
        self.with_fields(fields)
    }

    pub fn remove_field(&self, field_id: &str) -> Self {
        let fields = self
            .fields()
            .iter()
            .filter(|field| field.id != field_id)
            .cloned()
            .collect();
        self.with_fields(fields)
    }

    /// Override the configuration of a field in the list; unknown ids are ignored
    pub fn with_configuration(&self, field_id: &str, config: FieldConfiguration) -> Self {
        let mut next = self.clone();
        if self.fields().iter().any(|field| field.id == field_id) {
            next.configurations.set(field_id, config);
        }
        next
    }

    pub fn set_treat_missing_as_zero(&self, field_id: &str, treat_missing_as_zero: bool) -> Self {
        self.with_configuration(
            field_id,
            FieldConfiguration {
                treat_missing_as_zero,
            },
        )
    }

    pub fn with_dimensions(&self, dimensions: Vec<String>) -> Self {
        let mut next = self.clone();
        next.dimensions = Rc::new(dimensions);
        next
    }

    pub fn with_cursor(&self, cursor: Cursor) -> Self {
        let mut next = self.clone();
        next.cursor = cursor;
        next
    }

    /// Ids of fields whose label occurs in the formula text
    pub fn referenced_field_ids(&self) -> Vec<String> {
        let resolved = resolve(&self.text().clean_lines(), self.fields());
        resolved
            .referenced_fields()
            .into_iter()
            .map(|field| field.id.clone())
            .collect()
    }

    /// Drop fields the formula text no longer mentions, with their
    /// configurations
    pub fn prune_unused_fields(&self) -> Self {
        let referenced = self.referenced_field_ids();
        let fields = self
            .fields()
            .iter()
            .filter(|field| referenced.contains(&field.id))
            .cloned()
            .collect();
        self.with_fields(fields)
    }

    /// The compiled formula, recompiled only when text or fields changed
    pub fn executable(&self) -> FormulaResult<Rc<ExecutableFormula>> {
        self.executable
            .get_or_try_init(&self.source, ExecutableFormula::compile)
    }

    /// Whether [`executable`](Self::executable) would return a cached value
    pub fn is_compiled(&self) -> bool {
        self.executable.is_current(&self.source)
    }
}
