//! Dataframe preparation
//!
//! A prepared frame is the dataset sorted by its dimensions and converted into
//! sandbox values once, so every row of every formula evaluated against the
//! same [`DataFrameKey`] shares the same column arrays.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::debug;

use super::helpers::HelperCache;
use crate::core::identifiers::to_eval_identifier;
use crate::core::sandbox::Value;
use crate::types::{Cell, DataFrame, DataFrameKey, DataFrameRow};

/// Convert a cell into a sandbox value
pub fn cell_value(cell: Option<&Cell>) -> Value {
    match cell {
        None | Some(Cell::Null) => Value::Null,
        Some(Cell::Number(n)) => Value::Number(*n),
        Some(Cell::Text(s)) => Value::str(s),
    }
}

/// Positions of `rows` sorted ascending by each dimension in turn.
/// The sort is stable, so rows equal on every dimension keep their input order.
pub fn sort_order(rows: &[DataFrameRow], dimensions: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    if dimensions.is_empty() {
        return order;
    }
    order.sort_by(|&a, &b| {
        dimensions
            .iter()
            .map(|dim| {
                let left = rows[a].get(dim).unwrap_or(&Cell::Null);
                let right = rows[b].get(dim).unwrap_or(&Cell::Null);
                left.sort_cmp(right)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// A dataframe sorted by its dimensions and converted to sandbox values
#[derive(Debug)]
pub struct PreparedFrame {
    pub key: DataFrameKey,
    pub dimensions: Vec<String>,
    /// Input row index for each sorted position
    pub order: Vec<usize>,
    /// Column key -> column values in sorted order
    pub columns: BTreeMap<String, Rc<Vec<Value>>>,
    /// Row objects in sorted order
    pub rows: Rc<Vec<Value>>,
}

impl PreparedFrame {
    pub fn prepare(frame: &DataFrame, dimensions: &[String]) -> Self {
        let order = sort_order(&frame.rows, dimensions);

        let keys: BTreeSet<&str> = frame
            .rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .chain(dimensions.iter().map(String::as_str))
            .collect();

        let mut columns = BTreeMap::new();
        for key in keys {
            let values: Vec<Value> = order
                .iter()
                .map(|&i| cell_value(frame.rows[i].get(key)))
                .collect();
            let values = Rc::new(values);
            let identifier = to_eval_identifier(key);
            if identifier != key {
                columns
                    .entry(identifier)
                    .or_insert_with(|| Rc::clone(&values));
            }
            columns.insert(key.to_string(), values);
        }

        let rows = order
            .iter()
            .map(|&i| {
                let row = &frame.rows[i];
                Value::object(
                    row.iter()
                        .map(|(key, cell)| (key.clone(), cell_value(Some(cell))))
                        .collect(),
                )
            })
            .collect();

        Self {
            key: frame.key.clone(),
            dimensions: dimensions.to_vec(),
            order,
            columns,
            rows: Rc::new(rows),
        }
    }

    /// The `rowValues` object
    pub fn row_values(&self) -> Value {
        Value::object(
            self.columns
                .iter()
                .map(|(key, values)| (key.clone(), Value::Array(Rc::clone(values))))
                .collect(),
        )
    }

    /// The `rowSet` array
    pub fn row_set(&self) -> Value {
        Value::Array(Rc::clone(&self.rows))
    }

    fn matches(&self, frame: &DataFrame, dimensions: &[String]) -> bool {
        self.key == frame.key && self.dimensions == dimensions
    }
}

/// Single-slot cache of the last prepared frame and its helper memos.
///
/// Supplying a dataframe with a different key (or different dimensions)
/// replaces the slot, which also drops every memo computed against the old one.
#[derive(Debug, Default)]
pub struct FrameCache {
    frame: Option<Rc<PreparedFrame>>,
    helpers: HelperCache,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepared form of `frame`, reusing the cached one when the key matches
    pub fn prepare(&mut self, frame: &DataFrame, dimensions: &[String]) -> Rc<PreparedFrame> {
        if let Some(prepared) = &self.frame {
            if prepared.matches(frame, dimensions) {
                debug!(key = %frame.key.id, "prepared dataframe cache hit");
                return Rc::clone(prepared);
            }
        }

        debug!(
            key = %frame.key.id,
            version = frame.key.version,
            rows = frame.rows.len(),
            "preparing dataframe"
        );
        let prepared = Rc::new(PreparedFrame::prepare(frame, dimensions));
        self.frame = Some(Rc::clone(&prepared));
        self.helpers.clear();
        prepared
    }

    /// Forget the prepared frame when `key` is not the cached one
    pub fn invalidate_unless(&mut self, key: &DataFrameKey) {
        if self.frame.as_ref().is_some_and(|f| &f.key != key) {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.frame = None;
        self.helpers.clear();
    }

    pub fn is_cached(&self, key: &DataFrameKey) -> bool {
        self.frame.as_ref().is_some_and(|f| &f.key == key)
    }

    pub fn helpers_mut(&mut self) -> &mut HelperCache {
        &mut self.helpers
    }
}
