//! Cross-row helper functions
//!
//! Pure functions over columns of `number | null` values. Index arguments are
//! positions in sorted row order; out-of-range positions read as missing.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::core::sandbox::Value;

/// Memo entries kept before the helper caches are flushed
const MAX_MEMO_ENTRIES: usize = 4096;

/// Position for an index argument; negative or fractional indexes have none
fn position(index: f64) -> Option<usize> {
    if index.is_finite() && index >= 0.0 && index.fract() == 0.0 {
        Some(index as usize)
    } else {
        None
    }
}

fn finite_at(values: &[Value], index: f64) -> Option<f64> {
    values.get(position(index)?).and_then(Value::finite_number)
}

/// Sum of the finite entries
pub fn sum(values: &[Value]) -> f64 {
    values.iter().filter_map(Value::finite_number).sum()
}

/// `values[index] - values[index - 1]`, or `None` when either is missing
pub fn difference_from_previous(values: &[Value], index: f64) -> Option<f64> {
    let current = finite_at(values, index)?;
    let previous = finite_at(values, index - 1.0)?;
    Some(current - previous)
}

/// Mean of the finite entries in the `window` entries ending at `index`
/// inclusive. The window is clipped at the start of the column.
pub fn moving_average(values: &[Value], window: f64, index: f64) -> Option<f64> {
    if !window.is_finite() || window < 1.0 {
        return None;
    }
    let end = position(index)?.min(values.len().checked_sub(1)?);
    let start = (index - window.floor() + 1.0).max(0.0) as usize;
    if start > end {
        return None;
    }
    let finite: Vec<f64> = values[start..=end]
        .iter()
        .filter_map(Value::finite_number)
        .collect();
    if finite.is_empty() {
        None
    } else {
        Some(finite.iter().sum::<f64>() / finite.len() as f64)
    }
}

/// Running sum of `values[0..=last]` with missing entries counted as 0
pub fn cumulative_sum(values: &[Value], last: f64) -> f64 {
    if last.is_nan() || last < 0.0 {
        return 0.0;
    }
    let end = if last.is_finite() {
        (last as usize).saturating_add(1).min(values.len())
    } else {
        values.len()
    };
    sum(&values[..end])
}

/// Dimension value of a row object
fn dimension_of(row: &Value, dimension: &str) -> Value {
    match row {
        Value::Object(entries) => entries.get(dimension).cloned().unwrap_or_default(),
        _ => Value::Undefined,
    }
}

/// Positions of rows whose `dimension` strictly equals `value`
pub fn matching_rows(rows: &[Value], dimension: &str, value: &Value) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| dimension_of(row, dimension).strict_equals(value))
        .map(|(i, _)| i)
        .collect()
}

/// Entries of `values` at the given positions
pub fn select(values: &[Value], positions: &[usize]) -> Vec<Value> {
    positions
        .iter()
        .map(|&i| values.get(i).cloned().unwrap_or_default())
        .collect()
}

/// Entries of `values` grouped by the `dimension` of the corresponding row
pub fn values_by_dimension(
    values: &[Value],
    rows: &[Value],
    dimension: &str,
) -> BTreeMap<String, Vec<Value>> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key = dimension_of(row, dimension).to_js_string();
        groups
            .entry(key)
            .or_default()
            .push(values.get(i).cloned().unwrap_or_default());
    }
    groups
}

/// Key of a `valuesWithDimension` lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DimensionKey {
    dimension: String,
    value: String,
    rows: usize,
}

/// Memoized helper results for one prepared frame.
///
/// Entries are keyed by array identity. Each entry holds a clone of the `Rc`
/// it was keyed on, so an address cannot be reused while its entry exists.
#[derive(Debug, Default)]
pub struct HelperCache {
    sums: HashMap<usize, (Rc<Vec<Value>>, f64)>,
    matches: HashMap<DimensionKey, (Rc<Vec<Value>>, Rc<Vec<usize>>)>,
}

impl HelperCache {
    pub fn clear(&mut self) {
        self.sums.clear();
        self.matches.clear();
    }

    pub fn len(&self) -> usize {
        self.sums.len() + self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(&mut self) {
        if self.len() >= MAX_MEMO_ENTRIES {
            self.clear();
        }
    }

    /// `sum(values)`, memoized per array
    pub fn sum(&mut self, values: &Rc<Vec<Value>>) -> f64 {
        let key = Rc::as_ptr(values) as usize;
        if let Some((_, total)) = self.sums.get(&key) {
            return *total;
        }
        self.make_room();
        let total = sum(values);
        self.sums.insert(key, (Rc::clone(values), total));
        total
    }

    /// Row positions matching `dimension == value`, memoized per
    /// `(dimension, value, rows)`
    pub fn matching_rows(
        &mut self,
        rows: &Rc<Vec<Value>>,
        dimension: &str,
        value: &Value,
    ) -> Rc<Vec<usize>> {
        let key = DimensionKey {
            dimension: dimension.to_string(),
            value: format!("{}:{}", value.type_of(), value.to_js_string()),
            rows: Rc::as_ptr(rows) as usize,
        };
        if let Some((_, positions)) = self.matches.get(&key) {
            return Rc::clone(positions);
        }
        self.make_room();
        let positions = Rc::new(matching_rows(rows, dimension, value));
        self.matches
            .insert(key, (Rc::clone(rows), Rc::clone(&positions)));
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: &[Option<f64>]) -> Vec<Value> {
        values.iter().map(|v| Value::from_option(*v)).collect()
    }

    fn row(region: &str) -> Value {
        let mut entries = BTreeMap::new();
        entries.insert("region".to_string(), Value::str(region));
        Value::object(entries)
    }

    #[test]
    fn test_sum_ignores_missing() {
        assert_eq!(sum(&column(&[Some(1.0), None, Some(2.5)])), 3.5);
        let mut values = column(&[Some(1.0)]);
        values.push(Value::Number(f64::NAN));
        values.push(Value::str("7"));
        assert_eq!(sum(&values), 1.0);
    }

    #[test]
    fn test_difference_from_previous() {
        assert_eq!(
            difference_from_previous(&column(&[Some(10.0), Some(15.0)]), 1.0),
            Some(5.0)
        );
        assert_eq!(
            difference_from_previous(&column(&[None, Some(15.0)]), 1.0),
            None
        );
        assert_eq!(difference_from_previous(&column(&[Some(10.0)]), 0.0), None);
    }

    #[test]
    fn test_moving_average() {
        let values = column(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(moving_average(&values, 2.0, 3.0), Some(3.5));
        // clipped at the start
        assert_eq!(moving_average(&values, 3.0, 0.0), Some(1.0));
        let gappy = column(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(moving_average(&gappy, 3.0, 2.0), Some(2.0));
        assert_eq!(moving_average(&column(&[None]), 1.0, 0.0), None);
    }

    #[test]
    fn test_fractional_index_has_no_value() {
        let values = column(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(moving_average(&values, 2.0, 2.5), None);
        assert_eq!(difference_from_previous(&values, 2.5), None);
        assert_eq!(moving_average(&values, 2.0, -1.0), None);
        assert_eq!(difference_from_previous(&values, f64::NAN), None);
    }

    #[test]
    fn test_cumulative_sum() {
        let values = column(&[Some(1.0), Some(2.0), None, Some(4.0)]);
        assert_eq!(cumulative_sum(&values, 3.0), 7.0);
        assert_eq!(cumulative_sum(&values, 1.0), 3.0);
        assert_eq!(cumulative_sum(&values, 10.0), 7.0);
        assert_eq!(cumulative_sum(&values, -1.0), 0.0);
    }

    #[test]
    fn test_values_with_and_by_dimension() {
        let values = column(&[Some(1.0), Some(2.0), Some(3.0)]);
        let rows = vec![row("east"), row("west"), row("east")];

        let positions = matching_rows(&rows, "region", &Value::str("east"));
        assert_eq!(positions, vec![0, 2]);
        let selected: Vec<_> = select(&values, &positions)
            .iter()
            .map(Value::finite_number)
            .collect();
        assert_eq!(selected, vec![Some(1.0), Some(3.0)]);

        let groups = values_by_dimension(&values, &rows, "region");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["east"].len(), 2);
        assert_eq!(groups["west"][0].finite_number(), Some(2.0));
    }

    #[test]
    fn test_helper_cache_memoizes_by_identity() {
        let mut cache = HelperCache::default();
        let values = Rc::new(column(&[Some(1.0), Some(2.0)]));
        assert_eq!(cache.sum(&values), 3.0);
        assert_eq!(cache.sum(&values), 3.0);
        assert_eq!(cache.len(), 1);

        let rows = Rc::new(vec![row("east"), row("west")]);
        let first = cache.matching_rows(&rows, "region", &Value::str("west"));
        let second = cache.matching_rows(&rows, "region", &Value::str("west"));
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(*first, vec![1]);

        cache.clear();
        assert!(cache.is_empty());
    }
}
