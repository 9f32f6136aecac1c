use std::cmp::Ordering;

use serde_json::Value;

use super::input::{compare_values, evaluate, RowContext};
use crate::analyze::{OrderBy, Symbol};
use crate::error::ExecResult;
use crate::types::Row;

#[derive(Debug, Clone)]
struct SortKey {
    symbol: Symbol,
    reverse: bool,
    nulls_first: bool,
}

/// Orders rows by an [`OrderBy`] whose symbols resolve against the row.
///
/// Nulls sort last for ascending keys and first for descending keys unless
/// the order-by says otherwise.
#[derive(Debug, Clone)]
pub struct RowComparator {
    keys: Vec<SortKey>,
}

impl RowComparator {
    pub fn new(order_by: &OrderBy) -> Self {
        let keys = order_by
            .symbols()
            .iter()
            .zip(order_by.reverse_flags())
            .zip(order_by.nulls_first())
            .map(|((symbol, reverse), nulls_first)| SortKey {
                symbol: symbol.clone(),
                reverse: *reverse,
                nulls_first: nulls_first.unwrap_or(*reverse),
            })
            .collect();
        Self { keys }
    }

    /// Evaluate the sort key values of a row once, so comparisons are cheap
    pub fn sort_values(&self, row: &Row) -> ExecResult<Vec<Value>> {
        let ctx = RowContext::new(row);
        self.keys.iter().map(|k| evaluate(&k.symbol, &ctx)).collect()
    }

    pub fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (key, (a, b)) in self.keys.iter().zip(a.iter().zip(b.iter())) {
            let ordering = match (a.is_null(), b.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) if key.nulls_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if key.nulls_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) if key.reverse => compare_values(a, b).reverse(),
                (false, false) => compare_values(a, b),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
