use serde::{Deserialize, Serialize};

use super::symbol::Symbol;
use super::table::sys_columns;

/// The filter of a query, as produced by analysis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WhereClause {
    query: Option<Symbol>,
    no_match: bool,
}

impl WhereClause {
    pub fn match_all() -> Self {
        Self::default()
    }

    /// A predicate analysis proved can never be satisfied
    pub fn no_match() -> Self {
        Self {
            query: None,
            no_match: true,
        }
    }

    pub fn new(query: Symbol) -> Self {
        Self {
            query: Some(query),
            no_match: false,
        }
    }

    pub fn query(&self) -> Option<&Symbol> {
        self.query.as_ref()
    }

    pub fn is_no_match(&self) -> bool {
        self.no_match
    }

    /// Whether the filter depends on row versioning
    pub fn has_versions(&self) -> bool {
        self.query
            .as_ref()
            .map(|q| {
                q.references()
                    .iter()
                    .any(|r| r.is_column(sys_columns::VERSION))
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    symbols: Vec<Symbol>,
    reverse_flags: Vec<bool>,
    nulls_first: Vec<Option<bool>>,
}

impl OrderBy {
    pub fn asc(symbol: Symbol) -> Self {
        Self {
            symbols: vec![symbol],
            reverse_flags: vec![false],
            nulls_first: vec![None],
        }
    }

    pub fn desc(symbol: Symbol) -> Self {
        Self {
            symbols: vec![symbol],
            reverse_flags: vec![true],
            nulls_first: vec![None],
        }
    }

    /// Add a tie-breaking sort key
    pub fn then(mut self, symbol: Symbol, reverse: bool, nulls_first: Option<bool>) -> Self {
        self.symbols.push(symbol);
        self.reverse_flags.push(reverse);
        self.nulls_first.push(nulls_first);
        self
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn reverse_flags(&self) -> &[bool] {
        &self.reverse_flags
    }

    pub fn nulls_first(&self) -> &[Option<bool>] {
        &self.nulls_first
    }

    pub fn map_symbols(&self, convert: impl Fn(&Symbol) -> Symbol) -> Self {
        Self {
            symbols: self.symbols.iter().map(convert).collect(),
            reverse_flags: self.reverse_flags.clone(),
            nulls_first: self.nulls_first.clone(),
        }
    }
}

/// Immutable description of what a query selects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    outputs: Vec<Symbol>,
    where_clause: WhereClause,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: usize,
    group_by: Option<Vec<Symbol>>,
    has_aggregates: bool,
}

impl QuerySpec {
    pub fn new(outputs: Vec<Symbol>) -> Self {
        let has_aggregates = outputs.iter().any(Symbol::contains_aggregation);
        Self {
            outputs,
            where_clause: WhereClause::match_all(),
            order_by: None,
            limit: None,
            offset: 0,
            group_by: None,
            has_aggregates,
        }
    }

    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<Symbol>) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn outputs(&self) -> &[Symbol] {
        &self.outputs
    }

    pub fn where_clause(&self) -> &WhereClause {
        &self.where_clause
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn group_by(&self) -> Option<&[Symbol]> {
        self.group_by.as_deref()
    }

    pub fn has_aggregates(&self) -> bool {
        self.has_aggregates
    }

    pub fn is_limited(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }
}
