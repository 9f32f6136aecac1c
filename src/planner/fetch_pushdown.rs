use crate::analyze::{QuerySpec, Symbol, TableIdent};

/// Check that the part of `spec` a collect phase would evaluate can be
/// pushed onto the shards of `table`.
///
/// Returns `None` when the query reaches into another relation or orders by
/// an aggregate; the caller then has to pick a more general strategy.
pub fn push_down(spec: &QuerySpec, table: &TableIdent) -> Option<QuerySpec> {
    let order_symbols = spec.order_by().map(|o| o.symbols()).unwrap_or_default();

    if order_symbols.iter().any(Symbol::contains_aggregation) {
        tracing::debug!("Cannot push down {}: ORDER BY contains an aggregation", table);
        return None;
    }

    let foreign = spec
        .outputs()
        .iter()
        .chain(order_symbols)
        .flat_map(Symbol::references)
        .find(|r| &r.ident.table != table);
    if let Some(reference) = foreign {
        tracing::debug!(
            "Cannot push down {}: column {} belongs to {}",
            table,
            reference.column(),
            reference.ident.table
        );
        return None;
    }

    Some(spec.clone())
}
