use crate::analyze::symbol::{to_input_column, to_input_columns};
use crate::analyze::{OrderBy, QuerySpec, Symbol};

use super::projection::Projection;

/// The symbols a collect phase has to produce so that everything above it
/// can be computed from input columns.
#[derive(Debug, Clone)]
pub struct SplitPoints {
    to_collect: Vec<Symbol>,
}

impl SplitPoints {
    pub fn create(spec: &QuerySpec) -> Self {
        let mut to_collect: Vec<Symbol> = Vec::new();
        let order_symbols = spec.order_by().map(OrderBy::symbols).unwrap_or_default();
        for symbol in spec.outputs().iter().chain(order_symbols) {
            if matches!(symbol, Symbol::Literal { .. }) || to_collect.contains(symbol) {
                continue;
            }
            to_collect.push(symbol.clone());
        }
        Self { to_collect }
    }

    pub fn to_collect(&self) -> &[Symbol] {
        &self.to_collect
    }
}

/// Builds projections whose symbols point into the rows of a previous step
pub struct ProjectionBuilder;

impl ProjectionBuilder {
    /// A top-N over rows shaped like `inputs`. Without `outputs` every input
    /// column is passed through.
    pub fn top_n(
        inputs: &[Symbol],
        order_by: Option<&OrderBy>,
        offset: usize,
        limit: Option<usize>,
        outputs: Option<&[Symbol]>,
    ) -> Projection {
        let outputs = match outputs {
            Some(outputs) => to_input_columns(outputs, inputs),
            None => pass_through(inputs),
        };
        let order_by = order_by.map(|o| o.map_symbols(|s| to_input_column(s, inputs)));
        Projection::top_n(offset, limit, order_by, outputs)
    }

    pub fn merge(inputs: &[Symbol], order_by: &OrderBy) -> Projection {
        Projection::merge(order_by.map_symbols(|s| to_input_column(s, inputs)))
    }
}

pub fn pass_through(inputs: &[Symbol]) -> Vec<Symbol> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, s)| Symbol::input(i, s.value_type()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{Routing, TableIdent, TableInfo};
    use crate::planner::projection::ProjectionKind;
    use crate::types::DataType;
    use serde_json::json;

    fn table() -> TableInfo {
        TableInfo::builder(TableIdent::new("doc", "t"), Routing::new())
            .add("a", DataType::Long)
            .add("b", DataType::String)
            .build()
    }

    #[test]
    fn test_split_points_dedup() {
        let t = table();
        let a = Symbol::Reference(t.reference("a").unwrap());
        let b = Symbol::Reference(t.reference("b").unwrap());
        let spec = QuerySpec::new(vec![a.clone(), b.clone(), Symbol::literal(json!(1))])
            .with_order_by(OrderBy::asc(a.clone()));
        let split = SplitPoints::create(&spec);
        assert_eq!(split.to_collect(), &[a, b]);
    }

    #[test]
    fn test_top_n_rewrites_to_inputs() {
        let t = table();
        let a = Symbol::Reference(t.reference("a").unwrap());
        let b = Symbol::Reference(t.reference("b").unwrap());
        let inputs = vec![a.clone(), b.clone()];

        let projection =
            ProjectionBuilder::top_n(&inputs, Some(&OrderBy::desc(b.clone())), 1, Some(2), Some(&[b]));
        match projection.kind() {
            ProjectionKind::TopN {
                offset,
                limit,
                order_by,
                outputs,
            } => {
                assert_eq!(*offset, 1);
                assert_eq!(*limit, Some(2));
                assert_eq!(outputs, &vec![Symbol::input(1, DataType::String)]);
                let order_by = order_by.as_ref().unwrap();
                assert_eq!(order_by.symbols(), &[Symbol::input(1, DataType::String)]);
            }
            other => panic!("unexpected projection {:?}", other),
        }

        let passthrough = ProjectionBuilder::top_n(&inputs, None, 0, None, None);
        assert_eq!(
            passthrough.output_types(&[DataType::Long, DataType::String]),
            vec![DataType::Long, DataType::String]
        );
    }
}
