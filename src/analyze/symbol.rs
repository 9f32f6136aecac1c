//! Symbols: the expression tree shared by planner and projectors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::table::{sys_columns, ColumnIdent, RowGranularity, TableIdent, TableInfo};
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceIdent {
    pub table: TableIdent,
    pub column: ColumnIdent,
}

impl ReferenceIdent {
    pub fn new(table: TableIdent, column: ColumnIdent) -> Self {
        Self { table, column }
    }
}

/// A column of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub ident: ReferenceIdent,
    pub granularity: RowGranularity,
    pub data_type: DataType,
}

impl Reference {
    pub fn new(ident: ReferenceIdent, granularity: RowGranularity, data_type: DataType) -> Self {
        Self {
            ident,
            granularity,
            data_type,
        }
    }

    pub fn column(&self) -> &ColumnIdent {
        &self.ident.column
    }

    pub fn is_column(&self, name: &str) -> bool {
        self.ident.column.path.is_empty() && self.ident.column.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Symbol>,
    pub return_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Symbol {
    Literal { value: Value, data_type: DataType },
    Reference(Reference),
    /// A document column resolved after bounding, by fetching the source
    /// document through its `_docid`.
    FetchReference(Reference),
    /// Positional access into the row produced by the previous step
    InputColumn { index: usize, data_type: DataType },
    Function(Function),
    Aggregation(Function),
}

impl Symbol {
    pub fn literal(value: Value) -> Self {
        let data_type = match &value {
            Value::Null => DataType::Undefined,
            Value::Bool(_) => DataType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => DataType::Long,
            Value::Number(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array(Box::new(DataType::Undefined)),
            Value::Object(_) => DataType::Object,
        };
        Symbol::Literal { value, data_type }
    }

    pub fn input(index: usize, data_type: DataType) -> Self {
        Symbol::InputColumn { index, data_type }
    }

    pub fn function(name: &str, arguments: Vec<Symbol>, return_type: DataType) -> Self {
        Symbol::Function(Function {
            name: name.to_string(),
            arguments,
            return_type,
        })
    }

    pub fn aggregation(name: &str, arguments: Vec<Symbol>, return_type: DataType) -> Self {
        Symbol::Aggregation(Function {
            name: name.to_string(),
            arguments,
            return_type,
        })
    }

    pub fn value_type(&self) -> DataType {
        match self {
            Symbol::Literal { data_type, .. } | Symbol::InputColumn { data_type, .. } => {
                data_type.clone()
            }
            Symbol::Reference(r) | Symbol::FetchReference(r) => r.data_type.clone(),
            Symbol::Function(f) | Symbol::Aggregation(f) => f.return_type.clone(),
        }
    }

    /// Visit this symbol and all of its children, depth first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Symbol)) {
        visit(self);
        if let Symbol::Function(f) | Symbol::Aggregation(f) = self {
            for argument in &f.arguments {
                argument.walk(visit);
            }
        }
    }

    /// Every table column this symbol depends on
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.walk(&mut |symbol| {
            if let Symbol::Reference(r) | Symbol::FetchReference(r) = symbol {
                found.push(r);
            }
        });
        found
    }

    pub fn contains_score(&self) -> bool {
        self.references()
            .iter()
            .any(|r| r.is_column(sys_columns::SCORE))
    }

    pub fn contains_aggregation(&self) -> bool {
        let mut found = false;
        self.walk(&mut |symbol| {
            if matches!(symbol, Symbol::Aggregation(_)) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Literal { value, .. } => write!(f, "{}", value),
            Symbol::Reference(r) => write!(f, "{}", r.ident.column),
            Symbol::FetchReference(r) => write!(f, "{}['{}']", sys_columns::DOC, r.ident.column),
            Symbol::InputColumn { index, .. } => write!(f, "INPUT({})", index),
            Symbol::Function(func) | Symbol::Aggregation(func) => {
                write!(f, "{}(", func.name)?;
                for (i, argument) in func.arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", argument)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// All references used by a list of symbols, in order of appearance
pub fn collect_references(symbols: &[Symbol]) -> Vec<&Reference> {
    symbols.iter().flat_map(Symbol::references).collect()
}

/// Rewrite `symbol` so that every sub-expression already present in
/// `inputs` is replaced by an input column pointing at its position.
pub fn to_input_column(symbol: &Symbol, inputs: &[Symbol]) -> Symbol {
    if let Some(index) = inputs.iter().position(|input| input == symbol) {
        return Symbol::input(index, symbol.value_type());
    }
    match symbol {
        Symbol::Function(f) => Symbol::Function(convert_arguments(f, inputs)),
        Symbol::Aggregation(f) => Symbol::Aggregation(convert_arguments(f, inputs)),
        other => other.clone(),
    }
}

pub fn to_input_columns(symbols: &[Symbol], inputs: &[Symbol]) -> Vec<Symbol> {
    symbols.iter().map(|s| to_input_column(s, inputs)).collect()
}

fn convert_arguments(function: &Function, inputs: &[Symbol]) -> Function {
    Function {
        name: function.name.clone(),
        arguments: to_input_columns(&function.arguments, inputs),
        return_type: function.return_type.clone(),
    }
}

/// Turn plain document references into fetch references so they are
/// resolved from the source document after bounding. System columns and
/// partition columns are left untouched.
pub fn convert_to_fetch_reference(symbol: &Symbol, table: &TableInfo) -> Symbol {
    match symbol {
        Symbol::Reference(r)
            if r.granularity == RowGranularity::Doc
                && !r.column().is_system_column()
                && !table.is_partitioned_by(r.column()) =>
        {
            Symbol::FetchReference(r.clone())
        }
        Symbol::Function(f) => Symbol::Function(Function {
            name: f.name.clone(),
            arguments: f
                .arguments
                .iter()
                .map(|a| convert_to_fetch_reference(a, table))
                .collect(),
            return_type: f.return_type.clone(),
        }),
        other => other.clone(),
    }
}
