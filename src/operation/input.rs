//! Symbol evaluation
//!
//! Evaluates [`Symbol`] trees against a source of values:
//! - RowContext: the positional row produced by the previous step
//! - DocumentContext: a stored document while a shard is collected
//! - FetchContext: a bounded row together with its fetched source document

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::collect::{encode_doc_id, Document};
use crate::analyze::{sys_columns, Reference, Symbol};
use crate::error::{ExecError, ExecResult};
use crate::types::Row;

/// A source symbols can be resolved against
pub trait SymbolContext {
    fn input(&self, index: usize) -> ExecResult<Value>;

    fn reference(&self, reference: &Reference) -> ExecResult<Value>;

    fn fetch_reference(&self, reference: &Reference) -> ExecResult<Value> {
        Err(ExecError::Execution(format!(
            "Column {} can only be resolved by a fetch",
            reference.column()
        )))
    }
}

pub struct RowContext<'a> {
    row: &'a Row,
}

impl<'a> RowContext<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self { row }
    }
}

impl SymbolContext for RowContext<'_> {
    fn input(&self, index: usize) -> ExecResult<Value> {
        input_at(self.row, index)
    }

    fn reference(&self, reference: &Reference) -> ExecResult<Value> {
        Err(ExecError::Execution(format!(
            "Cannot resolve column {} against a projected row",
            reference.column()
        )))
    }
}

pub struct DocumentContext<'a> {
    doc: &'a Document,
    reader_id: u32,
}

impl<'a> DocumentContext<'a> {
    pub fn new(doc: &'a Document, reader_id: u32) -> Self {
        Self { doc, reader_id }
    }
}

impl SymbolContext for DocumentContext<'_> {
    fn input(&self, index: usize) -> ExecResult<Value> {
        Err(ExecError::Execution(format!(
            "INPUT({}) is not available while collecting",
            index
        )))
    }

    fn reference(&self, reference: &Reference) -> ExecResult<Value> {
        let column = reference.column();
        if column.path.is_empty() {
            match column.name.as_str() {
                sys_columns::DOCID => {
                    return Ok(Value::from(encode_doc_id(
                        self.reader_id,
                        self.doc.local_doc_id,
                    )))
                }
                sys_columns::SCORE => return Ok(Value::from(self.doc.score)),
                sys_columns::VERSION => return Ok(Value::from(self.doc.version)),
                sys_columns::ID => return Ok(Value::String(self.doc.id.clone())),
                sys_columns::DOC => return Ok(self.doc.source.clone()),
                _ => {}
            }
        }
        Ok(source_value(&self.doc.source, reference))
    }
}

pub struct FetchContext<'a> {
    row: &'a Row,
    source: &'a Value,
}

impl<'a> FetchContext<'a> {
    pub fn new(row: &'a Row, source: &'a Value) -> Self {
        Self { row, source }
    }
}

impl SymbolContext for FetchContext<'_> {
    fn input(&self, index: usize) -> ExecResult<Value> {
        input_at(self.row, index)
    }

    /// Plain references surviving into a fetch are partition columns,
    /// which the store keeps inside the source document.
    fn reference(&self, reference: &Reference) -> ExecResult<Value> {
        Ok(source_value(self.source, reference))
    }

    fn fetch_reference(&self, reference: &Reference) -> ExecResult<Value> {
        Ok(source_value(self.source, reference))
    }
}

fn input_at(row: &Row, index: usize) -> ExecResult<Value> {
    row.get(index).cloned().ok_or_else(|| {
        ExecError::Execution(format!(
            "INPUT({}) out of range for a row of {} columns",
            index,
            row.len()
        ))
    })
}

fn source_value(source: &Value, reference: &Reference) -> Value {
    let column = reference.column();
    let mut current = match source.get(&column.name) {
        Some(value) => value,
        None => return Value::Null,
    };
    for part in &column.path {
        match current.get(part) {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Evaluate a scalar symbol tree
pub fn evaluate(symbol: &Symbol, ctx: &dyn SymbolContext) -> ExecResult<Value> {
    match symbol {
        Symbol::Literal { value, .. } => Ok(value.clone()),
        Symbol::InputColumn { index, .. } => ctx.input(*index),
        Symbol::Reference(r) => ctx.reference(r),
        Symbol::FetchReference(r) => ctx.fetch_reference(r),
        Symbol::Function(f) => {
            let args = f
                .arguments
                .iter()
                .map(|a| evaluate(a, ctx))
                .collect::<ExecResult<Vec<_>>>()?;
            call_scalar(&f.name, &args)
        }
        Symbol::Aggregation(f) => Err(ExecError::Execution(format!(
            "Aggregation {} cannot be evaluated per row",
            f.name
        ))),
    }
}

/// Evaluate every symbol against the same context
pub fn evaluate_all(symbols: &[Symbol], ctx: &dyn SymbolContext) -> ExecResult<Row> {
    symbols.iter().map(|s| evaluate(s, ctx)).collect()
}

fn call_scalar(name: &str, args: &[Value]) -> ExecResult<Value> {
    match name {
        "op_=" => compare(args, name, |o| o == Ordering::Equal),
        "op_<>" => compare(args, name, |o| o != Ordering::Equal),
        "op_<" => compare(args, name, |o| o == Ordering::Less),
        "op_<=" => compare(args, name, |o| o != Ordering::Greater),
        "op_>" => compare(args, name, |o| o == Ordering::Greater),
        "op_>=" => compare(args, name, |o| o != Ordering::Less),
        "op_and" => {
            let [left, right] = binary(args, name)?;
            Ok(Value::Bool(to_bool(left) && to_bool(right)))
        }
        "op_or" => {
            let [left, right] = binary(args, name)?;
            Ok(Value::Bool(to_bool(left) || to_bool(right)))
        }
        "op_not" => {
            let operand = unary(args, name)?;
            if operand.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Bool(!to_bool(operand)))
        }
        "op_isnull" => Ok(Value::Bool(unary(args, name)?.is_null())),
        "add" => arithmetic(args, name, i64::checked_add, |a, b| a + b),
        "subtract" => arithmetic(args, name, i64::checked_sub, |a, b| a - b),
        "multiply" => arithmetic(args, name, i64::checked_mul, |a, b| a * b),
        "lower" => string_fn(args, name, str::to_lowercase),
        "upper" => string_fn(args, name, str::to_uppercase),
        other => Err(ExecError::UnsupportedOperation(format!(
            "Unknown function: {}",
            other
        ))),
    }
}

fn unary<'a>(args: &'a [Value], name: &str) -> ExecResult<&'a Value> {
    match args {
        [operand] => Ok(operand),
        _ => Err(arity(name, 1, args.len())),
    }
}

fn binary<'a>(args: &'a [Value], name: &str) -> ExecResult<[&'a Value; 2]> {
    match args {
        [left, right] => Ok([left, right]),
        _ => Err(arity(name, 2, args.len())),
    }
}

fn arity(name: &str, expected: usize, got: usize) -> ExecError {
    ExecError::Execution(format!(
        "{} expects {} argument(s), got {}",
        name, expected, got
    ))
}

/// Comparisons involving null yield null
fn compare(args: &[Value], name: &str, test: impl Fn(Ordering) -> bool) -> ExecResult<Value> {
    let [left, right] = binary(args, name)?;
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(test(compare_values(left, right))))
}

fn arithmetic(
    args: &[Value],
    name: &str,
    on_integers: fn(i64, i64) -> Option<i64>,
    on_floats: fn(f64, f64) -> f64,
) -> ExecResult<Value> {
    let [left, right] = binary(args, name)?;
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return on_integers(a, b)
            .map(Value::from)
            .ok_or_else(|| ExecError::Execution(format!("{} overflowed", name)));
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(number_from_f64(on_floats(a, b))),
        _ => Err(ExecError::Execution(format!(
            "Cannot {} non-numbers",
            name
        ))),
    }
}

fn string_fn(args: &[Value], name: &str, apply: fn(&str) -> String) -> ExecResult<Value> {
    match unary(args, name)? {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(apply(s))),
        other => Err(ExecError::Execution(format!(
            "{} expects a string, got {}",
            name, other
        ))),
    }
}

fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[inline]
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Ordering::Equal
}

/// Rank of a value's type in the cross-type order
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over values. Types order as null, bool, number, string,
/// array, object. Arrays compare element-wise, objects by their key/value
/// pairs in key order. `1` and `1.0` are equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(0.0);
                let b = b.as_f64().unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(a), Value::Object(b)) => {
            let mut a: Vec<_> = a.iter().collect();
            let mut b: Vec<_> = b.iter().collect();
            a.sort_unstable_by(|x, y| x.0.cmp(y.0));
            b.sort_unstable_by(|x, y| x.0.cmp(y.0));
            a.iter()
                .zip(&b)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(va, vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len()))
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
