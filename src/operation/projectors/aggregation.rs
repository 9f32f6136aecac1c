use std::collections::HashMap;

use serde_json::{Number, Value};

use super::Downstream;
use crate::analyze::Symbol;
use crate::error::{ExecError, ExecResult};
use crate::operation::input::{compare_values, evaluate, evaluate_all, RowContext};
use crate::operation::ram::RamAccountingContext;
use crate::planner::projection::{AggregateMode, Aggregation};
use crate::types::{estimate_row_size, DataType, Row};

pub const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "min", "max", "avg"];

#[derive(Debug, Clone)]
enum AggState {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        is_float: bool,
        seen: bool,
    },
    Min(Option<Value>),
    Max(Option<Value>),
    Avg {
        sum: f64,
        count: i64,
    },
}

impl AggState {
    fn new(function: &str) -> ExecResult<Self> {
        match function {
            "count" => Ok(AggState::Count(0)),
            "sum" => Ok(AggState::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
                seen: false,
            }),
            "min" => Ok(AggState::Min(None)),
            "max" => Ok(AggState::Max(None)),
            "avg" => Ok(AggState::Avg { sum: 0.0, count: 0 }),
            other => Err(ExecError::Configuration(format!(
                "Unknown aggregate function: {}",
                other
            ))),
        }
    }

    fn update(&mut self, mode: AggregateMode, value: Option<Value>) -> ExecResult<()> {
        let partial = mode == AggregateMode::PartialFinal;
        match self {
            AggState::Count(count) => match value {
                // count(*)
                None => *count += 1,
                Some(Value::Null) => {}
                Some(v) if partial => *count += v.as_i64().unwrap_or(0),
                Some(_) => *count += 1,
            },
            AggState::Sum {
                int,
                float,
                is_float,
                seen,
            } => {
                let Some(v) = value.filter(|v| !v.is_null()) else {
                    return Ok(());
                };
                *seen = true;
                if let Some(i) = v.as_i64().filter(|_| !*is_float) {
                    *int = int
                        .checked_add(i)
                        .ok_or_else(|| ExecError::Execution("sum overflowed".to_string()))?;
                } else {
                    let f = v.as_f64().ok_or_else(|| {
                        ExecError::Execution(format!("Cannot sum non-number {}", v))
                    })?;
                    if !*is_float {
                        *float = *int as f64;
                        *is_float = true;
                    }
                    *float += f;
                }
            }
            AggState::Min(current) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    if current
                        .as_ref()
                        .map_or(true, |c| compare_values(&v, c).is_lt())
                    {
                        *current = Some(v);
                    }
                }
            }
            AggState::Max(current) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    if current
                        .as_ref()
                        .map_or(true, |c| compare_values(&v, c).is_gt())
                    {
                        *current = Some(v);
                    }
                }
            }
            AggState::Avg { sum, count } => match value {
                None | Some(Value::Null) => {}
                Some(Value::Array(state)) if partial => {
                    let part_sum = state.first().and_then(Value::as_f64).unwrap_or(0.0);
                    let part_count = state.get(1).and_then(Value::as_f64).unwrap_or(0.0);
                    *sum += part_sum;
                    *count += part_count as i64;
                }
                Some(v) => {
                    *sum += v.as_f64().ok_or_else(|| {
                        ExecError::Execution(format!("Cannot average non-number {}", v))
                    })?;
                    *count += 1;
                }
            },
        }
        Ok(())
    }

    fn partial_value(&self) -> Value {
        match self {
            AggState::Avg { sum, count } => {
                Value::Array(vec![float(*sum), float(*count as f64)])
            }
            other => other.final_value(&DataType::Undefined),
        }
    }

    fn final_value(&self, return_type: &DataType) -> Value {
        match self {
            AggState::Count(count) => Value::from(*count),
            AggState::Sum { seen: false, .. } => Value::Null,
            AggState::Sum {
                int,
                float: f,
                is_float,
                ..
            } => {
                if *is_float {
                    float(*f)
                } else if *return_type == DataType::Double {
                    float(*int as f64)
                } else {
                    Value::from(*int)
                }
            }
            AggState::Min(v) | AggState::Max(v) => v.clone().unwrap_or(Value::Null),
            AggState::Avg { count: 0, .. } => Value::Null,
            AggState::Avg { sum, count } => float(*sum / *count as f64),
        }
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

struct Group {
    keys: Vec<Value>,
    states: Vec<AggState>,
}

/// Grouped or global aggregation. Emits one row per group on completion:
/// the group key values followed by one column per aggregation.
pub struct AggregationProjector {
    group_keys: Vec<Symbol>,
    aggregations: Vec<Aggregation>,
    ram: RamAccountingContext,
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

impl AggregationProjector {
    pub fn new(
        group_keys: Vec<Symbol>,
        aggregations: Vec<Aggregation>,
        ram: RamAccountingContext,
    ) -> ExecResult<Self> {
        for aggregation in &aggregations {
            AggState::new(&aggregation.function)?;
        }
        Ok(Self {
            group_keys,
            aggregations,
            ram,
            groups: Vec::new(),
            index: HashMap::new(),
        })
    }

    fn new_states(&self) -> ExecResult<Vec<AggState>> {
        self.aggregations
            .iter()
            .map(|a| AggState::new(&a.function))
            .collect()
    }

    pub fn set_next_row(&mut self, row: Row) -> ExecResult<bool> {
        let ctx = RowContext::new(&row);
        let keys = evaluate_all(&self.group_keys, &ctx)?;
        let key = serde_json::to_string(&keys)?;

        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                self.ram.add_bytes(estimate_row_size(&keys) + key.len() as u64)?;
                let states = self.new_states()?;
                self.groups.push(Group { keys, states });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[position];
        for (aggregation, state) in self.aggregations.iter().zip(group.states.iter_mut()) {
            let value = match &aggregation.input {
                Some(input) => Some(evaluate(input, &ctx)?),
                None => None,
            };
            state.update(aggregation.mode, value)?;
        }
        Ok(true)
    }

    pub fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        if self.groups.is_empty() && self.group_keys.is_empty() {
            // a global aggregate always yields exactly one row
            let states = self.new_states()?;
            self.groups.push(Group {
                keys: Vec::new(),
                states,
            });
        }
        for group in std::mem::take(&mut self.groups) {
            let mut row = group.keys;
            for (aggregation, state) in self.aggregations.iter().zip(&group.states) {
                row.push(match aggregation.mode {
                    AggregateMode::IterPartial => state.partial_value(),
                    AggregateMode::IterFinal | AggregateMode::PartialFinal => {
                        state.final_value(&aggregation.return_type)
                    }
                });
            }
            if !downstream.push(row)? {
                break;
            }
        }
        self.index.clear();
        Ok(())
    }
}
