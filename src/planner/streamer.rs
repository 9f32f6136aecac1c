//! Row codecs for rows crossing the shard/node boundary
//!
//! The codec list of a phase is derived from its declared output types
//! only, so sender and receiver always agree as long as they look at the
//! same phase.

use serde_json::{Number, Value};

use super::phase::ExecutionPhase;
use crate::error::{ExecError, ExecResult};
use crate::types::{DataType, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Streamer {
    Boolean,
    Integer,
    Long,
    Double,
    String,
    /// Written as JSON text
    Object,
    Array(Box<Streamer>),
    /// Any value, written as JSON text
    Undefined,
}

impl Streamer {
    pub fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => Streamer::Boolean,
            DataType::Integer => Streamer::Integer,
            DataType::Long => Streamer::Long,
            DataType::Double => Streamer::Double,
            DataType::String => Streamer::String,
            DataType::Object => Streamer::Object,
            DataType::Array(inner) => Streamer::Array(Box::new(Streamer::for_type(inner))),
            DataType::Undefined => Streamer::Undefined,
        }
    }

    /// Write a presence flag followed by the payload
    pub fn write(&self, value: &Value, out: &mut Vec<u8>) -> ExecResult<()> {
        if value.is_null() {
            bincode::serialize_into(&mut *out, &false)?;
            return Ok(());
        }
        bincode::serialize_into(&mut *out, &true)?;
        match self {
            Streamer::Boolean => {
                let b = value.as_bool().ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, &b)?;
            }
            Streamer::Integer => {
                let i = value
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, &i)?;
            }
            Streamer::Long => {
                let l = value.as_i64().ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, &l)?;
            }
            Streamer::Double => {
                let d = value.as_f64().ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, &d)?;
            }
            Streamer::String => {
                let s = value.as_str().ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, s)?;
            }
            Streamer::Object | Streamer::Undefined => {
                if matches!(self, Streamer::Object) && !value.is_object() {
                    return Err(mismatch(self, value));
                }
                bincode::serialize_into(&mut *out, &serde_json::to_string(value)?)?;
            }
            Streamer::Array(inner) => {
                let items = value.as_array().ok_or_else(|| mismatch(self, value))?;
                bincode::serialize_into(&mut *out, &(items.len() as u32))?;
                for item in items {
                    inner.write(item, out)?;
                }
            }
        }
        Ok(())
    }

    /// Read one value, advancing `input` past it
    pub fn read(&self, input: &mut &[u8]) -> ExecResult<Value> {
        let present: bool = bincode::deserialize_from(&mut *input)?;
        if !present {
            return Ok(Value::Null);
        }
        let value = match self {
            Streamer::Boolean => Value::Bool(bincode::deserialize_from(&mut *input)?),
            Streamer::Integer => {
                let i: i32 = bincode::deserialize_from(&mut *input)?;
                Value::from(i)
            }
            Streamer::Long => {
                let l: i64 = bincode::deserialize_from(&mut *input)?;
                Value::from(l)
            }
            Streamer::Double => {
                let d: f64 = bincode::deserialize_from(&mut *input)?;
                Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null)
            }
            Streamer::String => Value::String(bincode::deserialize_from(&mut *input)?),
            Streamer::Object | Streamer::Undefined => {
                let text: String = bincode::deserialize_from(&mut *input)?;
                serde_json::from_str(&text)?
            }
            Streamer::Array(inner) => {
                let len: u32 = bincode::deserialize_from(&mut *input)?;
                // every item carries at least its presence flag
                if len as usize > input.len() {
                    return Err(truncated("array", len, input.len()));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(inner.read(input)?);
                }
                Value::Array(items)
            }
        };
        Ok(value)
    }
}

fn truncated(what: &str, count: u32, remaining: usize) -> ExecError {
    ExecError::Codec(format!(
        "{} announces {} entries but only {} bytes remain",
        what, count, remaining
    ))
}

fn mismatch(streamer: &Streamer, value: &Value) -> ExecError {
    ExecError::Codec(format!("{:?} streamer cannot write value {}", streamer, value))
}

/// Resolve the codecs for the rows an execution phase emits
pub fn streamers_for(phase: &ExecutionPhase) -> ExecResult<Vec<Streamer>> {
    let types = match phase {
        ExecutionPhase::Collect(p) => p.output_types(),
        ExecutionPhase::Merge(p) => p.output_types(),
        ExecutionPhase::NestedLoop(p) => p.output_types(),
        ExecutionPhase::Fetch(_) => {
            return Err(ExecError::UnsupportedOperation(format!(
                "Got unsupported ExecutionNode {}",
                phase.kind_name()
            )))
        }
    };
    Ok(types.iter().map(Streamer::for_type).collect())
}

/// Encodes and decodes whole rows with a fixed list of streamers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowStreamer {
    streamers: Vec<Streamer>,
}

impl RowStreamer {
    pub fn new(streamers: Vec<Streamer>) -> Self {
        Self { streamers }
    }

    pub fn for_phase(phase: &ExecutionPhase) -> ExecResult<Self> {
        Ok(Self::new(streamers_for(phase)?))
    }

    pub fn width(&self) -> usize {
        self.streamers.len()
    }

    pub fn write_row(&self, row: &Row, out: &mut Vec<u8>) -> ExecResult<()> {
        if row.len() != self.streamers.len() {
            return Err(ExecError::Codec(format!(
                "Row has {} columns but {} streamers are configured",
                row.len(),
                self.streamers.len()
            )));
        }
        for (streamer, value) in self.streamers.iter().zip(row) {
            streamer.write(value, out)?;
        }
        Ok(())
    }

    pub fn read_row(&self, input: &mut &[u8]) -> ExecResult<Row> {
        self.streamers.iter().map(|s| s.read(input)).collect()
    }

    /// Encode a batch as a row count followed by the rows
    pub fn encode_batch(&self, rows: &[Row]) -> ExecResult<Vec<u8>> {
        let mut out = Vec::new();
        bincode::serialize_into(&mut out, &(rows.len() as u32))?;
        for row in rows {
            self.write_row(row, &mut out)?;
        }
        Ok(out)
    }

    pub fn decode_batch(&self, mut input: &[u8]) -> ExecResult<Vec<Row>> {
        let count: u32 = bincode::deserialize_from(&mut input)?;
        if count as usize > input.len() / self.width().max(1) {
            return Err(truncated("row batch", count, input.len()));
        }
        let mut rows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            rows.push(self.read_row(&mut input)?);
        }
        if !input.is_empty() {
            return Err(ExecError::Codec(format!(
                "{} trailing bytes after row batch",
                input.len()
            )));
        }
        Ok(rows)
    }
}
