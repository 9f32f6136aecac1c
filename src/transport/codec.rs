use crate::error::{ExecError, ExecResult};
use crate::planner::streamer::RowStreamer;
use crate::types::Row;

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Frame a payload as `[u32 big-endian length][payload]`
pub fn encode_frame(payload: &[u8]) -> ExecResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ExecError::Codec(format!(
            "Frame of {} bytes exceeds the maximum of {} bytes",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split the first frame off `data`. Returns `Ok(None)` while the frame is
/// still incomplete.
pub fn decode_frame(data: &[u8]) -> ExecResult<Option<(&[u8], &[u8])>> {
    if data.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let (prefix, rest) = data.split_at(LENGTH_PREFIX);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ExecError::Codec(format!(
            "Frame of {} bytes exceeds the maximum of {} bytes",
            len, MAX_FRAME_SIZE
        )));
    }
    if rest.len() < len {
        return Ok(None);
    }
    let (payload, remaining) = rest.split_at(len);
    Ok(Some((payload, remaining)))
}

/// Decode every frame in `data`. Trailing partial frames are an error.
pub fn read_frames(data: &[u8]) -> ExecResult<Vec<&[u8]>> {
    let mut frames = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        match decode_frame(rest)? {
            Some((payload, remaining)) => {
                frames.push(payload);
                rest = remaining;
            }
            None => {
                return Err(ExecError::Codec(format!(
                    "Incomplete frame: {} bytes left over",
                    rest.len()
                )))
            }
        }
    }
    Ok(frames)
}

/// Encode `rows` into frames of at most `batch_rows` rows each
pub fn encode_rows(streamer: &RowStreamer, rows: &[Row], batch_rows: usize) -> ExecResult<Vec<u8>> {
    let mut out = Vec::new();
    for batch in rows.chunks(batch_rows.max(1)) {
        out.extend(encode_frame(&streamer.encode_batch(batch)?)?);
    }
    Ok(out)
}

pub fn decode_rows(streamer: &RowStreamer, data: &[u8]) -> ExecResult<Vec<Row>> {
    let mut rows = Vec::new();
    for frame in read_frames(data)? {
        rows.extend(streamer.decode_batch(frame)?);
    }
    Ok(rows)
}
