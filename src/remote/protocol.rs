//! Wire messages and framing for remote instrument control.
//!
//! Requests are JSON objects with an `"op"` discriminant (`get`, `set`,
//! `call`); replies carry a single `"response"` field. Frames are a 4-byte
//! big-endian length prefix followed by the JSON payload.
//!
//! ```json
//! {"op": "get", "parameter": "x"}
//! {"op": "set", "parameter": "y", "value": 3}
//! {"op": "call", "function": "foo", "args": ["bar"]}
//! {"response": 3}
//! ```

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A request from client to server. The `op` tag selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Read a parameter; the server replies with its value.
    Get { parameter: String },
    /// Write a parameter; fire-and-forget, no reply.
    Set { parameter: String, value: f64 },
    /// Invoke a registered method; the server replies with its result.
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
}

/// A reply from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub response: Value,
}

/// Encode a scalar the way the wire expects: integral values serialize as
/// JSON integers (`3`, not `3.0`).
pub fn scalar(v: f64) -> Value {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < i64::MAX as f64 {
        Value::Number(Number::from(v as i64))
    } else {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Read one length-prefixed JSON frame and decode it.
pub fn read_frame<T: DeserializeOwned>(stream: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(Error::Frame("empty frame".into()));
    }
    if len > MAX_FRAME_BYTES {
        return Err(Error::Frame(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Write one length-prefixed JSON frame.
pub fn write_frame<T: Serialize>(stream: &mut impl Write, message: &T) -> Result<()> {
    let json = serde_json::to_vec(message)?;
    stream.write_all(&(json.len() as u32).to_be_bytes())?;
    stream.write_all(&json)?;
    Ok(())
}
