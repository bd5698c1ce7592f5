//! OVSDB JSON-RPC 1.0 message types and stream framing
//!
//! OVSDB servers send JSON objects back to back on the socket without a
//! length prefix, so incoming bytes are buffered and split with
//! `serde_json`'s streaming deserializer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OvsdbError, Result};

/// JSON-RPC 1.0 request (also used for notifications with a null id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

impl Request {
    /// Create a new request with a numeric id
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }
}

/// JSON-RPC 1.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: Value,
    pub error: Value,
    pub id: Value,
}

impl Response {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            result,
            error: Value::Null,
            id,
        }
    }
}

/// A classified incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reply to one of our requests
    Reply {
        id: u64,
        result: std::result::Result<Value, Value>,
    },
    /// Server-initiated request that expects an answer (e.g. `echo`)
    Request {
        method: String,
        params: Value,
        id: Value,
    },
    /// Server-initiated notification (e.g. `update`)
    Notification { method: String, params: Value },
}

/// Classify a decoded JSON value as a reply, request or notification
pub fn classify(value: Value) -> Result<Message> {
    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(OvsdbError::Protocol(format!(
                "expected a JSON object, got {}",
                other
            )))
        }
    };

    if let Some(method) = obj.get("method").and_then(|m| m.as_str()) {
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        return Ok(if id.is_null() {
            Message::Notification {
                method: method.to_string(),
                params,
            }
        } else {
            Message::Request {
                method: method.to_string(),
                params,
                id,
            }
        });
    }

    let id = obj
        .get("id")
        .and_then(|id| id.as_u64())
        .ok_or_else(|| OvsdbError::Protocol("reply without a numeric id".to_string()))?;

    let result = match obj.get("error") {
        Some(error) if !error.is_null() => Err(error.clone()),
        _ => Ok(obj.get("result").cloned().unwrap_or(Value::Null)),
    };

    Ok(Message::Reply { id, result })
}

/// Incremental decoder for back-to-back JSON values
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the socket
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Discard any buffered bytes (used after a framing error)
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of bytes waiting for a complete value
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete JSON value, or `None` if more bytes are needed
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buf.drain(..consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e.into()),
            None => {
                // only whitespace left
                self.buf.clear();
                Ok(None)
            }
        }
    }
}
