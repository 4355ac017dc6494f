//! Wire format for the Electrum stratum protocol.
//!
//! Every message is one line of JSON:
//!
//! ```text
//! out:          {"id": 3, "method": "blockchain.address.subscribe", "params": ["1abc"]}
//! response:     {"id": 3, "result": "f3a1..."}
//! notification: {"method": "blockchain.address.subscribe", "params": ["1abc", "9c0e..."]}
//! ```
//!
//! A line with a non-null `id` is a [`Frame::Response`]; a line without one
//! but with a `method` is a [`Frame::Notification`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StratumError};

/// A decoded incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Answer to one of our calls.
    Response {
        /// Correlation id of the call being answered.
        id: u64,
        /// `result` field; JSON null when absent.
        result: Value,
        /// Electrum `error` object, when the server rejected the call.
        error: Option<Value>,
    },
    /// Unsolicited push for a subscription.
    Notification(Notification),
}

/// Server push delivered to subscribers of `method`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method the push belongs to (same name as the subscribe call).
    pub method: String,
    /// Raw params; shape depends on the method.
    pub params: Value,
}

impl Notification {
    /// Loose containment check over the JSON text of `params`.
    ///
    /// Address subscriptions are routed with this rather than by comparing
    /// a parsed field, so an address that is a substring of another would
    /// match both.
    pub fn params_contain(&self, needle: &str) -> bool {
        match &self.params {
            Value::String(s) => s.contains(needle),
            other => other.to_string().contains(needle),
        }
    }
}

/// Shape of any incoming line before classification.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Frame {
    /// Decode one line into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::Decode`] for invalid JSON, a non-integer id,
    /// or a line that is neither a response nor a notification.
    pub fn decode(line: &str) -> Result<Self> {
        let raw: RawFrame =
            serde_json::from_str(line).map_err(|e| StratumError::decode(line, e.to_string()))?;

        match raw.id {
            Some(Value::Null) | None => {
                let method = raw
                    .method
                    .ok_or_else(|| StratumError::decode(line, "neither id nor method"))?;
                Ok(Self::Notification(Notification {
                    method,
                    params: raw.params.unwrap_or(Value::Null),
                }))
            }
            Some(id) => {
                let id = id
                    .as_u64()
                    .ok_or_else(|| StratumError::decode(line, format!("id {id} is not an unsigned integer")))?;
                Ok(Self::Response {
                    id,
                    result: raw.result.unwrap_or(Value::Null),
                    // Some servers send `"error": null` alongside a result.
                    error: raw.error.filter(|e| !e.is_null()),
                })
            }
        }
    }
}

/// Outgoing call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Positional params, always serialized as an array.
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Encode as a single line, without the trailing newline.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("JSON serialization cannot fail")
    }
}
