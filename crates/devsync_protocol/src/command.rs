//! Remote commands.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A command retrieved from the remote inbox.
///
/// Each top-level entry of a command payload becomes one `Command`. Its queued
/// and delivered form is the single line `"key:value"` (see [`Command::line`]).
/// What a command means is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    key: String,
    value: String,
}

impl Command {
    /// Creates a command from its key and stringified value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the key the command was stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the stringified value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the `"key:value"` line.
    pub fn line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Decodes one command payload into commands, in document order.
///
/// The payload must be a flat JSON object. Strings are taken verbatim,
/// numbers use their decimal form, booleans become `true`/`false`, and
/// anything else (null, arrays, nested objects) keeps its JSON serialization.
pub fn decode_commands(payload: &[u8]) -> ProtocolResult<Vec<Command>> {
    let value: Value = serde_json::from_slice(payload)?;
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::NotAnObject {
                found: kind_of(&other),
            })
        }
    };

    Ok(map
        .into_iter()
        .map(|(key, value)| Command::new(key, stringify(value)))
        .collect())
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
