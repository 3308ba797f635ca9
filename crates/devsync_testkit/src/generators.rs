//! Property-based test generators using proptest.
//!
//! Provides strategies for command payloads, log traffic, and sequences of
//! engine operations interleaved with backend and network faults.

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Strategy for command keys as a remote inbox would carry them.
pub fn command_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,15}").expect("Invalid regex")
}

/// A scalar command value and the line text it decodes to.
#[derive(Debug, Clone)]
pub struct CommandValue {
    /// JSON value as sent.
    pub json: Value,
    /// Expected decoded text.
    pub text: String,
}

/// Strategy for scalar command values: strings, integers and booleans.
pub fn command_value_strategy() -> impl Strategy<Value = CommandValue> {
    prop_oneof![
        "[ -~]{0,12}".prop_map(|s| CommandValue {
            json: Value::String(s.clone()),
            text: s,
        }),
        any::<i64>().prop_map(|n| CommandValue {
            json: Value::from(n),
            text: n.to_string(),
        }),
        any::<bool>().prop_map(|b| CommandValue {
            json: Value::Bool(b),
            text: b.to_string(),
        }),
    ]
}

/// An encoded command payload with the lines it should decode to, in order.
#[derive(Debug, Clone)]
pub struct CommandPayload {
    /// Raw payload bytes.
    pub bytes: Vec<u8>,
    /// Expected `"key:value"` lines.
    pub lines: Vec<String>,
}

/// Strategy for command payloads with 1 to `max_commands` distinct keys.
pub fn command_payload_strategy(max_commands: usize) -> impl Strategy<Value = CommandPayload> {
    prop::collection::btree_map(
        command_key_strategy(),
        command_value_strategy(),
        1..=max_commands.max(1),
    )
    .prop_map(|commands: BTreeMap<String, CommandValue>| {
        let mut object = Map::new();
        let mut lines = Vec::with_capacity(commands.len());
        for (key, value) in commands {
            lines.push(format!("{key}:{}", value.text));
            object.insert(key, value.json);
        }
        CommandPayload {
            bytes: Value::Object(object).to_string().into_bytes(),
            lines,
        }
    })
}

/// Strategy for a batch of log messages.
pub fn log_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}( [a-z0-9=]{1,8}){0,3}", 0..=max_len)
}

/// One step applied to a simulated device.
#[derive(Debug, Clone)]
pub enum EngineOperation {
    /// Buffer a log message.
    Record(String),
    /// Call `retrieve_command`.
    Retrieve,
    /// Call `publish_logs`.
    Publish,
    /// Queue a payload on the backend.
    PushPayload(CommandPayload),
    /// Make the next writes fail.
    FailNextWrites(usize),
    /// Switch stream read failures on or off.
    FailReads(bool),
    /// Bring the link up or down.
    SetLink(bool),
    /// Move to a different network.
    Reassociate,
    /// Advance the device clock.
    Advance {
        /// Milliseconds to advance.
        ms: u64,
    },
}

/// Strategy for engine operations, weighted towards calls into the engine.
pub fn engine_operation_strategy() -> impl Strategy<Value = EngineOperation> {
    prop_oneof![
        4 => "[a-z]{1,8}".prop_map(EngineOperation::Record),
        3 => Just(EngineOperation::Retrieve),
        3 => Just(EngineOperation::Publish),
        2 => command_payload_strategy(4).prop_map(EngineOperation::PushPayload),
        1 => (0usize..3).prop_map(EngineOperation::FailNextWrites),
        1 => any::<bool>().prop_map(EngineOperation::FailReads),
        1 => any::<bool>().prop_map(EngineOperation::SetLink),
        1 => Just(EngineOperation::Reassociate),
        1 => (0u64..120_000).prop_map(|ms| EngineOperation::Advance { ms }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<EngineOperation>> {
    prop::collection::vec(engine_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
