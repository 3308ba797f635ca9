//! Fuzz testing harnesses for the sync engine.
//!
//! These targets can be used with cargo-fuzz or other fuzzing frameworks.
//! Each one panics if an invariant is violated and returns quietly otherwise.

use crate::fixtures::TestDevice;
use crate::generators::{CommandPayload, EngineOperation};
use crate::stress::OutcomeCounts;
use devsync_protocol::{decode_commands, is_key_safe, render_wall_clock_key, LogKeyTranslator};

/// Fuzz target for payload decoding.
///
/// Arbitrary bytes either decode to commands whose lines start with their
/// key, or fail with an error. Never panics.
pub fn fuzz_decode_commands(data: &[u8]) {
    if let Ok(commands) = decode_commands(data) {
        for command in commands {
            let line = command.line();
            assert!(line.starts_with(command.key()));
            assert_eq!(line.len(), command.key().len() + 1 + command.value().len());
        }
    }
}

/// Fuzz target for log key rendering.
///
/// Any rendered key has the fixed width and is usable as a backend key.
pub fn fuzz_log_key(data: &[u8]) {
    let Some(bytes) = data.get(..8) else {
        return;
    };
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    let epoch_ms = i64::from_le_bytes(raw);
    if let Some(key) = render_wall_clock_key(epoch_ms) {
        assert_eq!(key.len(), 24, "unexpected key width: {key}");
        assert!(is_key_safe(&key), "unsafe key: {key}");
    }

    let translator = LogKeyTranslator::new();
    let monotonic = u64::from_le_bytes(raw);
    let key = translator.translate(monotonic);
    assert!(is_key_safe(&key), "unsafe fallback key: {key}");
}

/// What a sequence of operations did to a device.
#[derive(Debug, Clone, Default)]
pub struct OperationSummary {
    /// Log messages recorded, in order.
    pub recorded: Vec<String>,
    /// Command lines queued on the backend, in order.
    pub pushed: Vec<String>,
    /// Command lines handed out by the engine, in order.
    pub delivered: Vec<String>,
    /// Retrieval outcomes.
    pub retrieve: OutcomeCounts,
    /// Publish outcomes.
    pub publish: OutcomeCounts,
}

/// Applies operations to a device in order.
pub fn run_operations(device: &TestDevice, operations: &[EngineOperation]) -> OperationSummary {
    let mut summary = OperationSummary::default();
    for operation in operations {
        apply(device, operation, &mut summary);
    }
    summary
}

/// Restores a healthy backend and network, then drains every command and
/// log record the device still holds.
pub fn settle(device: &TestDevice, summary: &mut OperationSummary) {
    device.backend.fail_reads(None);
    device.backend.fail_next_writes(0);
    device.network.set_link(true);
    device.network.set_internet(true);

    // The first call after a failure only resets.
    for _ in 0..2 {
        summary.delivered.extend(device.drain_commands());
    }
    device.flush_logs(2);
}

/// Checks the invariants a settled device must satisfy.
pub fn check_invariants(device: &TestDevice, summary: &OperationSummary) {
    assert!(
        device.backend.max_concurrent_calls() <= 1,
        "remote calls overlapped"
    );
    assert!(!device.engine.status().is_busy(), "in-progress flag leaked");
    assert_eq!(summary.delivered, summary.pushed, "commands lost or reordered");

    let mut recorded = summary.recorded.clone();
    recorded.sort();
    assert_eq!(device.accounted_messages(), recorded, "log records lost");
}

/// Fuzz target for engine call sequences.
///
/// Bytes are read in pairs as (operation, argument). After the sequence the
/// device is settled and checked.
pub fn fuzz_engine_operations(data: &[u8]) {
    let operations: Vec<EngineOperation> = data
        .chunks_exact(2)
        .take(256)
        .map(|pair| operation_from_bytes(pair[0], pair[1]))
        .collect();

    let device = TestDevice::new();
    let mut summary = run_operations(&device, &operations);
    settle(&device, &mut summary);
    check_invariants(&device, &summary);
}

fn operation_from_bytes(op: u8, arg: u8) -> EngineOperation {
    match op % 9 {
        0 => EngineOperation::Record(format!("fuzz {arg}")),
        1 => EngineOperation::Retrieve,
        2 => EngineOperation::Publish,
        3 => {
            let lines = vec![format!("k{arg}:{arg}")];
            EngineOperation::PushPayload(CommandPayload {
                bytes: format!(r#"{{"k{arg}":{arg}}}"#).into_bytes(),
                lines,
            })
        }
        4 => EngineOperation::FailNextWrites(usize::from(arg % 3)),
        5 => EngineOperation::FailReads(arg % 2 == 0),
        6 => EngineOperation::SetLink(arg % 4 != 0),
        7 => EngineOperation::Reassociate,
        _ => EngineOperation::Advance {
            ms: u64::from(arg) * 1_000,
        },
    }
}

fn apply(device: &TestDevice, operation: &EngineOperation, summary: &mut OperationSummary) {
    match operation {
        EngineOperation::Record(message) => {
            let message = format!("{} #{}", message, summary.recorded.len());
            device.engine.record_log(message.clone());
            summary.recorded.push(message);
        }
        EngineOperation::Retrieve => {
            let retrieval = device.engine.retrieve_command();
            summary.retrieve.record(retrieval.outcome);
            summary
                .delivered
                .extend(retrieval.command.map(|c| c.line()));
        }
        EngineOperation::Publish => {
            summary.publish.record(device.engine.publish_logs());
        }
        EngineOperation::PushPayload(payload) => {
            device.backend.push_payload(payload.bytes.clone());
            summary.pushed.extend(payload.lines.iter().cloned());
        }
        EngineOperation::FailNextWrites(count) => device.backend.fail_next_writes(*count),
        EngineOperation::FailReads(fail) => device
            .backend
            .fail_reads(fail.then_some("fuzz: read failure")),
        EngineOperation::SetLink(up) => device.network.set_link(*up),
        EngineOperation::Reassociate => {
            device.network.reassociate();
        }
        EngineOperation::Advance { ms } => device.clock.advance(*ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn fuzz_decode_handles_garbage() {
        fuzz_decode_commands(b"");
        fuzz_decode_commands(b"{");
        fuzz_decode_commands(b"[1,2]");
        fuzz_decode_commands(br#"{"a":{"b":1},"c":null}"#);
        fuzz_decode_commands(&[0xff, 0xfe, 0x00]);
    }

    #[test]
    fn fuzz_log_key_extremes() {
        fuzz_log_key(&i64::MAX.to_le_bytes());
        fuzz_log_key(&i64::MIN.to_le_bytes());
        fuzz_log_key(&0i64.to_le_bytes());
        fuzz_log_key(&1_709_288_430_123i64.to_le_bytes());
        fuzz_log_key(&[1, 2, 3]);
    }

    #[test]
    fn fuzz_engine_fixed_sequences() {
        fuzz_engine_operations(&[]);
        // push, fail reads, retrieve, record, publish, reassociate, retrieve
        fuzz_engine_operations(&[3, 7, 5, 0, 1, 0, 0, 1, 2, 0, 7, 0, 1, 0]);
        // link down, push, retrieve, record, fail writes, publish, advance, retrieve
        fuzz_engine_operations(&[6, 0, 3, 1, 1, 0, 0, 2, 4, 2, 2, 0, 8, 90, 1, 0]);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn random_sequences_keep_invariants(operations in operation_sequence_strategy(1, 80)) {
            let device = TestDevice::new();
            let mut summary = run_operations(&device, &operations);
            settle(&device, &mut summary);
            check_invariants(&device, &summary);
        }

        #[test]
        fn random_bytes_drive_engine(data in prop::collection::vec(any::<u8>(), 0..200)) {
            fuzz_engine_operations(&data);
        }
    }
}
