//! FIFO of decoded commands.

use devsync_protocol::Command;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Commands decoded from the remote inbox and not yet handed out.
///
/// One stream read can yield several commands; callers receive them one per
/// retrieval. The queue has its own lock, so draining it never waits on a
/// remote call.
#[derive(Debug, Default)]
pub struct RequestQueue {
    commands: Mutex<VecDeque<Command>>,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the oldest command.
    pub fn try_pop(&self) -> Option<Command> {
        self.commands.lock().pop_front()
    }

    /// Appends commands, preserving their order.
    pub fn push_all(&self, commands: impl IntoIterator<Item = Command>) {
        self.commands.lock().extend(commands);
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Returns true if no command is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}
