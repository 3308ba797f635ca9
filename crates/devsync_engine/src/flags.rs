//! Dirty and in-progress flags as one atomic state machine.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicU8, Ordering};

const DIRTY: u8 = 0b01;
const BUSY: u8 = 0b10;

/// Whether remote work is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Remote operations may run.
    Ready,
    /// A failure was observed; remote work is suspended until a reset.
    Dirty,
}

/// Whether a remote operation currently holds the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// No remote operation running.
    Idle,
    /// A remote operation is running.
    Busy,
}

/// Snapshot of the engine's `{Ready, Dirty} x {Idle, Busy}` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// Ready or dirty.
    pub health: Health,
    /// Idle or busy.
    pub activity: Activity,
}

impl EngineStatus {
    /// Returns true if the dirty flag is set.
    pub fn is_dirty(&self) -> bool {
        self.health == Health::Dirty
    }

    /// Returns true if an operation is in progress.
    pub fn is_busy(&self) -> bool {
        self.activity == Activity::Busy
    }
}

#[derive(Debug, Default)]
pub(crate) struct EngineFlags(AtomicU8);

impl EngineFlags {
    pub(crate) fn status(&self) -> EngineStatus {
        let bits = self.0.load(Ordering::Acquire);
        EngineStatus {
            health: if bits & DIRTY != 0 {
                Health::Dirty
            } else {
                Health::Ready
            },
            activity: if bits & BUSY != 0 {
                Activity::Busy
            } else {
                Activity::Idle
            },
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.0.load(Ordering::Acquire) & DIRTY != 0
    }

    /// Takes the in-progress flag with a single test-and-set.
    pub(crate) fn try_acquire(&self) -> SyncResult<BusyGuard<'_>> {
        if self.0.fetch_or(BUSY, Ordering::AcqRel) & BUSY != 0 {
            return Err(SyncError::Contention);
        }
        Ok(BusyGuard { flags: self })
    }

    pub(crate) fn mark_dirty(&self) {
        self.0.fetch_or(DIRTY, Ordering::AcqRel);
    }

    pub(crate) fn clear_dirty(&self) {
        self.0.fetch_and(!DIRTY, Ordering::AcqRel);
    }
}

/// Holds the in-progress flag; releases it on drop.
#[derive(Debug)]
pub(crate) struct BusyGuard<'a> {
    flags: &'a EngineFlags,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flags.0.fetch_and(!BUSY, Ordering::Release);
    }
}
