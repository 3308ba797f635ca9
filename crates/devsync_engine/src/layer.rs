//! Tracing layer that captures events into a [`LogBuffer`].

use crate::clock::Clock;
use crate::log_buffer::LogBuffer;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

// Eviction notices from the buffer itself are not fed back into it.
const BUFFER_TARGET: &str = "devsync_engine::log_buffer";

/// Feeds formatted tracing events into a shared [`LogBuffer`], keyed by the
/// device clock, so they are published with the next
/// [`SyncEngine::publish_logs`](crate::SyncEngine::publish_logs).
///
/// Lines look like `[WARN] devsync_engine::state: log record not published key=12`.
///
/// ```
/// use devsync_engine::{LogBuffer, LogBufferLayer, SystemClock};
/// use std::sync::Arc;
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let buffer = Arc::new(LogBuffer::default());
/// let subscriber = tracing_subscriber::registry()
///     .with(LogBufferLayer::new(Arc::clone(&buffer), SystemClock::new()));
/// tracing::subscriber::with_default(subscriber, || tracing::info!("booted"));
/// assert_eq!(buffer.len(), 1);
/// ```
pub struct LogBufferLayer<C> {
    buffer: Arc<LogBuffer>,
    clock: C,
    min_level: Level,
}

impl<C: Clock> LogBufferLayer<C> {
    /// Captures events at `INFO` and above.
    pub fn new(buffer: Arc<LogBuffer>, clock: C) -> Self {
        Self {
            buffer,
            clock,
            min_level: Level::INFO,
        }
    }

    /// Sets the least severe level captured.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Returns the buffer events are written to.
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }
}

impl<S, C> Layer<S> for LogBufferLayer<C>
where
    S: Subscriber,
    C: Clock + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR.
        if *meta.level() > self.min_level {
            return;
        }
        if meta.target() == BUFFER_TARGET {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = visitor.finish(meta.level(), meta.target());
        self.buffer.append(self.clock.monotonic_ms(), line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self, level: &Level, target: &str) -> String {
        format!("[{level}] {target}: {}{}", self.message, self.fields)
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
