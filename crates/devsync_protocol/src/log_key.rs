//! Log key translation.
//!
//! Log records are buffered under device-monotonic milliseconds. At publish
//! time each key is rendered as a wall-clock timestamp that is safe to use as
//! a backend key segment: `YYYY-MM-DDTHH-MM-SS_mmmZ`.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;

/// Format of a wall-clock log key. Colons and the fractional-seconds period
/// are not allowed in backend keys.
const KEY_FORMAT: &str = "%Y-%m-%dT%H-%M-%S_%3fZ";

/// Translates device-monotonic timestamps into backend log keys.
///
/// The offset between the wall clock and the monotonic clock is captured the
/// first time both are known and kept for the lifetime of the translator, so
/// records keep their relative order no matter when they are published.
///
/// # Invariants
///
/// - Once captured, the offset never changes
/// - The same monotonic timestamp always yields the same key
/// - Increasing monotonic timestamps yield lexicographically increasing keys
#[derive(Debug, Default)]
pub struct LogKeyTranslator {
    offset_ms: OnceLock<i64>,
}

impl LogKeyTranslator {
    /// Creates a translator with no offset captured yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a translator with a fixed offset (wall-clock ms minus
    /// monotonic ms).
    pub fn with_offset(offset_ms: i64) -> Self {
        let translator = Self::new();
        let _ = translator.offset_ms.set(offset_ms);
        translator
    }

    /// Returns the captured offset, if any.
    pub fn offset_ms(&self) -> Option<i64> {
        self.offset_ms.get().copied()
    }

    /// Captures the offset from a simultaneous reading of both clocks.
    ///
    /// Does nothing once an offset has been captured, or while the wall clock
    /// is unavailable. Returns the offset in effect afterwards.
    pub fn calibrate(&self, monotonic_ms: u64, wall_clock_secs: Option<u64>) -> Option<i64> {
        if let Some(offset) = self.offset_ms.get() {
            return Some(*offset);
        }
        let wall_ms = i64::try_from(wall_clock_secs?).ok()?.checked_mul(1000)?;
        let offset = wall_ms.checked_sub(i64::try_from(monotonic_ms).ok()?)?;
        Some(*self.offset_ms.get_or_init(|| offset))
    }

    /// Translates a monotonic timestamp into a log key.
    ///
    /// Without a captured offset the key is the zero-padded monotonic value
    /// followed by `_uptime`: unique and sortable, but not a calendar time.
    pub fn translate(&self, monotonic_ms: u64) -> String {
        self.offset_ms()
            .and_then(|offset| i64::try_from(monotonic_ms).ok()?.checked_add(offset))
            .and_then(render_wall_clock_key)
            .unwrap_or_else(|| uptime_key(monotonic_ms))
    }
}

/// Renders milliseconds since the Unix epoch as a log key.
///
/// Returns `None` for instants before the epoch or past year 9999, where the
/// rendered keys would no longer sort lexicographically.
pub fn render_wall_clock_key(epoch_ms: i64) -> Option<String> {
    if epoch_ms < 0 {
        return None;
    }
    let instant = DateTime::<Utc>::from_timestamp_millis(epoch_ms)?;
    let key = instant.format(KEY_FORMAT).to_string();
    (key.len() == 24).then_some(key)
}

fn uptime_key(monotonic_ms: u64) -> String {
    format!("{:020}_uptime", monotonic_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::is_key_safe;
    use proptest::prelude::*;

    // 2024-03-01T10:20:30Z
    const WALL_SECS: u64 = 1_709_288_430;

    #[test]
    fn renders_backend_safe_keys() {
        let key = render_wall_clock_key(1_709_288_430_123).unwrap();
        assert_eq!(key, "2024-03-01T10-20-30_123Z");
        assert!(is_key_safe(&key));
    }

    #[test]
    fn pads_milliseconds() {
        assert_eq!(
            render_wall_clock_key(1_709_288_430_007).unwrap(),
            "2024-03-01T10-20-30_007Z"
        );
        assert_eq!(render_wall_clock_key(0).unwrap(), "1970-01-01T00-00-00_000Z");
    }

    #[test]
    fn rejects_unsortable_instants() {
        assert!(render_wall_clock_key(-1).is_none());
        assert!(render_wall_clock_key(i64::MAX).is_none());
    }

    #[test]
    fn calibrate_captures_offset_once() {
        let translator = LogKeyTranslator::new();
        assert_eq!(translator.calibrate(5_000, None), None);
        assert_eq!(translator.offset_ms(), None);

        let offset = translator.calibrate(5_000, Some(WALL_SECS)).unwrap();
        assert_eq!(offset, WALL_SECS as i64 * 1000 - 5_000);

        // A later reading with a jumped wall clock is ignored.
        assert_eq!(translator.calibrate(6_000, Some(WALL_SECS + 3_600)), Some(offset));
        assert_eq!(translator.offset_ms(), Some(offset));
    }

    #[test]
    fn translate_uses_offset() {
        let translator = LogKeyTranslator::new();
        translator.calibrate(10_000, Some(WALL_SECS));

        // 2.5 s before calibration
        assert_eq!(translator.translate(7_500), "2024-03-01T10-20-27_500Z");
        assert_eq!(translator.translate(10_000), "2024-03-01T10-20-30_000Z");
    }

    #[test]
    fn translate_without_wall_clock() {
        let translator = LogKeyTranslator::new();
        let key = translator.translate(1_234);
        assert_eq!(key, "00000000000000001234_uptime");
        assert!(is_key_safe(&key));
        assert!(translator.translate(999) < key);
    }

    proptest! {
        #[test]
        fn translation_is_deterministic_and_ordered(
            offset in 0i64..4_000_000_000_000,
            a in 0u64..1_000_000_000,
            b in 0u64..1_000_000_000,
        ) {
            let translator = LogKeyTranslator::with_offset(offset);
            prop_assert_eq!(translator.translate(a), translator.translate(a));

            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            if lo < hi {
                prop_assert!(translator.translate(lo) < translator.translate(hi));
            }
        }

        #[test]
        fn uptime_keys_are_ordered(a in any::<u64>(), b in any::<u64>()) {
            let translator = LogKeyTranslator::new();
            prop_assert_eq!(a.cmp(&b), translator.translate(a).cmp(&translator.translate(b)));
        }
    }
}
