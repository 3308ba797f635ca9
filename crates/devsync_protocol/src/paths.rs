//! Remote path conventions.
//!
//! These must stay bit-exact: existing backends read commands from and
//! write logs to these locations.

/// Node holding pending commands as a flat object.
pub const COMMANDS_PATH: &str = "commands";

/// Parent node of published log records.
pub const LOGS_PATH: &str = "logs";

/// Characters the backend forbids inside a single key segment.
const FORBIDDEN: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Returns the remote path a log record is written to.
pub fn log_record_path(log_path: &str, key: &str) -> String {
    format!("{}/{}", log_path.trim_end_matches('/'), key)
}

/// Returns true if `segment` can be used as one key in the backend's
/// hierarchical namespace.
pub fn is_key_safe(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(FORBIDDEN) && !segment.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_paths() {
        assert_eq!(
            log_record_path(LOGS_PATH, "2024-03-01T10-20-30_123Z"),
            "logs/2024-03-01T10-20-30_123Z"
        );
        assert_eq!(log_record_path("device/logs/", "k"), "device/logs/k");
    }

    #[test]
    fn key_safety() {
        assert!(is_key_safe("2024-03-01T10-20-30_123Z"));
        assert!(!is_key_safe("10:20:30.123"));
        assert!(!is_key_safe("a/b"));
        assert!(!is_key_safe(""));
    }
}
