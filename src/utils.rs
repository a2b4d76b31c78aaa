//! Small helpers shared across modules.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall clock time in milliseconds since the Unix epoch.
///
/// Used as the observation time of cached metadata and as the write time of
/// stored rows. A clock set before the epoch yields `0`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Truncates `text` to at most `max_chars` characters, appending an ellipsis when cut.
///
/// # Examples
///
/// ```ignore
/// # use ronron::utils::truncate;
/// assert_eq!(truncate("hello world", 5), "hello…");
/// assert_eq!(truncate("hi", 5), "hi");
/// ```
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}…", &text[..index]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_after_2024() {
        // 2024-01-01T00:00:00Z
        assert!(now_millis() > 1_704_067_200_000);
    }

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let first = now_millis();
        let second = now_millis();
        assert!(second >= first);
    }

    #[test]
    fn test_truncate_short_text() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_exact_length() {
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_text() {
        assert_eq!(truncate("hello world", 5), "hello…");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("ééééé", 2), "éé…");
    }
}
