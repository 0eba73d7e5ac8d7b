use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Quote arguments containing whitespace, for display only.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.chars().any(char::is_whitespace) {
                format!("\"{}\"", arg)
            } else {
                arg.to_string()
            }
        })
        .collect()
}

/// First twelve characters of a container or image id.
pub fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.get(..12).unwrap_or(id)
}

/// Seconds since the epoch.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Seconds since the epoch of a file time.
pub fn unix_secs(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("sha256:0b1a8e4f6d2c99"), "0b1a8e4f6d2c");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_quote_args() {
        let quoted = quote_args(&["echo", "a b", "c\td", ""]);
        assert_eq!(quoted, vec!["echo", "\"a b\"", "\"c\td\"", ""]);
    }

    #[test]
    fn test_unix_secs() {
        assert_eq!(unix_secs(UNIX_EPOCH + Duration::from_millis(2500)), 2);
        assert_eq!(unix_secs(UNIX_EPOCH - Duration::from_secs(30)), -30);
        assert!(unix_now() > 1_500_000_000);
    }
}
