//! Wall-clock helpers. TTLs and last-visit stamps use milliseconds since
//! the unix epoch; `expireat` operates on whole seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current unix time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_are_consistent() {
        let ms = now_ms();
        let secs = now_secs();
        assert!(ms / 1000 >= secs.saturating_sub(1));
        assert!(ms / 1000 <= secs + 1);
    }
}
