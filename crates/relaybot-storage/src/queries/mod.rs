// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per entity family.

pub mod bots;
pub mod metrics;
pub mod runs;
pub mod sessions;
pub mod tokens;
pub mod updates;

/// Attempts cap shared by both job queues. A job leased this many times
/// without reaching a terminal state stays failed.
pub const MAX_ATTEMPTS: i64 = 5;

/// Exponential requeue backoff, capped at one minute.
pub fn retry_backoff_ms(attempts: i64) -> i64 {
    let shift = attempts.clamp(0, 6) as u32;
    (1_000_i64 << shift).min(60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_backoff_ms(0), 1_000);
        assert_eq!(retry_backoff_ms(1), 2_000);
        assert_eq!(retry_backoff_ms(5), 32_000);
        assert_eq!(retry_backoff_ms(6), 60_000);
        assert_eq!(retry_backoff_ms(60), 60_000);
    }
}
