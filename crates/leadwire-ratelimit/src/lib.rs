//! Fixed-window rate limiting decision function.
//!
//! This is the pure, store-independent half of the C5 rate limiter: given
//! the current state of a `(key, count, reset_at)` row and the current
//! time, decide whether the event is admitted and what the row's next
//! state should be. The caller (`leadwired::ratelimit`) is responsible for
//! reading/writing the row against the real store inside a transaction;
//! keeping the decision itself pure makes it exercisable without a
//! database.
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
}

/// Current persisted state of a rate-limit window, as read from the store.
/// `None` means no row exists yet for the key.
#[derive(Debug, Clone, Copy)]
pub struct WindowState {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of evaluating one event against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Event admitted; caller should persist `new_count`/`new_reset_at`.
    Admit,
    /// Event rejected; the window is unchanged.
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub decision: Decision,
    pub new_count: u64,
    pub new_reset_at: DateTime<Utc>,
}

/// Default admission rate: 20 events per rolling-fixed 60s window per
/// tenant (spec.md §4.5).
pub const DEFAULT_LIMIT: u64 = 20;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Evaluate one event against the fixed window described by `existing`
/// (or a fresh window if `None`), per spec.md §4.5:
///
/// - if `now >= reset_at` (or no window yet): reset to `(1, now+window)`,
///   admitted.
/// - else if `count < limit`: increment, admitted.
/// - else: rejected, window unchanged.
pub fn evaluate(
    existing: Option<WindowState>,
    now: DateTime<Utc>,
    limit: u64,
    window: Duration,
) -> Outcome {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(60));

    match existing {
        None => Outcome {
            decision: Decision::Admit,
            new_count: 1,
            new_reset_at: now + window,
        },
        Some(state) if now >= state.reset_at => Outcome {
            decision: Decision::Admit,
            new_count: 1,
            new_reset_at: now + window,
        },
        Some(state) if state.count < limit => Outcome {
            decision: Decision::Admit,
            new_count: state.count + 1,
            new_reset_at: state.reset_at,
        },
        Some(state) => Outcome {
            decision: Decision::Reject,
            new_count: state.count,
            new_reset_at: state.reset_at,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn fresh_key_is_admitted() {
        let out = evaluate(None, t(0), 20, Duration::from_secs(60));
        assert_eq!(out.decision, Decision::Admit);
        assert_eq!(out.new_count, 1);
        assert_eq!(out.new_reset_at, t(60));
    }

    #[test]
    fn increments_within_window_until_limit() {
        let mut state = WindowState {
            count: 1,
            reset_at: t(60),
        };
        for expected in 2..=20 {
            let out = evaluate(Some(state), t(1), 20, Duration::from_secs(60));
            assert_eq!(out.decision, Decision::Admit);
            assert_eq!(out.new_count, expected);
            state.count = out.new_count;
        }
    }

    #[test]
    fn rejects_once_limit_reached() {
        let state = WindowState {
            count: 20,
            reset_at: t(60),
        };
        let out = evaluate(Some(state), t(1), 20, Duration::from_secs(60));
        assert_eq!(out.decision, Decision::Reject);
        assert_eq!(out.new_count, 20);
    }

    #[test]
    fn window_rolls_over_after_reset_at() {
        let state = WindowState {
            count: 20,
            reset_at: t(60),
        };
        let out = evaluate(Some(state), t(61), 20, Duration::from_secs(60));
        assert_eq!(out.decision, Decision::Admit);
        assert_eq!(out.new_count, 1);
        assert_eq!(out.new_reset_at, t(121));
    }
}
