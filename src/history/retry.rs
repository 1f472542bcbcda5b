use std::thread;
use std::time::Duration;

use rand::Rng as _;
use rusqlite::ErrorCode;

/// Attempts made before giving up on a busy database.
pub const MAX_ATTEMPTS: u32 = 10;

/// Upper bound (exclusive) of the per-attempt jitter unit.
const JITTER_CEILING_MS: u64 = 100;

/// How a failed storage mutation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Another connection holds the write lock.
    Busy,
    /// The row already exists (unique or primary-key constraint).
    Duplicate,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// The mutation's effect is already present; report success.
    Suppress,
    Fail,
}

/// Retry policy for storage mutations.
///
/// `attempt` is the zero-based index of the attempt that just failed and
/// `jitter` a random unit in `[0, 100ms)`; a busy failure waits
/// `attempt * jitter` so the first retry is immediate and later ones spread
/// out. The `MAX_ATTEMPTS`-th busy failure is final.
pub fn decide(attempt: u32, kind: FailureKind, jitter: Duration) -> RetryDecision {
    match kind {
        FailureKind::Duplicate => RetryDecision::Suppress,
        FailureKind::Other => RetryDecision::Fail,
        FailureKind::Busy if attempt + 1 >= MAX_ATTEMPTS => RetryDecision::Fail,
        FailureKind::Busy => RetryDecision::RetryAfter(jitter * attempt),
    }
}

/// Map a rusqlite error onto the retry policy's failure kinds.
pub fn classify(err: &rusqlite::Error) -> FailureKind {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => FailureKind::Busy,
            ErrorCode::ConstraintViolation
                if matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
            {
                FailureKind::Duplicate
            }
            _ => FailureKind::Other,
        },
        _ => FailureKind::Other,
    }
}

/// Returned when the database stayed busy for every attempt.
#[derive(Debug)]
pub struct RetriesExhaustedError {
    pub attempts: u32,
    pub last: rusqlite::Error,
}

impl std::fmt::Display for RetriesExhaustedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to execute DB mutation even with {} attempts: {}",
            self.attempts, self.last
        )
    }
}

impl std::error::Error for RetriesExhaustedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

/// Run a storage mutation under the retry policy.
///
/// Busy/locked failures are retried with linear jittered backoff; a unique
/// constraint failure means an earlier delivery already wrote the row and is
/// reported as success with zero affected rows. Any other failure is returned
/// immediately.
///
/// # Errors
///
/// Returns [`RetriesExhaustedError`] when the database stays busy, or the
/// underlying error (with context) when it is not retryable.
pub fn retrying_mutate<F>(mut mutation: F) -> anyhow::Result<usize>
where
    F: FnMut() -> rusqlite::Result<usize>,
{
    let mut attempt = 0u32;
    loop {
        let err = match mutation() {
            Ok(affected) => return Ok(affected),
            Err(e) => e,
        };
        let kind = classify(&err);
        match decide(attempt, kind, jitter()) {
            RetryDecision::Suppress => {
                tracing::debug!("duplicate write absorbed: {err}");
                return Ok(0);
            }
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(
                    "database busy, retrying in {}ms (attempt {}/{MAX_ATTEMPTS})",
                    delay.as_millis(),
                    attempt + 1
                );
                thread::sleep(delay);
                attempt += 1;
            }
            RetryDecision::Fail if kind == FailureKind::Busy => {
                tracing::warn!("database still busy after {MAX_ATTEMPTS} attempts");
                return Err(RetriesExhaustedError {
                    attempts: attempt + 1,
                    last: err,
                }
                .into());
            }
            RetryDecision::Fail => {
                return Err(anyhow::Error::new(err).context("unrecoverable sqlite error"));
            }
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_CEILING_MS))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sqlite_err(code: std::ffi::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    fn busy() -> rusqlite::Error {
        sqlite_err(rusqlite::ffi::SQLITE_BUSY)
    }

    #[test]
    fn decide_duplicate_is_suppressed() {
        assert_eq!(
            decide(0, FailureKind::Duplicate, Duration::from_millis(5)),
            RetryDecision::Suppress
        );
    }

    #[test]
    fn decide_other_fails_immediately() {
        assert_eq!(
            decide(0, FailureKind::Other, Duration::ZERO),
            RetryDecision::Fail
        );
    }

    #[test]
    fn decide_busy_backoff_scales_with_attempt() {
        let unit = Duration::from_millis(40);
        assert_eq!(
            decide(0, FailureKind::Busy, unit),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
        assert_eq!(
            decide(3, FailureKind::Busy, unit),
            RetryDecision::RetryAfter(Duration::from_millis(120))
        );
    }

    #[test]
    fn decide_busy_gives_up_on_last_attempt() {
        assert_eq!(
            decide(MAX_ATTEMPTS - 1, FailureKind::Busy, Duration::ZERO),
            RetryDecision::Fail
        );
    }

    #[test]
    fn classify_busy_and_locked() {
        assert_eq!(classify(&busy()), FailureKind::Busy);
        assert_eq!(
            classify(&sqlite_err(rusqlite::ffi::SQLITE_LOCKED)),
            FailureKind::Busy
        );
        assert_eq!(
            classify(&sqlite_err(rusqlite::ffi::SQLITE_BUSY_SNAPSHOT)),
            FailureKind::Busy
        );
    }

    #[test]
    fn classify_unique_constraint_but_not_other_constraints() {
        assert_eq!(
            classify(&sqlite_err(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)),
            FailureKind::Duplicate
        );
        assert_eq!(
            classify(&sqlite_err(rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL)),
            FailureKind::Other
        );
        assert_eq!(
            classify(&rusqlite::Error::QueryReturnedNoRows),
            FailureKind::Other
        );
    }

    #[test]
    fn succeeds_after_three_busy_attempts() {
        let calls = Cell::new(0u32);
        let result = retrying_mutate(|| {
            calls.set(calls.get() + 1);
            if calls.get() <= 3 {
                return Err(busy());
            }
            Ok(1)
        });
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn unique_violation_on_first_attempt_is_success() {
        let calls = Cell::new(0u32);
        let result = retrying_mutate(|| {
            calls.set(calls.get() + 1);
            Err(sqlite_err(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE))
        });
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result = retrying_mutate(|| {
            calls.set(calls.get() + 1);
            Err(sqlite_err(rusqlite::ffi::SQLITE_CORRUPT))
        });
        let err = result.unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(
            format!("{err:#}").contains("unrecoverable sqlite error"),
            "{err:#}"
        );
    }

    #[test]
    fn persistent_busy_exhausts_retries() {
        let calls = Cell::new(0u32);
        let result = retrying_mutate(|| {
            calls.set(calls.get() + 1);
            Err(busy())
        });
        let err = result.unwrap_err();
        assert_eq!(calls.get(), MAX_ATTEMPTS);
        let exhausted = err.downcast_ref::<RetriesExhaustedError>().unwrap();
        assert_eq!(exhausted.attempts, MAX_ATTEMPTS);
    }
}
