use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A monotonic deadline: a start instant plus a wall-clock budget.
///
/// One `Deadline` is created per polling operation and never mutated; loops
/// bound themselves by checking `expired()` between attempts, so an operation
/// may overrun its budget by up to one attempt plus one poll interval.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Capture the current instant and start counting down `budget`.
    pub fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Time elapsed since the deadline was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Unspent budget, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    /// True once the budget has been used up.
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }
}

/// Outcome of a single polling attempt, classified at the call site.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The awaited condition holds; polling stops with this value.
    Ready(T),
    /// The condition does not hold yet. Expected during loading; not an error.
    Pending,
    /// An unexpected but likely-transient fault; recorded and retried.
    Retry(Error),
    /// A fault that retrying cannot heal; aborts the poll immediately.
    Fatal(Error),
}

impl<T> Attempt<T> {
    /// Classify an error with the default policy: fatal errors abort, the rest
    /// are retried.
    pub fn from_error(err: Error) -> Self {
        if err.is_fatal() {
            Attempt::Fatal(err)
        } else {
            Attempt::Retry(err)
        }
    }
}

/// Terminal result of a polling loop.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// An attempt produced a value before the deadline.
    Ready(T),
    /// The deadline expired; carries the last transient error seen, if any.
    TimedOut {
        elapsed: Duration,
        last_error: Option<Error>,
    },
    /// An attempt reported a fatal error.
    Aborted(Error),
}

impl<T> PollOutcome<T> {
    /// Convert a timeout into the canonical `Error::Timeout`, for callers that
    /// want a hard error instead of an explicit negative result.
    pub fn into_result(self, condition: impl Into<String>) -> Result<T> {
        match self {
            PollOutcome::Ready(value) => Ok(value),
            PollOutcome::TimedOut { elapsed, .. } => Err(Error::Timeout {
                condition: condition.into(),
                elapsed,
            }),
            PollOutcome::Aborted(err) => Err(err),
        }
    }
}

/// Repeatedly run `attempt` until it yields `Ready` or the budget expires,
/// sleeping `interval` between attempts.
///
/// The attempt function always runs at least once, even with a zero budget, so
/// a caller can request a single best-effort probe. The deadline is checked
/// only between attempts; see `Deadline` for the overrun bound.
pub async fn poll<T, F, Fut>(budget: Duration, interval: Duration, mut attempt: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = Deadline::start(budget);
    let mut last_error = None;

    loop {
        match attempt().await {
            Attempt::Ready(value) => return PollOutcome::Ready(value),
            Attempt::Pending => {}
            Attempt::Retry(err) => last_error = Some(err),
            Attempt::Fatal(err) => return PollOutcome::Aborted(err),
        }

        if deadline.expired() {
            return PollOutcome::TimedOut {
                elapsed: deadline.elapsed(),
                last_error,
            };
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn deadline_zero_budget_expires_immediately() {
        let deadline = Deadline::start(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn deadline_tracks_elapsed_and_remaining() {
        let deadline = Deadline::start(Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        assert!(deadline.elapsed() >= Duration::from_millis(20));
        assert!(deadline.remaining() < Duration::from_secs(60));
        assert!(!deadline.expired());
    }

    #[test]
    fn from_error_classifies_by_fatality() {
        assert!(matches!(
            Attempt::<()>::from_error(Error::SessionClosed),
            Attempt::Fatal(Error::SessionClosed)
        ));
        assert!(matches!(
            Attempt::<()>::from_error(Error::Driver("node detached".into())),
            Attempt::Retry(Error::Driver(_))
        ));
    }

    #[tokio::test]
    async fn poll_returns_ready_from_first_attempt() {
        let outcome = poll(Duration::from_secs(5), Duration::from_millis(10), || async {
            Attempt::Ready(42)
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Ready(42)));
    }

    #[tokio::test]
    async fn poll_zero_budget_makes_one_attempt() {
        let attempts = Cell::new(0u32);
        let counter = &attempts;
        let outcome: PollOutcome<()> = poll(Duration::ZERO, Duration::from_millis(10), || async move {
            counter.set(counter.get() + 1);
            Attempt::Pending
        })
        .await;
        assert_eq!(attempts.get(), 1);
        assert!(matches!(
            outcome,
            PollOutcome::TimedOut { last_error: None, .. }
        ));
    }

    #[tokio::test]
    async fn poll_retries_until_ready() {
        let attempts = Cell::new(0u32);
        let counter = &attempts;
        let outcome = poll(Duration::from_secs(5), Duration::from_millis(5), || async move {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                Attempt::Ready("done")
            } else {
                Attempt::Pending
            }
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Ready("done")));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn poll_fatal_aborts_without_retry() {
        let attempts = Cell::new(0u32);
        let counter = &attempts;
        let outcome: PollOutcome<()> =
            poll(Duration::from_secs(5), Duration::from_millis(5), || async move {
                counter.set(counter.get() + 1);
                Attempt::Fatal(Error::SessionClosed)
            })
            .await;
        assert_eq!(attempts.get(), 1);
        assert!(matches!(outcome, PollOutcome::Aborted(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn poll_timeout_carries_last_transient_error() {
        let outcome: PollOutcome<()> =
            poll(Duration::from_millis(30), Duration::from_millis(5), || async {
                Attempt::Retry(Error::Driver("node detached".into()))
            })
            .await;
        match outcome {
            PollOutcome::TimedOut { last_error, .. } => {
                assert!(matches!(last_error, Some(Error::Driver(msg)) if msg == "node detached"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_stays_within_one_interval_of_budget() {
        let budget = Duration::from_millis(100);
        let interval = Duration::from_millis(20);
        let started = Instant::now();
        let outcome: PollOutcome<()> = poll(budget, interval, || async { Attempt::Pending }).await;
        let elapsed = started.elapsed();
        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
        assert!(elapsed >= budget, "returned early: {elapsed:?}");
        // generous slack for scheduler jitter
        assert!(elapsed < budget + interval + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn into_result_maps_timeout_to_canonical_error() {
        let outcome: PollOutcome<()> =
            poll(Duration::ZERO, Duration::from_millis(5), || async { Attempt::Pending }).await;
        let err = outcome.into_result("selector css=.missing").unwrap_err();
        match err {
            Error::Timeout { condition, .. } => assert_eq!(condition, "selector css=.missing"),
            other => panic!("expected timeout error, got {other:?}"),
        }
    }
}
