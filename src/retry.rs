//! Bounded retry
//!
//! One abstraction for both retry-with-backoff (data synchronization) and
//! polling-with-timeout (mobile approval, receipt confirmation): an attempt
//! function, a maximum number of attempts, a delay schedule, an optional
//! overall deadline, cooperative cancellation and a give-up action.
//!
//! Delay schedules are [`backoff::backoff::Backoff`] implementations, so the
//! exponential and constant schedules from the `backoff` crate plug in
//! directly.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a single failed attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth trying again
    Transient(E),
    /// Stop immediately
    Permanent(E),
}

/// Why a bounded retry gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed
    Exhausted { attempts: u32, last: E },
    /// An attempt reported a permanent failure
    Permanent { attempts: u32, error: E },
    /// The overall deadline elapsed first
    DeadlineElapsed { attempts: u32 },
    /// Cancelled by the caller
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::DeadlineElapsed { attempts }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Exponential schedule without jitter: `initial`, `2 * initial`, ...
pub fn doubling(initial: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: initial,
        current_interval: initial,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: initial.saturating_mul(64),
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Fixed polling interval
pub fn constant(interval: Duration) -> Constant {
    Constant::new(interval)
}

type RetryHook<'a> = Box<dyn FnMut(u32, Duration) + Send + 'a>;

/// Retry driver
pub struct BoundedRetry<'a, B> {
    schedule: B,
    max_attempts: u32,
    deadline: Option<Duration>,
    cancel: Option<CancellationToken>,
    on_retry: Option<RetryHook<'a>>,
}

impl<'a, B: Backoff + Send> BoundedRetry<'a, B> {
    /// Unbounded attempts with the given schedule; bound it with
    /// [`max_attempts`](Self::max_attempts) or [`deadline`](Self::deadline)
    pub fn new(schedule: B) -> Self {
        Self {
            schedule,
            max_attempts: u32::MAX,
            deadline: None,
            cancel: None,
            on_retry: None,
        }
    }

    /// Total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Retries after the first attempt
    pub fn max_retries(self, retries: u32) -> Self {
        self.max_attempts(retries.saturating_add(1))
    }

    /// Overall time budget, raced against the attempt loop
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Called before each retry with the retry number (1-based) and delay
    pub fn on_retry(mut self, hook: impl FnMut(u32, Duration) + Send + 'a) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Run the attempt function until it succeeds or the retry gives up
    pub async fn run<T, E, F, Fut>(self, attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        self.run_or_else(attempt, |_| {}).await
    }

    /// Like [`run`](Self::run), invoking `give_up` before returning an error
    pub async fn run_or_else<T, E, F, Fut, G>(
        mut self,
        attempt: F,
        give_up: G,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
        G: FnOnce(&RetryError<E>),
    {
        self.schedule.reset();

        let cancel = self.cancel.take().unwrap_or_default();
        let deadline = self.deadline;
        let mut attempts = 0u32;

        let outcome = {
            let looped = self.attempt_loop(attempt, &mut attempts);
            tokio::pin!(looped);

            let bounded = async {
                match deadline {
                    Some(limit) => match tokio::time::timeout(limit, &mut looped).await {
                        Ok(result) => result,
                        Err(_) => Err(None),
                    },
                    None => (&mut looped).await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Some(Interrupt::Cancelled)),
                result = bounded => result.map_err(|e| e.or(Some(Interrupt::Deadline))),
            }
        };

        let result = match outcome {
            Ok(value) => return Ok(value),
            Err(Some(Interrupt::Cancelled)) => RetryError::Cancelled { attempts },
            Err(Some(Interrupt::Deadline)) | Err(None) => RetryError::DeadlineElapsed { attempts },
            Err(Some(Interrupt::Failed(e))) => e,
        };

        give_up(&result);
        Err(result)
    }

    async fn attempt_loop<T, E, F, Fut>(
        &mut self,
        mut attempt: F,
        attempts: &mut u32,
    ) -> Result<T, Option<Interrupt<E>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        loop {
            *attempts += 1;
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Permanent(error)) => {
                    return Err(Some(Interrupt::Failed(RetryError::Permanent {
                        attempts: *attempts,
                        error,
                    })))
                }
                Err(AttemptError::Transient(error)) => error,
            };

            let exhausted = |last| {
                Err(Some(Interrupt::Failed(RetryError::Exhausted {
                    attempts: *attempts,
                    last,
                })))
            };

            if *attempts >= self.max_attempts {
                return exhausted(error);
            }

            let Some(delay) = self.schedule.next_backoff() else {
                return exhausted(error);
            };

            if let Some(hook) = self.on_retry.as_mut() {
                hook(*attempts, delay);
            }
            debug!("Attempt {} failed, retrying in {:?}", attempts, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

enum Interrupt<E> {
    Cancelled,
    Deadline,
    Failed(RetryError<E>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let delays = Mutex::new(Vec::new());
        let started = Instant::now();

        let result: Result<u32, RetryError<&str>> = BoundedRetry::new(doubling(Duration::from_secs(1)))
            .max_retries(3)
            .on_retry(|_, delay| delays.lock().unwrap().push(delay))
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AttemptError::Transient("flaky"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        let delays = delays.into_inner().unwrap();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_secs(1) && delays[0] < Duration::from_millis(1001));
        assert!(delays[1] >= Duration::from_secs(2) && delays[1] < Duration::from_millis(2001));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_retries() {
        let calls = AtomicU32::new(0);
        let gave_up = Arc::new(AtomicU32::new(0));
        let gave_up_hook = gave_up.clone();

        let result: Result<(), RetryError<&str>> = BoundedRetry::new(doubling(Duration::from_secs(1)))
            .max_retries(3)
            .run_or_else(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::Transient("down"))
                },
                |_| {
                    gave_up_hook.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(
            result.unwrap_err(),
            RetryError::Exhausted {
                attempts: 4,
                last: "down"
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(gave_up.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = BoundedRetry::new(constant(Duration::from_secs(1)))
            .max_attempts(10)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Permanent("rejected"))
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result: Result<(), RetryError<()>> = BoundedRetry::new(constant(Duration::from_secs(1)))
            .deadline(Duration::from_secs(30))
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::Transient(()))
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::DeadlineElapsed { .. })));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

        let polled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result: Result<(), RetryError<()>> = BoundedRetry::new(constant(Duration::from_secs(1)))
            .deadline(Duration::from_secs(30))
            .cancel_on(token)
            .run(|| async { Err(AttemptError::Transient(())) })
            .await;

        assert_eq!(result.unwrap_err(), RetryError::Cancelled { attempts: 3 });
    }
}
