//! Bounded retry around one model invocation attempt.
//!
//! Retryable kinds are absorbed up to `max_retries` with exponential backoff;
//! terminal kinds and aborts propagate at once. The abort token is raced
//! against both the attempt and every backoff sleep, so `stop()` always wins.

use crate::config::RetryConfig;
use crate::error::AgentError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Callbacks fired while [`RetryPolicy::run`] works.
pub trait RetryObserver: Send {
    /// Before retry number `attempt` (1-based) of `max_attempts`.
    fn on_retry(
        &mut self,
        attempt: u32,
        max_attempts: u32,
        error: &AgentError,
    ) -> impl Future<Output = ()> + Send;

    /// After every failed attempt, including the last one.
    fn on_error(&mut self, error: &AgentError, will_retry: bool) -> impl Future<Output = ()> + Send;
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RetryObserver for NoopObserver {
    async fn on_retry(&mut self, _attempt: u32, _max_attempts: u32, _error: &AgentError) {}

    async fn on_error(&mut self, _error: &AgentError, _will_retry: bool) {}
}

#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Run `attempt_fn` until it succeeds, fails terminally, or the retry
    /// budget is spent. `attempt_fn` receives the 0-based attempt number.
    ///
    /// # Errors
    /// - [`AgentError::UserAborted`] as soon as `cancel` fires
    /// - the first non-retryable error
    /// - the last error once `max_retries` retries have failed
    pub async fn run<T, F, Fut, O>(
        &self,
        mut attempt_fn: F,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<T, AgentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
        O: RetryObserver,
    {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::UserAborted);
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(AgentError::UserAborted),
                result = attempt_fn(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(AgentError::UserAborted) => return Err(AgentError::UserAborted),
                Err(_) if cancel.is_cancelled() => return Err(AgentError::UserAborted),
                Err(error) => error,
            };

            let will_retry = error.is_retryable() && attempt < max_retries;
            observer.on_error(&error, will_retry).await;
            if !will_retry {
                if error.is_retryable() {
                    log::error!("Giving up after {max_retries} retries: {error}");
                } else {
                    log::error!("Terminal error, not retrying: {error}");
                }
                return Err(error);
            }

            attempt += 1;
            let delay = calculate_backoff_delay(attempt, &self.config);
            log::warn!(
                "Attempt failed, retrying after backoff (attempt={attempt}/{max_retries}, delay_ms={}, error={error})",
                delay.as_millis()
            );
            observer.on_retry(attempt, max_retries, &error).await;

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::UserAborted),
                () = sleep(delay) => {}
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) + jitter`, capped
/// at the maximum delay. Jitter is below `min(base, 1000)` milliseconds.
pub(crate) fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    let base_delay = config.base_delay_ms.saturating_mul(factor);

    let max_jitter = config.base_delay_ms.min(1000);
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        retries: Vec<(u32, u32)>,
        errors: Vec<(ErrorKind, bool)>,
    }

    impl RetryObserver for Recorder {
        async fn on_retry(&mut self, attempt: u32, max_attempts: u32, _error: &AgentError) {
            self.retries.push((attempt, max_attempts));
        }

        async fn on_error(&mut self, error: &AgentError, will_retry: bool) {
            self.errors.push((error.kind(), will_retry));
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::fast().with_max_retries(max_retries))
    }

    #[tokio::test]
    async fn succeeds_after_retryable_failures() {
        let mut recorder = Recorder::default();
        let result = policy(3)
            .run(
                |attempt| async move {
                    if attempt < 2 {
                        Err(AgentError::no_tool_call("text only"))
                    } else {
                        Ok(attempt)
                    }
                },
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(recorder.retries, vec![(1, 3), (2, 3)]);
        assert_eq!(
            recorder.errors,
            vec![(ErrorKind::NoToolCall, true), (ErrorKind::NoToolCall, true)]
        );
    }

    #[tokio::test]
    async fn terminal_errors_do_not_consume_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut recorder = Recorder::default();
        let counter = calls.clone();
        let result: Result<(), _> = policy(3)
            .run(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(AgentError::Auth("bad key".into())) }
                },
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.retries.is_empty());
        assert_eq!(recorder.errors, vec![(ErrorKind::Auth, false)]);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let mut recorder = Recorder::default();
        let result: Result<(), _> = policy(2)
            .run(
                |attempt| async move { Err(AgentError::Server(format!("502 #{attempt}"))) },
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.to_string().contains("#2"));
        assert_eq!(recorder.retries.len(), 2);
        assert_eq!(recorder.errors.last(), Some(&(ErrorKind::Server, false)));
    }

    #[tokio::test]
    async fn zero_retries_runs_once() {
        let mut recorder = Recorder::default();
        let result: Result<(), _> = policy(0)
            .run(
                |_| async { Err(AgentError::Network("reset".into())) },
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(recorder.errors, vec![(ErrorKind::Network, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_wins_over_backoff() {
        let slow = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = slow
            .run(
                |_| async { Err(AgentError::RateLimit("slow down".into())) },
                &mut NoopObserver,
                &cancel,
            )
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UserAborted);
    }

    #[tokio::test]
    async fn abort_interrupts_in_flight_attempt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result: Result<(), _> = policy(3)
            .run(
                move |_| {
                    trigger.cancel();
                    std::future::pending()
                },
                &mut NoopObserver,
                &cancel,
            )
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UserAborted);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        let first = calculate_backoff_delay(1, &config).as_millis();
        let third = calculate_backoff_delay(3, &config).as_millis();
        assert!((100..200).contains(&first));
        assert!((400..500).contains(&third));
        assert_eq!(calculate_backoff_delay(80, &config).as_millis(), 1_000);
    }
}
