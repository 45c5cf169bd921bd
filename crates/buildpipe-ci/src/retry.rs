//! Retry with exponential backoff, for use *inside* a step's command.
//!
//! The runner itself never retries. A flaky step (a download, say) wraps its
//! real command in `buildpipe retry --attempts N -- <cmd...>`, which calls
//! into [`RetryPolicy::run_command`].

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Attempts and backoff for a retried command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub attempts: u32,

    /// Delay before the second attempt; doubles after each further failure.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

/// Result of a retried command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Attempts made (1 = succeeded or gave up without retrying).
    pub attempts: u32,

    /// Exit code of the last attempt, if it produced one.
    pub exit_code: Option<i32>,

    /// Error from the last attempt when it produced no exit code.
    pub error: Option<String>,
}

impl RetryOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base_ms: u64) -> Result<Self> {
        if attempts == 0 {
            return Err(PipelineError::config("retry attempts must be >= 1"));
        }
        Ok(Self {
            attempts,
            backoff_base_ms,
        })
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Call `attempt_fn` until it yields exit code 0 or attempts run out.
    ///
    /// `attempt_fn` receives the 1-based attempt number and returns an exit
    /// code, or an error message when no exit code could be obtained.
    pub async fn retry<F, Fut>(&self, mut attempt_fn: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<i32, String>>,
    {
        let max_attempts = self.attempts.max(1);
        let mut outcome = RetryOutcome {
            attempts: 0,
            exit_code: None,
            error: None,
        };

        for attempt in 1..=max_attempts {
            outcome.attempts = attempt;
            match attempt_fn(attempt).await {
                Ok(0) => {
                    outcome.exit_code = Some(0);
                    outcome.error = None;
                    return outcome;
                }
                Ok(code) => {
                    outcome.exit_code = Some(code);
                    outcome.error = None;
                    warn!(attempt, max_attempts, exit_code = code, "Attempt failed");
                }
                Err(e) => {
                    outcome.exit_code = None;
                    warn!(attempt, max_attempts, error = %e, "Attempt failed");
                    outcome.error = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = self.delay_after(attempt);
                info!(delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }

        outcome
    }

    /// Run `argv` with inherited stdio, retrying on non-zero exit.
    pub async fn run_command(&self, argv: &[String]) -> Result<RetryOutcome> {
        let (exe, args) = argv
            .split_first()
            .ok_or_else(|| PipelineError::config("retry needs a command to run"))?;

        Ok(self
            .retry(|_| async move {
                let status = Command::new(exe)
                    .args(args)
                    .stdin(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| format!("failed to spawn '{}': {}", exe, e))?;
                Ok(status.code().unwrap_or(-1))
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, 1).unwrap()
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(RetryPolicy::new(0, 100).is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, 500).unwrap();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let outcome = fast(3).retry(|_| async { Ok(0) }).await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let counter = Arc::new(AtomicU32::new(0));
        let outcome = fast(3)
            .retry(|_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok(1)
                    } else {
                        Ok(0)
                    }
                }
            })
            .await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let outcome = fast(2).retry(|_| async { Ok(7) }).await;
        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.exit_code, Some(7));
    }

    #[tokio::test]
    async fn test_errors_are_retried_and_reported() {
        let outcome = fast(2)
            .retry(|attempt| async move { Err(format!("connection reset on attempt {}", attempt)) })
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.error.unwrap().contains("attempt 2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_exit_code() {
        let outcome = fast(2)
            .run_command(&["false".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.exit_code, Some(1));

        let outcome = fast(2).run_command(&["true".to_string()]).await.unwrap();
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_run_command_requires_argv() {
        assert!(fast(1).run_command(&[]).await.is_err());
    }
}
