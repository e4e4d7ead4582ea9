//! Download Retry Logic
//!
//! Retries transient failures with exponential backoff. After attempt `k`
//! (1-based) fails, the next attempt starts no earlier than
//! `base_delay * 2^k`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::DownloadError;
use crate::config::DownloadSettings;

/// HTTP statuses worth retrying
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Backoff unit
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
        }
    }
}

/// Delay after the given (1-based) attempt failed
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    policy.base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Check if an error is retryable
pub fn is_retryable_error(error: &DownloadError) -> bool {
    match error {
        DownloadError::Status { status, .. } => is_transient_status(*status),
        DownloadError::Timeout(_) => true,
        DownloadError::Request(e) => e.is_timeout(),
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires (checked before each attempt and during
/// backoff).
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable_error(&error) {
            warn!("{} failed with non-retryable error: {}", label, error);
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!("{} failed after {} attempts: {}", label, attempt, error);
            return Err(error);
        }

        let delay = calculate_backoff(attempt, policy);
        info!(
            "{} attempt {}/{} failed, retrying in {:?}: {}",
            label, attempt, max_attempts, delay, error
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                info!("{} cancelled during backoff", label);
                return Err(DownloadError::Cancelled);
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn status(code: u16) -> DownloadError {
        DownloadError::Status {
            status: code,
            url: "http://example.invalid".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(calculate_backoff(1, &policy), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, &policy), Duration::from_secs(4));
        assert_eq!(calculate_backoff(4, &policy), Duration::from_secs(16));
    }

    #[test]
    fn test_classification() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable_error(&status(code)), "{}", code);
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!is_retryable_error(&status(code)), "{}", code);
        }
        assert!(is_retryable_error(&DownloadError::Timeout("u".into())));
        assert!(!is_retryable_error(&DownloadError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();

        let result = with_retry("test", &policy, &CancellationToken::new(), |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(status(503))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s after attempt 1, 4s after attempt 2
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> =
            with_retry("test", &RetryPolicy::default(), &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(status(429))
                }
            })
            .await;

        assert!(matches!(result, Err(DownloadError::Status { status: 429, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> =
            with_retry("test", &RetryPolicy::default(), &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(status(404))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = with_retry("test", &RetryPolicy::default(), &cancel, |_| async {
            Err(status(503))
        })
        .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }
}
