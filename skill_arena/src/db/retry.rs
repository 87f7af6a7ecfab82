//! Bounded retry of atomic units on serialization conflicts.

use crate::config::RetryPolicy;
use crate::tournament::TournamentError;
use crate::wallet::WalletError;
use std::fmt::Display;
use std::future::Future;

/// Errors that can tell a transient conflict from a real failure
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;

    /// Error surfaced once retries are exhausted
    fn conflict() -> Self;
}

impl Retryable for WalletError {
    fn is_retryable(&self) -> bool {
        WalletError::is_retryable(self)
    }

    fn conflict() -> Self {
        WalletError::Conflict
    }
}

impl Retryable for TournamentError {
    fn is_retryable(&self) -> bool {
        TournamentError::is_retryable(self)
    }

    fn conflict() -> Self {
        TournamentError::Conflict
    }
}

/// Run `unit` until it succeeds, fails for a non-transient reason, or the
/// policy runs out of attempts
///
/// # Arguments
///
/// * `policy` - Attempt budget and backoff
/// * `label` - Name of the unit, for logs
/// * `unit` - Produces a fresh attempt each call
///
/// # Errors
///
/// Returns the unit's own error, or `conflict()` after the last retryable failure
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut unit: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match unit().await {
            Err(err) if err.is_retryable() => {
                if attempt >= policy.max_attempts {
                    log::warn!("{label}: giving up after {attempt} conflicting attempts: {err}");
                    return Err(E::conflict());
                }
                log::debug!("{label}: attempt {attempt} conflicted, retrying: {err}");
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            result => return result,
        }
    }
}
