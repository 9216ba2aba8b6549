//! Bounded retries with randomized backoff around a single remote call.
//!
//! Every remote call is retried blindly: creating a folder twice on a retry after a lost
//! response is accepted as a possible side effect.

use std::future::Future;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::remote::StoreError;

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    /// Attempts (including the first one) before giving up
    pub max_attempts: u32,
    /// Base of the randomized delay between attempts
    pub base_delay: std::time::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            base_delay: std::time::Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{what}: giving up after {attempts} attempt(s): {last:#}")]
    Exhausted {
        what: String,
        attempts: u32,
        #[source]
        last: StoreError,
    },
    #[error("{what}: cancelled")]
    Cancelled { what: String },
}

/// Delay before the next attempt: `base` scaled by a random factor in `[1, 2)`.
#[must_use]
pub fn backoff(base: std::time::Duration) -> std::time::Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
    base.mul_f64(factor)
}

/// Runs `op` until it succeeds, `settings.max_attempts` is reached or `cancel` fires.
///
/// Cancellation is only observed between attempts: a call that is already running is allowed to
/// finish.
pub async fn invoke<T, F, Fut>(
    settings: &Settings,
    cancel: &CancellationToken,
    prog_track: &crate::progress::Progress,
    what: &str,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        let result = {
            let _ops_guard = prog_track.ops.guard();
            op().await
        };
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= settings.max_attempts {
            return Err(Error::Exhausted {
                what: what.to_string(),
                attempts: attempt,
                last: error,
            });
        }
        tracing::warn!(
            "{}: attempt {}/{} failed: {:#}",
            what,
            attempt,
            settings.max_attempts,
            &error
        );
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                what: what.to_string(),
            });
        }
        let delay = backoff(settings.base_delay);
        tracing::debug!("{}: retrying in {:?}", what, delay);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { what: what.to_string() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        prog_track.retries.inc();
        attempt += 1;
    }
}
