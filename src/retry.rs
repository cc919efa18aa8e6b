use std::{fmt, future::Future, time::Duration};

use tokio::time;
use tracing::debug;

use crate::error::{Error, TransportError};

/// Outcome of one failed attempt inside [`RetryPolicy::run`].
#[derive(Debug)]
pub(crate) enum CallError {
    /// The request itself failed; another attempt may succeed.
    Transport(TransportError),
    /// A nested call already spent its own retries; surfaced as-is.
    Fatal(Error),
}

impl CallError {
    /// Normalize into the caller-facing error, choosing the variant for
    /// transport failures.
    pub(crate) fn into_error(self, normalize: fn(TransportError) -> Error) -> Error {
        match self {
            CallError::Transport(e) => normalize(e),
            CallError::Fatal(e) => e,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        CallError::Transport(e)
    }
}

impl From<Error> for CallError {
    fn from(e: Error) -> Self {
        CallError::Fatal(e)
    }
}

/// Retry budget and per-request timeout applied to every SensorPush call.
///
/// The SensorPush cloud fails intermittently, so attempts are repeated
/// immediately, without backoff, before an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Deadline for each individual request.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: crate::client::REQUEST_RETRIES,
            timeout: crate::client::REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Bound a single request by [`RetryPolicy::timeout`]. Elapsing counts as a
    /// transport failure.
    pub(crate) async fn timed<T, F>(&self, request: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    /// Run `attempt` until it succeeds or the budget is spent.
    ///
    /// `args` is logged with every attempt. `on_failure` runs after every
    /// transport failure, before the next attempt. A [`CallError::Fatal`] ends
    /// the loop at once.
    pub(crate) async fn run<T, A, AFut, F, FFut>(
        &self,
        operation: &'static str,
        args: &(dyn fmt::Debug + Sync),
        mut attempt: A,
        mut on_failure: F,
    ) -> Result<T, CallError>
    where
        A: FnMut() -> AFut,
        AFut: Future<Output = Result<T, CallError>>,
        F: FnMut() -> FFut,
        FFut: Future<Output = ()>,
    {
        let mut retries: u32 = 0;
        loop {
            debug!(operation, args = ?args, attempt = retries + 1, "API call attempt");
            match attempt().await {
                Ok(value) => {
                    debug!(operation, args = ?args, retries, "API call succeeded after {retries} retries");
                    return Ok(value);
                }
                Err(CallError::Transport(e)) => {
                    on_failure().await;

                    if retries < self.retries {
                        retries += 1;
                        debug!(operation, args = ?args, retries, error = %e, "API call failed, retrying");
                        continue;
                    }

                    debug!(
                        operation,
                        args = ?args,
                        retries,
                        error = %e,
                        "API call failed after {retries} retries"
                    );
                    return Err(CallError::Transport(e));
                }
                Err(fatal) => {
                    debug!(operation, args = ?args, retries, "API call aborted by nested failure");
                    return Err(fatal);
                }
            }
        }
    }
}
