//! Timeout helper.

use std::future::Future;
use std::time::Duration;

/// Marker produced when a bounded wait runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

/// Wrap a fallible future with a timeout, folding expiry into the
/// caller's own error type.
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<Elapsed>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::from(Elapsed(duration))),
    }
}
