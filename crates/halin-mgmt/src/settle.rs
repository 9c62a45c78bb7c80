//! Partial-failure primitive.
//!
//! Fan-outs in this crate never short-circuit: a failing leg is either
//! replaced by a default ([`settle`]) or kept as its own `Err` next to the
//! successful legs ([`settle_all`]).

use std::fmt::Display;
use std::future::Future;

use futures::future::join_all;
use tracing::warn;

/// Awaits `fut`, substituting `default` on failure.
///
/// The failure is logged with `step` so a degraded field can be traced back.
pub async fn settle<T, E, F>(step: &str, fut: F, default: T) -> T
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match fut.await {
        Ok(value) => value,
        Err(e) => {
            warn!(step, error = %e, "step failed, substituting default");
            default
        }
    }
}

/// Awaits every future concurrently and returns each outcome in input order.
pub async fn settle_all<I, F, T, E>(futures: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures).await
}
