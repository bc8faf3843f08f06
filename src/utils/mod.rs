//! Utility modules

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{PiperError, Result};

pub mod auth;
pub mod cache;
pub mod hashing;
pub mod ratelimit;

/// Run `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(PiperError::Cancelled),
    }
}
