use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Runs `fut` to completion unless `cancel` fires first. A token that is already cancelled wins
/// even if `fut` would complete immediately.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Key under which a case-insensitive name is stored.
pub(crate) fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub(crate) fn require_feature_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ArgumentValidation(
            "feature name must not be empty".to_string(),
        ));
    }
    Ok(())
}
