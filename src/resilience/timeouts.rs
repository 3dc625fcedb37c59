//! Timeout enforcement.
//!
//! Wraps storage calls with a fixed deadline using Tokio's timer. An expired
//! deadline is its own error variant so it is never mistaken for `NotFound`.

use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::store::StoreError;

/// Run `operation`, failing with [`StoreError::Timeout`] if it takes longer than `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline = ?deadline, "Storage operation exceeded deadline");
            Err(StoreError::Timeout(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_result_through() {
        let ok = with_deadline(Duration::from_secs(1), async { Ok::<_, StoreError>(5) }).await;
        assert_eq!(ok, Ok(5));

        let err = with_deadline(Duration::from_secs(1), async {
            Err::<(), _>(StoreError::NotFound)
        })
        .await;
        assert_eq!(err, Err(StoreError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let deadline = Duration::from_millis(50);
        let result = with_deadline(deadline, async {
            time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        })
        .await;
        assert_eq!(result, Err(StoreError::Timeout(deadline)));
    }
}
