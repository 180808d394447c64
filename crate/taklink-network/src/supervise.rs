use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Run one I/O operation under optional supervision.
///
/// Cancellation wins over the deadline when both fire; the operation is
/// dropped either way, which closes any half-finished I/O it owned.
pub(crate) async fn supervised<T, F>(
    token: Option<&CancellationToken>,
    deadline: Option<Duration>,
    op: F,
) -> Result<T, ClientError>
where
    F: Future<Output = io::Result<T>>,
{
    let bounded = async {
        match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, op).await {
                Ok(result) => result.map_err(ClientError::from),
                Err(_) => Err(ClientError::Timeout),
            },
            None => op.await.map_err(ClientError::from),
        }
    };
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(ClientError::Cancelled),
            result = bounded => result,
        },
        None => bounded.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let result = supervised(None, None, async { Ok(42) }).await;
        assert_eq!(42, result.unwrap());
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout() {
        let result: Result<(), _> = supervised(None, Some(Duration::from_millis(20)), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_operation() {
        let token = CancellationToken::new();
        let aborter = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.cancel();
        });
        let result: Result<(), _> = supervised(Some(&token), None, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_wins_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), _> = supervised(
            Some(&token),
            Some(Duration::from_secs(60)),
            async { Ok(()) },
        )
        .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn io_errors_are_converted() {
        let result: Result<(), _> = supervised(None, None, async {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        })
        .await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
