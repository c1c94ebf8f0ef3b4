//! One-shot transfer sessions.
//!
//! Every file operation opens its own connection, runs, and releases the
//! connection on every exit path, including cancellation of the caller.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::ConnectionProfile;
use crate::error::Result;
use crate::transport::{TransferClient, TransferConnector};

/// Runs `op` against a freshly opened transfer client and always closes it.
///
/// Errors from opening and from `op` are reported as transfer failures,
/// except connect failures which keep their category.
pub async fn with_transfer_session<F, T, Op, Fut>(
    connector: &F,
    profile: &ConnectionProfile,
    op: Op,
) -> Result<T>
where
    F: TransferConnector,
    Op: FnOnce(Arc<F::Client>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let client = connector
        .open(profile)
        .await
        .map(Arc::new)
        .map_err(|e| e.into_transfer())?;
    debug!("Transfer session opened for {}", profile.host_port());

    let mut guard = TransferGuard {
        client: Some(Arc::clone(&client)),
    };
    let result = op(client).await;
    guard.release().await;

    result.map_err(|e| e.into_transfer())
}

/// Closes the client when dropped without an explicit release.
struct TransferGuard<C: TransferClient> {
    client: Option<Arc<C>>,
}

impl<C: TransferClient> TransferGuard<C> {
    async fn release(&mut self) {
        if let Some(client) = self.client.take() {
            client.close().await;
            debug!("Transfer session closed");
        }
    }
}

impl<C: TransferClient> Drop for TransferGuard<C> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                debug!("Transfer cancelled, closing connection in background");
                runtime.spawn(async move { client.close().await });
            }
            Err(_) => warn!("Transfer dropped outside a runtime; connection left to the OS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::{AppError, ErrorKind};
    use crate::filesystem::RemoteEntry;
    use crate::testing::{MockTransferConnector, profile};

    #[tokio::test]
    async fn test_closes_after_success() {
        let connector =
            MockTransferConnector::with_listing(vec![RemoteEntry::new("a", "-", 1, 0)]);
        let entries = with_transfer_session(&connector, &profile("h"), |client| async move {
            client.list_dir("/").await
        })
        .await
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_closes_after_failure() {
        let connector = MockTransferConnector::default();
        connector.fail_operations();
        let err = with_transfer_session(&connector, &profile("h"), |client| async move {
            client.read_file("/etc/hosts").await
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_local_io_failure_is_a_transfer_error() {
        let connector = MockTransferConnector::default();
        let err = with_transfer_session(&connector, &profile("h"), |client| async move {
            client
                .upload(std::path::Path::new("/nonexistent/sshmux/file"), "/tmp/x")
                .await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Transfer(_)));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_closes_when_cancelled() {
        let connector = MockTransferConnector::default();
        connector.set_op_delay(Duration::from_secs(10));

        let target = profile("h");
        let pending = with_transfer_session(&connector, &target, |client| async move {
            client.list_dir("/").await
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_keeps_connect_kind() {
        let connector = MockTransferConnector::default();
        connector.fail_open();
        let err = with_transfer_session(&connector, &profile("h"), |client| async move {
            client.list_dir("/").await
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(connector.closes(), 0);
    }
}
