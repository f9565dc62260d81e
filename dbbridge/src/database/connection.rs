//! Scoped connection acquisition
//!
//! Every capability call opens its own handle from the request credentials,
//! runs one unit of work with it and releases it again, whatever the outcome.

use crate::config::PluginConfig;
use crate::database::traits::PluginError;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Opens and releases engine handles
#[async_trait]
pub trait Connector: Send + Sync {
    /// A live connection, session or client
    type Handle: Clone + Send + Sync + 'static;

    /// Establish a handle from the request credentials
    async fn open(&self, config: &PluginConfig) -> Result<Self::Handle, PluginError>;

    /// Tear a handle down; must not fail
    async fn release(&self, handle: Self::Handle);
}

async fn with_deadline<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T, PluginError>>,
) -> Result<T, PluginError> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| PluginError::Timeout)?,
        None => future.await,
    }
}

/// Run `work` with a freshly opened handle and release it afterwards
///
/// The handle is released exactly once on success, on error and when the work
/// panics (the panic is resumed after release). The request timeout bounds
/// both acquisition and the work itself.
pub async fn with_connection<C, T, F, Fut>(connector: &C, config: &PluginConfig, work: F) -> Result<T, PluginError>
where
    C: Connector + ?Sized,
    F: FnOnce(C::Handle) -> Fut + Send,
    Fut: Future<Output = Result<T, PluginError>> + Send,
    T: Send,
{
    let handle = with_deadline(config.timeout(), connector.open(config)).await?;

    let outcome = AssertUnwindSafe(with_deadline(config.timeout(), work(handle.clone())))
        .catch_unwind()
        .await;

    connector.release(handle).await;

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct SpyConnector {
        opened: AtomicUsize,
        released: AtomicUsize,
        refuse: bool,
    }

    #[async_trait]
    impl Connector for SpyConnector {
        type Handle = usize;

        async fn open(&self, _config: &PluginConfig) -> Result<usize, PluginError> {
            if self.refuse {
                return Err(PluginError::Connection("refused".to_string()));
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn release(&self, _handle: usize) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> PluginConfig {
        PluginConfig::new(Credentials::new("Sqlite3", "", "", "", ":memory:"))
    }

    #[tokio::test]
    async fn test_handle_released_after_success() {
        let connector = SpyConnector::default();

        let value = with_connection(&connector, &config(), |handle| async move { Ok(handle * 10) })
            .await
            .unwrap();

        assert_eq!(value, 10);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_released_after_error() {
        let connector = SpyConnector::default();

        let result: Result<(), _> = with_connection(&connector, &config(), |_| async {
            Err(PluginError::Query("syntax error".to_string()))
        })
        .await;

        assert!(matches!(result, Err(PluginError::Query(_))));
        assert_eq!(connector.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_released_after_panic() {
        let connector = Arc::new(SpyConnector::default());
        let task_connector = Arc::clone(&connector);

        let joined = tokio::spawn(async move {
            let _: Result<(), PluginError> = with_connection(task_connector.as_ref(), &config(), |handle| async move {
                if handle > 0 {
                    panic!("work failed");
                }
                Ok(())
            })
            .await;
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_releases_nothing() {
        let connector = SpyConnector {
            refuse: true,
            ..Default::default()
        };

        let result: Result<(), _> = with_connection(&connector, &config(), |_| async { Ok(()) }).await;

        assert!(matches!(result, Err(PluginError::Connection(_))));
        assert_eq!(connector.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_bounds_the_work() {
        let connector = SpyConnector::default();
        let config = config().with_timeout(Duration::from_millis(20));

        let result: Result<(), _> = with_connection(&connector, &config, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PluginError::Timeout)));
        assert_eq!(connector.released.load(Ordering::SeqCst), 1);
    }
}
