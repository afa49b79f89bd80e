//! Deadline for external calls.

use crate::error::ServiceError;
use crate::metrics::Metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Wraps every store, cache and bus call with a timeout and counts
/// transient failures.
#[derive(Clone)]
pub struct IoPolicy {
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl IoPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `fut`, failing with [`ServiceError::Timeout`] if it does not
    /// finish in time.
    pub async fn call<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, E>>,
        ServiceError: From<E>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        };

        if let Err(ref e) = result {
            if e.is_retryable() {
                tracing::debug!("{} failed: {}", operation, e);
                if let Some(ref metrics) = self.metrics {
                    metrics
                        .transient_errors_total
                        .with_label_values(&[operation])
                        .inc();
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statebus_storage::StorageError;

    #[tokio::test]
    async fn test_passes_through() {
        let io = IoPolicy::new(Duration::from_secs(1));
        let value = io
            .call("store get", async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_times_out() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let io = IoPolicy::new(Duration::from_millis(10)).with_metrics(metrics.clone());

        let err = io
            .call("cache get", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Timeout {
                operation: "cache get",
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(
            metrics
                .transient_errors_total
                .with_label_values(&["cache get"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_converts_errors() {
        let io = IoPolicy::new(Duration::from_secs(1));
        let err = io
            .call("cache set", async {
                Err::<(), _>(StorageError::Unavailable("down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
    }
}
