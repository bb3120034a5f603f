//! Deadline for a single outbound call
//!
//! The breaker only sees one error type, so an expired deadline is folded into
//! the same `Result` as the call's own failure and counts as a failure too.
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("timed out after {0:?}")]
    Elapsed(Duration),
    #[error("{0}")]
    Inner(E),
}

impl TimeoutConfig {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Await `call`, failing with [`TimeoutError::Elapsed`] once the deadline passes.
    pub async fn run<F, T, E>(self, call: F) -> Result<T, TimeoutError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match timeout(self.duration, call).await {
            Ok(result) => result.map_err(TimeoutError::Inner),
            Err(_) => Err(TimeoutError::Elapsed(self.duration)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inner_error_keeps_its_type() {
        #[derive(Debug, PartialEq)]
        struct Rejected(u16);

        let deadline = TimeoutConfig::new(Duration::from_secs(1));
        let result: Result<(), _> = deadline.run(async { Err(Rejected(502)) }).await;

        match result {
            Err(TimeoutError::Inner(inner)) => assert_eq!(inner, Rejected(502)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_call_reports_deadline() {
        let deadline = TimeoutConfig::new(Duration::from_millis(10));
        let result = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, TimeoutError::Elapsed(d) if d == Duration::from_millis(10)));
        assert_eq!(err.to_string(), "timed out after 10ms");
    }
}
