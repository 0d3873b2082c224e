//! Caller-supplied deadline and cancellation for network calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppleAuthError, AppleResult};

/// Deadline and cancellation signal carried through every network call.
///
/// The default context never expires and cannot be cancelled; the
/// HTTP client's own timeout still applies.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use xavyo_apple_auth::CallContext;
///
/// let shutdown = CancellationToken::new();
/// let ctx = CallContext::with_timeout(Duration::from_secs(5)).with_cancellation(shutdown.clone());
///
/// let tokens = client.authenticate(code, &ctx).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// A context without deadline or cancellation.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The deadline, if one is set.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the attached token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> AppleResult<()> {
        if self.is_cancelled() {
            return Err(AppleAuthError::Canceled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(AppleAuthError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    ///
    /// The future is dropped as soon as either signal fires, which aborts any
    /// in-flight request.
    pub async fn run<F, T>(&self, fut: F) -> AppleResult<T>
    where
        F: Future<Output = AppleResult<T>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(AppleAuthError::Canceled),
            () = expired => Err(AppleAuthError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
