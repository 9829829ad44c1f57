//! Caller-supplied cancellation/deadline context (§ Concurrency & Resource
//! Model: "every blocking API takes a context … cancellation aborts the
//! wait and returns the context error").
//!
//! Every `Engine`/`EventBus` operation that can block — `Start`, `Stop`,
//! `Publish`, `Subscribe`, `Unsubscribe`, and the `Handler` callback itself —
//! takes one of these as its first parameter, mirroring a `context.Context`
//! deadline/cancel pair with a `tokio_util::sync::CancellationToken` doing
//! the cancellation half.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A cancellation token plus an optional deadline, threaded through every
/// operation that can block or wait on shared state.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl Context {
    /// A context that never cancels and never times out. Used by call
    /// sites that have no caller-supplied context to thread through (e.g.
    /// internal test helpers).
    pub fn none() -> Self {
        Self { cancel: CancellationToken::new(), deadline: None }
    }

    /// Build a context from a caller-owned cancellation token, with no
    /// deadline.
    pub fn from_token(cancel: CancellationToken) -> Self {
        Self { cancel, deadline: None }
    }

    /// Attach a deadline to this context, returning the modified value.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set `default` as this context's deadline only if it doesn't already
    /// carry one. Used by implementations that need a bounded wait even
    /// when the caller didn't specify a deadline.
    pub fn or_deadline(mut self, default: Duration) -> Self {
        if self.deadline.is_none() {
            self.deadline = Some(default);
        }
        self
    }

    /// The underlying cancellation token, for call sites that need to pass
    /// it to a `tokio::select!` directly (e.g. `DurableQueue::push`).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether this context has already been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Derive a child context: cancelling the parent cancels the child too,
    /// and the deadline carries forward unchanged.
    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), deadline: self.deadline }
    }

    /// Await `fut`, racing it against cancellation and the deadline (if
    /// any). Returns [`ContextError`] for whichever fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: std::future::Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                    _ = tokio::time::sleep(deadline) => Err(ContextError::DeadlineExceeded),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::none()
    }
}

/// Error returned when a context-bounded wait is cancelled or exceeds its
/// deadline before the underlying operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context's cancellation token fired before completion.
    #[error("operation was cancelled")]
    Cancelled,
    /// The context's deadline elapsed before completion.
    #[error("operation exceeded its deadline")]
    DeadlineExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn run_returns_output_when_uncontested() {
        let ctx = Context::none();
        let result = ctx.run(async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn run_returns_cancelled_when_token_fires_first() {
        let ctx = Context::none();
        ctx.cancel_token().cancel();
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn run_returns_deadline_exceeded_when_deadline_elapses_first() {
        let ctx = Context::none().with_deadline(StdDuration::from_millis(5));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn or_deadline_does_not_override_an_existing_deadline() {
        let ctx = Context::none().with_deadline(StdDuration::from_secs(1)).or_deadline(StdDuration::from_secs(99));
        assert_eq!(ctx.deadline, Some(StdDuration::from_secs(1)));
    }

    #[test]
    fn child_context_is_cancelled_when_parent_is() {
        let parent = Context::none();
        let child = parent.child();
        parent.cancel_token().cancel();
        assert!(child.is_cancelled());
    }
}
