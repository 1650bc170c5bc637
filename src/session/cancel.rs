//! Write-once cancellation with a cause.

use std::pin::pin;
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use super::error::SessionError;

/// Session-wide cancellation token.
///
/// The cause slot is written exactly once; the first writer wins and all
/// later attempts are no-ops. Every blocking session operation races
/// [`CancelToken::cancelled`], so a latched cause wakes all of them.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cause: OnceLock<SessionError>,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `cause` unless one is already set. Returns whether this
    /// call was the winner.
    pub fn cancel(&self, cause: SessionError) -> bool {
        let won = self.inner.cause.set(cause).is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cause.get().is_some()
    }

    /// The latched cause, if any.
    pub fn cause(&self) -> Option<SessionError> {
        self.inner.cause.get().cloned()
    }

    /// Resolves with the latched cause once the token is cancelled.
    pub async fn cancelled(&self) -> SessionError {
        // notify_waiters only reaches registered waiters, so the cause
        // is re-checked after arming the notification.
        let mut notified = pin!(self.inner.notify.notified());
        loop {
            if let Some(cause) = self.inner.cause.get() {
                return cause.clone();
            }
            notified.as_mut().enable();
            if let Some(cause) = self.inner.cause.get() {
                return cause.clone();
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_cause_wins() {
        let token = CancelToken::new();
        assert!(token.cancel(SessionError::Closed));
        assert!(!token.cancel(SessionError::ConnectionFailed));
        assert_eq!(token.cause(), Some(SessionError::Closed));
        assert_eq!(token.cancelled().await, SessionError::Closed);
    }

    #[tokio::test]
    async fn concurrent_cancels_latch_exactly_one() {
        let token = CancelToken::new();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                token.cancel(SessionError::Channel(format!("cause {n}")))
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let cause = token.cause().unwrap();
        assert_eq!(token.cancelled().await, cause);
    }

    #[tokio::test]
    async fn cancelled_wakes_pending_waiters() {
        let token = CancelToken::new();

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });

        tokio::task::yield_now().await;
        token.cancel(SessionError::Done);

        assert_eq!(waiter.await.unwrap(), SessionError::Done);
    }
}
