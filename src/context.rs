//! Cancellation and deadlines for blocked callers.
//!
//! An [`AcquireContext`] only matters while a call is waiting for quota under
//! [`Behavior::Block`](crate::Behavior::Block). Fast grants, `Raise` and `Skip` never look at it.
//!
//! Dropping the future returned by [`Limiter::acquire`](crate::Limiter::acquire) is also a
//! valid way to cancel: quota is only consumed at the instant of a successful check, so an
//! abandoned wait leaves every tier untouched.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::AcquireError;
use crate::sleeper::Sleeper;

/// Caller-side cancellation token and optional deadline.
///
/// Clones observe the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct AcquireContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every [`AcquireContext`] created alongside it.
///
/// Dropping the handle without calling [`cancel`](Self::cancel) does not cancel anything.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Wake every waiter on the paired context with [`AcquireError::Cancelled`].
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AcquireContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel: Some(rx), deadline: None }, CancelHandle { tx: Arc::new(tx) })
    }

    /// Give up waiting `timeout` from now. An unrepresentable instant means no deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Give up waiting at `deadline`. The earlier of two deadlines wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error a wait would end with right now, if the context is already done.
    pub fn error(&self) -> Option<AcquireError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(AcquireError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(AcquireError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Sleep for `duration`, unless cancellation or the deadline comes first.
    pub(crate) async fn wait(
        &self,
        sleeper: &dyn Sleeper,
        duration: Duration,
    ) -> Result<(), AcquireError> {
        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            if let Some(rx) = cancel.as_mut() {
                let sender_dropped = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if !sender_dropped {
                    return;
                }
            }
            pending::<()>().await
        };
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(AcquireError::Cancelled),
            _ = expired => Err(AcquireError::DeadlineExceeded),
            _ = sleeper.sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::TokioSleeper;

    #[tokio::test(start_paused = true)]
    async fn background_context_just_sleeps() {
        let ctx = AcquireContext::background();
        let start = Instant::now();
        ctx.wait(&TokioSleeper, Duration::from_millis(250)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(260));
        assert!(!ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_wait() {
        let (ctx, handle) = AcquireContext::cancellable();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.wait(&TokioSleeper, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), Err(AcquireError::Cancelled));
        assert!(handle.is_cancelled());
        assert_eq!(ctx.error(), Some(AcquireError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_wait() {
        let ctx = AcquireContext::background().with_timeout(Duration::from_millis(100));
        let start = Instant::now();
        let result = ctx.wait(&TokioSleeper, Duration::from_secs(5)).await;
        assert_eq!(result, Err(AcquireError::DeadlineExceeded));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(110));
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_cancels() {
        let (ctx, handle) = AcquireContext::cancellable();
        drop(handle);
        ctx.wait(&TokioSleeper, Duration::from_millis(20)).await.unwrap();
        assert!(ctx.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = AcquireContext::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_context_fails_before_sleeping() {
        let (ctx, handle) = AcquireContext::cancellable();
        handle.cancel();
        let start = Instant::now();
        let result = ctx.wait(&TokioSleeper, Duration::from_secs(1)).await;
        assert_eq!(result, Err(AcquireError::Cancelled));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
