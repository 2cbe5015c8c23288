//! Cancellable, deadline-bearing execution context for store operations.
//!
//! Every engine call takes an [`OperationContext`]. Backend calls are raced against the
//! context's cancellation signal and deadline; the losing backend future is dropped, which
//! aborts the in-flight request.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why an operation stopped before its backend call completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    /// New state that is cancelled whenever `self` is.
    fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(CancelState::default());
        // The flag is re-checked under the lock so a concurrent `cancel` cannot miss us.
        let mut children = match self.children.lock() {
            Ok(children) => children,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_cancelled() {
            child.cancelled.store(true, Ordering::SeqCst);
        } else {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        child
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Handle that cancels the context it was created with (and every context derived from it).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

/// Execution context for one store operation.
///
/// Cheap to clone. Derived contexts inherit the parent's cancellation and can only narrow
/// its deadline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    deadline: Option<Instant>,
    cancel: Arc<CancelState>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OperationContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: Arc::new(CancelState::default()),
        }
    }

    /// Derive a context that can be cancelled through the returned handle.
    pub fn cancellable(&self) -> (Self, CancelHandle) {
        let state = self.cancel.child();
        let ctx = Self {
            deadline: self.deadline,
            cancel: state.clone(),
        };
        (ctx, CancelHandle { state })
    }

    /// Derive a context that expires `timeout` from now (or at the parent's deadline, if
    /// that comes first).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or its deadline passes
    /// first, in which case `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
