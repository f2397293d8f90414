//! Execution context threaded through every engine and storage call.
//!
//! An [`ExecCtx`] carries:
//!
//! - the open transaction handle, if any, plus the correlation id the executor
//!   generated when it opened it,
//! - callbacks to run once the outermost transaction commits,
//! - the caller's deadline.
//!
//! Storage implementations look at [`ExecCtx::transaction`] to decide whether a
//! statement joins the open transaction or runs on its own pooled connection. The
//! transactional executor looks at the same handle to decide whether to begin a
//! new transaction or join the current one.
//!
//! # Example
//!
//! ```
//! use stockroom_core::context::ExecCtx;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx: ExecCtx<()> = ExecCtx::with_timeout(Duration::from_secs(5));
//! assert!(!ctx.in_transaction());
//! assert!(ctx.deadline().is_some());
//! # }
//! ```

use crate::error::InventoryError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Callback run after the outermost commit.
pub type CommitHook = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
struct TxScope<T> {
    handle: T,
    correlation_id: Uuid,
    hooks: Arc<Mutex<Vec<CommitHook>>>,
}

/// Per-call execution context, generic over the store's transaction handle.
#[derive(Clone)]
pub struct ExecCtx<T> {
    scope: Option<TxScope<T>>,
    deadline: Option<Instant>,
}

impl<T: Clone> ExecCtx<T> {
    /// Context with no transaction and no deadline.
    #[must_use]
    pub const fn background() -> Self {
        Self {
            scope: None,
            deadline: None,
        }
    }

    /// Context with no transaction that expires at `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            scope: None,
            deadline: Some(deadline),
        }
    }

    /// Context with no transaction that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// The caller's deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The open transaction, if this context is inside one.
    #[must_use]
    pub fn transaction(&self) -> Option<&T> {
        self.scope.as_ref().map(|scope| &scope.handle)
    }

    /// `true` when a transaction handle is bound.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// Correlation id of the open transaction.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.scope.as_ref().map(|scope| scope.correlation_id)
    }

    /// Bind a freshly opened transaction.
    ///
    /// Returns a child context carrying `handle`, a new correlation id and an empty
    /// commit-hook list; the deadline is inherited. Only the executor that opened
    /// `handle` should call this.
    #[must_use]
    pub fn enter_transaction(&self, handle: T) -> Self {
        Self {
            scope: Some(TxScope {
                handle,
                correlation_id: Uuid::new_v4(),
                hooks: Arc::new(Mutex::new(Vec::new())),
            }),
            deadline: self.deadline,
        }
    }

    /// Run `hook` once the outermost transaction commits.
    ///
    /// Outside a transaction there is nothing to wait for and the hook runs
    /// immediately. Hooks of a rolled back transaction are dropped unrun.
    pub fn on_commit<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.scope {
            Some(scope) => scope
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Box::new(hook)),
            None => hook(),
        }
    }

    /// Run and clear every registered commit hook, in registration order.
    ///
    /// Called by the executor right after the outermost commit succeeded.
    pub fn run_commit_hooks(&self) {
        let Some(scope) = &self.scope else {
            return;
        };
        let hooks = std::mem::take(
            &mut *scope
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }
    }

    /// Drop every registered commit hook without running it.
    pub fn discard_commit_hooks(&self) {
        if let Some(scope) = &self.scope {
            scope
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Await `fut`, failing with [`InventoryError::Timeout`] once the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Timeout`] on expiry, otherwise whatever `fut` returns.
    pub async fn bounded<F, R>(&self, fut: F) -> Result<R, InventoryError>
    where
        F: Future<Output = Result<R, InventoryError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| InventoryError::Timeout)?,
            None => fut.await,
        }
    }
}

impl<T: Clone> Default for ExecCtx<T> {
    fn default() -> Self {
        Self::background()
    }
}

impl<T> fmt::Debug for ExecCtx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCtx")
            .field(
                "correlation_id",
                &self.scope.as_ref().map(|scope| scope.correlation_id),
            )
            .field("deadline", &self.deadline)
            .finish()
    }
}
