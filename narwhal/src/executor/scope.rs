use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Cooperative cancellation signal shared by every task of an execution.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

#[derive(Debug)]
struct CancelTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // register before checking the flag so a concurrent cancel is not lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the background work started for an execution.
///
/// Every task spawned through the scope observes its [`CancelToken`];
/// [`join`](Self::join) waits for all of them and
/// [`shutdown`](Self::shutdown) cancels first and waits with a grace period.
#[derive(Clone, Default)]
pub struct ExecutionScope {
    token: CancelToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("cancelled", &self.token.is_cancelled())
            .field("tasks", &self.handles.lock().len())
            .finish()
    }
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Run `task` in the background, tied to this scope.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every task spawned so far, including ones spawned while
    /// waiting.
    pub async fn join(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "execution task failed");
                }
            }
        }
    }

    /// Cancel all tasks and wait up to `grace` for each of them.
    pub async fn shutdown(&self, grace: Duration) {
        self.token.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "execution task failed"),
                Err(_) => tracing::warn!("execution task did not stop within grace period"),
            }
        }
    }
}
