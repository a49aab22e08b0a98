//! Callback pool for asynchronous listener delivery.

use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::error::{Result, RpcError};

/// Executes listener callbacks off the resolving task.
///
/// Owned by the client that created it; concurrency is bounded by a semaphore.
#[derive(Clone)]
pub struct CallbackPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl CallbackPool {
    pub fn new(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Build a pool on the runtime of the calling task.
    pub fn from_current(size: usize) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| RpcError::Config(format!("callback pool needs a tokio runtime: {}", e)))?;
        Ok(Self::new(handle, size))
    }

    /// Run `task` on the pool.
    ///
    /// A closed pool still runs the task, without a concurrency permit.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            task();
        });
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop handing out permits.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl fmt::Debug for CallbackPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPool")
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_execute_runs_task() {
        let pool = CallbackPool::from_current(2).unwrap();
        let (tx, rx) = oneshot::channel();
        pool.execute(move || {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_closed_pool_still_runs() {
        let pool = CallbackPool::from_current(1).unwrap();
        pool.close();
        let (tx, rx) = oneshot::channel();
        pool.execute(move || {
            let _ = tx.send(());
        });
        assert!(rx.await.is_ok());
    }
}
