//! Tools for limiting the number of concurrent CPU-bound external processes.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Limits the number of `pdftocairo` and `tesseract` processes running at once.
///
/// Both tools will happily use 100% of a CPU core each, and an OCR engine
/// with several CJK models loaded uses a fair amount of memory, so we never
/// want more of them than we have cores. Cloning shares the same limit.
#[derive(Clone, Debug)]
pub struct ProcessLimiter {
    semaphore: Arc<Semaphore>,
}

impl ProcessLimiter {
    /// Create a limiter allowing `max_processes` concurrent processes. A limit
    /// of zero is treated as one.
    pub fn new(max_processes: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_processes.max(1))),
        }
    }

    /// Call an async function while holding a permit.
    #[instrument(level = "trace", skip_all)]
    pub async fn run<Func, Fut, R>(&self, f: Func) -> Result<R>
    where
        Func: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let permit = self
            .semaphore
            .acquire()
            .await
            .context("could not acquire process permit")?;
        let result = f().await;
        drop(permit);
        Ok(result)
    }

    /// How many permits are currently free?
    #[cfg(test)]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
