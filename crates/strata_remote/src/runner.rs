// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A small, bounded pool for background work.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Spawns background tasks up to a fixed concurrency, skipping beyond it.
///
/// Background refresh and scheduled jobs may block on network I/O, so they
/// run gated behind a semaphore rather than unbounded. Work offered while
/// the pool is saturated is dropped, not queued; every user of the runner
/// treats its tasks as best-effort and re-triggerable.
#[derive(Clone, Debug)]
pub struct BackgroundRunner {
    permits: Arc<Semaphore>,
}

impl BackgroundRunner {
    /// Creates a runner allowing at most `capacity` tasks in flight.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Spawns `task` if a slot is free.
    ///
    /// Returns `false` when the pool is saturated and the task was dropped.
    pub fn try_spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    task.await;
                    drop(permit);
                });
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn saturation_drops_instead_of_queueing() {
        let runner = BackgroundRunner::new(1);
        let (release, blocked) = oneshot::channel::<()>();

        assert!(runner.try_spawn(async move {
            let _ = blocked.await;
        }));
        assert!(!runner.try_spawn(async {}));

        release.send(()).expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runner.try_spawn(async {}));
    }
}
