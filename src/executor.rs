//! The executor contract and the bundled executors.
//!
//! Executors pull ready tasks from a [`TaskQueue`] and drive them; each
//! completed task reports newly ready tasks to feed back in. A `None` in
//! the queue is the terminal sentinel. Any type satisfying one of the two
//! traits can replace the bundled executors, including ones that schedule
//! independent tasks in parallel; the queue discipline already guarantees
//! each task is handed out exactly once.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::ExecutionError;
use crate::task::TaskQueue;

/// Drives a queue of synchronous tasks.
pub trait SyncExecutor: Send + Sync {
    /// Drains the queue, invoking each task and re-feeding newly ready
    /// tasks. Must refuse async tasks with
    /// [`ExecutionError::KindMismatch`].
    fn execute_sync(&self, queue: TaskQueue) -> Result<(), ExecutionError>;
}

/// Drives a queue that may contain suspendable tasks.
#[async_trait]
pub trait AsyncExecutor: Send + Sync {
    /// Drains the queue, awaiting async tasks. Implementations may advance
    /// independent tasks concurrently, but must await every in-flight task
    /// before returning, even on error.
    async fn execute_async(&self, queue: TaskQueue) -> Result<(), ExecutionError>;
}

/// Processes tasks one at a time, in queue order.
///
/// The executor a container uses when none is configured. Implements both
/// contracts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

impl SyncExecutor for DefaultExecutor {
    fn execute_sync(&self, mut queue: TaskQueue) -> Result<(), ExecutionError> {
        while let Some(item) = queue.pop_front() {
            let Some(task) = item else {
                return Ok(());
            };
            if task.is_async() {
                return Err(ExecutionError::KindMismatch(format!(
                    "provider {} is async and cannot run on a synchronous executor",
                    task.provider()
                )));
            }
            queue.extend(task.run_sync()?);
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncExecutor for DefaultExecutor {
    async fn execute_async(&self, mut queue: TaskQueue) -> Result<(), ExecutionError> {
        while let Some(item) = queue.pop_front() {
            let Some(task) = item else {
                return Ok(());
            };
            queue.extend(task.run().await?);
        }
        Ok(())
    }
}

/// Advances independent ready tasks concurrently.
///
/// Tasks with no ordering constraint between them make progress together;
/// the engine's write-once result slots and counter discipline make that
/// safe without further coordination. On the first failure no further tasks
/// are dispatched, but everything already in flight is awaited before the
/// error is returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentExecutor;

#[async_trait]
impl AsyncExecutor for ConcurrentExecutor {
    async fn execute_async(&self, mut queue: TaskQueue) -> Result<(), ExecutionError> {
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<ExecutionError> = None;

        loop {
            while let Some(item) = queue.pop_front() {
                if let Some(task) = item {
                    if failure.is_none() {
                        in_flight.push(async move { task.run().await });
                    }
                }
                // The sentinel needs no action here: once it has been
                // emitted, nothing remains in flight after this drain.
            }
            match in_flight.next().await {
                Some(Ok(newly)) => queue.extend(newly),
                Some(Err(error)) => {
                    failure.get_or_insert(error);
                }
                None => break,
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn empty_queue_completes() {
        let queue: TaskQueue = VecDeque::new();
        DefaultExecutor.execute_sync(queue).unwrap();
    }
}
