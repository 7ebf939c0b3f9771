//! Concurrency policies for handling polled tasks.
//!
//! The poll loop is single-threaded by construction; dispatchers decide how
//! much parallelism task handling gets beyond that: inline on the poll loop,
//! one spawned task per item, a fixed worker pool over a queue, or per-task
//! spawns with a drain-aware stop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::debug;

use crate::poller::PollContext;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked for each polled task.
pub type TaskHandler<TaskT> = Arc<dyn Fn(PollContext, TaskT) -> BoxFuture + Send + Sync>;

/// Routes a received task to its handler under some concurrency policy.
#[async_trait]
pub trait TaskDispatcher<TaskT: Send + 'static>: Send + Sync {
    async fn dispatch_task(&self, ctx: PollContext, task: TaskT, handler: TaskHandler<TaskT>);

    /// Wait for in-flight tasks where the policy tracks them; default no-op.
    async fn stop(&self) {}
}

/// Runs the handler synchronously on the poll loop. Backpressure for free:
/// the next poll does not start until handling finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

#[async_trait]
impl<TaskT: Send + 'static> TaskDispatcher<TaskT> for InlineDispatcher {
    async fn dispatch_task(&self, ctx: PollContext, task: TaskT, handler: TaskHandler<TaskT>) {
        handler(ctx, task).await;
    }
}

/// Spawns one tokio task per polled task.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnedTaskDispatcher;

#[async_trait]
impl<TaskT: Send + 'static> TaskDispatcher<TaskT> for SpawnedTaskDispatcher {
    async fn dispatch_task(&self, ctx: PollContext, task: TaskT, handler: TaskHandler<TaskT>) {
        tokio::spawn(handler(ctx, task));
    }
}

/// A fixed number of workers consuming an unbounded queue.
///
/// Workers are started lazily on the first dispatch. Dispatch is only ever
/// called from the single poll loop, so the lazy start never races with
/// itself; the mutex is there for the `&self` signature, not for contention.
pub struct BoundedPoolDispatcher<TaskT> {
    workers: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<(PollContext, TaskT)>>>,
}

impl<TaskT: Send + 'static> BoundedPoolDispatcher<TaskT> {
    pub fn new(workers: usize) -> Self {
        BoundedPoolDispatcher {
            workers: workers.max(1),
            sender: Mutex::new(None),
        }
    }

    fn start_workers(&self, handler: TaskHandler<TaskT>) -> mpsc::UnboundedSender<(PollContext, TaskT)> {
        let (tx, rx) = mpsc::unbounded_channel::<(PollContext, TaskT)>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..self.workers {
            let rx = rx.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                debug!(worker, "pool worker started");
                loop {
                    let received = { rx.lock().await.recv().await };
                    match received {
                        Some((ctx, task)) => handler(ctx, task).await,
                        None => {
                            debug!(worker, "pool worker stopping, queue closed");
                            return;
                        }
                    }
                }
            });
        }
        tx
    }
}

#[async_trait]
impl<TaskT: Send + 'static> TaskDispatcher<TaskT> for BoundedPoolDispatcher<TaskT> {
    async fn dispatch_task(&self, ctx: PollContext, task: TaskT, handler: TaskHandler<TaskT>) {
        let sender = {
            let mut guard = self.sender.lock();
            guard
                .get_or_insert_with(|| self.start_workers(handler))
                .clone()
        };
        // receivers only drop when the dispatcher does, so this cannot fail
        // while the pool is alive
        let _ = sender.send((ctx, task));
    }
}

/// Spawns one task per item and counts in-flight work; [`TaskDispatcher::stop`]
/// resolves once everything dispatched has finished.
#[derive(Default)]
pub struct CountdownDispatcher {
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl CountdownDispatcher {
    pub fn new() -> Self {
        CountdownDispatcher::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<TaskT: Send + 'static> TaskDispatcher<TaskT> for CountdownDispatcher {
    async fn dispatch_task(&self, ctx: PollContext, task: TaskT, handler: TaskHandler<TaskT>) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        let drained = self.drained.clone();
        tokio::spawn(async move {
            handler(ctx, task).await;
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }

    async fn stop(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // register before the count check so a drain between the check
            // and the await is not missed
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn poll_ctx() -> PollContext {
        PollContext {
            request_id: Uuid::new_v4(),
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> TaskHandler<u32> {
        Arc::new(move |_ctx, _task| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_inline_dispatcher_runs_synchronously() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = InlineDispatcher;
        dispatcher
            .dispatch_task(poll_ctx(), 1u32, counting_handler(counter.clone()))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_runs_eventually() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = SpawnedTaskDispatcher;
        for task in 0..4u32 {
            dispatcher
                .dispatch_task(poll_ctx(), task, counting_handler(counter.clone()))
                .await;
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bounded_pool_processes_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = BoundedPoolDispatcher::new(2);
        for task in 0..10u32 {
            dispatcher
                .dispatch_task(poll_ctx(), task, counting_handler(counter.clone()))
                .await;
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bounded_pool_zero_workers_uses_one() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = BoundedPoolDispatcher::new(0);
        dispatcher
            .dispatch_task(poll_ctx(), 1u32, counting_handler(counter.clone()))
            .await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_countdown_dispatcher_stop_waits_for_in_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = CountdownDispatcher::new();

        let slow_counter = counter.clone();
        let handler: TaskHandler<u32> = Arc::new(move |_ctx, _task| {
            let counter = slow_counter.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        for task in 0..3u32 {
            dispatcher
                .dispatch_task(poll_ctx(), task, handler.clone())
                .await;
        }
        assert_eq!(dispatcher.in_flight(), 3);

        TaskDispatcher::<u32>::stop(&dispatcher).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
