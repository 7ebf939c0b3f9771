//! Long-poll loops for decision and activity tasks.

mod shutdown;

pub use shutdown::ShutdownManager;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tiller_core::client::{ActivityOps, DecisionOps};
use tiller_core::swf::{
    ActivityTask, DecisionTask, PollForActivityTaskInput, PollForDecisionTaskInput, TaskList,
};

use crate::dispatch::TaskHandler;
use crate::error::Result;

/// Per-poll correlation data carried alongside each received task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollContext {
    /// Fresh id generated for every poll, for correlating log lines across
    /// the poll, dispatch, and response of one task.
    pub request_id: Uuid,
}

impl PollContext {
    fn new() -> Self {
        PollContext {
            request_id: Uuid::new_v4(),
        }
    }
}

/// Decides whether the accumulated pages of a decision task are enough to
/// tick on, bounding history scans on long workflows.
pub type TaskReadyFn = Arc<dyn Fn(&DecisionTask) -> bool + Send + Sync>;

/// Polls a task list for decision tasks, paginating history until the
/// caller's readiness predicate is satisfied.
pub struct DecisionTaskPoller {
    client: Arc<dyn DecisionOps>,
    pub domain: String,
    pub identity: String,
    pub task_list: String,
}

impl DecisionTaskPoller {
    pub fn new(
        client: Arc<dyn DecisionOps>,
        domain: impl Into<String>,
        identity: impl Into<String>,
        task_list: impl Into<String>,
    ) -> Self {
        DecisionTaskPoller {
            client,
            domain: domain.into(),
            identity: identity.into(),
            task_list: task_list.into(),
        }
    }

    /// Poll once. Returns `Ok(None)` when the long poll came back empty.
    /// History pages are fetched (newest first) and accumulated until
    /// `task_ready` is satisfied or pages run out.
    pub async fn poll(&self, task_ready: &TaskReadyFn) -> Result<Option<(PollContext, DecisionTask)>> {
        let ctx = PollContext::new();
        let mut accumulated: Option<DecisionTask> = None;
        let mut next_page_token: Option<String> = None;
        let mut page = 0u32;

        loop {
            page += 1;
            let input = PollForDecisionTaskInput {
                domain: self.domain.clone(),
                task_list: TaskList::new(&self.task_list),
                identity: (!self.identity.is_empty()).then(|| self.identity.clone()),
                maximum_page_size: None,
                next_page_token: next_page_token.clone(),
                reverse_order: true,
            };

            let out = self.client.poll_for_decision_task(input).await?;
            debug!(
                poll_id = %ctx.request_id,
                task_list = %self.task_list,
                page,
                previous_started_event_id = out.previous_started_event_id,
                started_event_id = out.started_event_id,
                events = out.events.len(),
                "decision task page"
            );

            next_page_token = out.next_page_token.clone();
            match accumulated {
                None => {
                    if out.task_token.is_none() {
                        debug!(poll_id = %ctx.request_id, task_list = %self.task_list, "empty poll response");
                        return Ok(None);
                    }
                    accumulated = Some(out);
                }
                Some(ref mut task) => task.events.extend(out.events),
            }

            if let Some(task) = accumulated.as_ref() {
                if task_ready(task) || next_page_token.is_none() {
                    break;
                }
            }
        }

        let Some(task) = accumulated else {
            return Ok(None);
        };
        info!(
            poll_id = %ctx.request_id,
            task_list = %self.task_list,
            workflow_id = task
                .workflow_execution
                .as_ref()
                .map(|e| e.workflow_id.as_str())
                .unwrap_or(""),
            pages = page,
            "decision task received"
        );
        log_task_latency(&task);
        Ok(Some((ctx, task)))
    }

    /// Blocking poll loop: registers with the shutdown manager and keeps
    /// polling until stopped, dispatching every received task to `on_task`.
    /// Poll errors and empty responses are logged and the loop continues.
    pub async fn poll_until_shutdown(
        &self,
        manager: &ShutdownManager,
        poller_name: &str,
        on_task: TaskHandler<DecisionTask>,
        task_ready: TaskReadyFn,
    ) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
        manager.register(poller_name, stop_tx, ack_rx);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!(poller = poller_name, task_list = %self.task_list, "received stop, shutting down");
                    let _ = ack_tx.send(()).await;
                    return;
                }
                polled = self.poll(&task_ready) => {
                    match polled {
                        Err(e) => {
                            warn!(poller = poller_name, task_list = %self.task_list, error = %e, "poll error");
                        }
                        Ok(None) => {
                            debug!(poller = poller_name, task_list = %self.task_list, "no task");
                        }
                        Ok(Some((ctx, task))) => {
                            on_task(ctx, task).await;
                        }
                    }
                }
            }
        }
    }
}

fn log_task_latency(task: &DecisionTask) {
    for event in &task.events {
        if event.event_id == task.started_event_id {
            if let Some(timestamp) = event.event_timestamp {
                let elapsed = Utc::now().signed_duration_since(timestamp);
                debug!(
                    latency_ms = elapsed.num_milliseconds(),
                    workflow = task
                        .workflow_type
                        .as_ref()
                        .map(|t| t.name.as_str())
                        .unwrap_or(""),
                    "decision task latency"
                );
            }
        }
    }
}

/// Polls a task list for activity tasks.
pub struct ActivityTaskPoller {
    client: Arc<dyn ActivityOps>,
    pub domain: String,
    pub identity: String,
    pub task_list: String,
}

impl ActivityTaskPoller {
    pub fn new(
        client: Arc<dyn ActivityOps>,
        domain: impl Into<String>,
        identity: impl Into<String>,
        task_list: impl Into<String>,
    ) -> Self {
        ActivityTaskPoller {
            client,
            domain: domain.into(),
            identity: identity.into(),
            task_list: task_list.into(),
        }
    }

    /// Poll once. Returns `Ok(None)` when the long poll came back empty.
    pub async fn poll(&self) -> Result<Option<(PollContext, ActivityTask)>> {
        let ctx = PollContext::new();
        let task = self
            .client
            .poll_for_activity_task(PollForActivityTaskInput {
                domain: self.domain.clone(),
                task_list: TaskList::new(&self.task_list),
                identity: (!self.identity.is_empty()).then(|| self.identity.clone()),
            })
            .await?;

        if task.task_token.is_none() {
            debug!(poll_id = %ctx.request_id, task_list = %self.task_list, "empty poll response");
            return Ok(None);
        }
        info!(
            poll_id = %ctx.request_id,
            activity = %task.activity_type.name,
            "activity task received"
        );
        Ok(Some((ctx, task)))
    }

    /// Blocking poll loop mirroring
    /// [`DecisionTaskPoller::poll_until_shutdown`].
    pub async fn poll_until_shutdown(
        &self,
        manager: &ShutdownManager,
        poller_name: &str,
        on_task: TaskHandler<ActivityTask>,
    ) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
        manager.register(poller_name, stop_tx, ack_rx);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!(poller = poller_name, task_list = %self.task_list, "received stop, shutting down");
                    let _ = ack_tx.send(()).await;
                    return;
                }
                polled = self.poll() => {
                    match polled {
                        Err(e) => {
                            warn!(poller = poller_name, task_list = %self.task_list, error = %e, "poll error");
                        }
                        Ok(None) => {
                            debug!(poller = poller_name, task_list = %self.task_list, "no task");
                        }
                        Ok(Some((ctx, task))) => {
                            on_task(ctx, task).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tiller_core::error::{CoreError, CoreResult};
    use tiller_core::swf::{
        EventType, HistoryEvent, RespondDecisionTaskCompletedInput, WorkflowExecution,
    };

    struct PagedDecisionClient {
        pages: Mutex<VecDeque<DecisionTask>>,
        polls: Mutex<Vec<PollForDecisionTaskInput>>,
    }

    impl PagedDecisionClient {
        fn new(pages: Vec<DecisionTask>) -> Self {
            PagedDecisionClient {
                pages: Mutex::new(pages.into()),
                polls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DecisionOps for PagedDecisionClient {
        async fn poll_for_decision_task(
            &self,
            input: PollForDecisionTaskInput,
        ) -> CoreResult<DecisionTask> {
            self.polls.lock().push(input);
            self.pages
                .lock()
                .pop_front()
                .ok_or_else(|| CoreError::Other("no more pages".to_string()))
        }

        async fn respond_decision_task_completed(
            &self,
            _input: RespondDecisionTaskCompletedInput,
        ) -> CoreResult<()> {
            Ok(())
        }
    }

    fn page(token: Option<&str>, task_token: Option<&str>, event_ids: &[i64]) -> DecisionTask {
        DecisionTask {
            task_token: task_token.map(|s| s.to_string()),
            workflow_execution: Some(WorkflowExecution {
                workflow_id: "wf-1".to_string(),
                run_id: None,
            }),
            previous_started_event_id: 0,
            started_event_id: event_ids.first().copied().unwrap_or(0),
            events: event_ids
                .iter()
                .map(|id| HistoryEvent::new(*id, EventType::TimerFired))
                .collect(),
            next_page_token: token.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_empty_response() {
        let client = Arc::new(PagedDecisionClient::new(vec![DecisionTask::default()]));
        let poller = DecisionTaskPoller::new(client, "domain", "worker-1", "deciders");

        let ready: TaskReadyFn = Arc::new(|_| true);
        let polled = poller.poll(&ready).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn test_poll_accumulates_pages_until_ready() {
        let client = Arc::new(PagedDecisionClient::new(vec![
            page(Some("page2"), Some("token"), &[9, 8, 7]),
            page(Some("page3"), Some("token"), &[6, 5, 4]),
            page(None, Some("token"), &[3, 2, 1]),
        ]));
        let poller = DecisionTaskPoller::new(client.clone(), "domain", "", "deciders");

        // ready once we have seen 5 events
        let ready: TaskReadyFn = Arc::new(|task| task.events.len() >= 5);
        let (_ctx, task) = poller.poll(&ready).await.unwrap().unwrap();

        assert_eq!(task.events.len(), 6);
        assert_eq!(task.events[0].event_id, 9);
        assert_eq!(task.events[5].event_id, 4);

        let polls = client.polls.lock();
        assert_eq!(polls.len(), 2);
        assert!(polls[0].reverse_order);
        assert!(polls[0].next_page_token.is_none());
        assert_eq!(polls[1].next_page_token.as_deref(), Some("page2"));
        // empty identity stays off the wire
        assert!(polls[0].identity.is_none());
    }

    #[tokio::test]
    async fn test_poll_stops_at_last_page() {
        let client = Arc::new(PagedDecisionClient::new(vec![page(
            None,
            Some("token"),
            &[3, 2, 1],
        )]));
        let poller = DecisionTaskPoller::new(client, "domain", "", "deciders");

        // never "ready": pagination still terminates at the last page
        let ready: TaskReadyFn = Arc::new(|_| false);
        let (_ctx, task) = poller.poll(&ready).await.unwrap().unwrap();
        assert_eq!(task.events.len(), 3);
    }

    #[tokio::test]
    async fn test_poll_until_shutdown_stops_and_acks() {
        // client that always errors; the loop should keep spinning on errors
        // until stopped
        struct ErrClient;
        #[async_trait]
        impl DecisionOps for ErrClient {
            async fn poll_for_decision_task(
                &self,
                _input: PollForDecisionTaskInput,
            ) -> CoreResult<DecisionTask> {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Err(CoreError::Network {
                    message: "poll failed".to_string(),
                    retryable: true,
                })
            }
            async fn respond_decision_task_completed(
                &self,
                _input: RespondDecisionTaskCompletedInput,
            ) -> CoreResult<()> {
                Ok(())
            }
        }

        let poller = Arc::new(DecisionTaskPoller::new(
            Arc::new(ErrClient),
            "domain",
            "",
            "deciders",
        ));
        let manager = Arc::new(ShutdownManager::new());

        let loop_manager = manager.clone();
        let loop_poller = poller.clone();
        let handle = tokio::spawn(async move {
            let on_task: TaskHandler<DecisionTask> =
                Arc::new(|_ctx, _task| Box::pin(async move {}));
            let ready: TaskReadyFn = Arc::new(|_| true);
            loop_poller
                .poll_until_shutdown(&loop_manager, "test-poller", on_task, ready)
                .await;
        });

        // give the loop a moment to register, then stop it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), manager.stop_pollers())
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
