//! The activity worker: polls for activity tasks, runs typed handlers, and
//! responds complete/fail/cancel, with correlator-driven backoff on repeated
//! failures.

mod interceptors;

pub use interceptors::{ActivityInterceptor, ComposedActivityInterceptor, NoopActivityInterceptor};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use tiller_core::client::ActivityOps;
use tiller_core::serializer::{JsonStateSerializer, StateSerializer};
use tiller_core::swf::{
    ActivityTask, GetWorkflowExecutionHistoryInput, RecordActivityTaskHeartbeatInput,
    RespondActivityTaskCanceledInput, RespondActivityTaskCompletedInput,
    RespondActivityTaskFailedInput, SignalWorkflowExecutionInput,
};

use crate::dispatch::{InlineDispatcher, TaskDispatcher, TaskHandler};
use crate::error::{Result, TillerError};
use crate::fsm::correlator::EventCorrelator;
use crate::fsm::models::{
    SerializedActivityState, ACTIVITY_STARTED_SIGNAL, ACTIVITY_UPDATED_SIGNAL, CORRELATOR_MARKER,
};
use crate::poller::{ActivityTaskPoller, PollContext, ShutdownManager};

/// What a handler produced, before response routing: nothing, a raw string
/// passed through untouched, or a value serialized with the worker's
/// serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityResult {
    Empty,
    Text(String),
    Data(serde_json::Value),
}

type BoxedActivityFuture = Pin<Box<dyn Future<Output = Result<ActivityResult>> + Send>>;

/// The type-erased execution function of a registered handler. Receives the
/// task, its raw input, and the worker's serializer for input decoding.
pub type BoxedActivityFn = Box<
    dyn Fn(ActivityTask, Option<String>, Arc<dyn StateSerializer>) -> BoxedActivityFuture
        + Send
        + Sync,
>;

/// A registered handler for one activity type name.
pub struct ActivityHandler {
    pub activity: String,
    execute_fn: BoxedActivityFn,
}

impl ActivityHandler {
    /// Typed handler: the task input is deserialized into `I`, the output is
    /// serialized with the worker's serializer. A handler returning `()` (or
    /// any output serializing to null) completes the task with no result.
    pub fn new<I, O, F, Fut>(activity: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(ActivityTask, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let execute_fn: BoxedActivityFn = Box::new(move |task, input, serializer| {
            let handler = handler.clone();
            Box::pin(async move {
                let typed: I = match input.as_deref() {
                    Some(raw) => serializer
                        .as_ref()
                        .deserialize(raw)
                        .map_err(|e| TillerError::ActivityFailed(format!("deserialize: {}", e)))?,
                    None => serde_json::from_value(serde_json::Value::Null)
                        .map_err(|e| TillerError::ActivityFailed(format!("deserialize: {}", e)))?,
                };
                let output = handler(task, typed).await?;
                let value = serde_json::to_value(output)
                    .map_err(|e| TillerError::ActivityFailed(format!("serialize: {}", e)))?;
                Ok(if value.is_null() {
                    ActivityResult::Empty
                } else {
                    ActivityResult::Data(value)
                })
            })
        });
        ActivityHandler {
            activity: activity.into(),
            execute_fn,
        }
    }

    /// Raw handler: receives the task input string untouched and classifies
    /// its own result.
    pub fn new_raw<F, Fut>(activity: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActivityTask, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActivityResult>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let execute_fn: BoxedActivityFn = Box::new(move |task, input, _serializer| {
            let handler = handler.clone();
            Box::pin(async move { handler(task, input).await })
        });
        ActivityHandler {
            activity: activity.into(),
            execute_fn,
        }
    }

    fn execute(
        &self,
        task: ActivityTask,
        input: Option<String>,
        serializer: Arc<dyn StateSerializer>,
    ) -> BoxedActivityFuture {
        (self.execute_fn)(task, input, serializer)
    }
}

impl std::fmt::Debug for ActivityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityHandler")
            .field("activity", &self.activity)
            .finish()
    }
}

/// Polls for activity tasks and executes registered handlers.
pub struct ActivityWorker {
    pub domain: String,
    pub task_list: String,
    pub identity: String,
    client: Arc<dyn ActivityOps>,
    serializer: Arc<dyn StateSerializer>,
    system_serializer: Arc<dyn StateSerializer>,
    handlers: RwLock<HashMap<String, Arc<ActivityHandler>>>,
    interceptor: Arc<dyn ActivityInterceptor>,
    dispatcher: Arc<dyn TaskDispatcher<ActivityTask>>,
    shutdown_manager: Arc<ShutdownManager>,
    allow_panics: bool,
    backoff_on_failure: bool,
    max_backoff_seconds: u64,
}

impl ActivityWorker {
    pub fn new(
        domain: impl Into<String>,
        task_list: impl Into<String>,
        client: Arc<dyn ActivityOps>,
    ) -> Self {
        ActivityWorker {
            domain: domain.into(),
            task_list: task_list.into(),
            identity: String::new(),
            client,
            serializer: Arc::new(JsonStateSerializer),
            system_serializer: Arc::new(JsonStateSerializer),
            handlers: RwLock::new(HashMap::new()),
            interceptor: Arc::new(NoopActivityInterceptor),
            dispatcher: Arc::new(InlineDispatcher),
            shutdown_manager: Arc::new(ShutdownManager::new()),
            allow_panics: false,
            backoff_on_failure: false,
            max_backoff_seconds: 0,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_system_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.system_serializer = serializer;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn ActivityInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher<ActivityTask>>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_shutdown_manager(mut self, manager: Arc<ShutdownManager>) -> Self {
        self.shutdown_manager = manager;
        self
    }

    /// Let handler panics propagate instead of converting them to failure
    /// responses. For tests.
    pub fn with_allow_panics(mut self, allow: bool) -> Self {
        self.allow_panics = allow;
        self
    }

    /// Sleep `min(2^(attempts-1), max_backoff_seconds)` seconds before
    /// responding failed, using the attempt count from the workflow's latest
    /// correlator marker.
    pub fn with_backoff_on_failure(mut self, max_backoff_seconds: u64) -> Self {
        self.backoff_on_failure = true;
        self.max_backoff_seconds = max_backoff_seconds;
        self
    }

    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        self.shutdown_manager.clone()
    }

    pub fn add_handler(&self, handler: ActivityHandler) {
        self.handlers
            .write()
            .insert(handler.activity.clone(), Arc::new(handler));
    }

    /// Handle one polled activity task end to end.
    pub async fn handle_activity_task(&self, task: ActivityTask) {
        self.interceptor.before_task(&task);

        let handler = self.handlers.read().get(&task.activity_type.name).cloned();
        let Some(handler) = handler else {
            let err = TillerError::NoActivityHandler(task.activity_type.name.clone());
            self.interceptor.after_task_failed(&task, &err);
            self.fail(&task, &err).await;
            return;
        };

        let result = self.execute(&handler, &task).await;
        let result = self.interceptor.after_task(&task, result);

        match result {
            Err(TillerError::ActivityCanceled { details }) => {
                self.interceptor.after_task_canceled(&task, details.as_deref());
                self.canceled(&task, details).await;
            }
            Err(err) => {
                self.interceptor.after_task_failed(&task, &err);
                self.fail(&task, &err).await;
            }
            Ok(result) => {
                self.interceptor.after_task_complete(&task, &result);
                self.complete(&task, result).await;
            }
        }
    }

    async fn execute(&self, handler: &ActivityHandler, task: &ActivityTask) -> Result<ActivityResult> {
        let fut = handler.execute(task.clone(), task.input.clone(), self.serializer.clone());
        if self.allow_panics {
            return fut.await;
        }
        // run under a separate task so a panicking handler surfaces as a
        // join error instead of unwinding through the worker
        match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let details = crate::error::panic_details(join_error.into_panic().as_ref());
                warn!(activity = %task.activity_type.name, details = %details, "recovered activity panic");
                Err(TillerError::ActivityFailed(format!(
                    "panic in activity: {}",
                    details
                )))
            }
            Err(_) => Err(TillerError::ActivityFailed(
                "activity task aborted".to_string(),
            )),
        }
    }

    async fn complete(&self, task: &ActivityTask, result: ActivityResult) {
        let payload = match result {
            ActivityResult::Empty => None,
            ActivityResult::Text(text) => Some(text),
            ActivityResult::Data(value) => {
                match self.serializer.serialize_value(&value) {
                    Ok(serialized) => Some(serialized),
                    Err(e) => {
                        self.fail(task, &TillerError::StateSerialization(e)).await;
                        return;
                    }
                }
            }
        };

        debug!(
            workflow_id = workflow_id(task),
            activity = %task.activity_type.name,
            activity_id = %task.activity_id,
            "activity done"
        );
        let Some(task_token) = task.task_token.clone() else { return };
        if let Err(e) = self
            .client
            .respond_activity_task_completed(RespondActivityTaskCompletedInput {
                task_token,
                result: payload,
            })
            .await
        {
            warn!(activity_id = %task.activity_id, error = %e, "completed response failed");
        }
    }

    async fn fail(&self, task: &ActivityTask, error: &TillerError) {
        if self.backoff_on_failure {
            self.backoff_for_attempts(task).await;
        }

        warn!(
            workflow_id = workflow_id(task),
            activity = %task.activity_type.name,
            activity_id = %task.activity_id,
            error = %error,
            "activity failed"
        );
        let Some(task_token) = task.task_token.clone() else { return };
        if let Err(e) = self
            .client
            .respond_activity_task_failed(RespondActivityTaskFailedInput {
                task_token,
                reason: Some(error.to_string()),
                details: Some(error.to_string()),
            })
            .await
        {
            warn!(activity_id = %task.activity_id, error = %e, "failed response failed");
        }
    }

    async fn canceled(&self, task: &ActivityTask, details: Option<String>) {
        info!(
            workflow_id = workflow_id(task),
            activity = %task.activity_type.name,
            activity_id = %task.activity_id,
            "activity canceled"
        );
        let Some(task_token) = task.task_token.clone() else { return };
        if let Err(e) = self
            .client
            .respond_activity_task_canceled(RespondActivityTaskCanceledInput { task_token, details })
            .await
        {
            warn!(activity_id = %task.activity_id, error = %e, "canceled response failed");
        }
    }

    /// Read the workflow's latest correlator marker and sleep according to
    /// this activity's attempt count.
    async fn backoff_for_attempts(&self, task: &ActivityTask) {
        let Some(execution) = task.workflow_execution.clone() else {
            return;
        };
        let history = match self
            .client
            .get_workflow_execution_history(GetWorkflowExecutionHistoryInput {
                domain: self.domain.clone(),
                execution,
                next_page_token: None,
                reverse_order: true,
            })
            .await
        {
            Ok(history) => history,
            Err(e) => {
                debug!(activity_id = %task.activity_id, error = %e, "history fetch for backoff failed");
                return;
            }
        };

        for event in &history.events {
            if event.is_marker(CORRELATOR_MARKER) {
                let details = event
                    .marker_recorded_event_attributes
                    .as_ref()
                    .and_then(|a| a.details.as_deref())
                    .unwrap_or_default();
                if let Ok(correlator) = self
                    .system_serializer
                    .as_ref()
                    .deserialize::<EventCorrelator>(details)
                {
                    let attempts = correlator
                        .activity_attempts
                        .get(&task.activity_id)
                        .copied()
                        .unwrap_or(0);
                    let backoff = self.backoff(attempts);
                    info!(
                        workflow_id = workflow_id(task),
                        activity_id = %task.activity_id,
                        attempts,
                        sleep_seconds = backoff,
                        "retry backoff"
                    );
                    if backoff > 0 {
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                    }
                }
                break;
            }
        }
    }

    fn backoff(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exp = (attempts - 1).min(30);
        (1u64 << exp).min(self.max_backoff_seconds)
    }

    /// Signal the owning workflow that this activity has started long-running
    /// work; the decider's correlator resolves the activity id from the
    /// payload.
    pub async fn signal_start<D: Serialize>(
        &self,
        task: &ActivityTask,
        data: Option<&D>,
    ) -> Result<()> {
        self.signal(task, ACTIVITY_STARTED_SIGNAL, data).await
    }

    /// Signal an intermediate update of a long-running activity.
    pub async fn signal_update<D: Serialize>(
        &self,
        task: &ActivityTask,
        data: Option<&D>,
    ) -> Result<()> {
        self.signal(task, ACTIVITY_UPDATED_SIGNAL, data).await
    }

    async fn signal<D: Serialize>(
        &self,
        task: &ActivityTask,
        signal: &str,
        data: Option<&D>,
    ) -> Result<()> {
        let mut state = SerializedActivityState {
            activity_id: task.activity_id.clone(),
            input: None,
        };
        if let Some(data) = data {
            state.input = Some(
                self.serializer
                    .as_ref()
                    .serialize(data)
                    .map_err(TillerError::StateSerialization)?,
            );
        }
        let input = self
            .system_serializer
            .as_ref()
            .serialize(&state)
            .map_err(TillerError::StateSerialization)?;

        let workflow_id = task
            .workflow_execution
            .as_ref()
            .map(|e| e.workflow_id.clone())
            .unwrap_or_default();
        self.client
            .signal_workflow_execution(SignalWorkflowExecutionInput {
                domain: self.domain.clone(),
                workflow_id,
                signal_name: signal.to_string(),
                run_id: None,
                input: Some(input),
            })
            .await?;
        Ok(())
    }

    /// Record a heartbeat for a task; returns whether cancellation has been
    /// requested. Routed to the heartbeat HTTP client by the transport.
    pub async fn record_heartbeat(
        &self,
        task: &ActivityTask,
        details: Option<String>,
    ) -> Result<bool> {
        let Some(task_token) = task.task_token.clone() else {
            return Ok(false);
        };
        let output = self
            .client
            .record_activity_task_heartbeat(RecordActivityTaskHeartbeatInput { task_token, details })
            .await?;
        Ok(output.cancel_requested)
    }

    /// Start polling for activity tasks until the shutdown manager stops the
    /// poller.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let worker = Arc::new(self);
        let poller = ActivityTaskPoller::new(
            worker.client.clone(),
            worker.domain.clone(),
            worker.identity.clone(),
            worker.task_list.clone(),
        );
        let manager = worker.shutdown_manager.clone();
        let poller_name = if worker.identity.is_empty() {
            format!("{}-activity-poller", worker.task_list)
        } else {
            format!("{}-activity-poller", worker.identity)
        };

        let dispatch_worker = worker.clone();
        let on_task: TaskHandler<ActivityTask> = Arc::new(move |poll_ctx, task| {
            let worker = dispatch_worker.clone();
            Box::pin(async move { worker.dispatch_task(poll_ctx, task).await })
        });

        tokio::spawn(async move {
            poller
                .poll_until_shutdown(&manager, &poller_name, on_task)
                .await;
        })
    }

    async fn dispatch_task(self: &Arc<Self>, poll_ctx: PollContext, task: ActivityTask) {
        let handler_worker = self.clone();
        let handler: TaskHandler<ActivityTask> = Arc::new(move |_poll_ctx, task| {
            let worker = handler_worker.clone();
            Box::pin(async move { worker.handle_activity_task(task).await })
        });
        self.dispatcher.dispatch_task(poll_ctx, task, handler).await;
    }
}

fn workflow_id(task: &ActivityTask) -> &str {
    task.workflow_execution
        .as_ref()
        .map(|e| e.workflow_id.as_str())
        .unwrap_or("")
}
