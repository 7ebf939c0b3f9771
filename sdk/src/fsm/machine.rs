//! The decider runtime.
//!
//! An [`Fsm`] owns the state map and the per-tick algorithm: reconstruct the
//! serialized state and correlator from history markers, fold the newly
//! arrived events through per-state deciders, and emit a decision list that
//! always leads with fresh `FSM.State` and `FSM.Correlator` markers. Decider
//! panics are contained: the pre-decision data is restored from a stash, the
//! error handler gets a chance to rescue, and unrescued failures are recorded
//! as an `FSM.Error` marker that drives catch-up on later ticks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tiller_core::client::DecisionOps;
use tiller_core::serializer::{JsonStateSerializer, StateSerializer};
use tiller_core::swf::{
    Decision, DecisionTask, EventType, HistoryEvent, RespondDecisionTaskCompletedInput,
    WorkflowExecution, WorkflowType,
};

use crate::dispatch::{InlineDispatcher, TaskDispatcher, TaskHandler};
use crate::error::{Result, TillerError};
use crate::fsm::context::{FsmContext, FsmSerialization, Serialization};
use crate::fsm::correlator::EventCorrelator;
use crate::fsm::interceptors::{
    ComposedDecisionInterceptor, DecisionInterceptor, DedupeWorkflowCloseDecisions,
    MoveWorkflowCloseDecisionsToEnd, RemoveLowerPriorityDecisions,
};
use crate::fsm::models::{
    DecisionErrorHandler, FsmData, FsmErrorReporter, FsmState, LoggingErrorReporter, Outcome,
    ReplicationHandler, SerializedErrorState, SerializedState, TaskErrorHandler, CANCELED_STATE,
    COMPLETE_STATE, CORRELATOR_MARKER, ERROR_MARKER, FAILED_STATE, STATE_MARKER,
};
use crate::fsm::stash::Stasher;
use crate::poller::{DecisionTaskPoller, PollContext, ShutdownManager};

/// Everything a successful tick produces: the context the deciders ran in,
/// the full decision list (markers first), and the serialized state the
/// leading marker carries.
pub struct TickResult {
    pub context: FsmContext,
    pub decisions: Vec<Decision>,
    pub state: SerializedState,
}

/// The decision-handling engine for one workflow type.
///
/// Construct with [`Fsm::new`], add states, adjust the pluggable seams with
/// the `with_*` methods, then either [`Fsm::start`] it (poll loop + dispatch)
/// or call [`Fsm::init`] and drive [`Fsm::tick`] yourself.
pub struct Fsm<T: FsmData> {
    /// Used in log fields and as the poller registration name.
    pub name: String,
    pub domain: String,
    pub task_list: String,
    pub identity: String,
    client: Arc<dyn DecisionOps>,
    serializer: Arc<dyn StateSerializer>,
    system_serializer: Arc<dyn StateSerializer>,
    states: HashMap<String, FsmState<T>>,
    error_handlers: HashMap<String, DecisionErrorHandler<T>>,
    initial_state: Option<String>,
    complete_state: Option<String>,
    canceled_state: Option<String>,
    failed_state: Option<String>,
    interceptor: Option<Arc<dyn DecisionInterceptor<T>>>,
    decision_error_handler: Option<DecisionErrorHandler<T>>,
    task_error_handler: Option<TaskErrorHandler>,
    error_reporter: Arc<dyn FsmErrorReporter>,
    replication_handler: Option<Arc<dyn ReplicationHandler>>,
    dispatcher: Arc<dyn TaskDispatcher<DecisionTask>>,
    shutdown_manager: Arc<ShutdownManager>,
    allow_panics: bool,
    stasher: Stasher,
    initialized: bool,
}

impl<T: FsmData> Fsm<T> {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        task_list: impl Into<String>,
        client: Arc<dyn DecisionOps>,
    ) -> Self {
        let serializer: Arc<dyn StateSerializer> = Arc::new(JsonStateSerializer);
        Fsm {
            name: name.into(),
            domain: domain.into(),
            task_list: task_list.into(),
            identity: String::new(),
            client,
            stasher: Stasher::new(serializer.clone()),
            serializer,
            system_serializer: Arc::new(JsonStateSerializer),
            states: HashMap::new(),
            error_handlers: HashMap::new(),
            initial_state: None,
            complete_state: None,
            canceled_state: None,
            failed_state: None,
            interceptor: None,
            decision_error_handler: None,
            task_error_handler: None,
            error_reporter: Arc::new(LoggingErrorReporter),
            replication_handler: None,
            dispatcher: Arc::new(InlineDispatcher),
            shutdown_manager: Arc::new(ShutdownManager::new()),
            allow_panics: false,
            initialized: false,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Serializer for user state data.
    pub fn with_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.stasher = Stasher::new(serializer.clone());
        self.serializer = serializer;
        self
    }

    /// Serializer for framework marker payloads.
    pub fn with_system_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.system_serializer = serializer;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn DecisionInterceptor<T>>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Fallback handler for decider panics in states without their own.
    pub fn with_decision_error_handler(mut self, handler: DecisionErrorHandler<T>) -> Self {
        self.decision_error_handler = Some(handler);
        self
    }

    /// Handler for errors outside the decider machinery; the task is
    /// abandoned before it is called.
    pub fn with_task_error_handler(mut self, handler: TaskErrorHandler) -> Self {
        self.task_error_handler = Some(handler);
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn FsmErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    pub fn with_replication_handler(mut self, handler: Arc<dyn ReplicationHandler>) -> Self {
        self.replication_handler = Some(handler);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher<DecisionTask>>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_shutdown_manager(mut self, manager: Arc<ShutdownManager>) -> Self {
        self.shutdown_manager = manager;
        self
    }

    /// Let decider panics propagate instead of recovering them. For tests.
    pub fn with_allow_panics(mut self, allow: bool) -> Self {
        self.allow_panics = allow;
        self
    }

    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        self.shutdown_manager.clone()
    }

    /// Add a state to the FSM.
    pub fn add_state(&mut self, state: FsmState<T>) {
        self.states.insert(state.name.clone(), state);
    }

    /// Add a state and use it as the initial state of new executions.
    pub fn add_initial_state(&mut self, state: FsmState<T>) {
        self.initial_state = Some(state.name.clone());
        self.add_state(state);
    }

    /// Add a state entered when a completion attempt could not go through.
    pub fn add_complete_state(&mut self, state: FsmState<T>) {
        self.complete_state = Some(state.name.clone());
        self.add_state(state);
    }

    /// Add a state entered when a cancellation attempt could not go through.
    pub fn add_canceled_state(&mut self, state: FsmState<T>) {
        self.canceled_state = Some(state.name.clone());
        self.add_state(state);
    }

    /// Add a state entered when a fail attempt could not go through.
    pub fn add_failed_state(&mut self, state: FsmState<T>) {
        self.failed_state = Some(state.name.clone());
        self.add_state(state);
    }

    /// Attach a panic handler to a specific state.
    pub fn add_error_handler(&mut self, state: impl Into<String>, handler: DecisionErrorHandler<T>) {
        self.error_handlers.insert(state.into(), handler);
    }

    /// Install defaults for everything left unset: terminal states, the
    /// close-decision interceptor chain, and error handlers. Called by
    /// [`Fsm::start`]; call directly only when driving [`Fsm::tick`] yourself.
    pub fn init(&mut self) -> Result<()> {
        if self.initial_state.is_none() {
            return Err(TillerError::InvalidConfiguration(
                "no initial state defined for fsm".to_string(),
            ));
        }

        if self.complete_state.is_none() {
            self.add_complete_state(self.default_complete_state());
        }
        if self.canceled_state.is_none() {
            self.add_canceled_state(self.default_canceled_state());
        }
        if self.failed_state.is_none() {
            self.add_failed_state(self.default_failed_state());
        }

        if self.interceptor.is_none() {
            self.interceptor = Some(Self::default_interceptor());
        }

        self.initialized = true;
        Ok(())
    }

    /// Complete state used when none has been set: it re-attempts the
    /// completion on every event it sees.
    fn default_complete_state(&self) -> FsmState<T> {
        FsmState::new(COMPLETE_STATE, |ctx: &mut FsmContext, event, data: &mut T| {
            info!(event_id = event.event_id, "attempting workflow completion");
            ctx.complete_workflow(data.clone(), vec![])
        })
    }

    fn default_canceled_state(&self) -> FsmState<T> {
        FsmState::new(CANCELED_STATE, |ctx: &mut FsmContext, event, data: &mut T| {
            info!(event_id = event.event_id, "attempting workflow cancel");
            ctx.cancel_workflow(data.clone(), Some("default-canceled-state".to_string()))
        })
    }

    fn default_failed_state(&self) -> FsmState<T> {
        FsmState::new(FAILED_STATE, |ctx: &mut FsmContext, event, data: &mut T| {
            info!(event_id = event.event_id, "attempting workflow fail");
            ctx.fail_workflow(data.clone(), Some("default-failed-state".to_string()))
        })
    }

    /// Dedupe close decisions, move them to the end, and keep only the
    /// highest-priority one (fail > complete > cancel).
    pub fn default_interceptor() -> Arc<dyn DecisionInterceptor<T>> {
        Arc::new(ComposedDecisionInterceptor::new(vec![
            Arc::new(DedupeWorkflowCloseDecisions),
            Arc::new(MoveWorkflowCloseDecisionsToEnd),
            Arc::new(RemoveLowerPriorityDecisions::default()),
        ]))
    }

    fn serialization(&self) -> Arc<dyn Serialization> {
        Arc::new(FsmSerialization {
            serializer: self.serializer.clone(),
            system_serializer: self.system_serializer.clone(),
            initial_state: self.initial_state.clone().unwrap_or_default(),
        })
    }

    /// Handle one decision task end to end: tick, respond, replicate.
    pub async fn handle_decision_task(&self, task: DecisionTask) {
        let result = match self.tick(&task) {
            Ok(result) => result,
            Err(e) => {
                self.report_task_error(&task, &e);
                return;
            }
        };

        let Some(task_token) = task.task_token.clone() else {
            return;
        };
        let complete = RespondDecisionTaskCompletedInput {
            task_token,
            decisions: result.decisions.clone(),
            execution_context: Some(result.state.state_name.clone()),
        };

        if let Err(e) = self
            .client
            .respond_decision_task_completed(complete.clone())
            .await
        {
            self.report_task_error(&task, &e.into());
            return;
        }

        if let Some(replication) = &self.replication_handler {
            if let Err(e) = replication.replicate(&task, &complete, &result.state).await {
                self.report_task_error(&task, &e);
            }
        }
    }

    fn report_task_error(&self, task: &DecisionTask, error: &TillerError) {
        match &self.task_error_handler {
            Some(handler) => handler(task, error),
            None => {
                warn!(
                    workflow_id = task
                        .workflow_execution
                        .as_ref()
                        .map(|e| e.workflow_id.as_str())
                        .unwrap_or(""),
                    %error,
                    "abandoning decision task"
                );
            }
        }
    }

    /// Run one decision tick over a task.
    ///
    /// History in `task.events` must be in reverse chronological order, the
    /// way the poller accumulates it.
    pub fn tick(&self, task: &DecisionTask) -> Result<TickResult> {
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_task(task);
        }

        let workflow_type = task.workflow_type.clone().unwrap_or_else(WorkflowType::default);
        let workflow_execution = task
            .workflow_execution
            .clone()
            .unwrap_or_else(WorkflowExecution::default);

        let serialized_state = match self.find_serialized_state(&task.events) {
            Ok(state) => state,
            Err(e) => {
                self.error_reporter.error_finding_state_data(task, &e);
                if self.allow_panics {
                    panic!("{}", e);
                }
                return Err(e);
            }
        };
        debug!(
            workflow_id = %workflow_execution.workflow_id,
            state = %serialized_state.state_name,
            "found serialized state"
        );

        let mut event_correlator = match self.find_serialized_event_correlator(&task.events) {
            Ok(correlator) => correlator,
            Err(e) => {
                self.error_reporter.error_finding_correlator(task, &e);
                if self.allow_panics {
                    panic!("{}", e);
                }
                return Err(e);
            }
        };
        event_correlator.serializer = Some(self.system_serializer.clone());

        let data: T = match self
            .serializer
            .as_ref()
            .deserialize(&serialized_state.state_data)
        {
            Ok(data) => data,
            Err(e) => {
                let e = TillerError::StateDeserialization(e);
                self.error_reporter.error_deserializing_state_data(
                    task,
                    &serialized_state.state_data,
                    &e,
                );
                if self.allow_panics {
                    panic!("{}", e);
                }
                return Err(e);
            }
        };

        let mut ctx = FsmContext::new(
            self.serialization(),
            workflow_type,
            workflow_execution,
            event_correlator,
            serialized_state.state_name.clone(),
            serialized_state.state_version,
        );

        let mut outcome = Outcome {
            state: serialized_state.state_name,
            data,
            decisions: Vec::new(),
        };

        if let Some(interceptor) = &self.interceptor {
            interceptor.before_decision(task, &mut ctx, &mut outcome);
        }

        if let Some(mut error_state) = self.find_serialized_error_state(&task.events)? {
            match self.error_state_tick(task, &error_state, &mut ctx, &outcome.data) {
                Some(recovery) => {
                    info!(
                        workflow_id = %ctx.workflow_execution.workflow_id,
                        "error state recovered, catching up"
                    );
                    outcome = recovery;
                }
                None => {
                    warn!(
                        workflow_id = %ctx.workflow_execution.workflow_id,
                        "error recovery failed, bumping unprocessed window"
                    );
                    error_state.latest_unprocessed_event_id = task.started_event_id;
                    let (decisions, state) =
                        self.record_state_markers(&ctx, &outcome, Some(&error_state))?;
                    return Ok(TickResult {
                        context: ctx,
                        decisions,
                        state,
                    });
                }
            }
        }

        let last_events = self.find_last_events(task.previous_started_event_id, &task.events);

        for event in &last_events {
            debug!(event_id = event.event_id, event_type = ?event.event_type, "deciding event");
            let Some(fsm_state) = self.states.get(&outcome.state) else {
                self.error_reporter.error_missing_fsm_state(task, &outcome.state);
                return Err(TillerError::MissingFsmState(outcome.state.clone()));
            };
            ctx.state = outcome.state.clone();

            let stashed = self.stasher.stash(&outcome.data).map_err(|e| {
                self.error_reporter.error_serializing_state_data(task, &e);
                e
            })?;

            let event_outcome =
                match self.panic_safe_decide(fsm_state, &mut ctx, event, &mut outcome.data) {
                    Ok(event_outcome) => event_outcome,
                    Err(panic_details) => {
                        let state_before: T = self.stasher.unstash(&stashed).map_err(|e| {
                            self.error_reporter.error_deserializing_state_data(
                                task, &stashed, &e,
                            );
                            e
                        })?;
                        let handler = self.resolve_error_handler(&fsm_state.name);
                        match handler(
                            &mut ctx,
                            event,
                            state_before,
                            Some(&outcome.data),
                            Some(panic_details.as_str()),
                        ) {
                            Some(rescued) => rescued,
                            None => {
                                let error_state = SerializedErrorState {
                                    earliest_unprocessed_event_id: task.previous_started_event_id
                                        + 1,
                                    latest_unprocessed_event_id: task.started_event_id,
                                    error_event: Some((*event).clone()),
                                    details: panic_details,
                                };
                                let (decisions, state) = self
                                    .record_state_markers(&ctx, &outcome, Some(&error_state))
                                    .map_err(|e| {
                                        self.error_reporter.error_serializing_state_data(task, &e);
                                        e
                                    })?;
                                return Ok(TickResult {
                                    context: ctx,
                                    decisions,
                                    state,
                                });
                            }
                        }
                    }
                };

            let from_state = outcome.state.clone();
            self.merge_outcomes(&ctx, &mut outcome, event_outcome);
            debug!(
                from = %from_state,
                to = %outcome.state,
                decisions = outcome.decisions.len(),
                "decided event"
            );
        }

        ctx.state = outcome.state.clone();
        if let Some(interceptor) = &self.interceptor {
            interceptor.after_decision(task, &mut ctx, &mut outcome);
        }

        let (decisions, state) = self
            .record_state_markers(&ctx, &outcome, None)
            .map_err(|e| {
                self.error_reporter.error_serializing_state_data(task, &e);
                if self.allow_panics {
                    panic!("{}", e);
                }
                e
            })?;

        Ok(TickResult {
            context: ctx,
            decisions,
            state,
        })
    }

    /// Attempt a shadow tick over the unprocessed window recorded in the
    /// error marker. `None` means recovery failed and the caller should
    /// re-record the (bumped) error marker.
    fn error_state_tick(
        &self,
        task: &DecisionTask,
        error_state: &SerializedErrorState,
        ctx: &mut FsmContext,
        data: &T,
    ) -> Option<Outcome<T>> {
        let error_event = error_state.error_event.clone()?;

        // the configured handler gates recovery attempts
        let data_copy: T = self
            .stasher
            .stash(data)
            .ok()
            .and_then(|s| self.stasher.unstash(&s).ok())?;
        let handler = self.resolve_error_handler(&ctx.state);
        handler(ctx, &error_event, data_copy, None, None)?;

        let mut filtered = task.clone();
        filtered.events.retain(|e| !e.is_marker(ERROR_MARKER));
        filtered.previous_started_event_id = error_state.earliest_unprocessed_event_id;
        filtered.started_event_id = error_state.latest_unprocessed_event_id;

        match self.tick(&filtered) {
            Ok(result) => {
                let data: T = self
                    .serializer
                    .as_ref()
                    .deserialize(&result.state.state_data)
                    .ok()?;
                Some(Outcome {
                    state: result.state.state_name,
                    data,
                    decisions: result.decisions,
                })
            }
            Err(e) => {
                warn!(%e, "shadow tick failed");
                None
            }
        }
    }

    fn resolve_error_handler(&self, state: &str) -> DecisionErrorHandler<T> {
        if let Some(handler) = self.error_handlers.get(state) {
            return handler.clone();
        }
        if let Some(handler) = &self.decision_error_handler {
            return handler.clone();
        }
        Arc::new(
            |ctx: &mut FsmContext,
             _event: &HistoryEvent,
             _before: T,
             _after: Option<&T>,
             error: Option<&str>| {
                warn!(
                    workflow_id = %ctx.workflow_execution.workflow_id,
                    error = error.unwrap_or(""),
                    "decider error, no recovery configured"
                );
                None
            },
        )
    }

    fn panic_safe_decide(
        &self,
        state: &FsmState<T>,
        ctx: &mut FsmContext,
        event: &HistoryEvent,
        data: &mut T,
    ) -> std::result::Result<Outcome<T>, String> {
        if self.allow_panics {
            return Ok(ctx.decide(event, data, &state.decider));
        }
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.decide(event, data, &state.decider)
        }))
        .map_err(|payload| {
            let details = crate::error::panic_details(payload.as_ref());
            warn!(details = %details, "recovered decider panic");
            details
        })
    }

    /// Fold an event's outcome into the tick's accumulated outcome. Entry
    /// decisions fire when (and only when) the state actually changes.
    fn merge_outcomes(&self, ctx: &FsmContext, outcome: &mut Outcome<T>, intermediate: Outcome<T>) {
        outcome.decisions.extend(intermediate.decisions);
        outcome.data = intermediate.data;
        if !intermediate.state.is_empty() && intermediate.state != outcome.state {
            outcome.state = intermediate.state;
            if let Some(next_state) = self.states.get(&outcome.state) {
                if let Some(entry) = &next_state.entry_decisions {
                    let entry_decisions = entry(ctx, &outcome.data);
                    outcome.decisions.extend(entry_decisions);
                }
            }
        }
    }

    /// Scan newest-first history for the first state marker or the start
    /// event.
    fn find_serialized_state(&self, events: &[HistoryEvent]) -> Result<SerializedState> {
        for event in events {
            if event.is_marker(STATE_MARKER) {
                let details = event
                    .marker_recorded_event_attributes
                    .as_ref()
                    .and_then(|a| a.details.as_deref())
                    .unwrap_or_default();
                return self
                    .system_serializer
                    .as_ref()
                    .deserialize(details)
                    .map_err(TillerError::StateDeserialization);
            }
            if event.event_type == EventType::WorkflowExecutionStarted {
                let input = event
                    .workflow_execution_started_event_attributes
                    .as_ref()
                    .and_then(|a| a.input.as_deref())
                    .unwrap_or_default();
                let mut state: SerializedState = self
                    .serializer
                    .as_ref()
                    .deserialize(input)
                    .map_err(TillerError::StateDeserialization)?;
                if state.state_name.is_empty() {
                    state.state_name = self.initial_state.clone().unwrap_or_default();
                }
                return Ok(state);
            }
        }
        Err(TillerError::MissingState)
    }

    fn find_serialized_event_correlator(&self, events: &[HistoryEvent]) -> Result<EventCorrelator> {
        for event in events {
            if event.is_marker(CORRELATOR_MARKER) {
                let details = event
                    .marker_recorded_event_attributes
                    .as_ref()
                    .and_then(|a| a.details.as_deref())
                    .unwrap_or_default();
                return self
                    .system_serializer
                    .as_ref()
                    .deserialize(details)
                    .map_err(TillerError::StateDeserialization);
            }
        }
        Ok(EventCorrelator::default())
    }

    fn find_serialized_error_state(
        &self,
        events: &[HistoryEvent],
    ) -> Result<Option<SerializedErrorState>> {
        for event in events {
            if event.is_marker(ERROR_MARKER) {
                let details = event
                    .marker_recorded_event_attributes
                    .as_ref()
                    .and_then(|a| a.details.as_deref())
                    .unwrap_or_default();
                return self
                    .system_serializer
                    .as_ref()
                    .deserialize(details)
                    .map(Some)
                    .map_err(TillerError::StateDeserialization);
            }
        }
        Ok(None)
    }

    /// Collect the unprocessed events (newest-first input, chronological
    /// output), excluding decision-task bookkeeping and framework markers.
    fn find_last_events(
        &self,
        previous_started_event_id: i64,
        events: &[HistoryEvent],
    ) -> Vec<HistoryEvent> {
        let mut last_events = Vec::new();
        for event in events {
            if event.event_id == previous_started_event_id {
                break;
            }
            match event.event_type {
                EventType::DecisionTaskScheduled
                | EventType::DecisionTaskStarted
                | EventType::DecisionTaskCompleted => {}
                EventType::MarkerRecorded => {
                    if !event.is_marker(STATE_MARKER)
                        && !event.is_marker(CORRELATOR_MARKER)
                        && !event.is_marker(ERROR_MARKER)
                    {
                        last_events.push(event.clone());
                    }
                }
                _ => last_events.push(event.clone()),
            }
        }
        last_events.reverse();
        last_events
    }

    /// Build the final decision list: state marker, correlator marker, an
    /// error marker when one is being tracked, then the outcome's decisions.
    fn record_state_markers(
        &self,
        ctx: &FsmContext,
        outcome: &Outcome<T>,
        error_state: Option<&SerializedErrorState>,
    ) -> Result<(Vec<Decision>, SerializedState)> {
        let state_data = self
            .serializer
            .as_ref()
            .serialize(&outcome.data)
            .map_err(TillerError::StateSerialization)?;

        let state = SerializedState {
            // the version increments here and only here
            state_version: ctx.state_version + 1,
            state_name: outcome.state.clone(),
            state_data,
            workflow_id: ctx.workflow_execution.workflow_id.clone(),
        };

        let serialized_state = self
            .system_serializer
            .as_ref()
            .serialize(&state)
            .map_err(TillerError::StateSerialization)?;
        let serialized_correlator = self
            .system_serializer
            .as_ref()
            .serialize(&ctx.event_correlator)
            .map_err(TillerError::StateSerialization)?;

        let mut decisions = vec![
            Decision::record_marker(STATE_MARKER, serialized_state),
            Decision::record_marker(CORRELATOR_MARKER, serialized_correlator),
        ];

        if let Some(error_state) = error_state {
            let serialized_error = self
                .system_serializer
                .as_ref()
                .serialize(error_state)
                .map_err(TillerError::StateSerialization)?;
            decisions.push(Decision::record_marker(ERROR_MARKER, serialized_error));
        }

        decisions.extend(outcome.decisions.iter().cloned());
        Ok((decisions, state))
    }

    /// Predicate the poller uses to stop fetching history pages: the page set
    /// is ready once it holds both framework markers plus an event at or
    /// before the previous decision, or the start event.
    pub fn task_ready(&self, task: &DecisionTask) -> bool {
        let mut state = false;
        let mut correlator = false;
        let mut prev = false;
        for event in &task.events {
            if event.is_marker(STATE_MARKER) {
                state = true;
            }
            if event.is_marker(CORRELATOR_MARKER) {
                correlator = true;
            }
            if event.event_id <= task.previous_started_event_id {
                prev = true;
            }
            if state && correlator && prev {
                return true;
            }
            if event.event_type == EventType::WorkflowExecutionStarted {
                return true;
            }
        }
        false
    }

    /// Start polling for decision tasks until the shutdown manager stops the
    /// poller. Installs defaults via [`Fsm::init`] first.
    pub fn start(mut self) -> Result<tokio::task::JoinHandle<()>> {
        if !self.initialized {
            self.init()?;
        }
        let fsm = Arc::new(self);

        let poller = DecisionTaskPoller::new(
            fsm.client.clone(),
            fsm.domain.clone(),
            fsm.identity.clone(),
            fsm.task_list.clone(),
        );
        let manager = fsm.shutdown_manager.clone();
        let poller_name = format!("{}-poller", fsm.name);

        let dispatch_fsm = fsm.clone();
        let on_task: TaskHandler<DecisionTask> = Arc::new(move |poll_ctx, task| {
            let fsm = dispatch_fsm.clone();
            Box::pin(async move { fsm.dispatch_task(poll_ctx, task).await })
        });

        let ready_fsm = fsm.clone();
        let task_ready = Arc::new(move |task: &DecisionTask| ready_fsm.task_ready(task));

        Ok(tokio::spawn(async move {
            poller
                .poll_until_shutdown(&manager, &poller_name, on_task, task_ready)
                .await;
        }))
    }

    async fn dispatch_task(self: &Arc<Self>, poll_ctx: PollContext, task: DecisionTask) {
        let handler_fsm = self.clone();
        let handler: TaskHandler<DecisionTask> = Arc::new(move |_poll_ctx, task| {
            let fsm = handler_fsm.clone();
            Box::pin(async move { fsm.handle_decision_task(task).await })
        });
        self.dispatcher.dispatch_task(poll_ctx, task, handler).await;
    }
}
