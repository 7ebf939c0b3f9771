//! Shared types of the decider runtime: marker names, persisted payloads,
//! outcomes, states, and the pluggable handler contracts.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tiller_core::swf::{Decision, DecisionTask, HistoryEvent, RespondDecisionTaskCompletedInput};

use crate::error::{Result, TillerError};
use crate::fsm::context::FsmContext;

/// Marker and signal names persisted into workflow history. These are part of
/// the durable format: changing one orphans every in-flight workflow.
pub const STATE_MARKER: &str = "FSM.State";
pub const CORRELATOR_MARKER: &str = "FSM.Correlator";
pub const ERROR_MARKER: &str = "FSM.Error";
pub const REPAIR_STATE_SIGNAL: &str = "FSM.RepairState";
/// Timer id AND signal name used by managed continuations.
pub const CONTINUE_TIMER: &str = "FSM.ContinueWorkflow";
pub const CONTINUE_SIGNAL: &str = "FSM.ContinueWorkflow";

/// Signal names whose input is a [`SerializedActivityState`].
pub const ACTIVITY_STARTED_SIGNAL: &str = "ActivityStarted";
pub const ACTIVITY_UPDATED_SIGNAL: &str = "ActivityUpdated";

/// Reserved state names.
pub const COMPLETE_STATE: &str = "complete";
pub const CANCELED_STATE: &str = "canceled";
pub const FAILED_STATE: &str = "failed";
pub const ERROR_STATE: &str = "error";

/// Bounds required of user state data: serde round-trippable (history is the
/// only store), defaultable (the zero-value template for fresh instances),
/// and clonable.
pub trait FsmData: Serialize + DeserializeOwned + Default + Clone + Send + 'static {}

impl<T> FsmData for T where T: Serialize + DeserializeOwned + Default + Clone + Send + 'static {}

/// The result of a decider processing one history event.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    /// Desired next state. The empty string means "continue processing events
    /// in the current state".
    pub state: String,
    /// The data the workflow carries forward.
    pub data: T,
    /// Decisions to append to this tick's decision list.
    pub decisions: Vec<Decision>,
}

/// A decider maps `(context, event, data)` to an [`Outcome`]. Deciders may
/// mutate `data` in place; the outcome's `data` is what the runtime carries
/// forward either way.
pub type Decider<T> =
    Arc<dyn Fn(&mut FsmContext, &HistoryEvent, &mut T) -> Outcome<T> + Send + Sync>;

/// Produces the decisions a state expects to be outstanding when entered.
pub type EntryDecisionsFn<T> = Arc<dyn Fn(&FsmContext, &T) -> Vec<Decision> + Send + Sync>;

/// One state of the FSM.
#[derive(Clone)]
pub struct FsmState<T> {
    /// Unique name within the FSM; outcomes reference states by this name.
    pub name: String,
    pub decider: Decider<T>,
    /// Invoked exactly once on each transition into this state.
    pub entry_decisions: Option<EntryDecisionsFn<T>>,
}

impl<T> FsmState<T> {
    pub fn new(
        name: impl Into<String>,
        decider: impl Fn(&mut FsmContext, &HistoryEvent, &mut T) -> Outcome<T>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        FsmState {
            name: name.into(),
            decider: Arc::new(decider),
            entry_decisions: None,
        }
    }

    pub fn with_entry_decisions(
        mut self,
        f: impl Fn(&FsmContext, &T) -> Vec<Decision> + Send + Sync + 'static,
    ) -> Self {
        self.entry_decisions = Some(Arc::new(f));
        self
    }
}

impl<T> std::fmt::Debug for FsmState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmState")
            .field("name", &self.name)
            .field("entry_decisions", &self.entry_decisions.is_some())
            .finish()
    }
}

/// Maps a decider failure to an optional recovery outcome.
///
/// Arguments: context, the event being decided, the state data from before
/// the event (restored from the stash), the possibly-mutated data at failure
/// time (absent during recovery ticks), and the failure details (absent
/// during recovery ticks). Returning `None` abandons rescue: the runtime
/// records an `FSM.Error` marker instead.
pub type DecisionErrorHandler<T> = Arc<
    dyn Fn(
            &mut FsmContext,
            &HistoryEvent,
            T,
            Option<&T>,
            Option<&str>,
        ) -> Option<Outcome<T>>
        + Send
        + Sync,
>;

/// Called when handling a decision task fails outside the decider machinery
/// (serialization, missing state, transport). The task has been abandoned and
/// will time out on the service.
pub type TaskErrorHandler = Arc<dyn Fn(&DecisionTask, &TillerError) + Send + Sync>;

/// Diagnostic sink for errors inside the FSM machinery. These usually mean
/// bad configuration or a mismatch between structs and their serialized form.
pub trait FsmErrorReporter: Send + Sync {
    fn error_finding_state_data(&self, task: &DecisionTask, error: &TillerError);
    fn error_finding_correlator(&self, task: &DecisionTask, error: &TillerError);
    fn error_missing_fsm_state(&self, task: &DecisionTask, state_name: &str);
    fn error_deserializing_state_data(
        &self,
        task: &DecisionTask,
        serialized_state_data: &str,
        error: &TillerError,
    );
    fn error_serializing_state_data(&self, task: &DecisionTask, error: &TillerError);
}

/// Reporter that logs each error with its workflow coordinates.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorReporter;

impl LoggingErrorReporter {
    fn workflow_id(task: &DecisionTask) -> &str {
        task.workflow_execution
            .as_ref()
            .map(|e| e.workflow_id.as_str())
            .unwrap_or("")
    }
}

impl FsmErrorReporter for LoggingErrorReporter {
    fn error_finding_state_data(&self, task: &DecisionTask, error: &TillerError) {
        tracing::error!(workflow_id = Self::workflow_id(task), %error, "finding serialized state failed");
    }

    fn error_finding_correlator(&self, task: &DecisionTask, error: &TillerError) {
        tracing::error!(workflow_id = Self::workflow_id(task), %error, "finding serialized correlator failed");
    }

    fn error_missing_fsm_state(&self, task: &DecisionTask, state_name: &str) {
        tracing::error!(workflow_id = Self::workflow_id(task), state = state_name, "marked state not in fsm");
    }

    fn error_deserializing_state_data(
        &self,
        task: &DecisionTask,
        _serialized_state_data: &str,
        error: &TillerError,
    ) {
        tracing::error!(workflow_id = Self::workflow_id(task), %error, "deserializing state data failed");
    }

    fn error_serializing_state_data(&self, task: &DecisionTask, error: &TillerError) {
        tracing::error!(workflow_id = Self::workflow_id(task), %error, "serializing state data failed");
    }
}

/// Post-tick fan-out of the serialized state, called after the decision task
/// has been responded. Failures are surfaced to the task error handler; they
/// never roll the tick back.
#[async_trait::async_trait]
pub trait ReplicationHandler: Send + Sync {
    async fn replicate(
        &self,
        task: &DecisionTask,
        response: &RespondDecisionTaskCompletedInput,
        state: &SerializedState,
    ) -> Result<()>;
}

/// Persisted as the `FSM.State` marker payload, and as the input carried
/// across continue-as-new. `state_version` increments on every emitted state
/// marker and totally orders state changes over the lifetime of a workflow,
/// across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedState {
    #[serde(default)]
    pub state_version: u64,
    #[serde(default)]
    pub state_name: String,
    #[serde(default)]
    pub state_data: String,
    #[serde(default)]
    pub workflow_id: String,
}

/// Persisted as the `FSM.Error` marker payload: the range of history that was
/// in flight when a decider failed, driving catch-up on later ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedErrorState {
    pub earliest_unprocessed_event_id: i64,
    pub latest_unprocessed_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_event: Option<HistoryEvent>,
    #[serde(default)]
    pub details: String,
}

/// Payload of the `ActivityStarted`/`ActivityUpdated` signals an activity
/// worker sends back to its owning workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedActivityState {
    pub activity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::swf::EventType;

    #[test]
    fn test_serialized_state_wire_names() {
        let state = SerializedState {
            state_version: 23,
            state_name: "ok".to_string(),
            state_data: "{}".to_string(),
            workflow_id: "wf-1".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["stateVersion"], 23);
        assert_eq!(json["stateName"], "ok");
        assert_eq!(json["stateData"], "{}");
        assert_eq!(json["workflowId"], "wf-1");
    }

    #[test]
    fn test_serialized_state_tolerates_missing_workflow_id() {
        let state: SerializedState =
            serde_json::from_str("{\"stateVersion\":0,\"stateName\":\"\",\"stateData\":\"{}\"}")
                .unwrap();
        assert_eq!(state.workflow_id, "");
    }

    #[test]
    fn test_serialized_error_state_round_trip() {
        let error_state = SerializedErrorState {
            earliest_unprocessed_event_id: 41,
            latest_unprocessed_event_id: 45,
            error_event: Some(HistoryEvent::new(42, EventType::TimerFired)),
            details: "boom".to_string(),
        };
        let json = serde_json::to_value(&error_state).unwrap();
        assert_eq!(json["earliestUnprocessedEventId"], 41);
        assert_eq!(json["latestUnprocessedEventId"], 45);
        assert_eq!(json["errorEvent"]["eventId"], 42);
        assert_eq!(json["details"], "boom");

        let back: SerializedErrorState = serde_json::from_value(json).unwrap();
        assert_eq!(back, error_state);
    }

    #[test]
    fn test_serialized_activity_state_shape() {
        let state = SerializedActivityState {
            activity_id: "A1".to_string(),
            input: Some("{\"n\":1}".to_string()),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["activityId"], "A1");
        assert_eq!(json["input"], "{\"n\":1}");
    }
}
