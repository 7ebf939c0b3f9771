//! The context handed to deciders.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tiller_core::serializer::StateSerializer;
use tiller_core::swf::{Decision, EventType, HistoryEvent, WorkflowExecution, WorkflowType};

use crate::fsm::correlator::{
    ActivityInfo, CancellationInfo, ChildInfo, EventCorrelator, SignalInfo, TimerInfo,
};
use crate::fsm::models::{
    Decider, Outcome, SerializedActivityState, SerializedState, ACTIVITY_STARTED_SIGNAL,
    ACTIVITY_UPDATED_SIGNAL, CANCELED_STATE, COMPLETE_STATE, FAILED_STATE,
};

/// The narrow serialization capability the FSM exposes to its contexts.
///
/// Contexts need to serialize user data and decode event payloads, but handing
/// them the whole FSM would create a reference cycle; this trait is the slice
/// they actually use.
pub trait Serialization: Send + Sync {
    fn state_serializer(&self) -> Arc<dyn StateSerializer>;
    fn system_serializer(&self) -> Arc<dyn StateSerializer>;
    fn initial_state(&self) -> String;
}

/// Plain-struct implementation the FSM constructs for each tick.
pub(crate) struct FsmSerialization {
    pub serializer: Arc<dyn StateSerializer>,
    pub system_serializer: Arc<dyn StateSerializer>,
    pub initial_state: String,
}

impl Serialization for FsmSerialization {
    fn state_serializer(&self) -> Arc<dyn StateSerializer> {
        self.serializer.clone()
    }

    fn system_serializer(&self) -> Arc<dyn StateSerializer> {
        self.system_serializer.clone()
    }

    fn initial_state(&self) -> String {
        self.initial_state.clone()
    }
}

/// Populated by the runtime and passed to deciders. Carries the workflow
/// coordinates, the live correlator, and the current state name, plus helpers
/// for building outcomes and decoding event payloads.
pub struct FsmContext {
    serialization: Arc<dyn Serialization>,
    pub workflow_type: WorkflowType,
    pub workflow_execution: WorkflowExecution,
    pub event_correlator: EventCorrelator,
    pub state: String,
    pub(crate) state_version: u64,
}

impl FsmContext {
    pub(crate) fn new(
        serialization: Arc<dyn Serialization>,
        workflow_type: WorkflowType,
        workflow_execution: WorkflowExecution,
        event_correlator: EventCorrelator,
        state: String,
        state_version: u64,
    ) -> Self {
        FsmContext {
            serialization,
            workflow_type,
            workflow_execution,
            event_correlator,
            state,
            state_version,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_execution.workflow_id
    }

    /// The state version the current tick started from.
    pub fn state_version(&self) -> u64 {
        self.state_version
    }

    /// Run a decider and track the event in the correlator afterwards, so
    /// outstanding-operation tables stay consistent no matter what the
    /// decider returns.
    pub fn decide<T>(
        &mut self,
        event: &HistoryEvent,
        data: &mut T,
        decider: &Decider<T>,
    ) -> Outcome<T> {
        let outcome = decider(self, event, data);
        self.event_correlator.track(event);
        outcome
    }

    /// Outcome that keeps processing events in the current state.
    pub fn continue_decider<T>(&self, data: T, decisions: Vec<Decision>) -> Outcome<T> {
        Outcome {
            state: String::new(),
            data,
            decisions,
        }
    }

    /// Outcome that stays in the current state.
    pub fn stay<T>(&self, data: T, decisions: Vec<Decision>) -> Outcome<T> {
        Outcome {
            state: self.state.clone(),
            data,
            decisions,
        }
    }

    /// Outcome that transitions to another state.
    pub fn goto<T>(
        &self,
        state: impl Into<String>,
        data: T,
        decisions: Vec<Decision>,
    ) -> Outcome<T> {
        Outcome {
            state: state.into(),
            data,
            decisions,
        }
    }

    /// Outcome that changes nothing and emits nothing.
    pub fn pass<T>(&self, data: T) -> Outcome<T> {
        Outcome {
            state: String::new(),
            data,
            decisions: Vec::new(),
        }
    }

    /// Outcome that attempts to complete the workflow. Appends a
    /// `CompleteWorkflowExecution` decision unless the caller already put one
    /// last, and parks the FSM in the reserved `complete` state.
    pub fn complete_workflow<T: Serialize>(
        &self,
        data: T,
        mut decisions: Vec<Decision>,
    ) -> Outcome<T> {
        if !last_decision_is(&decisions, tiller_core::swf::DecisionType::CompleteWorkflowExecution)
        {
            decisions.push(self.complete_workflow_decision(&data));
        }
        Outcome {
            state: COMPLETE_STATE.to_string(),
            data,
            decisions,
        }
    }

    /// Outcome that attempts to continue the workflow as a new execution,
    /// carrying the serialized state (and its version) through the start
    /// input.
    pub fn continue_workflow<T: Serialize>(
        &self,
        data: T,
        mut decisions: Vec<Decision>,
    ) -> Outcome<T> {
        if !last_decision_is(
            &decisions,
            tiller_core::swf::DecisionType::ContinueAsNewWorkflowExecution,
        ) {
            decisions.push(self.continue_workflow_decision(&self.state, &data));
        }
        Outcome {
            state: COMPLETE_STATE.to_string(),
            data,
            decisions,
        }
    }

    /// Outcome that attempts to cancel the workflow.
    pub fn cancel_workflow<T>(&self, data: T, details: Option<String>) -> Outcome<T> {
        Outcome {
            state: CANCELED_STATE.to_string(),
            data,
            decisions: vec![Decision::cancel_workflow_execution(details)],
        }
    }

    /// Outcome that attempts to fail the workflow.
    pub fn fail_workflow<T>(&self, data: T, reason: Option<String>) -> Outcome<T> {
        Outcome {
            state: FAILED_STATE.to_string(),
            data,
            decisions: vec![Decision::fail_workflow_execution(reason, None)],
        }
    }

    /// A `CompleteWorkflowExecution` decision carrying the serialized data as
    /// its result.
    pub fn complete_workflow_decision<T: Serialize>(&self, data: &T) -> Decision {
        Decision::complete_workflow_execution(Some(self.serialize(data)))
    }

    /// A `ContinueAsNewWorkflowExecution` decision whose input is the
    /// serialized state, so the version survives into the next run. Only
    /// valid when no activities are outstanding, which is why the correlator
    /// is not carried over.
    pub fn continue_workflow_decision<T: Serialize>(
        &self,
        continued_state: &str,
        data: &T,
    ) -> Decision {
        let state = SerializedState {
            state_version: self.state_version,
            state_name: continued_state.to_string(),
            state_data: self.serialize(data),
            workflow_id: self.workflow_execution.workflow_id.clone(),
        };
        Decision::continue_as_new_workflow_execution(Some(self.serialize(&state)))
    }

    /// Serialize with the FSM's user serializer.
    ///
    /// Panics on serialization errors; the decider panic recovery turns that
    /// into an error marker, which is the intended failure path inside
    /// deciders. Use `serializer()` directly for a `Result`-shaped API.
    pub fn serialize<T: Serialize>(&self, data: &T) -> String {
        match self.serialization.state_serializer().as_ref().serialize(data) {
            Ok(serialized) => serialized,
            Err(e) => panic!("serialize: {}", e),
        }
    }

    /// Deserialize with the FSM's user serializer. Panics on errors; see
    /// [`FsmContext::serialize`].
    pub fn deserialize<T: DeserializeOwned>(&self, serialized: &str) -> T {
        match self
            .serialization
            .state_serializer()
            .as_ref()
            .deserialize(serialized)
        {
            Ok(data) => data,
            Err(e) => panic!("deserialize: {}", e),
        }
    }

    /// The FSM's user serializer.
    pub fn serializer(&self) -> Arc<dyn StateSerializer> {
        self.serialization.state_serializer()
    }

    /// The configured initial state name.
    pub fn initial_state(&self) -> String {
        self.serialization.initial_state()
    }

    /// Extract and decode the payload of a history event into `T`.
    ///
    /// Knows which attribute field carries the payload for each event kind,
    /// and unwraps the `SerializedActivityState` envelope on
    /// `ActivityStarted`/`ActivityUpdated` signals. Panics when the event
    /// carries no payload or the payload does not decode; recovered by the
    /// runtime like any other decider panic.
    pub fn event_data<T: DeserializeOwned>(&self, event: &HistoryEvent) -> T {
        match self.event_payload(event) {
            Some(serialized) => self.deserialize(&serialized),
            None => panic!(
                "event payload was empty for event_id={} event_type={:?}",
                event.event_id, event.event_type
            ),
        }
    }

    fn event_payload(&self, event: &HistoryEvent) -> Option<String> {
        match event.event_type {
            EventType::ActivityTaskCompleted => event
                .activity_task_completed_event_attributes
                .as_ref()
                .and_then(|a| a.result.clone()),
            EventType::WorkflowExecutionCompleted => event
                .workflow_execution_completed_event_attributes
                .as_ref()
                .and_then(|a| a.result.clone()),
            EventType::ChildWorkflowExecutionCompleted => event
                .child_workflow_execution_completed_event_attributes
                .as_ref()
                .and_then(|a| a.result.clone()),
            EventType::ChildWorkflowExecutionFailed => event
                .child_workflow_execution_failed_event_attributes
                .as_ref()
                .and_then(|a| a.details.clone()),
            EventType::WorkflowExecutionSignaled => {
                let attrs = event.workflow_execution_signaled_event_attributes.as_ref()?;
                match attrs.signal_name.as_str() {
                    ACTIVITY_STARTED_SIGNAL | ACTIVITY_UPDATED_SIGNAL => {
                        let input = attrs.input.as_ref()?;
                        let state: SerializedActivityState = self
                            .serialization
                            .system_serializer()
                            .as_ref()
                            .deserialize(input)
                            .ok()?;
                        state.input
                    }
                    _ => attrs.input.clone(),
                }
            }
            EventType::WorkflowExecutionStarted => event
                .workflow_execution_started_event_attributes
                .as_ref()
                .and_then(|a| a.input.clone()),
            EventType::WorkflowExecutionContinuedAsNew => event
                .workflow_execution_continued_as_new_event_attributes
                .as_ref()
                .and_then(|a| a.input.clone()),
            _ => None,
        }
    }

    /// Info for the outstanding activity a terminal activity event refers to.
    pub fn activity_info(&self, event: &HistoryEvent) -> Option<&ActivityInfo> {
        self.event_correlator.activity_info(event)
    }

    /// All in-flight activities, keyed by scheduled event id.
    pub fn activities_info(&self) -> &std::collections::HashMap<String, ActivityInfo> {
        &self.event_correlator.activities
    }

    pub fn signal_info(&self, event: &HistoryEvent) -> Option<&SignalInfo> {
        self.event_correlator.signal_info(event)
    }

    pub fn signals_info(&self) -> &std::collections::HashMap<String, SignalInfo> {
        &self.event_correlator.signals
    }

    pub fn timer_info(&self, event: &HistoryEvent) -> Option<&TimerInfo> {
        self.event_correlator.timer_info(event)
    }

    pub fn timer_scheduled(&self, timer_id: &str) -> bool {
        self.event_correlator.timer_scheduled(timer_id)
    }

    pub fn cancellation_info(&self, event: &HistoryEvent) -> Option<&CancellationInfo> {
        self.event_correlator.cancellation_info(event)
    }

    pub fn child_info(&self, event: &HistoryEvent) -> Option<&ChildInfo> {
        self.event_correlator.child_info(event)
    }
}

fn last_decision_is(decisions: &[Decision], decision_type: tiller_core::swf::DecisionType) -> bool {
    decisions
        .last()
        .map(|d| d.decision_type == decision_type)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tiller_core::serializer::JsonStateSerializer;
    use tiller_core::swf::DecisionType;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestData {
        steps: Vec<String>,
    }

    fn test_context() -> FsmContext {
        FsmContext::new(
            Arc::new(FsmSerialization {
                serializer: Arc::new(JsonStateSerializer),
                system_serializer: Arc::new(JsonStateSerializer),
                initial_state: "start".to_string(),
            }),
            WorkflowType {
                name: "test-workflow".to_string(),
                version: "1".to_string(),
            },
            WorkflowExecution {
                workflow_id: "wf-1".to_string(),
                run_id: Some("run-1".to_string()),
            },
            EventCorrelator::default(),
            "working".to_string(),
            23,
        )
    }

    #[test]
    fn test_outcome_helpers() {
        let ctx = test_context();
        let data = TestData::default();

        let outcome = ctx.continue_decider(data.clone(), vec![]);
        assert_eq!(outcome.state, "");

        let outcome = ctx.stay(data.clone(), vec![]);
        assert_eq!(outcome.state, "working");

        let outcome = ctx.goto("done", data.clone(), vec![]);
        assert_eq!(outcome.state, "done");

        let outcome = ctx.pass(data);
        assert_eq!(outcome.state, "");
        assert!(outcome.decisions.is_empty());
    }

    #[test]
    fn test_complete_workflow_appends_close_decision() {
        let ctx = test_context();
        let outcome = ctx.complete_workflow(TestData::default(), vec![]);
        assert_eq!(outcome.state, COMPLETE_STATE);
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(
            outcome.decisions[0].decision_type,
            DecisionType::CompleteWorkflowExecution
        );

        // an existing trailing close decision is not duplicated
        let outcome = ctx.complete_workflow(
            TestData::default(),
            vec![Decision::complete_workflow_execution(None)],
        );
        assert_eq!(outcome.decisions.len(), 1);
    }

    #[test]
    fn test_continue_workflow_carries_version() {
        let ctx = test_context();
        let outcome = ctx.continue_workflow(TestData::default(), vec![]);
        assert_eq!(
            outcome.decisions[0].decision_type,
            DecisionType::ContinueAsNewWorkflowExecution
        );

        let input = outcome.decisions[0]
            .continue_as_new_workflow_execution_decision_attributes
            .as_ref()
            .unwrap()
            .input
            .clone()
            .unwrap();
        let state: SerializedState = serde_json::from_str(&input).unwrap();
        assert_eq!(state.state_version, 23);
        assert_eq!(state.state_name, "working");
        assert_eq!(state.workflow_id, "wf-1");
    }

    #[test]
    fn test_fail_and_cancel_use_reserved_states() {
        let ctx = test_context();
        let outcome = ctx.fail_workflow(TestData::default(), Some("bad".to_string()));
        assert_eq!(outcome.state, FAILED_STATE);

        let outcome = ctx.cancel_workflow(TestData::default(), None);
        assert_eq!(outcome.state, CANCELED_STATE);
    }

    #[test]
    fn test_event_data_from_activity_completed() {
        let ctx = test_context();
        let mut event = HistoryEvent::new(8, EventType::ActivityTaskCompleted);
        event.activity_task_completed_event_attributes = Some(Box::new(
            tiller_core::swf::ActivityTaskCompletedEventAttributes {
                scheduled_event_id: 5,
                started_event_id: 6,
                result: Some("{\"steps\":[\"a\"]}".to_string()),
            },
        ));

        let data: TestData = ctx.event_data(&event);
        assert_eq!(data.steps, vec!["a".to_string()]);
    }

    #[test]
    fn test_event_data_unwraps_activity_signal_envelope() {
        let ctx = test_context();
        let state = SerializedActivityState {
            activity_id: "A1".to_string(),
            input: Some("{\"steps\":[\"b\"]}".to_string()),
        };
        let mut event = HistoryEvent::new(11, EventType::WorkflowExecutionSignaled);
        event.workflow_execution_signaled_event_attributes = Some(Box::new(
            tiller_core::swf::WorkflowExecutionSignaledEventAttributes {
                signal_name: ACTIVITY_UPDATED_SIGNAL.to_string(),
                input: Some(serde_json::to_string(&state).unwrap()),
                external_initiated_event_id: None,
                external_workflow_execution: None,
            },
        ));

        let data: TestData = ctx.event_data(&event);
        assert_eq!(data.steps, vec!["b".to_string()]);
    }

    #[test]
    #[should_panic(expected = "event payload was empty")]
    fn test_event_data_panics_on_missing_payload() {
        let ctx = test_context();
        let event = HistoryEvent::new(4, EventType::TimerFired);
        let _: TestData = ctx.event_data(&event);
    }
}
