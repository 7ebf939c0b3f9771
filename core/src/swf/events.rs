//! Workflow history events.
//!
//! History events are the append-only record the service keeps per workflow
//! execution. Each event carries exactly one attribute record matching its
//! type; the rest of the attribute fields are absent on the wire. Events are
//! treated as immutable input everywhere in this codebase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::requests::{ActivityType, WorkflowExecution, WorkflowType};

/// Event types, serialized to the exact wire strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionContinuedAsNew,
    WorkflowExecutionSignaled,
    WorkflowExecutionTimedOut,
    WorkflowExecutionTerminated,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCanceled,
    ActivityTaskCancelRequested,
    MarkerRecorded,
    RecordMarkerFailed,
    TimerStarted,
    TimerFired,
    TimerCanceled,
    StartTimerFailed,
    CancelTimerFailed,
    SignalExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionSignaled,
    RequestCancelExternalWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionCancelRequested,
    StartChildWorkflowExecutionInitiated,
    StartChildWorkflowExecutionFailed,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
    ChildWorkflowExecutionTimedOut,
    ChildWorkflowExecutionCanceled,
    ChildWorkflowExecutionTerminated,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionStartedEventAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continued_execution_run_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionCancelRequestedEventAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionCompletedEventAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionContinuedAsNewEventAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_execution_run_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionSignaledEventAttributes {
    pub signal_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_initiated_event_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_workflow_execution: Option<WorkflowExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRecordedEventAttributes {
    pub marker_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskScheduledEventAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskStartedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskCompletedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskFailedEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskTimedOutEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskCanceledEventAttributes {
    pub scheduled_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTaskCancelRequestedEventAttributes {
    pub activity_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStartedEventAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerFiredEventAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerCanceledEventAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalExternalWorkflowExecutionInitiatedEventAttributes {
    pub workflow_id: String,
    pub signal_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalExternalWorkflowExecutionFailedEventAttributes {
    pub initiated_event_id: i64,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalWorkflowExecutionSignaledEventAttributes {
    pub initiated_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution: Option<WorkflowExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancelExternalWorkflowExecutionInitiatedEventAttributes {
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancelExternalWorkflowExecutionFailedEventAttributes {
    pub initiated_event_id: i64,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalWorkflowExecutionCancelRequestedEventAttributes {
    pub initiated_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution: Option<WorkflowExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChildWorkflowExecutionInitiatedEventAttributes {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChildWorkflowExecutionFailedEventAttributes {
    pub initiated_event_id: i64,
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowExecutionStartedEventAttributes {
    pub initiated_event_id: i64,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowExecutionCompletedEventAttributes {
    pub initiated_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution: Option<WorkflowExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowExecutionFailedEventAttributes {
    pub initiated_event_id: i64,
    #[serde(default)]
    pub started_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution: Option<WorkflowExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A single entry in a workflow execution's history.
///
/// Exactly one of the `*_event_attributes` fields is populated, matching
/// `event_type`. The struct is kept flat (rather than an attribute enum) so
/// it round-trips the wire shape byte-for-byte and so framework payloads that
/// embed whole events (the error marker) stay readable in history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_started_event_attributes:
        Option<Box<WorkflowExecutionStartedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_cancel_requested_event_attributes:
        Option<Box<WorkflowExecutionCancelRequestedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_completed_event_attributes:
        Option<Box<WorkflowExecutionCompletedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_continued_as_new_event_attributes:
        Option<Box<WorkflowExecutionContinuedAsNewEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_signaled_event_attributes:
        Option<Box<WorkflowExecutionSignaledEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_recorded_event_attributes: Option<Box<MarkerRecordedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_scheduled_event_attributes:
        Option<Box<ActivityTaskScheduledEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_started_event_attributes: Option<Box<ActivityTaskStartedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_completed_event_attributes:
        Option<Box<ActivityTaskCompletedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_failed_event_attributes: Option<Box<ActivityTaskFailedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_timed_out_event_attributes:
        Option<Box<ActivityTaskTimedOutEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_canceled_event_attributes: Option<Box<ActivityTaskCanceledEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_task_cancel_requested_event_attributes:
        Option<Box<ActivityTaskCancelRequestedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_started_event_attributes: Option<Box<TimerStartedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_fired_event_attributes: Option<Box<TimerFiredEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_canceled_event_attributes: Option<Box<TimerCanceledEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_external_workflow_execution_initiated_event_attributes:
        Option<Box<SignalExternalWorkflowExecutionInitiatedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_external_workflow_execution_failed_event_attributes:
        Option<Box<SignalExternalWorkflowExecutionFailedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_workflow_execution_signaled_event_attributes:
        Option<Box<ExternalWorkflowExecutionSignaledEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_cancel_external_workflow_execution_initiated_event_attributes:
        Option<Box<RequestCancelExternalWorkflowExecutionInitiatedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_cancel_external_workflow_execution_failed_event_attributes:
        Option<Box<RequestCancelExternalWorkflowExecutionFailedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_workflow_execution_cancel_requested_event_attributes:
        Option<Box<ExternalWorkflowExecutionCancelRequestedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_child_workflow_execution_initiated_event_attributes:
        Option<Box<StartChildWorkflowExecutionInitiatedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_child_workflow_execution_failed_event_attributes:
        Option<Box<StartChildWorkflowExecutionFailedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_workflow_execution_started_event_attributes:
        Option<Box<ChildWorkflowExecutionStartedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_workflow_execution_completed_event_attributes:
        Option<Box<ChildWorkflowExecutionCompletedEventAttributes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_workflow_execution_failed_event_attributes:
        Option<Box<ChildWorkflowExecutionFailedEventAttributes>>,
}

impl HistoryEvent {
    /// A bare event with just an id and type; attributes are attached by the
    /// caller (mostly test builders).
    pub fn new(event_id: i64, event_type: EventType) -> Self {
        HistoryEvent {
            event_id,
            event_type,
            ..Default::default()
        }
    }

    /// True when this event is a `MarkerRecorded` carrying the given marker name.
    pub fn is_marker(&self, marker_name: &str) -> bool {
        self.event_type == EventType::MarkerRecorded
            && self
                .marker_recorded_event_attributes
                .as_ref()
                .map(|a| a.marker_name == marker_name)
                .unwrap_or(false)
    }
}
