//! Decisions returned from a decision task.
//!
//! A decision is the decider's side of the conversation: schedule work, start
//! timers, signal other executions, record markers, or close the workflow.
//! Like history events, the struct is flat with one optional attribute record
//! per decision kind, matching the wire shape.

use serde::{Deserialize, Serialize};

use super::requests::{ActivityType, TaskList, WorkflowType};

/// Decision types, serialized to the exact wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionType {
    ScheduleActivityTask,
    RequestCancelActivityTask,
    CompleteWorkflowExecution,
    FailWorkflowExecution,
    CancelWorkflowExecution,
    ContinueAsNewWorkflowExecution,
    RecordMarker,
    StartTimer,
    CancelTimer,
    SignalExternalWorkflowExecution,
    RequestCancelExternalWorkflowExecution,
    StartChildWorkflowExecution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleActivityTaskDecisionAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_list: Option<TaskList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_to_close_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_to_start_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_to_close_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancelActivityTaskDecisionAttributes {
    pub activity_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteWorkflowExecutionDecisionAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailWorkflowExecutionDecisionAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelWorkflowExecutionDecisionAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueAsNewWorkflowExecutionDecisionAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_list: Option<TaskList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_type_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMarkerDecisionAttributes {
    pub marker_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTimerDecisionAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTimerDecisionAttributes {
    pub timer_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalExternalWorkflowExecutionDecisionAttributes {
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
pub struct RequestCancelExternalWorkflowExecutionDecisionAttributes {
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChildWorkflowExecutionDecisionAttributes {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_list: Option<TaskList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

/// One decision in the list returned from a decision task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub decision_type: DecisionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_activity_task_decision_attributes:
        Option<ScheduleActivityTaskDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_cancel_activity_task_decision_attributes:
        Option<RequestCancelActivityTaskDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_workflow_execution_decision_attributes:
        Option<CompleteWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_workflow_execution_decision_attributes:
        Option<FailWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_workflow_execution_decision_attributes:
        Option<CancelWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_as_new_workflow_execution_decision_attributes:
        Option<ContinueAsNewWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_marker_decision_attributes: Option<RecordMarkerDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timer_decision_attributes: Option<StartTimerDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_timer_decision_attributes: Option<CancelTimerDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_external_workflow_execution_decision_attributes:
        Option<SignalExternalWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_cancel_external_workflow_execution_decision_attributes:
        Option<RequestCancelExternalWorkflowExecutionDecisionAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_child_workflow_execution_decision_attributes:
        Option<StartChildWorkflowExecutionDecisionAttributes>,
}

impl Decision {
    fn bare(decision_type: DecisionType) -> Self {
        Decision {
            decision_type,
            schedule_activity_task_decision_attributes: None,
            request_cancel_activity_task_decision_attributes: None,
            complete_workflow_execution_decision_attributes: None,
            fail_workflow_execution_decision_attributes: None,
            cancel_workflow_execution_decision_attributes: None,
            continue_as_new_workflow_execution_decision_attributes: None,
            record_marker_decision_attributes: None,
            start_timer_decision_attributes: None,
            cancel_timer_decision_attributes: None,
            signal_external_workflow_execution_decision_attributes: None,
            request_cancel_external_workflow_execution_decision_attributes: None,
            start_child_workflow_execution_decision_attributes: None,
        }
    }

    pub fn record_marker(marker_name: impl Into<String>, details: impl Into<String>) -> Self {
        let mut d = Decision::bare(DecisionType::RecordMarker);
        d.record_marker_decision_attributes = Some(RecordMarkerDecisionAttributes {
            marker_name: marker_name.into(),
            details: Some(details.into()),
        });
        d
    }

    pub fn schedule_activity_task(
        activity_id: impl Into<String>,
        activity_type: ActivityType,
        input: Option<String>,
    ) -> Self {
        let mut d = Decision::bare(DecisionType::ScheduleActivityTask);
        d.schedule_activity_task_decision_attributes =
            Some(ScheduleActivityTaskDecisionAttributes {
                activity_id: activity_id.into(),
                activity_type,
                input,
                ..Default::default()
            });
        d
    }

    pub fn request_cancel_activity_task(activity_id: impl Into<String>) -> Self {
        let mut d = Decision::bare(DecisionType::RequestCancelActivityTask);
        d.request_cancel_activity_task_decision_attributes =
            Some(RequestCancelActivityTaskDecisionAttributes {
                activity_id: activity_id.into(),
            });
        d
    }

    pub fn complete_workflow_execution(result: Option<String>) -> Self {
        let mut d = Decision::bare(DecisionType::CompleteWorkflowExecution);
        d.complete_workflow_execution_decision_attributes =
            Some(CompleteWorkflowExecutionDecisionAttributes { result });
        d
    }

    pub fn fail_workflow_execution(reason: Option<String>, details: Option<String>) -> Self {
        let mut d = Decision::bare(DecisionType::FailWorkflowExecution);
        d.fail_workflow_execution_decision_attributes =
            Some(FailWorkflowExecutionDecisionAttributes { reason, details });
        d
    }

    pub fn cancel_workflow_execution(details: Option<String>) -> Self {
        let mut d = Decision::bare(DecisionType::CancelWorkflowExecution);
        d.cancel_workflow_execution_decision_attributes =
            Some(CancelWorkflowExecutionDecisionAttributes { details });
        d
    }

    pub fn continue_as_new_workflow_execution(input: Option<String>) -> Self {
        let mut d = Decision::bare(DecisionType::ContinueAsNewWorkflowExecution);
        d.continue_as_new_workflow_execution_decision_attributes =
            Some(ContinueAsNewWorkflowExecutionDecisionAttributes {
                input,
                ..Default::default()
            });
        d
    }

    pub fn start_timer(timer_id: impl Into<String>, start_to_fire_timeout_seconds: u64) -> Self {
        let mut d = Decision::bare(DecisionType::StartTimer);
        d.start_timer_decision_attributes = Some(StartTimerDecisionAttributes {
            timer_id: timer_id.into(),
            start_to_fire_timeout: start_to_fire_timeout_seconds.to_string(),
            control: None,
        });
        d
    }

    pub fn cancel_timer(timer_id: impl Into<String>) -> Self {
        let mut d = Decision::bare(DecisionType::CancelTimer);
        d.cancel_timer_decision_attributes = Some(CancelTimerDecisionAttributes {
            timer_id: timer_id.into(),
        });
        d
    }

    pub fn signal_external_workflow_execution(
        workflow_id: impl Into<String>,
        signal_name: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        let mut d = Decision::bare(DecisionType::SignalExternalWorkflowExecution);
        d.signal_external_workflow_execution_decision_attributes =
            Some(SignalExternalWorkflowExecutionDecisionAttributes {
                workflow_id: workflow_id.into(),
                signal_name: signal_name.into(),
                run_id: None,
                input,
                control: None,
            });
        d
    }

    pub fn request_cancel_external_workflow_execution(workflow_id: impl Into<String>) -> Self {
        let mut d = Decision::bare(DecisionType::RequestCancelExternalWorkflowExecution);
        d.request_cancel_external_workflow_execution_decision_attributes =
            Some(RequestCancelExternalWorkflowExecutionDecisionAttributes {
                workflow_id: workflow_id.into(),
                run_id: None,
                control: None,
            });
        d
    }

    pub fn start_child_workflow_execution(
        workflow_id: impl Into<String>,
        workflow_type: WorkflowType,
        input: Option<String>,
    ) -> Self {
        let mut d = Decision::bare(DecisionType::StartChildWorkflowExecution);
        d.start_child_workflow_execution_decision_attributes =
            Some(StartChildWorkflowExecutionDecisionAttributes {
                workflow_id: workflow_id.into(),
                workflow_type,
                input,
                task_list: None,
                control: None,
            });
        d
    }

    /// Marker name when this is a `RecordMarker` decision.
    pub fn marker_name(&self) -> Option<&str> {
        self.record_marker_decision_attributes
            .as_ref()
            .map(|a| a.marker_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_type_wire_strings() {
        assert_eq!(
            serde_json::to_string(&DecisionType::RecordMarker).unwrap(),
            "\"RecordMarker\""
        );
        assert_eq!(
            serde_json::to_string(&DecisionType::ContinueAsNewWorkflowExecution).unwrap(),
            "\"ContinueAsNewWorkflowExecution\""
        );
    }

    #[test]
    fn test_record_marker_shape() {
        let d = Decision::record_marker("FSM.State", "{\"stateVersion\":1}");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decisionType"], "RecordMarker");
        assert_eq!(json["recordMarkerDecisionAttributes"]["markerName"], "FSM.State");
        assert!(json.get("startTimerDecisionAttributes").is_none());
        assert_eq!(d.marker_name(), Some("FSM.State"));
    }

    #[test]
    fn test_start_timer_timeout_is_stringly() {
        let d = Decision::start_timer("FSM.ContinueWorkflow", 86400);
        let attrs = d.start_timer_decision_attributes.unwrap();
        assert_eq!(attrs.start_to_fire_timeout, "86400");
    }

    #[test]
    fn test_schedule_activity_round_trip() {
        let d = Decision::schedule_activity_task(
            "A1",
            ActivityType {
                name: "resize-image".to_string(),
                version: "1".to_string(),
            },
            Some("{\"w\":100}".to_string()),
        );
        let json = serde_json::to_string(&d).unwrap();
        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
