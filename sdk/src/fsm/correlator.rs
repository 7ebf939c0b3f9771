//! Event correlation across a workflow's history.
//!
//! The service's history tells you *that* an activity completed, but only by
//! the event id that scheduled it. The correlator is the missing index: it
//! tracks outstanding activities, signals, timers, cancellations, and child
//! workflows keyed by their initiating event id, plus per-id attempt counts
//! for everything that failed. It is persisted wholesale as the
//! `FSM.Correlator` marker, so every field must survive a serde round trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tiller_core::serializer::StateSerializer;
use tiller_core::swf::{ActivityType, EventType, HistoryEvent, WorkflowType};

use crate::fsm::models::{
    SerializedActivityState, ACTIVITY_STARTED_SIGNAL, ACTIVITY_UPDATED_SIGNAL,
};

/// The id and type of an outstanding activity task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    #[serde(rename = "ActivityId")]
    pub activity_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Version", default)]
    pub version: String,
}

impl ActivityInfo {
    pub fn activity_type(&self) -> ActivityType {
        ActivityType {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// The name and target of an outstanding external-workflow signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    #[serde(rename = "SignalName")]
    pub signal_name: String,
    #[serde(rename = "WorkflowId")]
    pub workflow_id: String,
}

/// The id and control data of an outstanding timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerInfo {
    #[serde(rename = "Control", default)]
    pub control: String,
    #[serde(rename = "TimerId")]
    pub timer_id: String,
}

/// The target of an outstanding external-workflow cancellation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancellationInfo {
    #[serde(rename = "WorkflowId")]
    pub workflow_id: String,
}

/// The id and type of an outstanding child workflow start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildInfo {
    #[serde(rename = "WorkflowId")]
    pub workflow_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Version", default)]
    pub version: String,
}

impl ChildInfo {
    pub fn workflow_type(&self) -> WorkflowType {
        WorkflowType {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Correlation tables and attempt counters for one workflow execution.
///
/// A default-constructed correlator is valid and empty; the runtime only
/// touches it inside a single tick, so no locking is involved.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EventCorrelator {
    #[serde(rename = "Activities", default)]
    pub activities: HashMap<String, ActivityInfo>,
    #[serde(rename = "ActivityAttempts", default)]
    pub activity_attempts: HashMap<String, u32>,
    #[serde(rename = "Signals", default)]
    pub signals: HashMap<String, SignalInfo>,
    #[serde(rename = "SignalAttempts", default)]
    pub signal_attempts: HashMap<String, u32>,
    #[serde(rename = "Timers", default)]
    pub timers: HashMap<String, TimerInfo>,
    #[serde(rename = "Cancellations", default)]
    pub cancellations: HashMap<String, CancellationInfo>,
    #[serde(rename = "CancelationAttempts", default)]
    pub cancelation_attempts: HashMap<String, u32>,
    #[serde(rename = "Children", default)]
    pub children: HashMap<String, ChildInfo>,
    #[serde(rename = "ChildrenAttempts", default)]
    pub children_attempts: HashMap<String, u32>,
    /// Event id whose attempt counter should be dropped instead of bumped on
    /// the next removal; lets deciders forgive a prior failure.
    #[serde(skip)]
    to_forget: Option<i64>,
    #[serde(skip)]
    pub(crate) serializer: Option<Arc<dyn StateSerializer>>,
}

impl std::fmt::Debug for EventCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCorrelator")
            .field("activities", &self.activities)
            .field("activity_attempts", &self.activity_attempts)
            .field("signals", &self.signals)
            .field("signal_attempts", &self.signal_attempts)
            .field("timers", &self.timers)
            .field("cancellations", &self.cancellations)
            .field("cancelation_attempts", &self.cancelation_attempts)
            .field("children", &self.children)
            .field("children_attempts", &self.children_attempts)
            .field("to_forget", &self.to_forget)
            .finish()
    }
}

impl PartialEq for EventCorrelator {
    fn eq(&self, other: &Self) -> bool {
        self.activities == other.activities
            && self.activity_attempts == other.activity_attempts
            && self.signals == other.signals
            && self.signal_attempts == other.signal_attempts
            && self.timers == other.timers
            && self.cancellations == other.cancellations
            && self.cancelation_attempts == other.cancelation_attempts
            && self.children == other.children
            && self.children_attempts == other.children_attempts
    }
}

impl EventCorrelator {
    /// Add or remove correlations based on the event type: removals for
    /// terminal events first (so attempt counters can read the outstanding
    /// record before it goes away), then additions for initiating events.
    pub fn track(&mut self, event: &HistoryEvent) {
        self.remove_correlation(event);
        self.correlate(event);
    }

    /// Record the outstanding operation an initiating event opens.
    pub fn correlate(&mut self, event: &HistoryEvent) {
        match event.event_type {
            EventType::ActivityTaskScheduled => {
                if let Some(attrs) = &event.activity_task_scheduled_event_attributes {
                    self.activities.insert(
                        key(event.event_id),
                        ActivityInfo {
                            activity_id: attrs.activity_id.clone(),
                            name: attrs.activity_type.name.clone(),
                            version: attrs.activity_type.version.clone(),
                        },
                    );
                }
            }
            EventType::SignalExternalWorkflowExecutionInitiated => {
                if let Some(attrs) = &event.signal_external_workflow_execution_initiated_event_attributes {
                    self.signals.insert(
                        key(event.event_id),
                        SignalInfo {
                            signal_name: attrs.signal_name.clone(),
                            workflow_id: attrs.workflow_id.clone(),
                        },
                    );
                }
            }
            EventType::RequestCancelExternalWorkflowExecutionInitiated => {
                if let Some(attrs) =
                    &event.request_cancel_external_workflow_execution_initiated_event_attributes
                {
                    self.cancellations.insert(
                        key(event.event_id),
                        CancellationInfo {
                            workflow_id: attrs.workflow_id.clone(),
                        },
                    );
                }
            }
            EventType::TimerStarted => {
                if let Some(attrs) = &event.timer_started_event_attributes {
                    self.timers.insert(
                        key(event.event_id),
                        TimerInfo {
                            control: attrs.control.clone().unwrap_or_default(),
                            timer_id: attrs.timer_id.clone(),
                        },
                    );
                }
            }
            EventType::StartChildWorkflowExecutionInitiated => {
                if let Some(attrs) = &event.start_child_workflow_execution_initiated_event_attributes {
                    self.children.insert(
                        key(event.event_id),
                        ChildInfo {
                            workflow_id: attrs.workflow_id.clone(),
                            name: attrs.workflow_type.name.clone(),
                            version: attrs.workflow_type.version.clone(),
                        },
                    );
                }
            }
            _ => {}
        }
    }

    /// Clear the outstanding record a terminal event closes, bumping the
    /// matching attempt counter first when the terminal is a failure.
    pub fn remove_correlation(&mut self, event: &HistoryEvent) {
        match event.event_type {
            EventType::ActivityTaskCompleted | EventType::ActivityTaskCanceled => {
                let id = self.safe_activity_id(event);
                self.activity_attempts.remove(&id);
                self.activities.remove(&self.get_id(event));
            }
            EventType::ActivityTaskFailed | EventType::ActivityTaskTimedOut => {
                self.increment_activity_attempts(event);
                self.activities.remove(&self.get_id(event));
            }
            EventType::ExternalWorkflowExecutionSignaled => {
                let k = self.get_id(event);
                if let Some(info) = self.signals.get(&k) {
                    let attempt_key = signal_id_from_info(info);
                    self.signal_attempts.remove(&attempt_key);
                }
                self.signals.remove(&k);
            }
            EventType::SignalExternalWorkflowExecutionFailed => {
                self.increment_signal_attempts(event);
                self.signals.remove(&self.get_id(event));
            }
            EventType::TimerFired | EventType::TimerCanceled => {
                self.timers.remove(&self.get_id(event));
            }
            EventType::RequestCancelExternalWorkflowExecutionFailed => {
                self.increment_cancellation_attempts(event);
                self.cancellations.remove(&self.get_id(event));
            }
            EventType::ExternalWorkflowExecutionCancelRequested => {
                let k = self.get_id(event);
                if let Some(info) = self.cancellations.get(&k) {
                    let workflow_id = info.workflow_id.clone();
                    self.cancelation_attempts.remove(&workflow_id);
                }
                self.cancellations.remove(&k);
            }
            EventType::StartChildWorkflowExecutionFailed => {
                self.increment_child_attempts(event);
                self.children.remove(&self.get_id(event));
            }
            EventType::ChildWorkflowExecutionStarted => {
                let k = self.get_id(event);
                if let Some(info) = self.children.get(&k) {
                    let workflow_id = info.workflow_id.clone();
                    self.children_attempts.remove(&workflow_id);
                }
                self.children.remove(&k);
            }
            _ => {}
        }
    }

    /// Mark an event so its next attempt-counter bump deletes the counter
    /// instead, once recovery for the prior failure has been applied.
    pub fn forget_correlation(&mut self, event: &HistoryEvent) {
        self.to_forget = Some(event.event_id);
    }

    /// The outstanding activity a terminal activity event refers to.
    pub fn activity_info(&self, event: &HistoryEvent) -> Option<&ActivityInfo> {
        self.activities.get(&self.get_id(event))
    }

    /// The outstanding signal a signal terminal event refers to.
    pub fn signal_info(&self, event: &HistoryEvent) -> Option<&SignalInfo> {
        self.signals.get(&self.get_id(event))
    }

    pub fn timer_info(&self, event: &HistoryEvent) -> Option<&TimerInfo> {
        self.timers.get(&self.get_id(event))
    }

    /// Whether a timer with the given id is currently outstanding.
    pub fn timer_scheduled(&self, timer_id: &str) -> bool {
        self.timers.values().any(|t| t.timer_id == timer_id)
    }

    pub fn cancellation_info(&self, event: &HistoryEvent) -> Option<&CancellationInfo> {
        self.cancellations.get(&self.get_id(event))
    }

    pub fn child_info(&self, event: &HistoryEvent) -> Option<&ChildInfo> {
        self.children.get(&self.get_id(event))
    }

    /// How many times the given activity has failed or timed out; 0 once it
    /// completes or is canceled.
    pub fn attempts_for_activity(&self, info: &ActivityInfo) -> u32 {
        self.activity_attempts
            .get(&info.activity_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn attempts_for_signal(&self, info: &SignalInfo) -> u32 {
        self.signal_attempts
            .get(&signal_id_from_info(info))
            .copied()
            .unwrap_or(0)
    }

    pub fn attempts_for_cancellation(&self, info: &CancellationInfo) -> u32 {
        if info.workflow_id.is_empty() {
            return 0;
        }
        self.cancelation_attempts
            .get(&info.workflow_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn attempts_for_child(&self, info: &ChildInfo) -> u32 {
        if info.workflow_id.is_empty() {
            return 0;
        }
        self.children_attempts
            .get(&info.workflow_id)
            .copied()
            .unwrap_or(0)
    }

    /// The correlation key an event refers to, usually the stringified
    /// scheduled or initiated event id. Unknown event types yield "".
    pub(crate) fn get_id(&self, event: &HistoryEvent) -> String {
        match event.event_type {
            EventType::ActivityTaskCompleted => event
                .activity_task_completed_event_attributes
                .as_ref()
                .map(|a| key(a.scheduled_event_id)),
            EventType::ActivityTaskFailed => event
                .activity_task_failed_event_attributes
                .as_ref()
                .map(|a| key(a.scheduled_event_id)),
            EventType::ActivityTaskTimedOut => event
                .activity_task_timed_out_event_attributes
                .as_ref()
                .map(|a| key(a.scheduled_event_id)),
            EventType::ActivityTaskCanceled => event
                .activity_task_canceled_event_attributes
                .as_ref()
                .map(|a| key(a.scheduled_event_id)),
            EventType::ActivityTaskStarted => event
                .activity_task_started_event_attributes
                .as_ref()
                .map(|a| key(a.scheduled_event_id)),
            EventType::ExternalWorkflowExecutionSignaled => event
                .external_workflow_execution_signaled_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            EventType::SignalExternalWorkflowExecutionFailed => event
                .signal_external_workflow_execution_failed_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            EventType::RequestCancelExternalWorkflowExecutionFailed => event
                .request_cancel_external_workflow_execution_failed_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            EventType::ExternalWorkflowExecutionCancelRequested => event
                .external_workflow_execution_cancel_requested_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            EventType::TimerFired => event
                .timer_fired_event_attributes
                .as_ref()
                .map(|a| key(a.started_event_id)),
            EventType::TimerCanceled => event
                .timer_canceled_event_attributes
                .as_ref()
                .map(|a| key(a.started_event_id)),
            EventType::WorkflowExecutionSignaled => event
                .workflow_execution_signaled_event_attributes
                .as_ref()
                .and_then(|a| match a.signal_name.as_str() {
                    ACTIVITY_STARTED_SIGNAL | ACTIVITY_UPDATED_SIGNAL => a
                        .input
                        .as_ref()
                        .and_then(|input| self.deserialize_activity_state(input))
                        .map(|state| state.activity_id),
                    _ => a.external_initiated_event_id.map(key),
                }),
            EventType::ChildWorkflowExecutionStarted => event
                .child_workflow_execution_started_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            EventType::StartChildWorkflowExecutionFailed => event
                .start_child_workflow_execution_failed_event_attributes
                .as_ref()
                .map(|a| key(a.initiated_event_id)),
            _ => None,
        }
        .unwrap_or_default()
    }

    fn deserialize_activity_state(&self, input: &str) -> Option<SerializedActivityState> {
        match &self.serializer {
            Some(serializer) => serializer.as_ref().deserialize(input).ok(),
            None => serde_json::from_str(input).ok(),
        }
    }

    fn safe_activity_id(&self, event: &HistoryEvent) -> String {
        self.activities
            .get(&self.get_id(event))
            .map(|info| info.activity_id.clone())
            .unwrap_or_default()
    }

    fn safe_signal_id(&self, event: &HistoryEvent) -> String {
        self.signals
            .get(&self.get_id(event))
            .map(signal_id_from_info)
            .unwrap_or_default()
    }

    fn safe_cancellation_id(&self, event: &HistoryEvent) -> String {
        self.cancellations
            .get(&self.get_id(event))
            .map(|info| info.workflow_id.clone())
            .unwrap_or_default()
    }

    fn safe_child_id(&self, event: &HistoryEvent) -> String {
        self.children
            .get(&self.get_id(event))
            .map(|info| info.workflow_id.clone())
            .unwrap_or_default()
    }

    fn increment_activity_attempts(&mut self, event: &HistoryEvent) {
        let id = self.safe_activity_id(event);
        if self.forgets(event) {
            self.activity_attempts.remove(&id);
            return;
        }
        if !id.is_empty() {
            *self.activity_attempts.entry(id).or_insert(0) += 1;
        }
    }

    fn increment_signal_attempts(&mut self, event: &HistoryEvent) {
        let id = self.safe_signal_id(event);
        if self.forgets(event) {
            self.signal_attempts.remove(&id);
            return;
        }
        if !id.is_empty() {
            *self.signal_attempts.entry(id).or_insert(0) += 1;
        }
    }

    fn increment_cancellation_attempts(&mut self, event: &HistoryEvent) {
        let id = self.safe_cancellation_id(event);
        if self.forgets(event) {
            self.cancelation_attempts.remove(&id);
            return;
        }
        if !id.is_empty() {
            *self.cancelation_attempts.entry(id).or_insert(0) += 1;
        }
    }

    fn increment_child_attempts(&mut self, event: &HistoryEvent) {
        let id = self.safe_child_id(event);
        if self.forgets(event) {
            self.children_attempts.remove(&id);
            return;
        }
        if !id.is_empty() {
            *self.children_attempts.entry(id).or_insert(0) += 1;
        }
    }

    fn forgets(&mut self, event: &HistoryEvent) -> bool {
        if self.to_forget == Some(event.event_id) {
            self.to_forget = None;
            true
        } else {
            false
        }
    }
}

fn key(event_id: i64) -> String {
    event_id.to_string()
}

fn signal_id_from_info(info: &SignalInfo) -> String {
    format!("{}->{}", info.signal_name, info.workflow_id)
}
