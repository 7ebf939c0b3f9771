//! Hooks around decision handling, plus the stock interceptors.
//!
//! Interceptors compose: each sees the task before the tick, the outcome
//! before events are folded, and the outcome after, and may rewrite the
//! decision list, data, or next state in place.

use std::collections::HashMap;
use std::sync::Arc;

use tiller_core::swf::{Decision, DecisionTask, DecisionType, EventType};

use crate::fsm::context::FsmContext;
use crate::fsm::models::{FsmData, Outcome, CONTINUE_SIGNAL, CONTINUE_TIMER};

/// Manipulates the decision task and the outcome at key points in the task
/// lifecycle. All methods default to no-ops.
pub trait DecisionInterceptor<T>: Send + Sync {
    fn before_task(&self, _task: &DecisionTask) {}
    fn before_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, _outcome: &mut Outcome<T>) {
    }
    fn after_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, _outcome: &mut Outcome<T>) {
    }
}

type BeforeTaskFn = Box<dyn Fn(&DecisionTask) + Send + Sync>;
type DecisionFn<T> = Box<dyn Fn(&DecisionTask, &mut FsmContext, &mut Outcome<T>) + Send + Sync>;

/// Interceptor built from optional closures; unset hooks are no-ops.
pub struct FuncInterceptor<T> {
    pub before_task_fn: Option<BeforeTaskFn>,
    pub before_decision_fn: Option<DecisionFn<T>>,
    pub after_decision_fn: Option<DecisionFn<T>>,
}

impl<T> Default for FuncInterceptor<T> {
    fn default() -> Self {
        FuncInterceptor {
            before_task_fn: None,
            before_decision_fn: None,
            after_decision_fn: None,
        }
    }
}

impl<T: FsmData> DecisionInterceptor<T> for FuncInterceptor<T> {
    fn before_task(&self, task: &DecisionTask) {
        if let Some(f) = &self.before_task_fn {
            f(task);
        }
    }

    fn before_decision(&self, task: &DecisionTask, ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        if let Some(f) = &self.before_decision_fn {
            f(task, ctx, outcome);
        }
    }

    fn after_decision(&self, task: &DecisionTask, ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        if let Some(f) = &self.after_decision_fn {
            f(task, ctx, outcome);
        }
    }
}

/// Runs a list of interceptors in order at every hook.
pub struct ComposedDecisionInterceptor<T> {
    interceptors: Vec<Arc<dyn DecisionInterceptor<T>>>,
}

impl<T> ComposedDecisionInterceptor<T> {
    pub fn new(interceptors: Vec<Arc<dyn DecisionInterceptor<T>>>) -> Self {
        ComposedDecisionInterceptor { interceptors }
    }
}

impl<T: FsmData> DecisionInterceptor<T> for ComposedDecisionInterceptor<T> {
    fn before_task(&self, task: &DecisionTask) {
        for interceptor in &self.interceptors {
            interceptor.before_task(task);
        }
    }

    fn before_decision(&self, task: &DecisionTask, ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        for interceptor in &self.interceptors {
            interceptor.before_decision(task, ctx, outcome);
        }
    }

    fn after_decision(&self, task: &DecisionTask, ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        for interceptor in &self.interceptors {
            interceptor.after_decision(task, ctx, outcome);
        }
    }
}

const CLOSE_DECISION_TYPES: [DecisionType; 4] = [
    DecisionType::CompleteWorkflowExecution,
    DecisionType::FailWorkflowExecution,
    DecisionType::CancelWorkflowExecution,
    DecisionType::ContinueAsNewWorkflowExecution,
];

fn is_close_decision(decision: &Decision) -> bool {
    CLOSE_DECISION_TYPES.contains(&decision.decision_type)
}

/// Keeps only the last of each close-decision kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DedupeWorkflowCloseDecisions;

impl<T: FsmData> DecisionInterceptor<T> for DedupeWorkflowCloseDecisions {
    fn after_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        let mut last_index: HashMap<DecisionType, usize> = HashMap::new();
        for (i, decision) in outcome.decisions.iter().enumerate() {
            if is_close_decision(decision) {
                last_index.insert(decision.decision_type, i);
            }
        }
        let mut i = 0;
        outcome.decisions.retain(|decision| {
            let keep = !is_close_decision(decision) || last_index[&decision.decision_type] == i;
            i += 1;
            keep
        });
    }
}

/// Moves close decisions to the end of the list, preserving relative order.
#[derive(Debug, Default, Clone, Copy)]
pub struct MoveWorkflowCloseDecisionsToEnd;

impl<T: FsmData> DecisionInterceptor<T> for MoveWorkflowCloseDecisionsToEnd {
    fn after_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        let (closes, mut rest): (Vec<Decision>, Vec<Decision>) = outcome
            .decisions
            .drain(..)
            .partition(is_close_decision);
        rest.extend(closes);
        outcome.decisions = rest;
    }
}

/// Keeps only the highest-priority close decision among the configured kinds.
/// The default priority is fail > complete > cancel.
#[derive(Debug, Clone)]
pub struct RemoveLowerPriorityDecisions {
    pub priority: Vec<DecisionType>,
}

impl Default for RemoveLowerPriorityDecisions {
    fn default() -> Self {
        RemoveLowerPriorityDecisions {
            priority: vec![
                DecisionType::FailWorkflowExecution,
                DecisionType::CompleteWorkflowExecution,
                DecisionType::CancelWorkflowExecution,
            ],
        }
    }
}

impl<T: FsmData> DecisionInterceptor<T> for RemoveLowerPriorityDecisions {
    fn after_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        let highest = self
            .priority
            .iter()
            .find(|t| outcome.decisions.iter().any(|d| d.decision_type == **t))
            .copied();
        let Some(highest) = highest else { return };
        outcome.decisions.retain(|d| {
            d.decision_type == highest || !self.priority.contains(&d.decision_type)
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StartCancelKind {
    Timer,
    Activity,
    Child,
}

fn start_id(decision: &Decision) -> Option<(StartCancelKind, &str)> {
    match decision.decision_type {
        DecisionType::StartTimer => decision
            .start_timer_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Timer, a.timer_id.as_str())),
        DecisionType::ScheduleActivityTask => decision
            .schedule_activity_task_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Activity, a.activity_id.as_str())),
        DecisionType::StartChildWorkflowExecution => decision
            .start_child_workflow_execution_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Child, a.workflow_id.as_str())),
        _ => None,
    }
}

fn cancel_id(decision: &Decision) -> Option<(StartCancelKind, &str)> {
    match decision.decision_type {
        DecisionType::CancelTimer => decision
            .cancel_timer_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Timer, a.timer_id.as_str())),
        DecisionType::RequestCancelActivityTask => decision
            .request_cancel_activity_task_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Activity, a.activity_id.as_str())),
        DecisionType::RequestCancelExternalWorkflowExecution => decision
            .request_cancel_external_workflow_execution_decision_attributes
            .as_ref()
            .map(|a| (StartCancelKind::Child, a.workflow_id.as_str())),
        _ => None,
    }
}

/// Removes start/cancel pairs that net out to nothing within a single tick: a
/// start of a timer, activity, or child workflow followed by a matching-id
/// cancel, with no other matching start in between. Mismatched ids, multiple
/// starts of the same id, and cancels without a start are left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct StartCancelElision;

impl StartCancelElision {
    fn elide(decisions: &mut Vec<Decision>) {
        let mut removed = vec![false; decisions.len()];
        for j in 0..decisions.len() {
            if removed[j] {
                continue;
            }
            let Some((kind, id)) = cancel_id(&decisions[j]) else {
                continue;
            };
            let matching: Vec<usize> = (0..j)
                .filter(|&i| {
                    !removed[i]
                        && start_id(&decisions[i])
                            .map(|(k, sid)| k == kind && sid == id)
                            .unwrap_or(false)
                })
                .collect();
            if matching.len() == 1 {
                removed[matching[0]] = true;
                removed[j] = true;
            }
        }
        let mut i = 0;
        decisions.retain(|_| {
            let keep = !removed[i];
            i += 1;
            keep
        });
    }
}

impl<T: FsmData> DecisionInterceptor<T> for StartCancelElision {
    fn after_decision(&self, _task: &DecisionTask, _ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        Self::elide(&mut outcome.decisions);
    }
}

/// Keeps workflow histories bounded by continuing the workflow as a new
/// execution once it gets old or its history gets long.
///
/// On workflow start a `FSM.ContinueWorkflow` timer is armed for
/// `age_seconds`. When that timer fires, when a signal of the same name
/// arrives, or when history has grown past `history_limit` events, the
/// workflow is continued as new, unless activities are outstanding, in which
/// case a retry timer of `retry_seconds` is armed instead.
#[derive(Debug, Clone, Copy)]
pub struct ManagedContinuations {
    pub history_limit: i64,
    pub age_seconds: u64,
    pub retry_seconds: u64,
}

impl ManagedContinuations {
    pub fn new(history_limit: i64, age_seconds: u64, retry_seconds: u64) -> Self {
        ManagedContinuations {
            history_limit,
            age_seconds,
            retry_seconds,
        }
    }

    fn continuation_triggered(&self, task: &DecisionTask) -> bool {
        task.events.iter().any(|event| {
            if event.event_id >= self.history_limit {
                return true;
            }
            match event.event_type {
                EventType::TimerFired => event
                    .timer_fired_event_attributes
                    .as_ref()
                    .map(|a| a.timer_id == CONTINUE_TIMER)
                    .unwrap_or(false),
                EventType::WorkflowExecutionSignaled => event
                    .workflow_execution_signaled_event_attributes
                    .as_ref()
                    .map(|a| a.signal_name == CONTINUE_SIGNAL)
                    .unwrap_or(false),
                _ => false,
            }
        })
    }
}

impl<T: FsmData> DecisionInterceptor<T> for ManagedContinuations {
    fn after_decision(&self, task: &DecisionTask, ctx: &mut FsmContext, outcome: &mut Outcome<T>) {
        if self.continuation_triggered(task) {
            if ctx.event_correlator.activities.is_empty() {
                tracing::info!(
                    workflow_id = %ctx.workflow_execution.workflow_id,
                    "no outstanding activities, continuing workflow"
                );
                let decision = ctx.continue_workflow_decision(&outcome.state, &outcome.data);
                outcome.decisions.push(decision);
            } else {
                tracing::info!(
                    workflow_id = %ctx.workflow_execution.workflow_id,
                    outstanding = ctx.event_correlator.activities.len(),
                    "activities outstanding, retrying continuation later"
                );
                outcome
                    .decisions
                    .push(Decision::start_timer(CONTINUE_TIMER, self.retry_seconds));
            }
            return;
        }

        let workflow_started = task
            .events
            .iter()
            .any(|e| e.event_type == EventType::WorkflowExecutionStarted);
        if workflow_started {
            outcome
                .decisions
                .push(Decision::start_timer(CONTINUE_TIMER, self.age_seconds));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::context::FsmSerialization;
    use crate::fsm::correlator::{ActivityInfo, EventCorrelator};
    use tiller_core::serializer::JsonStateSerializer;
    use tiller_core::swf::{
        ActivityType, HistoryEvent, TimerFiredEventAttributes, WorkflowExecution,
        WorkflowExecutionSignaledEventAttributes, WorkflowType,
    };

    fn test_context() -> FsmContext {
        FsmContext::new(
            Arc::new(FsmSerialization {
                serializer: Arc::new(JsonStateSerializer),
                system_serializer: Arc::new(JsonStateSerializer),
                initial_state: "start".to_string(),
            }),
            WorkflowType {
                name: "test".to_string(),
                version: "1".to_string(),
            },
            WorkflowExecution {
                workflow_id: "wf-1".to_string(),
                run_id: None,
            },
            EventCorrelator::default(),
            "state".to_string(),
            0,
        )
    }

    fn outcome_with(decisions: Vec<Decision>) -> Outcome<String> {
        Outcome {
            state: "state".to_string(),
            data: "data".to_string(),
            decisions,
        }
    }

    fn types(decisions: &[Decision]) -> Vec<DecisionType> {
        decisions.iter().map(|d| d.decision_type).collect()
    }

    #[test]
    fn test_dedupe_keeps_last_of_each_close_kind() {
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![
            Decision::complete_workflow_execution(Some("first".to_string())),
            Decision::start_timer("t", 1),
            Decision::cancel_workflow_execution(None),
            Decision::complete_workflow_execution(Some("second".to_string())),
        ]);

        DecisionInterceptor::<String>::after_decision(
            &DedupeWorkflowCloseDecisions,
            &DecisionTask::default(),
            &mut ctx,
            &mut outcome,
        );

        assert_eq!(
            types(&outcome.decisions),
            vec![
                DecisionType::StartTimer,
                DecisionType::CancelWorkflowExecution,
                DecisionType::CompleteWorkflowExecution,
            ]
        );
        // the surviving complete is the later one
        assert_eq!(
            outcome.decisions[2]
                .complete_workflow_execution_decision_attributes
                .as_ref()
                .unwrap()
                .result,
            Some("second".to_string())
        );
    }

    #[test]
    fn test_move_close_decisions_to_end() {
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![
            Decision::fail_workflow_execution(None, None),
            Decision::start_timer("t", 1),
            Decision::record_marker("m", "{}"),
        ]);

        DecisionInterceptor::<String>::after_decision(
            &MoveWorkflowCloseDecisionsToEnd,
            &DecisionTask::default(),
            &mut ctx,
            &mut outcome,
        );

        assert_eq!(
            types(&outcome.decisions),
            vec![
                DecisionType::StartTimer,
                DecisionType::RecordMarker,
                DecisionType::FailWorkflowExecution,
            ]
        );
    }

    #[test]
    fn test_priority_filter_keeps_highest() {
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![
            Decision::complete_workflow_execution(None),
            Decision::cancel_workflow_execution(None),
            Decision::fail_workflow_execution(None, None),
        ]);

        DecisionInterceptor::<String>::after_decision(
            &RemoveLowerPriorityDecisions::default(),
            &DecisionTask::default(),
            &mut ctx,
            &mut outcome,
        );

        assert_eq!(
            types(&outcome.decisions),
            vec![DecisionType::FailWorkflowExecution]
        );
    }

    #[test]
    fn test_default_chain_scenario() {
        // complete, cancel, fail, complete -> single fail
        let chain = crate::fsm::machine::Fsm::<String>::default_interceptor();
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![
            Decision::complete_workflow_execution(None),
            Decision::cancel_workflow_execution(None),
            Decision::fail_workflow_execution(None, None),
            Decision::complete_workflow_execution(None),
        ]);

        chain.after_decision(&DecisionTask::default(), &mut ctx, &mut outcome);

        assert_eq!(
            types(&outcome.decisions),
            vec![DecisionType::FailWorkflowExecution]
        );
    }

    #[test]
    fn test_start_cancel_elision_timer() {
        let mut decisions = vec![
            Decision::start_timer("t1", 10),
            Decision::record_marker("m", "{}"),
            Decision::cancel_timer("t1"),
        ];
        StartCancelElision::elide(&mut decisions);
        assert_eq!(types(&decisions), vec![DecisionType::RecordMarker]);
    }

    #[test]
    fn test_start_cancel_elision_activity_and_child() {
        let mut decisions = vec![
            Decision::schedule_activity_task(
                "a1",
                ActivityType {
                    name: "work".to_string(),
                    version: "1".to_string(),
                },
                None,
            ),
            Decision::request_cancel_activity_task("a1"),
            Decision::start_child_workflow_execution(
                "child-1",
                WorkflowType {
                    name: "child".to_string(),
                    version: "1".to_string(),
                },
                None,
            ),
            Decision::request_cancel_external_workflow_execution("child-1"),
        ];
        StartCancelElision::elide(&mut decisions);
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_start_cancel_elision_preserves_mismatches() {
        // differing ids
        let mut decisions = vec![Decision::start_timer("t1", 10), Decision::cancel_timer("t2")];
        StartCancelElision::elide(&mut decisions);
        assert_eq!(decisions.len(), 2);

        // multiple starts of the same id
        let mut decisions = vec![
            Decision::start_timer("t1", 10),
            Decision::start_timer("t1", 10),
            Decision::cancel_timer("t1"),
        ];
        StartCancelElision::elide(&mut decisions);
        assert_eq!(decisions.len(), 3);

        // cancel without a start
        let mut decisions = vec![Decision::cancel_timer("t1")];
        StartCancelElision::elide(&mut decisions);
        assert_eq!(decisions.len(), 1);

        // kinds do not cross-match: timer start is not an activity start
        let mut decisions = vec![
            Decision::start_timer("x", 10),
            Decision::request_cancel_activity_task("x"),
        ];
        StartCancelElision::elide(&mut decisions);
        assert_eq!(decisions.len(), 2);
    }

    fn continue_timer_fired_task() -> DecisionTask {
        let mut fired = HistoryEvent::new(2, EventType::TimerFired);
        fired.timer_fired_event_attributes = Some(Box::new(TimerFiredEventAttributes {
            timer_id: CONTINUE_TIMER.to_string(),
            started_event_id: 1,
        }));
        DecisionTask {
            events: vec![fired],
            previous_started_event_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_managed_continuations_arms_timer_on_start() {
        let interceptor = ManagedContinuations::new(1000, 86400, 10);
        let mut ctx = test_context();

        let task = DecisionTask {
            events: vec![HistoryEvent::new(1, EventType::WorkflowExecutionStarted)],
            previous_started_event_id: 0,
            ..Default::default()
        };
        let mut outcome = outcome_with(vec![]);

        DecisionInterceptor::<String>::after_decision(&interceptor, &task, &mut ctx, &mut outcome);

        assert_eq!(types(&outcome.decisions), vec![DecisionType::StartTimer]);
        let attrs = outcome.decisions[0]
            .start_timer_decision_attributes
            .as_ref()
            .unwrap();
        assert_eq!(attrs.timer_id, CONTINUE_TIMER);
        assert_eq!(attrs.start_to_fire_timeout, "86400");
    }

    #[test]
    fn test_managed_continuations_retries_while_activities_outstanding() {
        let interceptor = ManagedContinuations::new(1000, 86400, 10);
        let mut ctx = test_context();
        ctx.event_correlator.activities.insert(
            "1".to_string(),
            ActivityInfo {
                activity_id: "A1".to_string(),
                ..Default::default()
            },
        );

        let task = continue_timer_fired_task();
        let mut outcome = outcome_with(vec![]);
        DecisionInterceptor::<String>::after_decision(&interceptor, &task, &mut ctx, &mut outcome);

        let attrs = outcome.decisions[0]
            .start_timer_decision_attributes
            .as_ref()
            .unwrap();
        assert_eq!(attrs.timer_id, CONTINUE_TIMER);
        assert_eq!(attrs.start_to_fire_timeout, "10");
    }

    #[test]
    fn test_managed_continuations_continues_when_idle() {
        let interceptor = ManagedContinuations::new(1000, 86400, 10);
        let mut ctx = test_context();

        let task = continue_timer_fired_task();
        let mut outcome = outcome_with(vec![]);
        DecisionInterceptor::<String>::after_decision(&interceptor, &task, &mut ctx, &mut outcome);

        assert_eq!(
            types(&outcome.decisions),
            vec![DecisionType::ContinueAsNewWorkflowExecution]
        );
    }

    #[test]
    fn test_managed_continuations_signal_trigger() {
        let interceptor = ManagedContinuations::new(1000, 86400, 10);
        let mut ctx = test_context();

        let mut signaled = HistoryEvent::new(9, EventType::WorkflowExecutionSignaled);
        signaled.workflow_execution_signaled_event_attributes =
            Some(Box::new(WorkflowExecutionSignaledEventAttributes {
                signal_name: CONTINUE_SIGNAL.to_string(),
                input: None,
                external_initiated_event_id: None,
                external_workflow_execution: None,
            }));
        let task = DecisionTask {
            events: vec![signaled],
            previous_started_event_id: 7,
            ..Default::default()
        };

        let mut outcome = outcome_with(vec![]);
        DecisionInterceptor::<String>::after_decision(&interceptor, &task, &mut ctx, &mut outcome);

        assert_eq!(
            types(&outcome.decisions),
            vec![DecisionType::ContinueAsNewWorkflowExecution]
        );
    }

    #[test]
    fn test_managed_continuations_history_limit_trigger() {
        let interceptor = ManagedContinuations::new(3, 86400, 10);
        let mut ctx = test_context();

        // an unrelated event past the history limit still triggers
        let task = DecisionTask {
            events: vec![HistoryEvent::new(
                10,
                EventType::ExternalWorkflowExecutionSignaled,
            )],
            previous_started_event_id: 7,
            ..Default::default()
        };

        let mut outcome = outcome_with(vec![]);
        DecisionInterceptor::<String>::after_decision(&interceptor, &task, &mut ctx, &mut outcome);
        assert_eq!(
            types(&outcome.decisions),
            vec![DecisionType::ContinueAsNewWorkflowExecution]
        );
    }

    #[test]
    fn test_func_interceptor_defaults_are_noops() {
        let interceptor = FuncInterceptor::<String>::default();
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![]);
        interceptor.before_task(&DecisionTask::default());
        interceptor.before_decision(&DecisionTask::default(), &mut ctx, &mut outcome);
        interceptor.after_decision(&DecisionTask::default(), &mut ctx, &mut outcome);
        assert!(outcome.decisions.is_empty());
    }

    #[test]
    fn test_func_interceptor_hooks_run() {
        let interceptor = FuncInterceptor::<String> {
            before_task_fn: None,
            before_decision_fn: None,
            after_decision_fn: Some(Box::new(|_task, _ctx, outcome| {
                outcome.decisions.push(Decision::record_marker("hooked", "{}"));
            })),
        };
        let mut ctx = test_context();
        let mut outcome = outcome_with(vec![]);
        interceptor.after_decision(&DecisionTask::default(), &mut ctx, &mut outcome);
        assert_eq!(outcome.decisions.len(), 1);
    }
}
