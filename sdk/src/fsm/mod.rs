//! The decider runtime: state machine, context, correlation, interceptors.

pub mod context;
pub mod correlator;
pub mod interceptors;
pub mod machine;
pub mod models;
pub mod stash;

pub use context::{FsmContext, Serialization};
pub use correlator::{
    ActivityInfo, CancellationInfo, ChildInfo, EventCorrelator, SignalInfo, TimerInfo,
};
pub use interceptors::{
    ComposedDecisionInterceptor, DecisionInterceptor, DedupeWorkflowCloseDecisions,
    FuncInterceptor, ManagedContinuations, MoveWorkflowCloseDecisionsToEnd,
    RemoveLowerPriorityDecisions, StartCancelElision,
};
pub use machine::{Fsm, TickResult};
pub use models::{
    Decider, DecisionErrorHandler, EntryDecisionsFn, FsmData, FsmErrorReporter, FsmState,
    LoggingErrorReporter, Outcome, ReplicationHandler, SerializedActivityState,
    SerializedErrorState, SerializedState, TaskErrorHandler, ACTIVITY_STARTED_SIGNAL,
    ACTIVITY_UPDATED_SIGNAL, CANCELED_STATE, COMPLETE_STATE, CONTINUE_SIGNAL, CONTINUE_TIMER,
    CORRELATOR_MARKER, ERROR_MARKER, ERROR_STATE, FAILED_STATE, REPAIR_STATE_SIGNAL, STATE_MARKER,
};
pub use stash::Stasher;
