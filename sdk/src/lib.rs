//! # tiller-sdk
//!
//! A finite-state-machine decider framework for AWS Simple Workflow Service.
//!
//! The service holds authoritative workflow history; this crate implements
//! the client side: a decider runtime that reconstructs workflow state from
//! history markers, folds newly-arrived events through per-state deciders,
//! and responds with a decision list, plus the activity worker, pollers, and
//! dispatchers around it.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tiller_core::{SwfClient, SwfTransportConfig};
//! use tiller_sdk::prelude::*;
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct OrderData { items: Vec<String> }
//!
//! let client = Arc::new(SwfClient::new(SwfTransportConfig::default())?);
//! let mut fsm = Fsm::<OrderData>::new("orders", "prod", "order-deciders", client);
//!
//! fsm.add_initial_state(FsmState::new("start", |ctx, event, data: &mut OrderData| {
//!     ctx.goto("working", data.clone(), vec![
//!         Decision::schedule_activity_task("reserve-1", reserve_type(), None),
//!     ])
//! }));
//! fsm.add_state(FsmState::new("working", |ctx, event, data: &mut OrderData| {
//!     match event.event_type {
//!         EventType::ActivityTaskCompleted => ctx.complete_workflow(data.clone(), vec![]),
//!         _ => ctx.pass(data.clone()),
//!     }
//! }));
//!
//! let handle = fsm.start()?;
//! ```
//!
//! ## Modules
//!
//! - [`fsm`] - the decider runtime: state machine, context, correlator,
//!   interceptors
//! - [`activity`] - the activity worker and its handler registry
//! - [`poller`] - long-poll loops and the shutdown manager
//! - [`dispatch`] - concurrency policies for handling polled tasks
//! - [`client`] - helpers for driving workflows from outside the decider
//! - [`error`] - error types

pub mod activity;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod poller;

pub use error::{Result, TillerError};

pub use fsm::{
    ActivityInfo, CancellationInfo, ChildInfo, ComposedDecisionInterceptor, Decider,
    DecisionErrorHandler, DecisionInterceptor, DedupeWorkflowCloseDecisions, EventCorrelator,
    Fsm, FsmContext, FsmData, FsmErrorReporter, FsmState, FuncInterceptor, LoggingErrorReporter,
    ManagedContinuations, MoveWorkflowCloseDecisionsToEnd, Outcome, RemoveLowerPriorityDecisions,
    ReplicationHandler, SerializedActivityState, SerializedErrorState, SerializedState,
    SignalInfo, StartCancelElision, Stasher, TaskErrorHandler, TickResult, TimerInfo,
};

pub use activity::{
    ActivityHandler, ActivityInterceptor, ActivityResult, ActivityWorker,
    ComposedActivityInterceptor, NoopActivityInterceptor,
};

pub use client::FsmClient;
pub use dispatch::{
    BoundedPoolDispatcher, CountdownDispatcher, InlineDispatcher, SpawnedTaskDispatcher,
    TaskDispatcher, TaskHandler,
};
pub use poller::{ActivityTaskPoller, DecisionTaskPoller, PollContext, ShutdownManager, TaskReadyFn};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::activity::{
        ActivityHandler, ActivityInterceptor, ActivityResult, ActivityWorker,
    };
    pub use crate::client::FsmClient;
    pub use crate::dispatch::{
        BoundedPoolDispatcher, CountdownDispatcher, InlineDispatcher, SpawnedTaskDispatcher,
        TaskDispatcher,
    };
    pub use crate::error::{Result, TillerError};
    pub use crate::fsm::{
        DecisionInterceptor, EventCorrelator, Fsm, FsmContext, FsmData, FsmState,
        ManagedContinuations, Outcome, SerializedState,
    };
    pub use crate::poller::{ActivityTaskPoller, DecisionTaskPoller, ShutdownManager};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::json;
    pub use tiller_core::swf::{Decision, DecisionType, EventType, HistoryEvent};
}
