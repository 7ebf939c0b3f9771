//! # tiller-core
//!
//! Wire model, serialization, and HTTP transport for the tiller workflow
//! framework. This crate knows how to talk to the workflow service and how to
//! encode framework payloads; it knows nothing about deciders, pollers, or
//! activity workers — those live in `tiller-sdk`.
//!
//! ## Modules
//!
//! - [`swf`] - history events, decisions, and operation request/response types
//! - [`client`] - operation traits ([`DecisionOps`], [`ActivityOps`],
//!   [`WorkflowOps`]) and the HTTP [`SwfClient`] with per-operation timeout
//!   routing
//! - [`serializer`] - the [`StateSerializer`] seam used for every payload the
//!   framework persists into workflow history
//! - [`error`] - the shared error taxonomy

pub mod client;
pub mod error;
pub mod serializer;
pub mod swf;

pub use client::{ActivityOps, DecisionOps, SwfClient, SwfTransport, SwfTransportConfig, WorkflowOps};
pub use error::{CoreError, CoreResult};
pub use serializer::{Base64JsonStateSerializer, JsonStateSerializer, StateSerializer};
