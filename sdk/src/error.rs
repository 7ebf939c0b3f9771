//! Error types for the tiller SDK

pub use tiller_core::error::CoreError;

/// Main error type for the SDK.
#[derive(Debug, thiserror::Error)]
pub enum TillerError {
    /// No state marker and no start event in the scanned history.
    #[error("cannot find current data")]
    MissingState,

    /// An outcome named a state the FSM was never configured with.
    #[error("marked state not in fsm: {0}")]
    MissingFsmState(String),

    /// State data could not be serialized for a marker.
    #[error("serializing state data: {0}")]
    StateSerialization(#[source] CoreError),

    /// A marker or state payload could not be decoded.
    #[error("deserializing state data: {0}")]
    StateDeserialization(#[source] CoreError),

    /// A decider panicked and no error handler rescued it.
    #[error("decider panic: {0}")]
    DeciderPanic(String),

    /// An activity handler asked for the task to be reported canceled.
    #[error("activity task canceled{}", .details.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    ActivityCanceled { details: Option<String> },

    /// An activity task arrived for an unregistered activity type.
    #[error("no handler for activity: {0}")]
    NoActivityHandler(String),

    /// An activity handler failed (or panicked).
    #[error("activity failed: {0}")]
    ActivityFailed(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Wire-level error from the service client.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl TillerError {
    /// Cancellation variant constructor used by activity handlers.
    pub fn canceled(details: impl Into<String>) -> Self {
        TillerError::ActivityCanceled {
            details: Some(details.into()),
        }
    }
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, TillerError>;

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_details(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
