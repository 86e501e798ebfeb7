use std::io;

/// Errors surfaced by the host.
///
/// Decode failures (`Protocol`) are contained at the dispatcher boundary and
/// never reach application code through the reader thread; everything else is
/// returned synchronously to the caller that triggered it.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("message type {message_type:?} already has a conflicting registration")]
    TypeConflict { message_type: String },

    #[error("timed out waiting for {what}")]
    TimedOut { what: String },

    #[error("wait for message type {message_type:?} was unblocked")]
    Unblocked { message_type: String },

    #[error("store operation {operation} requires exclusive access")]
    AccessDenied { operation: &'static str },

    #[error("failed to spawn isolate process: {message}")]
    ProcessSpawnFailure { message: String },

    #[error("isolate {pid} was destroyed before it initialized")]
    IsolateDestroyed { pid: u32 },

    #[error("illegal state: {message}")]
    IllegalState { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("storage backend error: {message}")]
    Storage { message: String },
}

impl HostError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        HostError::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        HostError::IllegalState {
            message: message.into(),
        }
    }

    pub(crate) fn timed_out(what: impl Into<String>) -> Self {
        HostError::TimedOut { what: what.into() }
    }

    /// True when a deadline expired, as opposed to an explicit unblock.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HostError::TimedOut { .. })
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
