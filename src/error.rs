//! Error types and handling for bgring

use crate::buffers::{BufferId, BufferState, GroupId};
use crate::ring::SubmissionToken;

/// Result type alias for bgring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Error taxonomy of the ring engine
///
/// Input errors (`InvalidArgument`, `InvalidBufferSpec`) and `QueueFull` are
/// reported synchronously by the call that was rejected. Operation failures are
/// only observable through a completion and surface as `Io`.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// The ring facility could not be set up
    #[error("Ring init error: {message}")]
    RingInit {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The ring was closed; no further operations are accepted
    #[error("Ring closed")]
    RingClosed,

    /// A provisioning request was malformed
    #[error("Invalid buffer spec: {parameter} - {message}")]
    InvalidBufferSpec { parameter: String, message: String },

    /// A submission argument was rejected before reaching the kernel
    #[error("Invalid argument: {parameter} - {message}")]
    InvalidArgument { parameter: String, message: String },

    /// Every submission slot is occupied by an undrained operation
    #[error("Queue full: {in_flight} of {depth} slots in flight")]
    QueueFull { depth: u32, in_flight: usize },

    /// An operation completed with a negative result
    #[error("I/O error on {token}: {}", errno_message(.code))]
    Io { token: SubmissionToken, code: i32 },

    /// A buffer was asked to make a transition its state does not allow
    #[error("Buffer state error: group {group_id} buffer {buffer_id} is {actual}, expected {expected}")]
    BufferState {
        group_id: GroupId,
        buffer_id: BufferId,
        expected: &'static str,
        actual: BufferState,
    },

    /// No buffer group is registered under this id
    #[error("Unknown buffer group: {group_id}")]
    UnknownGroup { group_id: GroupId },

    /// A call into the kernel facility failed
    #[error("Platform error: {message}")]
    Platform {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Coordination misuse or timeout
    #[error("Coordination error: {message}")]
    Coordination { message: String },
}

impl RingError {
    /// Create a ring init error
    pub fn ring_init(message: impl Into<String>) -> Self {
        Self::RingInit {
            message: message.into(),
            source: None,
        }
    }

    /// Create a ring init error from an I/O error
    pub fn ring_init_io(source: std::io::Error, context: &str) -> Self {
        Self::RingInit {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid buffer spec error
    pub fn invalid_buffer_spec(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBufferSpec {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a queue full error
    pub fn queue_full(depth: u32, in_flight: usize) -> Self {
        Self::QueueFull { depth, in_flight }
    }

    /// Create an I/O error from a negative completion result
    pub fn io(token: SubmissionToken, result: i32) -> Self {
        Self::Io {
            token,
            code: result.saturating_neg(),
        }
    }

    /// Create a buffer state error
    pub fn buffer_state(
        group_id: GroupId,
        buffer_id: BufferId,
        expected: &'static str,
        actual: BufferState,
    ) -> Self {
        Self::BufferState {
            group_id,
            buffer_id,
            expected,
            actual,
        }
    }

    /// Create an unknown group error
    pub fn unknown_group(group_id: GroupId) -> Self {
        Self::UnknownGroup { group_id }
    }

    /// Create a platform error from an I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Platform {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
            source: None,
        }
    }

    /// Create a coordination error
    pub fn coordination(message: impl Into<String>) -> Self {
        Self::Coordination {
            message: message.into(),
        }
    }

    /// The errno carried by an `Io` error
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Io { code, .. } => Some(*code),
            Self::RingInit { source, .. } | Self::Platform { source, .. } => {
                source.as_ref().and_then(|e| e.raw_os_error())
            }
            _ => None,
        }
    }

    /// Whether retrying later (after draining or backing off) can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. }
                | Self::Io { .. }
                | Self::InvalidArgument { .. }
                | Self::InvalidBufferSpec { .. }
        )
    }
}

fn errno_message(code: &i32) -> String {
    std::io::Error::from_raw_os_error(*code).to_string()
}

impl From<std::io::Error> for RingError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<nix::errno::Errno> for RingError {
    fn from(err: nix::errno::Errno) -> Self {
        Self::from_io(std::io::Error::from(err), "System call failed")
    }
}
