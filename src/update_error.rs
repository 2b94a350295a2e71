//! UpdateError: Unified error type for halo-update public APIs
//!
//! Every Setup/Update/Free entry point reports argument, state and transport
//! problems through this enum instead of panicking.

use crate::plan::PlanId;
use thiserror::Error;

/// Unified error type for plan construction, replay and teardown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The handle was never issued by this context.
    #[error("invalid plan handle {0}")]
    InvalidHandle(PlanId),
    /// An empty data buffer was passed to a plan that needs storage.
    #[error("data buffer is null or empty")]
    NullBuffer,
    /// The data buffer cannot hold `num_owned + num_needed` elements.
    #[error("data buffer too small: need {required} elements, got {actual}")]
    BufferTooSmall { required: usize, actual: usize },
    /// Element sizes other than 1, 2, 4 or 8 bytes are not supported.
    #[error("unsupported element size {0} (expected 1, 2, 4 or 8 bytes)")]
    UnsupportedElementSize(usize),
    /// A needed index is negative or beyond the global index space.
    #[error("needed index {index} outside global index space [0, {total})")]
    OutOfRangeIndex { index: i64, total: u64 },
    /// The handle is unset, or the plan behind it has already been freed.
    #[error("invalid plan state: {0}")]
    InvalidState(&'static str),
    /// The caller's ownership block does not match the uniform partition.
    #[error("rank {rank} starts at {start} but the uniform partition places it at {expected}")]
    InvalidPartition { rank: usize, start: u64, expected: u64 },
    /// Ranks disagree on how many indices each one owns.
    #[error("rank {neighbor} owns {theirs} indices but this rank owns {ours}")]
    PartitionMismatch { neighbor: usize, theirs: u64, ours: u64 },
    /// Another rank rejected its own Setup arguments, so no plan is built.
    #[error("setup failed on rank {neighbor}")]
    PeerSetupFailed { neighbor: usize },
    /// Resource exhaustion while building a plan or its descriptors.
    #[error("allocation failed: {0}")]
    AllocationFailure(&'static str),
    /// A message to or from `neighbor` failed or had an unexpected shape.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        source: Box<CommErrorSource>,
    },
    /// A plan failed its structural self-check.
    #[error("plan invariant violated: {0}")]
    InvariantViolation(String),
    /// The MPI runtime could not be initialized (or was initialized twice).
    #[error("MPI initialization failed")]
    MpiInit,
}

/// Boxed, comparable description of a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommErrorSource(pub String);

impl std::fmt::Display for CommErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CommErrorSource {}

impl From<String> for Box<CommErrorSource> {
    fn from(s: String) -> Self {
        Box::new(CommErrorSource(s))
    }
}

impl From<&str> for Box<CommErrorSource> {
    fn from(s: &str) -> Self {
        Box::new(CommErrorSource(s.to_owned()))
    }
}

impl UpdateError {
    /// Shorthand for a [`UpdateError::CommError`] with a formatted message.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        UpdateError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
