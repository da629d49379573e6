//! Closed error taxonomy returned by the core.
//!
//! `INVARIANT_UNDERFLOW` is deliberately absent from this enum: it is a
//! resilience choice (saturate at zero, log, keep going) rather than a
//! result the caller can act on. It is surfaced only through the `log`
//! crate at error level; see [`crate::node::NodeUsage::release`].

/// Errors an operation can hand back to the controller.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    /// Null/empty job resources, same-id merge, invalid node index, or any
    /// other caller-supplied argument that is structurally invalid.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The job was not present in the row/partition the caller expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// A reservation or placement request cannot be satisfied by the
    /// available nodes/cores.
    #[error("cannot satisfy request: {0}")]
    CannotSatisfy(String),

    /// A job fit nowhere in its partition's rows even though `num_rows`
    /// should have guaranteed room. Should never occur; always a sign the
    /// over-subscription policy and actual usage have drifted apart.
    #[error("excess rows: {0}")]
    ExcessRows(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
