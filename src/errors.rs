//! Error Types
//!
//! This module defines the error types used throughout the compositor.
//!
//! # Overview
//!
//! Failures split into two tiers:
//!
//! - [`SessionError`] — client protocol violations. These are *session
//!   fatal*: the offending session is torn down and all of its resources
//!   released, while other sessions keep running.
//! - [`PrismError`] — everything else: display claiming conflicts, fence
//!   ordering violations, scheduler invariant breakage.
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, PrismError>`. Command application returns
//! [`SessionResult<T>`] instead, since those failures are scoped to one
//! client.

use thiserror::Error;

use crate::scene::ResourceId;

/// A client protocol violation, fatal to the offending session only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Resource id 0 is reserved as "invalid/none".
    #[error("resource id 0 is reserved")]
    ReservedResourceId,

    /// A command referenced a resource id with no mapping in this session.
    #[error("no resource with id {0}")]
    InvalidResourceId(ResourceId),

    /// `CreateResource` was called with an id that is already mapped.
    #[error("resource id {0} is already in use")]
    ResourceIdCollision(ResourceId),

    /// A command targeted a resource of the wrong kind.
    #[error("resource {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        /// The offending resource id.
        id: ResourceId,
        /// What the resource actually is.
        actual: &'static str,
        /// What the command required.
        expected: &'static str,
    },

    /// The target node kind does not support the attempted operation
    /// (e.g. adding children to a ShapeNode).
    #[error("node {id} of kind {kind} cannot {operation}")]
    UnsupportedNodeOperation {
        /// The offending resource id.
        id: ResourceId,
        /// The node kind name.
        kind: &'static str,
        /// Short description of the rejected operation.
        operation: &'static str,
    },

    /// `Present` was called with a presentation time earlier than an
    /// already-scheduled or already-applied update.
    #[error(
        "out-of-order present: requested {requested} ns, last scheduled {last_scheduled} ns"
    )]
    OutOfOrderPresent {
        /// The rejected requested presentation time.
        requested: i64,
        /// The latest previously accepted presentation time.
        last_scheduled: i64,
    },

    /// A link token was invalid (already closed, or malformed).
    #[error("link token is invalid")]
    InvalidToken,

    /// The same token (or its duplicate) was registered twice with one
    /// linker.
    #[error("link token {0} is already registered")]
    DuplicateToken(u64),

    /// A numeric argument was outside its legal range.
    #[error("invalid argument for command {command}: {message}")]
    InvalidArgument {
        /// The command name.
        command: &'static str,
        /// What was wrong.
        message: String,
    },
}

/// The main error type for the compositor core.
#[derive(Error, Debug)]
pub enum PrismError {
    // ========================================================================
    // Session & protocol errors
    // ========================================================================
    /// A client protocol violation, annotated with the session it came from.
    #[error("session {session_id}: {error}")]
    Session {
        /// The offending session.
        session_id: u64,
        /// The underlying protocol error.
        error: SessionError,
    },

    // ========================================================================
    // Display errors
    // ========================================================================
    /// The display is already claimed by another renderer.
    #[error("display {0} is already claimed")]
    DisplayAlreadyClaimed(u64),

    /// The display was not claimed when an unclaim was attempted.
    #[error("display {0} is not claimed")]
    DisplayNotClaimed(u64),

    /// The display driver rejected an import.
    #[error("display import failed: {0}")]
    DisplayImportFailed(String),

    /// The default display was removed or its channel was lost.
    #[error("display connection lost")]
    DisplayLost,

    // ========================================================================
    // Fence & scheduling invariants
    // ========================================================================
    /// The release-fence FIFO would have observed a decreasing sequence
    /// number. Indicates a bug in the renderer's submission path.
    #[error(
        "release fence sequence numbers out of order: latest {latest} < last finished {last_finished}"
    )]
    FenceSequenceOutOfOrder {
        /// The sequence number attached to the incoming fence.
        latest: u64,
        /// The highest sequence number already reported finished.
        last_finished: u64,
    },
}

impl PrismError {
    /// Wraps a [`SessionError`] with the id of the session that caused it.
    #[must_use]
    pub fn session(session_id: u64, error: SessionError) -> Self {
        Self::Session { session_id, error }
    }
}

/// Alias for `Result<T, PrismError>`.
pub type Result<T> = std::result::Result<T, PrismError>;

/// Alias for `Result<T, SessionError>`, used by command application.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
