//! Typed errors for graph construction and execution.
//!
//! Every variant maps to a stable diagnostic code so callers can match on
//! the error class regardless of message wording.

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::fifo::Port;
use crate::span::Span;
use crate::tile::{TileCoord, TileRole};

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MeshError {
    // ─── Configuration ─────────────────────────────────────────────
    #[error("device name '{0}' is unknown")]
    UnknownDevice(String),

    // ─── Structural ────────────────────────────────────────────────
    #[error("{coord} is already declared")]
    DuplicateTile { coord: TileCoord },

    #[error("{coord} is not on device {device}")]
    TileOutsideDevice { coord: TileCoord, device: String },

    #[error("{coord} is a {actual} tile on this device, not {declared}")]
    RoleMismatch {
        coord: TileCoord,
        declared: TileRole,
        actual: TileRole,
    },

    #[error("{coord} referenced by {context} is not declared")]
    TileNotFound { coord: TileCoord, context: String },

    #[error("channel '{channel}' has depth {depth}; depth must be between 1 and {max}")]
    InvalidDepth { channel: String, depth: u32, max: u32 },

    #[error("channel '{channel}' has an empty element shape")]
    EmptyElementType { channel: String },

    #[error("channel '{channel}' element {element} is larger than the {max} bytes any tile can buffer")]
    ElementTooLarge {
        channel: String,
        element: String,
        max: u64,
    },

    #[error("channel name '{channel}' is already declared")]
    DuplicateChannelName { channel: String },

    #[error("channel '{channel}' referenced by {context} is not declared")]
    UnknownChannel { channel: String, context: String },

    #[error("link into '{sink}' is malformed: {reason}")]
    LinkArityMismatch { sink: String, reason: String },

    #[error("channel '{channel}' is already a source of the link into '{sink}'")]
    AlreadyLinked { channel: String, sink: String },

    #[error("links form a cycle through '{channel}'")]
    LinkCycle { channel: String },

    #[error("{coord} already runs a program")]
    DuplicateProgram { coord: TileCoord },

    #[error("{coord} is a {role} tile and has no core to run a program")]
    NoCore { coord: TileCoord, role: TileRole },

    #[error("{coord} cannot use the {port} port of '{channel}': {reason}")]
    PortDirection {
        coord: TileCoord,
        channel: String,
        port: Port,
        reason: String,
    },

    #[error("{coord} exceeds its {resource} budget: needs {needed}, has {available}")]
    ResourceExhausted {
        coord: TileCoord,
        resource: &'static str,
        needed: u64,
        available: u64,
    },

    #[error("channel '{channel}' would stall: {reason}")]
    Liveness { channel: String, reason: String },

    // ─── Protocol ──────────────────────────────────────────────────
    #[error(
        "{coord} acquires {requested} on the {port} port of '{channel}' while holding {held}; depth is {depth}"
    )]
    CapacityExceeded {
        coord: TileCoord,
        channel: String,
        port: Port,
        requested: u32,
        held: u32,
        depth: u32,
    },

    #[error("{coord} releases {requested} on the {port} port of '{channel}' but holds {held}")]
    ReleaseMismatch {
        coord: TileCoord,
        channel: String,
        port: Port,
        requested: u32,
        held: u32,
    },

    #[error("{coord} ends an iteration still holding {held} object(s) on the {port} port of '{channel}'")]
    UnreleasedAtIterationEnd {
        coord: TileCoord,
        channel: String,
        port: Port,
        held: u32,
    },

    #[error(
        "{coord} accesses object {object}, index {index} of '{channel}' ({port}) outside the held range: {held} held, {len} elements each"
    )]
    UnacquiredAccess {
        coord: TileCoord,
        channel: String,
        port: Port,
        object: u32,
        index: u32,
        held: u32,
        len: usize,
    },

    #[error("value {value} does not fit the {scalar} elements of '{channel}'")]
    ValueOutOfRange {
        channel: String,
        value: i64,
        scalar: String,
    },

    // ─── Execution ─────────────────────────────────────────────────
    #[error("{coord} acquires from '{channel}' after its producer finished")]
    ChannelDrained { coord: TileCoord, channel: String },

    #[error("link into '{sink}' finished with {pending} partially filled object(s)")]
    JoinIncomplete { sink: String, pending: u64 },

    #[error("{coord} stalled for {waited_ms} ms acquiring the {port} port of '{channel}'")]
    Stalled {
        coord: TileCoord,
        channel: String,
        port: Port,
        waited_ms: u64,
    },

    #[error("host input for '{channel}' has {len} values, not a multiple of {element_len}")]
    InputShape {
        channel: String,
        len: usize,
        element_len: usize,
    },

    #[error("{coord} runs {iterations} iterations; the simulation limit is {limit}")]
    IterationLimit {
        coord: TileCoord,
        iterations: u64,
        limit: u64,
    },

    #[error("simulation runtime failed: {0}")]
    Runtime(String),
}

impl MeshError {
    /// Stable error class.
    pub fn code(&self) -> &'static str {
        match self {
            MeshError::UnknownDevice(_) => "unknown-device",
            MeshError::DuplicateTile { .. } => "duplicate-tile",
            MeshError::TileOutsideDevice { .. } => "tile-outside-device",
            MeshError::RoleMismatch { .. } => "role-mismatch",
            MeshError::TileNotFound { .. } => "tile-not-found",
            MeshError::InvalidDepth { .. } => "invalid-depth",
            MeshError::EmptyElementType { .. } => "empty-element-type",
            MeshError::ElementTooLarge { .. } => "element-too-large",
            MeshError::DuplicateChannelName { .. } => "duplicate-channel-name",
            MeshError::UnknownChannel { .. } => "unknown-channel",
            MeshError::LinkArityMismatch { .. } => "link-arity-mismatch",
            MeshError::AlreadyLinked { .. } => "already-linked",
            MeshError::LinkCycle { .. } => "link-cycle",
            MeshError::DuplicateProgram { .. } => "duplicate-program",
            MeshError::NoCore { .. } => "no-core",
            MeshError::PortDirection { .. } => "port-direction",
            MeshError::ResourceExhausted { .. } => "resource-exhausted",
            MeshError::Liveness { .. } => "liveness",
            MeshError::CapacityExceeded { .. } => "capacity-exceeded",
            MeshError::ReleaseMismatch { .. } | MeshError::UnreleasedAtIterationEnd { .. } => {
                "release-mismatch"
            }
            MeshError::UnacquiredAccess { .. } => "unacquired-access",
            MeshError::ValueOutOfRange { .. } => "value-out-of-range",
            MeshError::ChannelDrained { .. } => "channel-drained",
            MeshError::JoinIncomplete { .. } => "join-incomplete",
            MeshError::Stalled { .. } => "stalled",
            MeshError::InputShape { .. } => "input-shape",
            MeshError::IterationLimit { .. } => "iteration-limit",
            MeshError::Runtime(_) => "runtime",
        }
    }

    fn help(&self) -> Option<String> {
        match self {
            MeshError::DuplicateChannelName { .. } => {
                Some("channel names identify fifos; pick a unique name".to_string())
            }
            MeshError::CapacityExceeded { .. } => {
                Some("raise the channel depth or release before acquiring again".to_string())
            }
            MeshError::AlreadyLinked { .. } => {
                Some("each source channel may feed exactly one link".to_string())
            }
            MeshError::Stalled { .. } => Some(
                "a matching release never happened; check the opposite side of the channel"
                    .to_string(),
            ),
            _ => None,
        }
    }

    pub fn to_diagnostic(&self, span: Span) -> Diagnostic {
        let diag = Diagnostic::error(self.code(), self.to_string(), span);
        match self.help() {
            Some(help) => diag.with_help(help),
            None => diag,
        }
    }
}

impl From<MeshError> for Diagnostic {
    fn from(err: MeshError) -> Self {
        err.to_diagnostic(Span::dummy())
    }
}
