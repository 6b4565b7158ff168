use std::fmt;

use crate::dag::DagError;
use crate::finality::FinalityError;
use crate::object::ApplyError;
use crate::program::ProgramError;
use crate::state::StateError;
use crate::vertex::wire::WireError;

/// Machine-readable error codes shared by every error type in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    InvalidHash,
    InvalidDependencies,
    InvalidTimestamp,
    MalformedEncoding,
    NotAWriter,
    NotAFinalitySigner,
    InvalidSignature,
    VertexNotFound,
    CycleDetected,
    StateNotFound,
    InconsistentFrontier,
    UnknownOperation,
    OperationRejected,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidConfig => "E1002",
            Self::InvalidHash => "E2001",
            Self::InvalidDependencies => "E2002",
            Self::InvalidTimestamp => "E2003",
            Self::MalformedEncoding => "E2004",
            Self::NotAWriter => "E3001",
            Self::NotAFinalitySigner => "E3002",
            Self::InvalidSignature => "E3003",
            Self::VertexNotFound => "E4001",
            Self::CycleDetected => "E4002",
            Self::StateNotFound => "E4003",
            Self::InconsistentFrontier => "E4004",
            Self::UnknownOperation => "E5001",
            Self::OperationRejected => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid configuration value",
            Self::InvalidHash => "Vertex hash mismatch",
            Self::InvalidDependencies => "Invalid vertex dependencies",
            Self::InvalidTimestamp => "Invalid vertex timestamp",
            Self::MalformedEncoding => "Malformed encoded payload",
            Self::NotAWriter => "Peer is not a writer",
            Self::NotAFinalitySigner => "Peer is not an eligible finality signer",
            Self::InvalidSignature => "Signature verification failed",
            Self::VertexNotFound => "Vertex not found",
            Self::CycleDetected => "Graph contains a cycle",
            Self::StateNotFound => "State snapshot not found",
            Self::InconsistentFrontier => "Frontier is inconsistent",
            Self::UnknownOperation => "Unknown operation",
            Self::OperationRejected => "Operation rejected by program",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint for the layer above.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the TOML syntax in the engine config and retry."),
            Self::InvalidConfig => Some("Finality threshold must lie in (0, 1]."),
            Self::InvalidHash => Some("Discard the vertex; it was altered after hashing."),
            Self::InvalidDependencies => {
                Some("Request the missing dependencies from the sender and retry the merge.")
            }
            Self::InvalidTimestamp => Some("Check the sender's clock; timestamps must not go backwards."),
            Self::MalformedEncoding => Some("Request a fresh copy of the payload from the sender."),
            Self::NotAWriter => Some("Ask an admin to grant the peer the writer role."),
            Self::NotAFinalitySigner => {
                Some("Only signers eligible when the vertex was committed may attest to it.")
            }
            Self::InvalidSignature => Some("Verify the signer's registered key."),
            Self::VertexNotFound | Self::StateNotFound => {
                Some("Resync the object; its history is incomplete.")
            }
            Self::CycleDetected | Self::InconsistentFrontier => {
                Some("The graph is corrupted. Rebuild the object from a trusted peer.")
            }
            Self::UnknownOperation | Self::OperationRejected => None,
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

impl DagError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownDependency { .. } | Self::OrphanVertex(_) => ErrorCode::InvalidDependencies,
            Self::VertexNotFound(_) => ErrorCode::VertexNotFound,
            Self::EmptyLcaInput => ErrorCode::InternalUnexpected,
            Self::CycleDetected(_) => ErrorCode::CycleDetected,
            Self::InconsistentFrontier(_) => ErrorCode::InconsistentFrontier,
        }
    }
}

impl WireError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedEncoding,
            Self::HashMismatch { .. } => ErrorCode::InvalidHash,
        }
    }
}

impl StateError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::StateNotFound { .. } => ErrorCode::StateNotFound,
        }
    }
}

impl ProgramError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownOperation(_) => ErrorCode::UnknownOperation,
            Self::InvalidArguments { .. } | Self::Rejected(_) => ErrorCode::OperationRejected,
            Self::Unauthorized { .. } => ErrorCode::NotAWriter,
        }
    }
}

impl FinalityError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownVertex(_) => ErrorCode::VertexNotFound,
            Self::NotEligible { .. } => ErrorCode::NotAFinalitySigner,
            Self::InvalidSignature { .. } | Self::InvalidAggregate(_) => ErrorCode::InvalidSignature,
            Self::SignerIndexOutOfRange { .. } => ErrorCode::MalformedEncoding,
        }
    }
}

impl ApplyError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHash { .. } => ErrorCode::InvalidHash,
            Self::InvalidDependencies { .. } => ErrorCode::InvalidDependencies,
            Self::InvalidTimestamp { .. } => ErrorCode::InvalidTimestamp,
            Self::NotAWriter { .. } => ErrorCode::NotAWriter,
            Self::Dag(e) => e.code(),
            Self::State(e) => e.code(),
            Self::Program(e) => e.code(),
        }
    }

    /// Validation and permission failures are expected and recoverable by
    /// the caller (resync, re-request). Everything else points at a bug or
    /// corrupted input.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidHash { .. }
                | Self::InvalidDependencies { .. }
                | Self::InvalidTimestamp { .. }
                | Self::NotAWriter { .. }
                | Self::Program(_)
        )
    }
}
