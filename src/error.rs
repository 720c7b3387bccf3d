//! Error types for rust-netconf

use thiserror::Error;

use crate::rpc_error::RpcError;

/// Main error type for NETCONF client operations
#[derive(Debug, Error)]
pub enum NetconfError {
    /// Authentication towards the peer failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Malformed path expression or bad operand in a predicate
    #[error("Error in path: {0}")]
    Path(String),

    /// Malformed or ambiguous create-path expression
    #[error("Error in create path: {0}")]
    PathCreate(String),

    /// Malformed XML
    #[error("Parse error: {0}")]
    Parser(String),

    /// The server answered with one or more rpc-error elements
    #[error("rpc-reply error: {reply}")]
    RpcReply {
        errors: Vec<RpcError>,
        reply: String,
    },

    /// Capability precondition violated, malformed hello or protocol violation
    #[error("Session error: {0}")]
    Session(String),

    /// Node already has a parent, or would become its own ancestor
    #[error("Element has already been used: {0}")]
    ElementAlreadyInUse(String),

    /// Merge or sync target not found
    #[error("Element does not exist: {0}")]
    ElementMissing(String),

    /// Unexpected message where a notification was expected
    #[error("Notification error: {0}")]
    Notification(String),

    /// Read timed out on the transport
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Local schema is too new for the revision the peer advertised
    #[error("Revision error: {0}")]
    Revision(String),

    /// Reply carried a different message-id than the outstanding request
    #[error("Message ID mismatch: after sending rpc with message-id={sent}, received rpc-reply with message-id={received}")]
    MessageIdMismatch { sent: u64, received: String },

    /// IO error (transport and file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetconfError {
    /// Structured server errors, empty for every other kind
    pub fn rpc_errors(&self) -> &[RpcError] {
        match self {
            NetconfError::RpcReply { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Result type alias for NETCONF operations
pub type Result<T> = std::result::Result<T, NetconfError>;
