//! Error types for the adapter
//!
//! Domain errors use thiserror. Every per-message failure is turned into a
//! correlated error event at the dispatcher boundary, so the `Display` text
//! of these types is what the platform ends up seeing as a failure reason.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level adapter error
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Metadata was never received for the referenced instance
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),

    /// No callback or script is available to fulfil an operation
    #[error("operation '{operation}' on instance '{instance}' cannot be fulfilled")]
    Unfulfillable {
        /// Instance identifier
        instance: String,
        /// Operation name (or id when the name is unknown)
        operation: String,
    },

    /// An operation name is not declared by the instance
    #[error("instance '{instance}' declares no operation named '{operation}'")]
    UnknownOperation {
        /// Instance identifier
        instance: String,
        /// Operation name
        operation: String,
    },

    /// Callback or script failed
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Inbound content could not be interpreted
    #[error("decode failure: {0}")]
    Decode(#[from] DecodeError),

    /// The outbound channel failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Inbound decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON or not an element tree
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    /// A required attribute is absent or not a string
    #[error("'{tag}' is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Tag of the offending element
        tag: String,
        /// Attribute name
        attribute: &'static str,
    },

    /// A datum for a known field has no value
    #[error("field '{0}' carries no value")]
    MissingValue(String),

    /// Anything else structurally wrong
    #[error("{0}")]
    Malformed(String),
}

/// Service invocation errors
#[derive(Debug, Error)]
pub enum InvocationError {
    /// A callback reported failure with a human-readable description
    #[error("{0}")]
    Failed(String),

    /// A handler named an output that the operation does not declare
    #[error("operation '{operation}' declares no reply named '{output}'")]
    UnknownReply {
        /// Operation id
        operation: String,
        /// Output name returned by the handler
        output: String,
    },

    /// Script execution failed before producing a result
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

/// Script execution errors
#[derive(Debug, Error)]
pub enum ScriptError {
    /// IO error while preparing or reading script files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// External interpreter could not be started
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// Program name
        command: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Invalid JSON exchanged with an interpreter
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid playbook YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The script source property is missing or not text
    #[error("invalid script source: {0}")]
    InvalidSource(String),

    /// The script defines nothing for the requested operation
    #[error("script has no entry for operation '{0}'")]
    MissingOperation(String),

    /// The embedded interpreter worker misbehaved
    #[error("worker error: {0}")]
    Worker(String),

    /// The embedded interpreter process is gone
    #[error("interpreter exited")]
    WorkerExited,

    /// Preamble file could not be read
    #[error("preamble not readable at {0}")]
    Preamble(PathBuf),
}

impl ScriptError {
    /// Whether the module that raised this error can no longer answer calls.
    /// Errors reported by the script itself leave the module usable.
    pub fn breaks_module(&self) -> bool {
        matches!(
            self,
            ScriptError::Io(_) | ScriptError::Json(_) | ScriptError::WorkerExited
        )
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error on the connection
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Outbound event could not be rendered
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket handshake or framing failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The connection is gone
    #[error("connection closed")]
    Closed,
}

/// Convenience result alias for decoding
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Convenience result alias for invocations
pub type InvocationResult<T> = std::result::Result<T, InvocationError>;

/// Convenience result alias for script execution
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Result type using AdapterError
pub type Result<T> = std::result::Result<T, AdapterError>;

impl From<ScriptError> for AdapterError {
    fn from(err: ScriptError) -> Self {
        AdapterError::Invocation(InvocationError::Script(err))
    }
}
