//! Error types for the playout orchestrator

use thiserror::Error;

use crate::model::ListenerProtocol;

/// Result type alias for playout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while orchestrating a playlist
#[derive(Debug, Error)]
pub enum Error {
    /// A playlist item expected a shared listener that was never pre-created
    #[error("no {protocol} listener registered on port {port}")]
    NoListener {
        /// Listener protocol the item asked for
        protocol: ListenerProtocol,
        /// Port the item asked for
        port: u16,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine rejected input-node creation
    #[error("failed to create input node {node_id}: {message}")]
    Factory {
        /// Logical node id the factory was creating
        node_id: String,
        /// Engine-reported failure
        message: String,
    },

    /// Engine-level failure outside node creation
    #[error("engine error: {0}")]
    Engine(String),
}
