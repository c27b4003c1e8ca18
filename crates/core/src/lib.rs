//! Core library for the playout playlist orchestrator
//!
//! This crate carries everything the orchestrator shares with the outside
//! world: the playlist data model, the stream-key model and its selector
//! helpers, the error taxonomy, and the integration contract with the media
//! engine that actually instantiates nodes and performs audio/video
//! switching.
//!
//! The engine itself is an external collaborator. [`engine::MediaEngine`]
//! defines the operations the orchestrator consumes; an in-memory mock
//! implementation lives behind the `test-support` feature for use by
//! integration tests.

pub mod engine;
pub mod error;
pub mod keys;
pub mod model;

pub use error::{Error, Result};
pub use keys::{MediaType, PinMapping, StreamKey, StreamKeyFilter, StreamMetadata, StreamSelector};
pub use model::{
    Liveness, ListenerProtocol, PlaylistItem, PlaylistSource, SourceKind, SrtMode,
};
