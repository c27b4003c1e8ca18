//! Playlist state machine and source lifecycle controller
//!
//! Given an ordered list of media sources, this crate produces a single
//! continuous audio+video output by driving a downstream smooth-switcher
//! node: it creates the right input node for each item at the right time,
//! prewarms the next live item so transitions are instant, times out file
//! items, reuses shared listener sockets for SRT and RTMP, and coordinates
//! the moment the switcher crossfades from one input to the next.
//!
//! # Architecture
//!
//! - [`ListenerRegistry`] owns the shared listener nodes for protocols where
//!   one socket multiplexes many logical sources.
//! - [`SourceFactory`] turns a playlist item into a live source handle,
//!   either a fresh engine node or a handle onto a registry entry.
//! - [`Playlist`] is the state machine: three slots (`prev`, `current`,
//!   `next`), advanced by one controller task that serialises every update.
//! - [`SwitcherBinding`] translates slot state into the switcher's pin
//!   subscriptions and issues the crossfade command.
//!
//! # Usage
//!
//! ```ignore
//! use playout_playlist::{Playlist, PlaylistConfig};
//!
//! let playlist = Playlist::create(engine, items, PlaylistConfig::default()).await?;
//! let mut events = playlist.subscribe_events();
//! playlist.start();
//!
//! // Downstream consumers subscribe to playlist.video() / playlist.audio().
//! ```

pub mod config;
pub mod controller;
pub mod factory;
pub mod listener;
pub mod switcher;

pub use config::PlaylistConfig;
pub use controller::{ControllerEvent, EndReason, Playlist, PlaylistEvent};
pub use factory::{CloseHandle, CreatedSource, SourceFactory, SubscribeCallback, SubscribedSource};
pub use listener::{DisconnectHandler, HandleId, ListenerRegistry};
pub use switcher::SwitcherBinding;
