//! Integration contract with the media engine
//!
//! The orchestrator never decodes or switches media itself; it drives an
//! external engine through the operations defined here. [`MediaEngine`]
//! creates nodes, node handles expose teardown and stream metadata, and
//! [`InputHooks`] carries the callbacks the engine fires as a node's life
//! unfolds.
//!
//! Two ordering guarantees matter to the orchestrator and are part of this
//! contract:
//!
//! 1. `on_create` fires as soon as the node is addressable for subscriptions
//!    and **before any frame is dispatched**, so a subscription installed
//!    inside the hook never drops initial frames.
//! 2. A [`StreamSelector`] passed in a [`PinSubscription`] is re-evaluated
//!    whenever the subscribed node's stream metadata changes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::keys::{StreamKey, StreamMetadata, StreamSelector};

pub mod config;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use config::{
    AudioGainConfig, InputConfig, OutputSettings, StreamKeyOverrideConfig, SwitcherConfig,
};

/// Handle onto any engine node
#[async_trait]
pub trait MediaNode: Send + Sync {
    /// Engine-level node id
    fn id(&self) -> &str;

    /// Stream metadata currently visible on the node's output
    fn streams(&self) -> Vec<StreamMetadata>;

    /// Tear the node down
    async fn close(&self);
}

/// Handle onto a processor node that consumes one upstream source
pub trait ProcessorNode: MediaNode {
    /// Replace the node's upstream subscription
    fn subscribe(&self, source: Arc<dyn MediaNode>, selector: StreamSelector);
}

/// Handle onto the smooth-switcher node
pub trait SwitcherNode: MediaNode {
    /// Replace the complete pin subscription set
    fn subscribe_to_pins(&self, subs: Vec<PinSubscription>);

    /// Crossfade to the given pin over the configured transition duration
    fn switch_source(&self, pin: &str);
}

/// One pin subscription handed to the switcher
#[derive(Clone)]
pub struct PinSubscription {
    /// Node feeding the pin
    pub source: Arc<dyn MediaNode>,

    /// Selector mapping the node's streams onto the pin
    pub selector: StreamSelector,
}

/// Duration and related probe results delivered by `on_info`
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Natural duration of the media, when the engine could determine it
    pub duration: Option<std::time::Duration>,
}

/// Connection state of a network input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// An inbound publish arriving on a shared RTMP listener
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPublishRequest {
    /// RTMP application name
    pub app: String,

    /// Publish URL
    pub url: String,

    /// Engine-assigned stream id
    pub stream_id: u32,

    /// Publishing (stream) name
    pub publishing_name: String,
}

/// Acceptance of an inbound publish, with the keys its streams are given
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPublishAccept {
    /// Source name stamped onto the publish's streams
    pub source_name: String,

    /// Key given to the publish's audio stream
    pub audio_key: StreamKey,

    /// Key given to the publish's video stream
    pub video_key: StreamKey,
}

/// Callback fired when an inbound publish asks to be accepted
pub type OnStreamHook =
    Box<dyn Fn(&StreamPublishRequest) -> Option<StreamPublishAccept> + Send + Sync>;

/// Lifecycle callbacks installed on an input node at creation
///
/// All hooks are optional; the engine ignores the ones a caller leaves unset.
#[derive(Default)]
pub struct InputHooks {
    /// Node is addressable for subscriptions; fires before any frame
    pub on_create: Option<Box<dyn FnOnce(Arc<dyn MediaNode>) + Send>>,

    /// File-backed media reached its end
    pub on_eof: Option<Box<dyn Fn() + Send + Sync>>,

    /// Probe results (e.g. MP4 natural duration) became known
    pub on_info: Option<Box<dyn Fn(MediaInfo) + Send + Sync>>,

    /// A network source connected or disconnected; listeners report the
    /// source name of the affected publisher
    pub on_connection_change: Option<Box<dyn Fn(ConnectionStatus, Option<&str>) + Send + Sync>>,

    /// Inbound publish arrived on a listener
    pub on_stream: Option<OnStreamHook>,

    /// The node's teardown completed
    pub on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

impl InputHooks {
    /// Hooks with nothing installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the creation hook
    pub fn with_on_create(
        mut self,
        hook: impl FnOnce(Arc<dyn MediaNode>) + Send + 'static,
    ) -> Self {
        self.on_create = Some(Box::new(hook));
        self
    }

    /// Install the EOF hook
    pub fn with_on_eof(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_eof = Some(Box::new(hook));
        self
    }

    /// Install the probe-info hook
    pub fn with_on_info(mut self, hook: impl Fn(MediaInfo) + Send + Sync + 'static) -> Self {
        self.on_info = Some(Box::new(hook));
        self
    }

    /// Install the connection-status hook
    pub fn with_on_connection_change(
        mut self,
        hook: impl Fn(ConnectionStatus, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_change = Some(Box::new(hook));
        self
    }

    /// Install the inbound-publish hook
    pub fn with_on_stream(
        mut self,
        hook: impl Fn(&StreamPublishRequest) -> Option<StreamPublishAccept> + Send + Sync + 'static,
    ) -> Self {
        self.on_stream = Some(Box::new(hook));
        self
    }

    /// Install the teardown hook
    pub fn with_on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }
}

/// Operations the orchestrator consumes from the media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create an input node
    ///
    /// `hooks.on_create` fires synchronously with respect to frame dispatch:
    /// no frame leaves the node before the hook returns.
    async fn create_input(
        &self,
        id: &str,
        config: InputConfig,
        hooks: InputHooks,
    ) -> Result<Arc<dyn MediaNode>>;

    /// Create the smooth-switcher node
    async fn create_switcher(
        &self,
        id: &str,
        config: SwitcherConfig,
    ) -> Result<Arc<dyn SwitcherNode>>;

    /// Create an audio-gain node
    async fn create_audio_gain(
        &self,
        id: &str,
        config: AudioGainConfig,
    ) -> Result<Arc<dyn ProcessorNode>>;

    /// Create a stream-key-override node
    async fn create_stream_key_override(
        &self,
        id: &str,
        config: StreamKeyOverrideConfig,
    ) -> Result<Arc<dyn ProcessorNode>>;
}
