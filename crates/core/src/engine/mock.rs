//! In-memory mock engine for tests
//!
//! Implements [`MediaEngine`] without touching any real media. Tests drive
//! node lifecycles by hand: delivering stream metadata, firing EOF and
//! disconnects, and publishing onto listener nodes. The mock switcher records
//! every subscription set and `switch_source` call, and re-evaluates pin
//! selectors whenever a subscribed node's streams change — the same contract
//! a real engine honours.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{
    AudioGainConfig, ConnectionStatus, InputConfig, InputHooks, MediaEngine, MediaInfo, MediaNode,
    PinSubscription, ProcessorNode, StreamKeyOverrideConfig, StreamPublishRequest, SwitcherConfig,
    SwitcherNode,
};
use crate::error::{Error, Result};
use crate::keys::{StreamKey, StreamMetadata};

/// Hooks retained on a mock node after creation
#[derive(Default)]
struct StoredHooks {
    on_eof: Option<Box<dyn Fn() + Send + Sync>>,
    on_info: Option<Box<dyn Fn(MediaInfo) + Send + Sync>>,
    on_connection_change: Option<Box<dyn Fn(ConnectionStatus, Option<&str>) + Send + Sync>>,
    on_stream: Option<crate::engine::OnStreamHook>,
    on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A mock input node
pub struct MockNode {
    id: String,
    streams: Mutex<Vec<StreamMetadata>>,
    hooks: StoredHooks,
    closed: AtomicBool,
    close_count: AtomicUsize,
    publish_seq: AtomicU32,
    state: Weak<EngineState>,
}

impl MockNode {
    /// Whether `close` has been called at least once
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times `close` has been called
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Stream metadata currently on the node
    pub fn current_streams(&self) -> Vec<StreamMetadata> {
        self.streams.lock().clone()
    }
}

#[async_trait]
impl MediaNode for MockNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn streams(&self) -> Vec<StreamMetadata> {
        self.streams.lock().clone()
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.streams.lock().clear();
        if let Some(state) = self.state.upgrade() {
            state.reevaluate();
        }
        if let Some(hook) = &self.hooks.on_close {
            hook();
        }
    }
}

/// A mock processor node (audio gain, stream-key override)
///
/// Mirrors its upstream source's stream metadata at subscription time; the
/// silence feed and the output overrides have static upstreams, so a one-shot
/// mirror is all the orchestrator observes.
pub struct MockProcessor {
    id: String,
    streams: Mutex<Vec<StreamMetadata>>,
    upstream: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MockProcessor {
    /// Id of the node this processor is subscribed to, if any
    pub fn upstream_id(&self) -> Option<String> {
        self.upstream.lock().clone()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaNode for MockProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn streams(&self) -> Vec<StreamMetadata> {
        self.streams.lock().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ProcessorNode for MockProcessor {
    fn subscribe(&self, source: Arc<dyn MediaNode>, _selector: crate::keys::StreamSelector) {
        *self.upstream.lock() = Some(source.id().to_string());
        *self.streams.lock() = source.streams();
    }
}

/// The mock smooth-switcher
pub struct MockSwitcher {
    id: String,
    transition: Duration,
    subs: Mutex<Vec<PinSubscription>>,
    pins: Mutex<BTreeMap<String, Vec<StreamKey>>>,
    switches: Mutex<Vec<String>>,
}

impl MockSwitcher {
    /// Crossfade duration the switcher was created with
    pub fn transition(&self) -> Duration {
        self.transition
    }

    /// Every `switch_source` call in order
    pub fn switch_calls(&self) -> Vec<String> {
        self.switches.lock().clone()
    }

    /// Number of pin subscriptions currently installed
    pub fn subscription_count(&self) -> usize {
        self.subs.lock().len()
    }

    /// Pins with at least one stream mapped, in pin order
    pub fn mapped_pins(&self) -> Vec<String> {
        self.pins.lock().keys().cloned().collect()
    }

    /// Keys currently mapped onto a pin
    pub fn pin_keys(&self, pin: &str) -> Option<Vec<StreamKey>> {
        self.pins.lock().get(pin).cloned()
    }

    /// Re-run every selector against its source's current streams
    pub fn reevaluate(&self) {
        let subs = self.subs.lock().clone();
        let mut pins: BTreeMap<String, Vec<StreamKey>> = BTreeMap::new();
        for sub in &subs {
            let streams = sub.source.streams();
            if let Some(mapping) = (sub.selector)(&streams) {
                pins.entry(mapping.pin).or_default().extend(mapping.keys);
            }
        }
        *self.pins.lock() = pins;
    }
}

#[async_trait]
impl MediaNode for MockSwitcher {
    fn id(&self) -> &str {
        &self.id
    }

    fn streams(&self) -> Vec<StreamMetadata> {
        Vec::new()
    }

    async fn close(&self) {}
}

impl SwitcherNode for MockSwitcher {
    fn subscribe_to_pins(&self, subs: Vec<PinSubscription>) {
        *self.subs.lock() = subs;
        self.reevaluate();
    }

    fn switch_source(&self, pin: &str) {
        self.switches.lock().push(pin.to_string());
    }
}

#[derive(Default)]
struct EngineState {
    nodes: Mutex<HashMap<String, Arc<MockNode>>>,
    processors: Mutex<HashMap<String, Arc<MockProcessor>>>,
    switcher: Mutex<Option<Arc<MockSwitcher>>>,
    file_durations: Mutex<HashMap<String, Option<Duration>>>,
    fail_next_create: Mutex<Option<String>>,
}

impl EngineState {
    fn reevaluate(&self) {
        let switcher = self.switcher.lock().clone();
        if let Some(switcher) = switcher {
            switcher.reevaluate();
        }
    }
}

/// In-memory [`MediaEngine`] implementation
#[derive(Default)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-configure the natural duration the engine probes for an MP4 file
    pub fn set_file_duration(&self, file_name: &str, duration: Option<Duration>) {
        self.state
            .file_durations
            .lock()
            .insert(file_name.to_string(), duration);
    }

    /// Make the next `create_input` fail with the given message
    pub fn fail_next_create(&self, message: &str) {
        *self.state.fail_next_create.lock() = Some(message.to_string());
    }

    /// Look up an input node by engine id
    pub fn node(&self, id: &str) -> Option<Arc<MockNode>> {
        self.state.nodes.lock().get(id).cloned()
    }

    /// Ids of every input node created so far
    pub fn input_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.nodes.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up a processor node by engine id
    pub fn processor(&self, id: &str) -> Option<Arc<MockProcessor>> {
        self.state.processors.lock().get(id).cloned()
    }

    /// The switcher node, once created
    pub fn switcher(&self) -> Arc<MockSwitcher> {
        self.state
            .switcher
            .lock()
            .clone()
            .expect("switcher not created yet")
    }

    fn require(&self, id: &str) -> Arc<MockNode> {
        self.node(id)
            .unwrap_or_else(|| panic!("no mock node with id {id:?}"))
    }

    /// Replace a node's stream metadata and re-evaluate pin selectors
    pub fn deliver_streams(&self, id: &str, streams: Vec<StreamMetadata>) {
        let node = self.require(id);
        *node.streams.lock() = streams;
        self.state.reevaluate();
    }

    /// Fire the node's EOF hook
    pub fn fire_eof(&self, id: &str) {
        let node = self.require(id);
        if let Some(hook) = &node.hooks.on_eof {
            hook();
        }
    }

    /// Fire the node's probe-info hook
    pub fn fire_info(&self, id: &str, duration: Option<Duration>) {
        let node = self.require(id);
        if let Some(hook) = &node.hooks.on_info {
            hook(MediaInfo { duration });
        }
    }

    /// Fire the node's connection-status hook with `Disconnected`
    pub fn fire_disconnect(&self, id: &str, source_name: Option<&str>) {
        let node = self.require(id);
        if let Some(hook) = &node.hooks.on_connection_change {
            hook(ConnectionStatus::Disconnected, source_name);
        }
    }

    /// Publish onto a listener node
    ///
    /// Runs the node's `on_stream` hook; when accepted, the publish's audio
    /// and video streams appear on the node under the keys the hook assigned.
    /// Returns whether the publish was accepted.
    pub fn publish(&self, id: &str, app: &str, publishing_name: &str) -> bool {
        let node = self.require(id);
        let Some(hook) = &node.hooks.on_stream else {
            return false;
        };
        let request = StreamPublishRequest {
            app: app.to_string(),
            url: format!("rtmp://localhost/{app}"),
            stream_id: node.publish_seq.fetch_add(1, Ordering::SeqCst),
            publishing_name: publishing_name.to_string(),
        };
        let Some(accept) = hook(&request) else {
            return false;
        };
        {
            let mut streams = node.streams.lock();
            streams.push(StreamMetadata::audio(accept.audio_key));
            streams.push(StreamMetadata::video(accept.video_key));
        }
        self.state.reevaluate();
        true
    }

    /// Remove a publisher's streams from a listener node and fire the
    /// disconnect notification
    pub fn disconnect_publisher(&self, id: &str, source_name: &str) {
        let node = self.require(id);
        node.streams
            .lock()
            .retain(|s| s.key.source_name != source_name);
        self.state.reevaluate();
        if let Some(hook) = &node.hooks.on_connection_change {
            hook(ConnectionStatus::Disconnected, Some(source_name));
        }
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_input(
        &self,
        id: &str,
        config: InputConfig,
        mut hooks: InputHooks,
    ) -> Result<Arc<dyn MediaNode>> {
        if let Some(message) = self.state.fail_next_create.lock().take() {
            return Err(Error::Engine(message));
        }

        let on_create = hooks.on_create.take();
        let mp4_file = match &config {
            InputConfig::LocalMp4File { file_name, .. } => Some(file_name.clone()),
            _ => None,
        };

        // The audio-signal generator is producing from the moment it exists;
        // every other input starts with no streams until the test delivers
        // them (or a publisher arrives).
        let initial_streams = match &config {
            InputConfig::AudioSignal { .. } => vec![StreamMetadata::audio(StreamKey::new(
                1, "default", 258, "silence",
            ))],
            _ => Vec::new(),
        };

        let node = Arc::new(MockNode {
            id: id.to_string(),
            streams: Mutex::new(initial_streams),
            hooks: StoredHooks {
                on_eof: hooks.on_eof,
                on_info: hooks.on_info,
                on_connection_change: hooks.on_connection_change,
                on_stream: hooks.on_stream,
                on_close: hooks.on_close,
            },
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            publish_seq: AtomicU32::new(1),
            state: Arc::downgrade(&self.state),
        });
        self.state
            .nodes
            .lock()
            .insert(id.to_string(), node.clone());

        // Addressable before any frame: the subscription hook runs first.
        if let Some(hook) = on_create {
            hook(node.clone());
        }

        // MP4 probe result arrives once the node exists.
        if let Some(file_name) = mp4_file {
            let duration = self
                .state
                .file_durations
                .lock()
                .get(&file_name)
                .copied()
                .unwrap_or(None);
            if let Some(hook) = &node.hooks.on_info {
                hook(MediaInfo { duration });
            }
        }

        Ok(node)
    }

    async fn create_switcher(
        &self,
        id: &str,
        config: SwitcherConfig,
    ) -> Result<Arc<dyn SwitcherNode>> {
        let switcher = Arc::new(MockSwitcher {
            id: id.to_string(),
            transition: config.transition,
            subs: Mutex::new(Vec::new()),
            pins: Mutex::new(BTreeMap::new()),
            switches: Mutex::new(Vec::new()),
        });
        *self.state.switcher.lock() = Some(switcher.clone());
        Ok(switcher)
    }

    async fn create_audio_gain(
        &self,
        id: &str,
        _config: AudioGainConfig,
    ) -> Result<Arc<dyn ProcessorNode>> {
        let node = Arc::new(MockProcessor {
            id: id.to_string(),
            streams: Mutex::new(Vec::new()),
            upstream: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.state
            .processors
            .lock()
            .insert(id.to_string(), node.clone());
        Ok(node)
    }

    async fn create_stream_key_override(
        &self,
        id: &str,
        _config: StreamKeyOverrideConfig,
    ) -> Result<Arc<dyn ProcessorNode>> {
        let node = Arc::new(MockProcessor {
            id: id.to_string(),
            streams: Mutex::new(Vec::new()),
            upstream: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.state
            .processors
            .lock()
            .insert(id.to_string(), node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::audio_only;
    use tokio_test::assert_ok;

    fn av_streams(source: &str) -> Vec<StreamMetadata> {
        vec![
            StreamMetadata::audio(StreamKey::new(1, "default", 257, source)),
            StreamMetadata::video(StreamKey::new(1, "default", 256, source)),
        ]
    }

    #[tokio::test]
    async fn test_on_create_fires_before_create_returns() {
        let engine = MockEngine::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        engine
            .create_input(
                "input-0",
                InputConfig::LocalTsFile {
                    file_name: "a.ts".into(),
                    start: None,
                },
                InputHooks::new().with_on_create(move |_| {
                    fired_clone.store(true, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_switcher_reevaluates_on_stream_change() {
        let engine = MockEngine::new();
        let switcher = engine
            .create_switcher(
                "switcher",
                SwitcherConfig {
                    transition: Duration::from_millis(300),
                    output: Default::default(),
                },
            )
            .await
            .unwrap();

        let node = assert_ok!(
            engine
                .create_input(
                    "input-0",
                    InputConfig::LocalTsFile {
                        file_name: "a.ts".into(),
                        start: None,
                    },
                    InputHooks::new(),
                )
                .await
        );

        switcher.subscribe_to_pins(vec![PinSubscription {
            source: node,
            selector: audio_only("0"),
        }]);
        assert!(engine.switcher().pin_keys("0").is_none());

        engine.deliver_streams("input-0", av_streams("a"));
        assert_eq!(engine.switcher().pin_keys("0").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_runs_on_stream_hook() {
        let engine = MockEngine::new();
        let node = engine
            .create_input(
                "rtmp-1935",
                InputConfig::RtmpServer { port: 1935 },
                InputHooks::new().with_on_stream(|req| {
                    let source = format!("{}/{}", req.app, req.publishing_name);
                    Some(crate::engine::StreamPublishAccept {
                        source_name: source.clone(),
                        audio_key: StreamKey::new(1, "default", 257, source.clone()),
                        video_key: StreamKey::new(1, "default", 256, source),
                    })
                }),
            )
            .await
            .unwrap();

        assert!(engine.publish("rtmp-1935", "live", "x"));
        assert_eq!(node.streams().len(), 2);
        assert_eq!(node.streams()[0].key.source_name, "live/x");

        engine.disconnect_publisher("rtmp-1935", "live/x");
        assert!(node.streams().is_empty());
    }
}
