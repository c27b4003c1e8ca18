//! Playlist controller
//!
//! The state machine at the heart of the orchestrator. Three slots —
//! `prev`, `current`, `next` — hold the sources that may coexist across a
//! crossfade window. Every entry point (start, manual switch, EOF,
//! disconnect, duration-timer expiry) posts an event onto one channel; a
//! single controller task drains it, so each `update` runs to completion
//! before the next event is taken and overlapping updates cannot interleave.
//!
//! A slot moves through:
//!
//! ```text
//! EMPTY -> CREATING -> SUBSCRIBED(ready=false) -> READY -> ACTIVE -> CLOSING -> EMPTY
//! ```
//!
//! The subscribe callback installs the slot (and its switcher subscription)
//! synchronously inside the engine's creation hook; the stream-key selector
//! flips readiness as media appears; `refresh_active` commands the crossfade
//! once the current slot is ready.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use playout_core::engine::{
    AudioGainConfig, InputConfig, InputHooks, MediaEngine, MediaNode, PinSubscription,
    ProcessorNode, StreamKeyOverrideConfig, SwitcherConfig, SwitcherNode,
};
use playout_core::error::Result;
use playout_core::keys::{
    self, audio_stream_keys, video_stream_keys, PinMapping, StreamKey, StreamMetadata,
    StreamSelector,
};
use playout_core::model::{PlaylistItem, SourceKind};

use crate::config::PlaylistConfig;
use crate::factory::{CloseHandle, SourceFactory, SubscribeCallback, SubscribedSource};
use crate::listener::ListenerRegistry;
use crate::switcher::SwitcherBinding;

/// Delay between republishing pins and commanding a switch, so the
/// subscription set lands before the crossfade targets it
const SWITCH_SETTLE: Duration = Duration::from_millis(10);

/// Why a source stopped playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// File-backed media reached its end
    Eof,
    /// A live source disconnected
    Disconnect,
    /// The item's duration bound elapsed
    DurationElapsed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Eof => write!(f, "eof"),
            EndReason::Disconnect => write!(f, "disconnect"),
            EndReason::DurationElapsed => write!(f, "duration_elapsed"),
        }
    }
}

/// Events driving the controller task
#[derive(Debug)]
pub enum ControllerEvent {
    /// Begin playback from item 0
    Start,

    /// Manual advance
    Switch,

    /// The source at playlist position `index` stopped; stale events (the
    /// index is no longer current) are discarded
    SourceEnded {
        index: usize,
        reason: EndReason,
    },

    /// An engine node finished tearing down
    NodeClosed {
        node_id: String,
    },
}

/// Notifications the controller emits to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    /// The playlist ran past its last item
    Exhausted,

    /// An advance failed; stream output has halted
    Failed(String),
}

/// One slot's source
struct PlayingItem {
    #[allow(dead_code)]
    item: PlaylistItem,
    index: usize,
    ready: bool,
    duration: Option<Duration>,
    close: CloseHandle,
    sub: Option<PinSubscription>,
    silence_sub: Option<PinSubscription>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Current,
    Next,
}

#[derive(Default)]
struct Slots {
    prev: Option<PlayingItem>,
    current: Option<PlayingItem>,
    next: Option<PlayingItem>,

    /// Index of the source the switcher was last commanded to; `None` until
    /// a first source activates
    playing: Option<usize>,
}

/// Slot table and switcher binding, shared between the controller task and
/// the engine-context callbacks
///
/// The mutex is held only across slot edits; engine calls always happen
/// after it is released.
struct Shared {
    slots: Mutex<Slots>,
    binding: SwitcherBinding,

    /// Silence feed mapped under video-only pins
    silence: Arc<dyn MediaNode>,
}

impl Shared {
    fn install(&self, slot: Slot, item: PlayingItem) {
        let mut slots = self.slots.lock();
        match slot {
            Slot::Current => slots.current = Some(item),
            Slot::Next => slots.next = Some(item),
        }
    }

    /// Shift `prev <- current`, and promote a prewarmed `next` when present
    ///
    /// A `prev` discarded here has ridden out its crossfade window; releasing
    /// its close handle tears a standalone node down after the grace delay
    /// and detaches a shared-listener registration.
    fn promote(&self) -> bool {
        let (discarded, promoted) = {
            let mut slots = self.slots.lock();
            let discarded = slots.prev.take();
            slots.prev = slots.current.take();
            let promoted = match slots.next.take() {
                Some(next) => {
                    slots.current = Some(next);
                    true
                }
                None => false,
            };
            (discarded, promoted)
        };
        if let Some(old) = discarded {
            tracing::debug!(index = old.index, "releasing superseded source");
            old.close.close();
        }
        promoted
    }

    /// Release every slot's source
    fn release_slots(&self) {
        let handles: Vec<CloseHandle> = {
            let mut slots = self.slots.lock();
            [slots.prev.take(), slots.current.take(), slots.next.take()]
                .into_iter()
                .flatten()
                .map(|playing| playing.close)
                .collect()
        };
        for handle in handles {
            handle.close();
        }
    }

    /// Attach duration and close handle once the factory resolves
    fn set_slot_details(
        &self,
        slot: Slot,
        index: usize,
        duration: Option<Duration>,
        close: CloseHandle,
    ) {
        let mut slots = self.slots.lock();
        let target = match slot {
            Slot::Current => &mut slots.current,
            Slot::Next => &mut slots.next,
        };
        match target {
            Some(playing) if playing.index == index => {
                playing.duration = duration;
                playing.close = close;
            }
            _ => tracing::warn!(index, "no subscribed slot to attach source details to"),
        }
    }

    fn current_info(&self) -> Option<(usize, Option<Duration>, CloseHandle)> {
        self.slots
            .lock()
            .current
            .as_ref()
            .map(|c| (c.index, c.duration, c.close.clone()))
    }

    fn current_index(&self) -> Option<usize> {
        self.slots.lock().current.as_ref().map(|c| c.index)
    }

    /// Record readiness observed by a slot's stream selector, then
    /// re-evaluate which pin should be active
    fn observe_readiness(&self, index: usize, ready: bool) {
        {
            let mut guard = self.slots.lock();
            let slots = &mut *guard;
            for playing in [&mut slots.prev, &mut slots.current, &mut slots.next]
                .into_iter()
                .flatten()
            {
                if playing.index == index {
                    playing.ready = ready;
                }
            }
        }
        self.refresh_active();
    }

    /// Command a crossfade when the current slot is ready and not already
    /// active; if nothing has ever been active, fall back to a ready `prev`
    fn refresh_active(&self) {
        let pin = {
            let mut slots = self.slots.lock();
            let current_state = slots.current.as_ref().map(|c| (c.index, c.ready));
            match current_state {
                Some((index, true)) if slots.playing != Some(index) => {
                    slots.playing = Some(index);
                    Some(index.to_string())
                }
                _ if slots.playing.is_none() => match slots.prev.as_ref().map(|p| (p.index, p.ready)) {
                    Some((index, true)) => {
                        slots.playing = Some(index);
                        Some(index.to_string())
                    }
                    _ => None,
                },
                _ => None,
            }
        };
        if let Some(pin) = pin {
            self.binding.activate(pin);
        }
    }

    /// Republish every slot's subscriptions as the switcher's complete
    /// pin set
    fn refresh_subs(&self) {
        let subs: Vec<PinSubscription> = {
            let slots = self.slots.lock();
            [&slots.prev, &slots.current, &slots.next]
                .into_iter()
                .flatten()
                .flat_map(|playing| {
                    playing
                        .sub
                        .iter()
                        .chain(playing.silence_sub.iter())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        self.binding.refresh(subs);
    }

    /// Clear `prev` when its underlying node has closed
    fn clear_prev_for_node(&self, node_id: &str) -> bool {
        let mut slots = self.slots.lock();
        let matches = slots
            .prev
            .as_ref()
            .and_then(|prev| prev.sub.as_ref())
            .is_some_and(|sub| sub.source.id() == node_id);
        if matches {
            slots.prev = None;
        }
        matches
    }
}

/// Build the per-slot subscribe callback for the factory
///
/// Invoked the moment the engine emits node creation. Installs a fresh
/// [`PlayingItem`] with its switcher subscription (plus the silence
/// subscription for video-only sources) and republishes the pin set, all
/// before any initial frame is dispatched.
fn subscribe_callback(shared: Arc<Shared>, index: usize, slot: Slot) -> SubscribeCallback {
    Box::new(move |source: SubscribedSource| {
        let pin = index.to_string();

        let selector: StreamSelector = {
            let shared = shared.clone();
            let filter = source.filter.clone();
            let kind = source.kind;
            let pin = pin.clone();
            Arc::new(move |streams: &[StreamMetadata]| -> Option<PinMapping> {
                let filtered: Vec<StreamMetadata> = streams
                    .iter()
                    .filter(|s| filter.accepts(&s.key))
                    .cloned()
                    .collect();
                let audio = audio_stream_keys(&filtered).into_iter().next();
                let video = video_stream_keys(&filtered).into_iter().next();

                let ready = (kind == SourceKind::Video || audio.is_some()) && video.is_some();
                shared.observe_readiness(index, ready);

                // Publish the pin as soon as any stream exists, so the
                // downstream synchroniser can start assembling.
                let mapped: Vec<StreamKey> = audio.into_iter().chain(video).collect();
                if mapped.is_empty() {
                    None
                } else {
                    Some(PinMapping {
                        pin: pin.clone(),
                        keys: mapped,
                    })
                }
            })
        };

        let sub = PinSubscription {
            source: source.node.clone(),
            selector,
        };
        let silence_sub = (source.kind == SourceKind::Video).then(|| PinSubscription {
            source: shared.silence.clone(),
            selector: keys::audio_only(pin),
        });

        tracing::debug!(index, node = %source.node_id, "source subscribed");
        shared.install(
            slot,
            PlayingItem {
                item: source.item,
                index,
                ready: false,
                duration: None,
                close: source.close,
                sub: Some(sub),
                silence_sub,
            },
        );
        shared.refresh_subs();
    })
}

struct Controller {
    playlist: Vec<PlaylistItem>,
    factory: SourceFactory,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<ControllerEvent>,
    notify: broadcast::Sender<PlaylistEvent>,

    /// Number of items consumed so far; the next `update` plays this index
    source_index: usize,
    started: bool,
    duration_timer: Option<JoinHandle<()>>,
    transition: Duration,
}

impl Controller {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ControllerEvent::Start => {
                    if self.started {
                        tracing::warn!("start() after playback already began; ignoring");
                        continue;
                    }
                    self.started = true;
                    self.step("start").await;
                }
                ControllerEvent::Switch => {
                    if !self.started {
                        tracing::warn!("switch() before start(); ignoring");
                        continue;
                    }
                    self.step("manual switch").await;
                }
                ControllerEvent::SourceEnded { index, reason } => {
                    if self.shared.current_index() != Some(index) {
                        tracing::debug!(index, %reason, "stale source-end event; ignoring");
                        continue;
                    }
                    tracing::info!(index, %reason, "source ended");
                    self.step("source end").await;
                }
                ControllerEvent::NodeClosed { node_id } => {
                    if self.shared.clear_prev_for_node(&node_id) {
                        tracing::debug!(node = %node_id, "previous source released");
                        self.shared.refresh_subs();
                    }
                }
            }
        }
    }

    async fn step(&mut self, trigger: &str) {
        if let Err(error) = self.update().await {
            tracing::error!(%error, trigger, "playlist advance failed");
            let _ = self.notify.send(PlaylistEvent::Failed(error.to_string()));
        }
    }

    /// Advance to the next playlist item
    async fn update(&mut self) -> Result<()> {
        if let Some(timer) = self.duration_timer.take() {
            timer.abort();
        }

        let index = self.source_index;
        self.source_index += 1;
        if index >= self.playlist.len() {
            tracing::info!(items = self.playlist.len(), "playlist exhausted");
            let _ = self.notify.send(PlaylistEvent::Exhausted);
            return Ok(());
        }

        if self.shared.promote() {
            tracing::info!(index, "promoting prewarmed source");
            self.shared.refresh_subs();
            self.shared.refresh_active();
        } else {
            let item = self.playlist[index].clone();
            tracing::info!(index, source = ?item.source, "creating source");
            let subscribe = subscribe_callback(self.shared.clone(), index, Slot::Current);
            let created = self.factory.create(&item, index, subscribe).await?;
            let duration = match item.duration {
                Some(duration) => Some(duration),
                None => created.duration.await,
            };
            self.shared
                .set_slot_details(Slot::Current, index, duration, created.close);
        }

        if let Some((current_index, Some(duration), close)) = self.shared.current_info() {
            self.schedule_advance(current_index, duration, close);
        }

        // Prewarm the next item when it is live, so the switch is instant.
        let next_index = index + 1;
        if let Some(next_item) = self.playlist.get(next_index).cloned() {
            if next_item.source.is_live() {
                tracing::info!(index = next_index, "prewarming next source");
                let subscribe = subscribe_callback(self.shared.clone(), next_index, Slot::Next);
                let created = self.factory.create(&next_item, next_index, subscribe).await?;
                let duration = match next_item.duration {
                    Some(duration) => Some(duration),
                    None => created.duration.await,
                };
                self.shared
                    .set_slot_details(Slot::Next, next_index, duration, created.close);
            }
        }

        Ok(())
    }

    /// Time out the current item `transition` before its duration bound, so
    /// the crossfade into the next item completes as the bound is reached
    fn schedule_advance(&mut self, index: usize, duration: Duration, close: CloseHandle) {
        let fire_in = duration.saturating_sub(self.transition);
        tracing::debug!(
            index,
            fire_in_ms = fire_in.as_millis() as u64,
            "scheduling duration advance"
        );
        let tx = self.tx.clone();
        self.duration_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(fire_in).await;
            // Release first: the grace delay keeps the node alive through
            // the crossfade, and an aborted timer must not leak it.
            close.close();
            let _ = tx.send(ControllerEvent::SourceEnded {
                index,
                reason: EndReason::DurationElapsed,
            });
        }));
    }
}

/// Output stream keys downstream consumers subscribe to
const VIDEO_OUTPUT_KEY: (u32, &str, u32, &str) = (1, "video", 256, "input");
const AUDIO_OUTPUT_KEY: (u32, &str, u32, &str) = (1, "audio", 257, "input");

/// The playlist orchestrator
///
/// Created with [`Playlist::create`], which pre-creates every shared
/// listener the playlist needs and returns only once they are ready.
/// Playback is driven by [`start`](Playlist::start) and advanced manually
/// with [`switch`](Playlist::switch); everything else happens on engine
/// events.
pub struct Playlist {
    tx: mpsc::UnboundedSender<ControllerEvent>,
    notify: broadcast::Sender<PlaylistEvent>,
    video: Arc<dyn ProcessorNode>,
    audio: Arc<dyn ProcessorNode>,
    switcher: Arc<dyn SwitcherNode>,
    silence_source: Arc<dyn MediaNode>,
    silence: Arc<dyn ProcessorNode>,
    registry: Arc<ListenerRegistry>,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Playlist {
    /// Build the controller and pre-create its listeners
    pub async fn create(
        engine: Arc<dyn MediaEngine>,
        items: Vec<PlaylistItem>,
        config: PlaylistConfig,
    ) -> Result<Self> {
        let switcher = engine
            .create_switcher(
                "switcher",
                SwitcherConfig {
                    transition: config.transition,
                    output: config.output.clone(),
                },
            )
            .await?;

        // Silence feed: a muted signal generator, mapped under the pin of
        // any video-only source so the switcher always receives A+V per pin.
        let silence_source = engine
            .create_input(
                "silence-source",
                InputConfig::AudioSignal {
                    sample_rate: config.output.sample_rate,
                    channels: config.output.channels,
                },
                InputHooks::new(),
            )
            .await?;
        let silence = engine
            .create_audio_gain("silence", AudioGainConfig::silent(config.output.channels))
            .await?;
        silence.subscribe(silence_source.clone(), keys::audio_only("input"));

        // Fixed output keys, relabelled off the switcher output.
        let (vp, vr, vs, vn) = VIDEO_OUTPUT_KEY;
        let video = engine
            .create_stream_key_override(
                "video-output",
                StreamKeyOverrideConfig {
                    key: StreamKey::new(vp, vr, vs, vn),
                },
            )
            .await?;
        let switcher_media: Arc<dyn MediaNode> = switcher.clone();
        video.subscribe(switcher_media.clone(), keys::video_only("input"));

        let (ap, ar, asid, an) = AUDIO_OUTPUT_KEY;
        let audio = engine
            .create_stream_key_override(
                "audio-output",
                StreamKeyOverrideConfig {
                    key: StreamKey::new(ap, ar, asid, an),
                },
            )
            .await?;
        audio.subscribe(switcher_media, keys::audio_only("input"));

        let registry = Arc::new(ListenerRegistry::new());
        registry.precreate(&engine, &items).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (notify, _) = broadcast::channel(16);

        let silence_media: Arc<dyn MediaNode> = silence.clone();
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots::default()),
            binding: SwitcherBinding::new(switcher.clone(), SWITCH_SETTLE),
            silence: silence_media,
        });

        let factory = SourceFactory::new(engine.clone(), registry.clone(), tx.clone());
        let controller = Controller {
            playlist: items,
            factory,
            shared: shared.clone(),
            tx: tx.clone(),
            notify: notify.clone(),
            source_index: 0,
            started: false,
            duration_timer: None,
            transition: config.transition,
        };
        let task = tokio::spawn(controller.run(rx));

        Ok(Self {
            tx,
            notify,
            video,
            audio,
            switcher,
            silence_source,
            silence,
            registry,
            shared,
            task,
        })
    }

    /// Begin playback from item 0
    pub fn start(&self) {
        let _ = self.tx.send(ControllerEvent::Start);
    }

    /// Advance to the next item
    pub fn switch(&self) {
        let _ = self.tx.send(ControllerEvent::Switch);
    }

    /// Video output handle (stream key `program=1, rendition="video",
    /// streamId=256, sourceName="input"`)
    pub fn video(&self) -> Arc<dyn ProcessorNode> {
        self.video.clone()
    }

    /// Audio output handle (stream key `program=1, rendition="audio",
    /// streamId=257, sourceName="input"`)
    pub fn audio(&self) -> Arc<dyn ProcessorNode> {
        self.audio.clone()
    }

    /// Receiver for [`PlaylistEvent`] notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaylistEvent> {
        self.notify.subscribe()
    }

    /// Stop the controller and tear down every node it owns
    pub async fn shutdown(self) {
        self.task.abort();
        self.shared.release_slots();
        self.registry.close_all().await;
        self.video.close().await;
        self.audio.close().await;
        self.silence.close().await;
        self.silence_source.close().await;
        self.switcher.close().await;
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        self.task.abort();
    }
}
