//! Source factory
//!
//! Turns a playlist item into a live source handle. File, image, RTP, WHIP
//! and SRT-caller items get a freshly created engine node owned by their
//! slot; listener-mode SRT and RTMP items get a handle onto the shared node
//! in the [`ListenerRegistry`]. Both shapes expose the same surface: a
//! subscribe callback fired the moment the source is addressable, a duration
//! future, and an idempotent [`CloseHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use playout_core::engine::{
    ConnectionStatus, InputConfig, InputHooks, MediaEngine, MediaNode,
};
use playout_core::error::{Error, Result};
use playout_core::keys::StreamKeyFilter;
use playout_core::model::{ListenerProtocol, PlaylistItem, PlaylistSource, SourceKind, SrtMode};

use crate::controller::{ControllerEvent, EndReason};
use crate::listener::{DisconnectHandler, ListenerRegistry};

/// Delay between releasing a standalone node and tearing it down, long
/// enough for the switcher's crossfade to drain without a glitch
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum CloseAction {
    /// Standalone node not yet delivered by the engine
    Unbound { grace: Duration },

    /// Standalone node owned by the slot
    Standalone {
        node: Arc<dyn MediaNode>,
        grace: Duration,
    },

    /// Handle onto a shared listener; release detaches the disconnect
    /// registration and leaves the node alone
    Detach {
        registry: Arc<ListenerRegistry>,
        protocol: ListenerProtocol,
        port: u16,
        handle: crate::listener::HandleId,
    },
}

struct CloseInner {
    fired: AtomicBool,
    action: Mutex<CloseAction>,
}

/// Idempotent teardown handle for one slot's source
///
/// For standalone nodes, the first `close` schedules the engine node's
/// teardown after a grace delay; for shared-listener handles it only detaches
/// the disconnect registration. Subsequent calls do nothing.
#[derive(Clone)]
pub struct CloseHandle {
    inner: Arc<CloseInner>,
}

impl CloseHandle {
    pub(crate) fn standalone(grace: Duration) -> Self {
        Self {
            inner: Arc::new(CloseInner {
                fired: AtomicBool::new(false),
                action: Mutex::new(CloseAction::Unbound { grace }),
            }),
        }
    }

    fn for_listener(
        registry: Arc<ListenerRegistry>,
        protocol: ListenerProtocol,
        port: u16,
        handle: crate::listener::HandleId,
    ) -> Self {
        Self {
            inner: Arc::new(CloseInner {
                fired: AtomicBool::new(false),
                action: Mutex::new(CloseAction::Detach {
                    registry,
                    protocol,
                    port,
                    handle,
                }),
            }),
        }
    }

    /// Attach the engine node once the creation hook delivers it
    fn bind(&self, node: Arc<dyn MediaNode>) {
        let mut action = self.inner.action.lock();
        if let CloseAction::Unbound { grace } = *action {
            *action = CloseAction::Standalone { node, grace };
        }
        drop(action);
        // Closed before the node arrived: run the teardown now.
        if self.inner.fired.load(Ordering::SeqCst) {
            self.teardown();
        }
    }

    /// Release the source; safe to call any number of times
    pub fn close(&self) {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    fn teardown(&self) {
        let action = self.inner.action.lock();
        match &*action {
            CloseAction::Unbound { .. } => {}
            CloseAction::Standalone { node, grace } => {
                let node = node.clone();
                let grace = *grace;
                tracing::debug!(node = node.id(), grace_ms = grace.as_millis() as u64, "scheduling node teardown");
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    node.close().await;
                });
            }
            CloseAction::Detach {
                registry,
                protocol,
                port,
                handle,
            } => {
                registry.detach(*protocol, *port, *handle);
            }
        }
    }
}

/// What the factory hands to the subscribe callback the moment the source is
/// addressable
pub struct SubscribedSource {
    /// Engine node backing the source (shared for listener items)
    pub node: Arc<dyn MediaNode>,

    /// Logical node id, `"input-<index>"`
    pub node_id: String,

    /// Whether the source needs audio for readiness
    pub kind: SourceKind,

    /// The originating playlist item
    pub item: PlaylistItem,

    /// Per-item stream-key filter
    pub filter: StreamKeyFilter,

    /// Teardown handle for the source
    pub close: CloseHandle,
}

/// Callback fired once when the source becomes addressable
///
/// Runs synchronously inside the engine's creation hook (fresh nodes) or
/// immediately after registry lookup (shared listeners), so the switcher
/// subscription is in place before any initial frame is dropped.
pub type SubscribeCallback = Box<dyn FnOnce(SubscribedSource) + Send>;

/// Result of [`SourceFactory::create`]
pub struct CreatedSource {
    /// Engine node backing the source
    pub node: Arc<dyn MediaNode>,

    /// Logical node id, `"input-<index>"`
    pub node_id: String,

    /// Whether the source needs audio for readiness
    pub kind: SourceKind,

    /// Resolves with the MP4 natural duration once probed, or `None` for
    /// every other source type
    pub duration: BoxFuture<'static, Option<Duration>>,

    /// Per-item stream-key filter
    pub filter: StreamKeyFilter,

    /// Teardown handle for the source
    pub close: CloseHandle,
}

/// Produces source handles for playlist items
pub struct SourceFactory {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<ListenerRegistry>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl SourceFactory {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        registry: Arc<ListenerRegistry>,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            engine,
            registry,
            events,
        }
    }

    /// Create the source handle for `item` at playlist position `index`
    pub async fn create(
        &self,
        item: &PlaylistItem,
        index: usize,
        subscribe: SubscribeCallback,
    ) -> Result<CreatedSource> {
        let node_id = format!("input-{index}");
        match item.source.listener_binding() {
            Some((protocol, port)) => {
                self.shared_handle(item, index, node_id, protocol, port, subscribe)
            }
            None => self.standalone(item, index, node_id, subscribe).await,
        }
    }

    /// Handle onto a pre-created shared listener node
    fn shared_handle(
        &self,
        item: &PlaylistItem,
        index: usize,
        node_id: String,
        protocol: ListenerProtocol,
        port: u16,
        subscribe: SubscribeCallback,
    ) -> Result<CreatedSource> {
        let node = self.registry.get(protocol, port)?;
        let kind = item.source.kind();
        let handle = Uuid::new_v4();
        let close = CloseHandle::for_listener(self.registry.clone(), protocol, port, handle);
        let filter = match item.source.rtmp_source_name() {
            Some(name) => StreamKeyFilter::source_name(name),
            None => StreamKeyFilter::default(),
        };

        let handler: DisconnectHandler = match protocol {
            // One shot: advance, then drop the registration.
            ListenerProtocol::Srt => {
                let events = self.events.clone();
                let registry = self.registry.clone();
                Arc::new(move |_source_name| {
                    let _ = events.send(ControllerEvent::SourceEnded {
                        index,
                        reason: EndReason::Disconnect,
                    });
                    registry.detach(protocol, port, handle);
                })
            }
            // Advance only when the disconnected publisher is ours.
            ListenerProtocol::Rtmp => {
                let events = self.events.clone();
                let wanted = item.source.rtmp_source_name();
                Arc::new(move |source_name| {
                    let ours = match (&wanted, source_name) {
                        (Some(wanted), Some(name)) => wanted == name,
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    if ours {
                        let _ = events.send(ControllerEvent::SourceEnded {
                            index,
                            reason: EndReason::Disconnect,
                        });
                    }
                })
            }
        };
        self.registry.attach(protocol, port, handle, handler)?;

        subscribe(SubscribedSource {
            node: node.clone(),
            node_id: node_id.clone(),
            kind,
            item: item.clone(),
            filter: filter.clone(),
            close: close.clone(),
        });

        Ok(CreatedSource {
            node,
            node_id,
            kind,
            duration: Box::pin(futures::future::ready(None)),
            filter,
            close,
        })
    }

    /// Freshly created engine node, exclusively owned by the slot
    async fn standalone(
        &self,
        item: &PlaylistItem,
        index: usize,
        node_id: String,
        subscribe: SubscribeCallback,
    ) -> Result<CreatedSource> {
        let kind = item.source.kind();
        let filter = StreamKeyFilter::default();
        let close = CloseHandle::standalone(CLOSE_GRACE);
        let config = standalone_config(item)?;

        let mut hooks = InputHooks::new();

        // Subscription first: the hook runs before the node emits frames.
        {
            let close = close.clone();
            let item = item.clone();
            let node_id = node_id.clone();
            let filter = filter.clone();
            hooks = hooks.with_on_create(move |node: Arc<dyn MediaNode>| {
                close.bind(node.clone());
                subscribe(SubscribedSource {
                    node,
                    node_id,
                    kind,
                    item,
                    filter,
                    close: close.clone(),
                });
            });
        }

        {
            let events = self.events.clone();
            let id = node_id.clone();
            hooks = hooks.with_on_close(move || {
                let _ = events.send(ControllerEvent::NodeClosed {
                    node_id: id.clone(),
                });
            });
        }

        let duration: BoxFuture<'static, Option<Duration>> = match &item.source {
            PlaylistSource::LocalTsFile { .. } | PlaylistSource::LocalMp4File { .. } => {
                let close = close.clone();
                let events = self.events.clone();
                hooks = hooks.with_on_eof(move || {
                    close.close();
                    let _ = events.send(ControllerEvent::SourceEnded {
                        index,
                        reason: EndReason::Eof,
                    });
                });

                if matches!(item.source, PlaylistSource::LocalMp4File { .. }) {
                    let (tx, rx) = oneshot::channel();
                    let tx = Mutex::new(Some(tx));
                    hooks = hooks.with_on_info(move |info| {
                        if let Some(tx) = tx.lock().take() {
                            let _ = tx.send(info.duration);
                        }
                    });
                    Box::pin(async move { rx.await.ok().flatten() })
                } else {
                    Box::pin(futures::future::ready(None))
                }
            }
            PlaylistSource::Srt {
                mode: SrtMode::Caller,
                ..
            } => {
                let close = close.clone();
                let events = self.events.clone();
                hooks = hooks.with_on_connection_change(move |status, _| {
                    if status == ConnectionStatus::Disconnected {
                        close.close();
                        let _ = events.send(ControllerEvent::SourceEnded {
                            index,
                            reason: EndReason::Disconnect,
                        });
                    }
                });
                Box::pin(futures::future::ready(None))
            }
            _ => Box::pin(futures::future::ready(None)),
        };

        let node = self
            .engine
            .create_input(&node_id, config, hooks)
            .await
            .map_err(|e| Error::Factory {
                node_id: node_id.clone(),
                message: e.to_string(),
            })?;

        Ok(CreatedSource {
            node,
            node_id,
            kind,
            duration,
            filter,
            close,
        })
    }
}

/// Engine input configuration for a standalone (non-listener) item
fn standalone_config(item: &PlaylistItem) -> Result<InputConfig> {
    match &item.source {
        PlaylistSource::LocalTsFile { file_name } => Ok(InputConfig::LocalTsFile {
            file_name: file_name.clone(),
            start: item.begin,
        }),
        PlaylistSource::LocalMp4File { file_name } => Ok(InputConfig::LocalMp4File {
            file_name: file_name.clone(),
            start: item.begin,
        }),
        PlaylistSource::Srt {
            mode: SrtMode::Caller,
            ip,
            port,
        } => Ok(InputConfig::SrtCaller {
            ip: ip.clone(),
            port: *port,
        }),
        PlaylistSource::Image { file_name, format } => Ok(InputConfig::Image {
            file_name: file_name.clone(),
            format: *format,
        }),
        PlaylistSource::Rtp { streams } => Ok(InputConfig::Rtp {
            streams: streams.clone(),
        }),
        PlaylistSource::Whip => Ok(InputConfig::Whip),
        PlaylistSource::Srt {
            mode: SrtMode::Listener,
            ..
        }
        | PlaylistSource::Rtmp { .. } => Err(Error::Config(format!(
            "listener-bound source routed to standalone creation: {:?}",
            item.source
        ))),
    }
}
