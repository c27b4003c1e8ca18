//! Shared listener registry
//!
//! SRT-listener and RTMP sources multiplex many logical publishers over one
//! socket, so their engine nodes are created once per `(protocol, port)` and
//! shared across every playlist item bound to them. The registry owns those
//! nodes for the lifetime of the controller; slots hold only a per-handle
//! disconnect registration, which is their unit of release.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use playout_core::engine::{
    ConnectionStatus, InputConfig, InputHooks, MediaEngine, MediaNode, StreamPublishAccept,
    StreamPublishRequest,
};
use playout_core::error::{Error, Result};
use playout_core::keys::StreamKey;
use playout_core::model::{ListenerProtocol, PlaylistItem, PlaylistSource, SrtMode};

/// Identity of one disconnect-callback registration
pub type HandleId = Uuid;

/// Per-handle disconnect callback; receives the affected publisher's source
/// name when the listener knows it
pub type DisconnectHandler = Arc<dyn Fn(Option<&str>) + Send + Sync>;

type HandlerMap = Arc<Mutex<HashMap<HandleId, DisconnectHandler>>>;

/// Fans one engine-level disconnect out to every registered handler
///
/// The handler snapshot is taken under the lock; the invocations happen
/// outside it, so a handler may detach itself (or others) while running.
#[derive(Clone)]
pub struct DisconnectFanout {
    handlers: HandlerMap,
}

impl DisconnectFanout {
    /// Invoke every currently-registered handler
    pub fn dispatch(&self, source_name: Option<&str>) {
        let snapshot: Vec<DisconnectHandler> = self.handlers.lock().values().cloned().collect();
        for handler in snapshot {
            handler(source_name);
        }
    }
}

struct ListenerEntry {
    node: Arc<dyn MediaNode>,
    handlers: HandlerMap,
}

/// Owns the shared listener-mode input nodes
#[derive(Default)]
pub struct ListenerRegistry {
    entries: DashMap<(ListenerProtocol, u16), ListenerEntry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the listener node for `(protocol, port)` if absent
    ///
    /// The `create` closure receives the [`DisconnectFanout`] to install as
    /// the node's engine-level disconnect callback.
    pub async fn ensure<F, Fut>(
        &self,
        protocol: ListenerProtocol,
        port: u16,
        create: F,
    ) -> Result<()>
    where
        F: FnOnce(DisconnectFanout) -> Fut,
        Fut: Future<Output = Result<Arc<dyn MediaNode>>>,
    {
        if self.entries.contains_key(&(protocol, port)) {
            return Ok(());
        }
        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let fanout = DisconnectFanout {
            handlers: handlers.clone(),
        };
        let node = create(fanout).await?;
        tracing::info!(%protocol, port, node = node.id(), "listener registered");
        self.entries
            .insert((protocol, port), ListenerEntry { node, handlers });
        Ok(())
    }

    /// The listener node for `(protocol, port)`
    pub fn get(&self, protocol: ListenerProtocol, port: u16) -> Result<Arc<dyn MediaNode>> {
        self.entries
            .get(&(protocol, port))
            .map(|entry| entry.node.clone())
            .ok_or(Error::NoListener { protocol, port })
    }

    /// Register a per-handle disconnect callback
    pub fn attach(
        &self,
        protocol: ListenerProtocol,
        port: u16,
        handle: HandleId,
        handler: DisconnectHandler,
    ) -> Result<()> {
        let entry = self
            .entries
            .get(&(protocol, port))
            .ok_or(Error::NoListener { protocol, port })?;
        entry.handlers.lock().insert(handle, handler);
        Ok(())
    }

    /// Remove a per-handle disconnect callback; no-op if absent
    pub fn detach(&self, protocol: ListenerProtocol, port: u16, handle: HandleId) {
        if let Some(entry) = self.entries.get(&(protocol, port)) {
            entry.handlers.lock().remove(&handle);
        }
    }

    /// Number of handlers currently attached to a listener
    pub fn handler_count(&self, protocol: ListenerProtocol, port: u16) -> usize {
        self.entries
            .get(&(protocol, port))
            .map(|entry| entry.handlers.lock().len())
            .unwrap_or(0)
    }

    /// Create every listener the playlist needs
    ///
    /// Walks the items and creates one node per distinct `(protocol, port)`
    /// among listener-mode SRT and RTMP sources. RTP and WHIP items create
    /// fresh standalone nodes on use and are not pre-created here.
    pub async fn precreate(
        &self,
        engine: &Arc<dyn MediaEngine>,
        items: &[PlaylistItem],
    ) -> Result<()> {
        for item in items {
            let Some((protocol, port)) = item.source.listener_binding() else {
                continue;
            };
            let config = match &item.source {
                PlaylistSource::Srt {
                    mode: SrtMode::Listener,
                    ip,
                    port,
                } => InputConfig::SrtListener {
                    ip: ip.clone(),
                    port: *port,
                },
                PlaylistSource::Rtmp { port, .. } => InputConfig::RtmpServer { port: *port },
                _ => continue,
            };
            let engine = engine.clone();
            self.ensure(protocol, port, move |fanout| async move {
                let id = format!("{protocol}-{port}");
                let mut hooks = InputHooks::new().with_on_connection_change(
                    move |status, source_name| {
                        if status == ConnectionStatus::Disconnected {
                            fanout.dispatch(source_name);
                        }
                    },
                );
                if protocol == ListenerProtocol::Rtmp {
                    hooks = hooks.with_on_stream(accept_publish);
                }
                engine.create_input(&id, config, hooks).await
            })
            .await?;
        }
        Ok(())
    }

    /// Tear down every listener node
    pub async fn close_all(&self) {
        let nodes: Vec<Arc<dyn MediaNode>> = self
            .entries
            .iter()
            .map(|entry| entry.node.clone())
            .collect();
        for node in nodes {
            node.close().await;
        }
    }
}

/// Accept every RTMP publish as `"<app>/<publishingName>"` with rendition
/// `default` for both media
///
/// This is what makes multi-publisher demultiplexing work: each publish gets
/// a distinct source name, and per-item stream-key filters pick theirs out.
fn accept_publish(request: &StreamPublishRequest) -> Option<StreamPublishAccept> {
    let source_name = format!("{}/{}", request.app, request.publishing_name);
    Some(StreamPublishAccept {
        source_name: source_name.clone(),
        audio_key: StreamKey::new(1, "default", 257, source_name.clone()),
        video_key: StreamKey::new(1, "default", 256, source_name),
    })
}
