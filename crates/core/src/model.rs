//! Playlist data model
//!
//! A playlist is an ordered list of [`PlaylistItem`]s. Each item wraps a
//! [`PlaylistSource`], a closed sum over the supported input kinds. Two total
//! functions classify every source: [`PlaylistSource::kind`] decides whether
//! audio readiness is required before switching, and
//! [`PlaylistSource::liveness`] decides whether the item is prewarmed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::MediaType;

/// One entry of a playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Advisory in-file start offset, passed through to the engine
    #[serde(default, with = "duration_ms", skip_serializing_if = "Option::is_none")]
    pub begin: Option<Duration>,

    /// Bound on playing time; absent means "play to natural end"
    #[serde(default, with = "duration_ms", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// What to play
    pub source: PlaylistSource,
}

impl PlaylistItem {
    /// Item playing the source to its natural end
    pub fn new(source: PlaylistSource) -> Self {
        Self {
            begin: None,
            duration: None,
            source,
        }
    }

    /// Bound the playing time
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the advisory in-file start offset
    pub fn with_begin(mut self, begin: Duration) -> Self {
        self.begin = Some(begin);
        self
    }
}

/// SRT connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SrtMode {
    /// Connect out to a remote listener
    Caller,
    /// Accept inbound connections on a shared socket
    Listener,
}

/// Still-image formats the engine can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// One RTP stream of an RTP source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpStream {
    /// Stream name
    pub name: String,

    /// Audio or video
    pub media: MediaType,

    /// UDP port the stream arrives on
    pub port: u16,
}

/// Source of a playlist item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaylistSource {
    /// Local MPEG-TS file
    LocalTsFile {
        /// Path to the file
        file_name: String,
    },

    /// Local MP4 file; natural duration discoverable at runtime
    LocalMp4File {
        /// Path to the file
        file_name: String,
    },

    /// SRT source, caller or listener side
    Srt {
        /// Connection mode
        mode: SrtMode,
        /// Remote address (caller) or bind address (listener)
        ip: String,
        /// Remote or bind port
        port: u16,
    },

    /// RTMP source, always listener-side
    Rtmp {
        /// Port of the shared RTMP server
        port: u16,
        /// Application name; filters input when `stream` is also set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app: Option<String>,
        /// Stream name; filters input when `app` is also set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream: Option<String>,
    },

    /// Still image, video-only
    Image {
        /// Path to the file
        file_name: String,
        /// Image format
        format: ImageFormat,
    },

    /// RTP source
    Rtp {
        /// Streams making up the source
        streams: Vec<RtpStream>,
    },

    /// WHIP (WebRTC ingest) source
    Whip,
}

/// Whether audio readiness is required before switching to a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Audio and video; both must be visible before the switch
    Av,
    /// Video only; audio is supplied by the silence feed
    Video,
}

/// Whether a source is a live ingest or a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Live ingest; prewarmed when it is the next item
    Live,
    /// File-backed; created on demand
    File,
}

/// Protocols whose listener sockets are shared across items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerProtocol {
    Srt,
    Rtmp,
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerProtocol::Srt => write!(f, "srt"),
            ListenerProtocol::Rtmp => write!(f, "rtmp"),
        }
    }
}

impl PlaylistSource {
    /// Whether the source needs audio for readiness
    pub fn kind(&self) -> SourceKind {
        match self {
            PlaylistSource::Image { .. } => SourceKind::Video,
            _ => SourceKind::Av,
        }
    }

    /// Live ingest or file
    pub fn liveness(&self) -> Liveness {
        match self {
            PlaylistSource::Srt { .. }
            | PlaylistSource::Rtmp { .. }
            | PlaylistSource::Rtp { .. }
            | PlaylistSource::Whip => Liveness::Live,
            PlaylistSource::LocalTsFile { .. }
            | PlaylistSource::LocalMp4File { .. }
            | PlaylistSource::Image { .. } => Liveness::File,
        }
    }

    /// Convenience for `liveness() == Liveness::Live`
    pub fn is_live(&self) -> bool {
        self.liveness() == Liveness::Live
    }

    /// The shared listener this source binds to, if any
    ///
    /// Listener-mode SRT and RTMP items share one socket per `(protocol,
    /// port)`; everything else owns its node outright.
    pub fn listener_binding(&self) -> Option<(ListenerProtocol, u16)> {
        match self {
            PlaylistSource::Srt {
                mode: SrtMode::Listener,
                port,
                ..
            } => Some((ListenerProtocol::Srt, *port)),
            PlaylistSource::Rtmp { port, .. } => Some((ListenerProtocol::Rtmp, *port)),
            _ => None,
        }
    }

    /// The `"<app>/<stream>"` source name an RTMP item filters on
    ///
    /// Present only when both `app` and `stream` are configured.
    pub fn rtmp_source_name(&self) -> Option<String> {
        match self {
            PlaylistSource::Rtmp {
                app: Some(app),
                stream: Some(stream),
                ..
            } => Some(format!("{}/{}", app, stream)),
            _ => None,
        }
    }
}

/// Serde helper: optional durations as integer milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => ser.serialize_some(&(d.as_millis() as u64)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<Duration>, D::Error> {
        let ms: Option<u64> = Option::deserialize(de)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_sources() -> Vec<PlaylistSource> {
        vec![
            PlaylistSource::LocalTsFile {
                file_name: "a.ts".into(),
            },
            PlaylistSource::LocalMp4File {
                file_name: "a.mp4".into(),
            },
            PlaylistSource::Srt {
                mode: SrtMode::Caller,
                ip: "127.0.0.1".into(),
                port: 5000,
            },
            PlaylistSource::Srt {
                mode: SrtMode::Listener,
                ip: "0.0.0.0".into(),
                port: 5001,
            },
            PlaylistSource::Rtmp {
                port: 1935,
                app: Some("live".into()),
                stream: Some("x".into()),
            },
            PlaylistSource::Image {
                file_name: "logo.png".into(),
                format: ImageFormat::Png,
            },
            PlaylistSource::Rtp { streams: vec![] },
            PlaylistSource::Whip,
        ]
    }

    #[test]
    fn test_kind_is_total() {
        for source in all_sources() {
            match &source {
                PlaylistSource::Image { .. } => assert_eq!(source.kind(), SourceKind::Video),
                _ => assert_eq!(source.kind(), SourceKind::Av),
            }
        }
    }

    #[test]
    fn test_liveness_classification() {
        for source in all_sources() {
            let expect_live = matches!(
                source,
                PlaylistSource::Srt { .. }
                    | PlaylistSource::Rtmp { .. }
                    | PlaylistSource::Rtp { .. }
                    | PlaylistSource::Whip
            );
            assert_eq!(source.is_live(), expect_live, "{:?}", source);
        }
    }

    #[test]
    fn test_listener_binding() {
        let srt_caller = PlaylistSource::Srt {
            mode: SrtMode::Caller,
            ip: "10.0.0.1".into(),
            port: 5000,
        };
        assert_eq!(srt_caller.listener_binding(), None);

        let srt_listener = PlaylistSource::Srt {
            mode: SrtMode::Listener,
            ip: "0.0.0.0".into(),
            port: 5000,
        };
        assert_eq!(
            srt_listener.listener_binding(),
            Some((ListenerProtocol::Srt, 5000))
        );

        let rtmp = PlaylistSource::Rtmp {
            port: 1935,
            app: None,
            stream: None,
        };
        assert_eq!(rtmp.listener_binding(), Some((ListenerProtocol::Rtmp, 1935)));
    }

    #[test]
    fn test_rtmp_source_name_requires_both_parts() {
        let full = PlaylistSource::Rtmp {
            port: 1935,
            app: Some("live".into()),
            stream: Some("x".into()),
        };
        assert_eq!(full.rtmp_source_name(), Some("live/x".into()));

        let app_only = PlaylistSource::Rtmp {
            port: 1935,
            app: Some("live".into()),
            stream: None,
        };
        assert_eq!(app_only.rtmp_source_name(), None);
    }

    #[test]
    fn test_item_duration_roundtrips_as_millis() {
        let item = PlaylistItem::new(PlaylistSource::LocalMp4File {
            file_name: "a.mp4".into(),
        })
        .with_duration(Duration::from_millis(5000));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["duration"], 5000);
        assert_eq!(json["source"]["type"], "localMp4File");

        let back: PlaylistItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
