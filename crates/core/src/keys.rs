//! Stream-key model and selector helpers
//!
//! Every stream an engine node emits carries a [`StreamKey`] identifying the
//! logical stream inside the node's output. The helpers here pick at most one
//! audio and one video stream out of a node's metadata and turn them into the
//! pin mappings the smooth-switcher consumes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of one logical stream inside a node's output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// MPEG-style program number
    pub program_number: u32,

    /// Rendition name (e.g. "default", "video", "audio")
    pub rendition_name: String,

    /// Numeric stream id within the program
    pub stream_id: u32,

    /// Originating source name; RTMP publishes use `"<app>/<stream>"`
    pub source_name: String,
}

impl StreamKey {
    /// Create a stream key
    pub fn new(
        program_number: u32,
        rendition_name: impl Into<String>,
        stream_id: u32,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            program_number,
            rendition_name: rendition_name.into(),
            stream_id,
            source_name: source_name.into(),
        }
    }
}

/// Media type of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Audio stream
    Audio,
    /// Video stream
    Video,
}

/// Metadata the engine surfaces for one stream of a node
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Key identifying the stream
    pub key: StreamKey,

    /// Whether the stream carries audio or video
    pub media_type: MediaType,
}

impl StreamMetadata {
    /// Audio stream metadata with the given key
    pub fn audio(key: StreamKey) -> Self {
        Self {
            key,
            media_type: MediaType::Audio,
        }
    }

    /// Video stream metadata with the given key
    pub fn video(key: StreamKey) -> Self {
        Self {
            key,
            media_type: MediaType::Video,
        }
    }
}

/// A pin name together with the stream keys routed onto it
#[derive(Debug, Clone, PartialEq)]
pub struct PinMapping {
    /// Pin name on the switcher
    pub pin: String,

    /// Stream keys feeding the pin (audio first when present)
    pub keys: Vec<StreamKey>,
}

/// Maps a node's current stream metadata to an optional pin mapping
///
/// Selectors are re-evaluated by the switcher whenever the subscribed node's
/// stream set changes.
pub type StreamSelector = Arc<dyn Fn(&[StreamMetadata]) -> Option<PinMapping> + Send + Sync>;

/// Keys of all audio streams, in metadata order
pub fn audio_stream_keys(streams: &[StreamMetadata]) -> Vec<StreamKey> {
    streams
        .iter()
        .filter(|s| s.media_type == MediaType::Audio)
        .map(|s| s.key.clone())
        .collect()
}

/// Keys of all video streams, in metadata order
pub fn video_stream_keys(streams: &[StreamMetadata]) -> Vec<StreamKey> {
    streams
        .iter()
        .filter(|s| s.media_type == MediaType::Video)
        .map(|s| s.key.clone())
        .collect()
}

/// Selector yielding a pin mapping only when both an audio and a video
/// stream are present
///
/// Downstream consumers that need synchronised A/V use this to avoid
/// assembling a pin before both media exist.
pub fn av_to_pin(pin: impl Into<String>) -> StreamSelector {
    let pin = pin.into();
    Arc::new(move |streams: &[StreamMetadata]| {
        let audio = audio_stream_keys(streams).into_iter().next()?;
        let video = video_stream_keys(streams).into_iter().next()?;
        Some(PinMapping {
            pin: pin.clone(),
            keys: vec![audio, video],
        })
    })
}

/// Selector yielding the first audio stream, if any
pub fn audio_only(pin: impl Into<String>) -> StreamSelector {
    let pin = pin.into();
    Arc::new(move |streams: &[StreamMetadata]| {
        let audio = audio_stream_keys(streams).into_iter().next()?;
        Some(PinMapping {
            pin: pin.clone(),
            keys: vec![audio],
        })
    })
}

/// Selector yielding the first video stream, if any
pub fn video_only(pin: impl Into<String>) -> StreamSelector {
    let pin = pin.into();
    Arc::new(move |streams: &[StreamMetadata]| {
        let video = video_stream_keys(streams).into_iter().next()?;
        Some(PinMapping {
            pin: pin.clone(),
            keys: vec![video],
        })
    })
}

/// Per-item predicate over stream keys
///
/// Defaults to accept-all. RTMP items with both `app` and `stream` configured
/// restrict their slot to streams published as `"<app>/<stream>"`.
#[derive(Debug, Clone, Default)]
pub enum StreamKeyFilter {
    /// Accept every stream
    #[default]
    AcceptAll,

    /// Accept only streams with this exact source name
    SourceName(String),
}

impl StreamKeyFilter {
    /// Filter accepting only the given source name
    pub fn source_name(name: impl Into<String>) -> Self {
        Self::SourceName(name.into())
    }

    /// Whether the filter accepts the key
    pub fn accepts(&self, key: &StreamKey) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::SourceName(name) => key.source_name == *name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(source: &str) -> StreamMetadata {
        StreamMetadata::audio(StreamKey::new(1, "default", 257, source))
    }

    fn video(source: &str) -> StreamMetadata {
        StreamMetadata::video(StreamKey::new(1, "default", 256, source))
    }

    #[test]
    fn test_media_type_key_selection() {
        let streams = vec![audio("a"), video("a"), audio("b")];
        assert_eq!(audio_stream_keys(&streams).len(), 2);
        assert_eq!(video_stream_keys(&streams).len(), 1);
        assert_eq!(video_stream_keys(&streams)[0].source_name, "a");
    }

    #[test]
    fn test_av_to_pin_requires_both_media() {
        let selector = av_to_pin("main");

        assert!(selector(&[audio("a")]).is_none());
        assert!(selector(&[video("a")]).is_none());
        assert!(selector(&[]).is_none());

        let mapping = selector(&[audio("a"), video("a")]).unwrap();
        assert_eq!(mapping.pin, "main");
        assert_eq!(mapping.keys.len(), 2);
        assert_eq!(mapping.keys[0].stream_id, 257);
        assert_eq!(mapping.keys[1].stream_id, 256);
    }

    #[test]
    fn test_single_media_selectors() {
        let streams = vec![audio("a"), video("a")];

        let mapping = audio_only("0")(&streams).unwrap();
        assert_eq!(mapping.keys, vec![StreamKey::new(1, "default", 257, "a")]);

        let mapping = video_only("0")(&streams).unwrap();
        assert_eq!(mapping.keys, vec![StreamKey::new(1, "default", 256, "a")]);

        assert!(audio_only("0")(&[video("a")]).is_none());
        assert!(video_only("0")(&[audio("a")]).is_none());
    }

    #[test]
    fn test_stream_key_filter() {
        let key = StreamKey::new(1, "default", 256, "live/x");

        assert!(StreamKeyFilter::AcceptAll.accepts(&key));
        assert!(StreamKeyFilter::source_name("live/x").accepts(&key));
        assert!(!StreamKeyFilter::source_name("live/y").accepts(&key));
    }
}
