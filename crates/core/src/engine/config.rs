//! Configuration types for engine node creation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::StreamKey;
use crate::model::{ImageFormat, RtpStream};

/// Configuration for creating an input node
///
/// A closed sum over every input the orchestrator drives, plus the silent
/// audio feed the controller owns for video-only items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputConfig {
    /// Local MPEG-TS file
    LocalTsFile {
        /// Path to the file
        file_name: String,
        /// Advisory in-file start offset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<Duration>,
    },

    /// Local MP4 file; the engine probes its natural duration
    LocalMp4File {
        /// Path to the file
        file_name: String,
        /// Advisory in-file start offset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<Duration>,
    },

    /// Outbound SRT connection
    SrtCaller {
        /// Remote address
        ip: String,
        /// Remote port
        port: u16,
    },

    /// Shared inbound SRT socket
    SrtListener {
        /// Bind address
        ip: String,
        /// Bind port
        port: u16,
    },

    /// Shared RTMP server socket
    RtmpServer {
        /// Bind port
        port: u16,
    },

    /// Still image decoded to a video stream
    Image {
        /// Path to the file
        file_name: String,
        /// Image format
        format: ImageFormat,
    },

    /// RTP receiver
    Rtp {
        /// Streams making up the source
        streams: Vec<RtpStream>,
    },

    /// WHIP (WebRTC ingest) endpoint
    Whip,

    /// Constant audio signal generator
    AudioSignal {
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u16,
    },
}

/// Output format of the smooth-switcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Video width in pixels
    pub width: u32,

    /// Video height in pixels
    pub height: u32,

    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Audio channel count
    pub channels: u16,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Configuration for creating the smooth-switcher node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitcherConfig {
    /// Crossfade duration applied by `switch_source`
    pub transition: Duration,

    /// Output format
    pub output: OutputSettings,
}

/// Configuration for an audio-gain node
///
/// `None` gains mute the channel; [`AudioGainConfig::silent`] mutes them all,
/// which is how the controller manufactures its silence feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioGainConfig {
    /// Per-channel gain; `None` is silence
    pub channel_gains: Vec<Option<f64>>,
}

impl AudioGainConfig {
    /// All channels muted
    pub fn silent(channels: u16) -> Self {
        Self {
            channel_gains: vec![None; channels as usize],
        }
    }
}

/// Configuration for a stream-key-override node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamKeyOverrideConfig {
    /// Key stamped onto every stream passing through
    pub key: StreamKey,
}
