//! Playlist controller configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use playout_core::engine::OutputSettings;

/// Configuration for creating a [`crate::Playlist`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Crossfade duration between sources
    pub transition: Duration,

    /// Switcher output format
    pub output: OutputSettings,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            transition: Duration::from_millis(300),
            output: OutputSettings::default(),
        }
    }
}

impl PlaylistConfig {
    /// Set the crossfade duration
    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    /// Set the switcher output format
    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlaylistConfig::default();
        assert_eq!(config.transition, Duration::from_millis(300));
        assert_eq!(config.output.width, 640);
        assert_eq!(config.output.height, 480);
        assert_eq!(config.output.sample_rate, 48_000);
        assert_eq!(config.output.channels, 2);
    }
}
