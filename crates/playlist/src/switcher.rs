//! Thin adapter over the engine's smooth-switcher node

use std::sync::Arc;
use std::time::Duration;

use playout_core::engine::{PinSubscription, SwitcherNode};

/// Translates controller slot state into switcher commands
///
/// `refresh` replaces the complete pin subscription set; `activate` commands
/// a crossfade to a pin after a short settle delay, so a subscription
/// republished in the same breath lands first.
pub struct SwitcherBinding {
    switcher: Arc<dyn SwitcherNode>,
    settle: Duration,
}

impl SwitcherBinding {
    pub fn new(switcher: Arc<dyn SwitcherNode>, settle: Duration) -> Self {
        Self { switcher, settle }
    }

    /// Replace the switcher's pin subscriptions
    pub fn refresh(&self, subs: Vec<PinSubscription>) {
        tracing::debug!(pins = subs.len(), "republishing pin subscriptions");
        self.switcher.subscribe_to_pins(subs);
    }

    /// Crossfade to `pin` once the settle delay elapses
    pub fn activate(&self, pin: String) {
        let switcher = self.switcher.clone();
        let settle = self.settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            tracing::info!(pin = %pin, "switching source");
            switcher.switch_source(&pin);
        });
    }
}
