use crate::gpio::{Level, Polarity};
use serde::{Deserialize, Serialize};

/// Logical button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonEvent {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub presses: u64,
    pub releases: u64,
    /// Raw notifications that did not change the logical state
    pub suppressed: u64,
}

/// Turns raw level notifications into one event per logical transition.
///
/// The button starts out released; repeated notifications for the state
/// that was last emitted produce nothing.
#[derive(Debug, Clone)]
pub struct ButtonWatcher {
    polarity: Polarity,
    pressed: bool,
    stats: WatcherStats,
}

impl ButtonWatcher {
    pub fn new(polarity: Polarity) -> Self {
        Self {
            polarity,
            pressed: false,
            stats: WatcherStats::default(),
        }
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    /// Feed a raw level from the driver
    pub fn on_transition(&mut self, raw: Level) -> Option<ButtonEvent> {
        let pressed = self.polarity.is_active(raw);
        if pressed == self.pressed {
            self.stats.suppressed += 1;
            return None;
        }

        self.pressed = pressed;
        if pressed {
            self.stats.presses += 1;
            Some(ButtonEvent::Pressed)
        } else {
            self.stats.releases += 1;
            Some(ButtonEvent::Released)
        }
    }
}
