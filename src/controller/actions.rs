//! Side effects leaving the controller.
//!
//! Everything the poll loop wants done in the outside world is expressed as a
//! [`ControllerAction`] and handed to an [`ActionSink`]. The binary consumes
//! them from a tokio channel; tests collect them in a `Vec`.

use crate::controller::level::LevelState;
use crate::controller::longpress::Resolution;
use crate::controller::rotary::Direction;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedMode {
    On,
    Off,
    Blink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetTarget {
    Next,
    Previous,
    Index(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerAction {
    MidiControlChange { channel: u8, controller: u8, value: u8 },
    Relay { enabled: bool },
    Led { id: String, mode: LedMode },
    RefreshUi,
    PresetChange(PresetTarget),
    Tempo { bpm: f64 },
    Longpress { group: String, resolution: Resolution },
    Encoder { id: String, direction: Direction },
    Level { id: String, state: LevelState },
}

/// Fire-and-forget output
pub trait ActionSink {
    fn dispatch(&mut self, action: ControllerAction);
}

impl ActionSink for Vec<ControllerAction> {
    fn dispatch(&mut self, action: ControllerAction) {
        self.push(action);
    }
}

impl ActionSink for mpsc::Sender<ControllerAction> {
    fn dispatch(&mut self, action: ControllerAction) {
        debug!("Dispatching {:?}", action);
        if let Err(e) = self.try_send(action) {
            warn!("Dropping controller action: {}", e);
        }
    }
}

/// Clamps to the 7-bit MIDI data range.
pub fn midi_value(value: i32) -> u8 {
    value.clamp(0, 127) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_values_are_clamped() {
        assert_eq!(midi_value(-5), 0);
        assert_eq!(midi_value(64), 64);
        assert_eq!(midi_value(300), 127);
    }

    #[tokio::test]
    async fn channel_sink_forwards_and_drops_when_full() {
        let (mut tx, mut rx) = mpsc::channel(1);
        tx.dispatch(ControllerAction::RefreshUi);
        tx.dispatch(ControllerAction::Relay { enabled: true });

        assert_eq!(rx.recv().await, Some(ControllerAction::RefreshUi));
        assert!(rx.try_recv().is_err());
    }
}
