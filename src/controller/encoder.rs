//! Rotary encoder with an optional MIDI CC binding.

use crate::controller::actions::{midi_value, ActionSink, ControllerAction};
use crate::controller::footswitch::MidiBinding;
use crate::controller::rotary::{Direction, RotaryEncoder};
use tracing::debug;

pub struct Encoder {
    id: String,
    rotary: RotaryEncoder,
    midi: Option<MidiBinding>,
    value: u8,
}

impl Encoder {
    pub fn new(id: impl Into<String>, rotary: RotaryEncoder, midi: Option<MidiBinding>) -> Self {
        Self {
            id: id.into(),
            rotary,
            midi,
            value: 64,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn rebind(&mut self, midi: Option<MidiBinding>, value: u8) {
        self.midi = midi;
        self.value = midi_value(value as i32);
    }

    pub fn poll(&mut self, sink: &mut dyn ActionSink) -> Option<Direction> {
        let direction = self.rotary.poll()?;
        debug!("Encoder {} turned {:?}", self.id, direction);
        sink.dispatch(ControllerAction::Encoder {
            id: self.id.clone(),
            direction,
        });

        if let Some(midi) = self.midi {
            let value = midi_value(self.value as i32 + direction.signum());
            if value != self.value {
                self.value = value;
                sink.dispatch(ControllerAction::MidiControlChange {
                    channel: midi.channel,
                    controller: midi.controller,
                    value,
                });
            }
        }
        Some(direction)
    }
}
