//! Quadrature rotary decoding.
//!
//! Each step shifts the `(data, clock)` pair into a 4-bit code made of the
//! previous and current pin levels. Codes that a real quadrature transition
//! can produce are accumulated into an 8-bit history; the two final
//! transitions of a detent leave `0x17` (clockwise) or `0x2b`
//! (counter-clockwise) in that history.

use crate::hardware::DigitalSensor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// 1 = valid gray-code transition, 0 = bounce
const VALID_TRANSITIONS: [u8; 16] = [0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0];

const CLOCKWISE_TAIL: u8 = 0x17;
const COUNTER_CLOCKWISE_TAIL: u8 = 0x2b;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    pub fn signum(self) -> i32 {
        match self {
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RotaryDecoder {
    code: u8,
    history: u8,
}

impl RotaryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sample of both pins. Returns a direction once per detent.
    pub fn step(&mut self, data: bool, clock: bool) -> Option<Direction> {
        self.code = ((self.code << 2) | (u8::from(data) << 1) | u8::from(clock)) & 0x0f;
        if VALID_TRANSITIONS[self.code as usize] == 0 {
            return None;
        }

        self.history = (self.history << 4) | self.code;
        trace!("Rotary history {:#04x}", self.history);
        let direction = match self.history {
            CLOCKWISE_TAIL => Direction::Clockwise,
            COUNTER_CLOCKWISE_TAIL => Direction::CounterClockwise,
            _ => return None,
        };
        self.history = 0;
        Some(direction)
    }
}

#[derive(Debug)]
struct EncoderShared {
    decoder: RotaryDecoder,
    data: bool,
    clock: bool,
    accumulated: i32,
}

/// Producer handle for the interrupt thread. Each edge updates the level of
/// its pin and runs one decode step into the shared accumulator.
#[derive(Debug, Clone)]
pub struct EdgeFeed {
    shared: Arc<Mutex<EncoderShared>>,
}

impl EdgeFeed {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(EncoderShared {
                decoder: RotaryDecoder::new(),
                data: true,
                clock: true,
                accumulated: 0,
            })),
        }
    }

    pub fn data_edge(&self, high: bool) {
        let mut shared = self.shared.lock();
        shared.data = high;
        Self::decode(&mut shared);
    }

    pub fn clock_edge(&self, high: bool) {
        let mut shared = self.shared.lock();
        shared.clock = high;
        Self::decode(&mut shared);
    }

    fn decode(shared: &mut EncoderShared) {
        let (data, clock) = (shared.data, shared.clock);
        if let Some(direction) = shared.decoder.step(data, clock) {
            shared.accumulated += direction.signum();
        }
    }
}

impl Default for EdgeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-pin encoder usable with or without interrupts.
pub struct RotaryEncoder {
    data: Box<dyn DigitalSensor>,
    clock: Box<dyn DigitalSensor>,
    shared: Arc<Mutex<EncoderShared>>,
}

impl RotaryEncoder {
    pub fn new(data: Box<dyn DigitalSensor>, clock: Box<dyn DigitalSensor>) -> Self {
        Self::with_feed(data, clock, EdgeFeed::new())
    }

    /// Builds the encoder around a feed whose interrupts may already be armed.
    /// The current pin levels seed the decoder.
    pub fn with_feed(
        data: Box<dyn DigitalSensor>,
        clock: Box<dyn DigitalSensor>,
        feed: EdgeFeed,
    ) -> Self {
        {
            let mut shared = feed.shared.lock();
            shared.data = data.is_high();
            shared.clock = clock.is_high();
            let (data_high, clock_high) = (shared.data, shared.clock);
            shared.decoder.step(data_high, clock_high);
        }
        Self {
            data,
            clock,
            shared: feed.shared,
        }
    }

    /// Handle to give to the edge interrupt callbacks.
    pub fn edge_feed(&self) -> EdgeFeed {
        EdgeFeed {
            shared: self.shared.clone(),
        }
    }

    /// Drains one unit of interrupt-accumulated rotation if any, otherwise
    /// decodes the current pin levels directly.
    pub fn poll(&mut self) -> Option<Direction> {
        let mut shared = self.shared.lock();
        if shared.accumulated != 0 {
            let direction = if shared.accumulated > 0 {
                Direction::Clockwise
            } else {
                Direction::CounterClockwise
            };
            shared.accumulated -= direction.signum();
            debug!(
                "Drained {:?} from interrupt accumulator ({} left)",
                direction, shared.accumulated
            );
            return Some(direction);
        }

        let data = self.data.is_high();
        let clock = self.clock.is_high();
        if data == shared.data && clock == shared.clock {
            return None;
        }
        shared.data = data;
        shared.clock = clock;
        shared.decoder.step(data, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::scripted::ScriptedPin;

    const CW: [(bool, bool); 5] = [
        (true, true),
        (true, false),
        (false, false),
        (false, true),
        (true, true),
    ];
    const CCW: [(bool, bool); 5] = [
        (true, true),
        (false, true),
        (false, false),
        (true, false),
        (true, true),
    ];

    fn feed(decoder: &mut RotaryDecoder, sequence: &[(bool, bool)]) -> Vec<Direction> {
        sequence
            .iter()
            .filter_map(|&(data, clock)| decoder.step(data, clock))
            .collect()
    }

    #[test]
    fn clockwise_detent_emits_once() {
        let mut decoder = RotaryDecoder::new();
        assert_eq!(feed(&mut decoder, &CW), vec![Direction::Clockwise]);
    }

    #[test]
    fn counter_clockwise_detent_emits_once() {
        let mut decoder = RotaryDecoder::new();
        assert_eq!(feed(&mut decoder, &CCW), vec![Direction::CounterClockwise]);
    }

    #[test]
    fn repeated_samples_do_not_disturb_decoding() {
        let mut decoder = RotaryDecoder::new();
        let slow: Vec<(bool, bool)> = CW.iter().flat_map(|&s| [s, s, s]).collect();
        assert_eq!(feed(&mut decoder, &slow), vec![Direction::Clockwise]);
    }

    #[test]
    fn bounced_sequence_emits_nothing() {
        let mut decoder = RotaryDecoder::new();
        // clock contact chattering while data never moves
        let bounce = [
            (true, true),
            (true, false),
            (true, true),
            (true, false),
            (true, true),
            (true, false),
            (true, true),
        ];
        assert!(feed(&mut decoder, &bounce).is_empty());
    }

    #[test]
    fn consecutive_detents_each_emit() {
        let mut decoder = RotaryDecoder::new();
        let mut sequence = CW.to_vec();
        sequence.extend_from_slice(&CW[1..]);
        sequence.extend_from_slice(&CCW[1..]);
        assert_eq!(
            feed(&mut decoder, &sequence),
            vec![
                Direction::Clockwise,
                Direction::Clockwise,
                Direction::CounterClockwise
            ]
        );
    }

    #[test]
    fn polled_encoder_decodes_pin_levels() {
        let data = ScriptedPin::new(true);
        let clock = ScriptedPin::new(true);
        let mut encoder = RotaryEncoder::new(Box::new(data.clone()), Box::new(clock.clone()));

        let mut seen = Vec::new();
        for &(d, c) in &CCW[1..] {
            data.set_high(d);
            clock.set_high(c);
            if let Some(direction) = encoder.poll() {
                seen.push(direction);
            }
        }
        assert_eq!(seen, vec![Direction::CounterClockwise]);
    }

    #[test]
    fn interrupt_accumulator_drains_one_unit_per_poll() {
        let data = ScriptedPin::new(true);
        let clock = ScriptedPin::new(true);
        let mut encoder = RotaryEncoder::new(Box::new(data.clone()), Box::new(clock.clone()));
        let feed = encoder.edge_feed();

        // two clockwise detents arrive between polls
        for _ in 0..2 {
            feed.clock_edge(false);
            feed.data_edge(false);
            feed.clock_edge(true);
            feed.data_edge(true);
        }

        assert_eq!(encoder.poll(), Some(Direction::Clockwise));
        assert_eq!(encoder.poll(), Some(Direction::Clockwise));
        assert_eq!(encoder.poll(), None);
    }
}
