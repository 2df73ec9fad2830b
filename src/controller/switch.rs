//! Per-switch press classification.
//!
//! Both variants turn a noisy sensor into at most one event per physical
//! transition:
//!
//! ```text
//!            pressed sample                held >= threshold
//! Released ─────────────────► Pressed ─────────────────────► LongPressed
//!    ▲    (emit Pressed)         │       (emit LongPressed)       │
//!    │                           │ released sample                │ released sample
//!    │◄──────────────────────────┘ (emit Released)                │ (silent)
//!    └────────────────────────────────────────────────────────────┘
//! ```

use crate::clock::Timestamp;
use crate::hardware::{AnalogSensor, DigitalSensor};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type SwitchId = u8;

/// Edges kept between two polls. Anything beyond is contact bounce.
const EDGE_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchState {
    Released,
    Pressed,
    LongPressed,
}

#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub switch_id: SwitchId,
    pub kind: SwitchState,
    /// Monotonic time of the transition
    pub timestamp: Timestamp,
    /// Wall clock time, for logs only
    pub wall_time: DateTime<Local>,
}

impl SwitchEvent {
    fn new(switch_id: SwitchId, kind: SwitchState, timestamp: Timestamp) -> Self {
        let event = Self {
            switch_id,
            kind,
            timestamp,
            wall_time: Local::now(),
        };
        info!(
            "Switch {} {:?} at {}",
            event.switch_id,
            event.kind,
            event.wall_time.format("%H:%M:%S.%3f")
        );
        event
    }
}

/// Threshold-polled switch. A sample at or below `falling_threshold` counts
/// as pressed.
pub struct PolledSwitch {
    id: SwitchId,
    sensor: Box<dyn AnalogSensor>,
    falling_threshold: u16,
    longpress_threshold: f64,
    state: SwitchState,
    start_time: Timestamp,
}

impl PolledSwitch {
    pub fn new(
        id: SwitchId,
        sensor: Box<dyn AnalogSensor>,
        falling_threshold: u16,
        longpress_threshold: f64,
    ) -> Self {
        debug!(
            "Creating polled switch {} (falling threshold {}, longpress {:.2}s)",
            id, falling_threshold, longpress_threshold
        );
        Self {
            id,
            sensor,
            falling_threshold,
            longpress_threshold,
            state: SwitchState::Released,
            start_time: 0.0,
        }
    }

    pub fn poll(&mut self, now: Timestamp) -> Option<SwitchEvent> {
        let sample = self.sensor.read();
        let pressed = sample <= self.falling_threshold;

        match (self.state, pressed) {
            (SwitchState::Released, true) => {
                self.state = SwitchState::Pressed;
                self.start_time = now;
                Some(SwitchEvent::new(self.id, SwitchState::Pressed, now))
            }
            (SwitchState::Pressed, true) if now - self.start_time >= self.longpress_threshold => {
                self.state = SwitchState::LongPressed;
                Some(SwitchEvent::new(self.id, SwitchState::LongPressed, now))
            }
            (SwitchState::Pressed, false) => {
                self.state = SwitchState::Released;
                Some(SwitchEvent::new(self.id, SwitchState::Released, now))
            }
            (SwitchState::LongPressed, false) => {
                debug!("Switch {} released after long press", self.id);
                self.state = SwitchState::Released;
                None
            }
            _ => None,
        }
    }
}

/// Falling-edge timestamps written by the interrupt thread and drained by the
/// poll loop.
#[derive(Debug, Clone, Default)]
pub struct EdgeQueue {
    pending: Arc<Mutex<VecDeque<Timestamp>>>,
}

impl EdgeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the interrupt context. Only stamps.
    pub fn push(&self, t: Timestamp) {
        let mut pending = self.pending.lock();
        if pending.len() < EDGE_QUEUE_CAPACITY {
            pending.push_back(t);
        }
    }

    /// Takes the oldest pending edge and drops the rest (bounce).
    fn take_first(&self) -> Option<Timestamp> {
        let mut pending = self.pending.lock();
        let first = pending.pop_front();
        if !pending.is_empty() {
            debug!("Discarding {} bounced edges", pending.len());
            pending.clear();
        }
        first
    }

    fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interrupt-edge switch. The press itself comes from the edge queue; the
/// short/long decision samples the pin level on each poll until either the
/// pin reads released or the threshold elapses.
pub struct EdgeSwitch {
    id: SwitchId,
    pin: Box<dyn DigitalSensor>,
    edges: EdgeQueue,
    longpress_threshold: f64,
    state: SwitchState,
    start_time: Timestamp,
}

impl EdgeSwitch {
    pub fn new(
        id: SwitchId,
        pin: Box<dyn DigitalSensor>,
        edges: EdgeQueue,
        longpress_threshold: f64,
    ) -> Self {
        debug!(
            "Creating edge switch {} (longpress {:.2}s)",
            id, longpress_threshold
        );
        Self {
            id,
            pin,
            edges,
            longpress_threshold,
            state: SwitchState::Released,
            start_time: 0.0,
        }
    }

    pub fn poll(&mut self, now: Timestamp) -> Option<SwitchEvent> {
        match self.state {
            SwitchState::Released => {
                let stamp = self.edges.take_first()?;
                if self.pin.is_high() {
                    // release bounce lands after the poll that saw the pin go high
                    debug!(
                        "Switch {} edge at {:.3} with pin released, dropped as bounce",
                        self.id, stamp
                    );
                    return None;
                }
                if stamp > now {
                    warn!(
                        "Switch {} edge stamped in the future ({:.3} > {:.3})",
                        self.id, stamp, now
                    );
                }
                self.state = SwitchState::Pressed;
                self.start_time = stamp.min(now);
                Some(SwitchEvent::new(
                    self.id,
                    SwitchState::Pressed,
                    self.start_time,
                ))
            }
            SwitchState::Pressed => {
                self.edges.clear();
                if self.pin.is_high() {
                    self.state = SwitchState::Released;
                    Some(SwitchEvent::new(self.id, SwitchState::Released, now))
                } else if now - self.start_time >= self.longpress_threshold {
                    self.state = SwitchState::LongPressed;
                    Some(SwitchEvent::new(self.id, SwitchState::LongPressed, now))
                } else {
                    None
                }
            }
            SwitchState::LongPressed => {
                self.edges.clear();
                if self.pin.is_high() {
                    debug!("Switch {} released after long press", self.id);
                    self.state = SwitchState::Released;
                }
                None
            }
        }
    }
}

/// One contract over both wiring variants
pub enum SwitchStateMachine {
    Polled(PolledSwitch),
    Edge(EdgeSwitch),
}

impl SwitchStateMachine {
    pub fn poll(&mut self, now: Timestamp) -> Option<SwitchEvent> {
        match self {
            SwitchStateMachine::Polled(switch) => switch.poll(now),
            SwitchStateMachine::Edge(switch) => switch.poll(now),
        }
    }

    pub fn id(&self) -> SwitchId {
        match self {
            SwitchStateMachine::Polled(switch) => switch.id,
            SwitchStateMachine::Edge(switch) => switch.id,
        }
    }

    pub fn state(&self) -> SwitchState {
        match self {
            SwitchStateMachine::Polled(switch) => switch.state,
            SwitchStateMachine::Edge(switch) => switch.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::scripted::{ScriptedAdc, ScriptedPin};

    const RELEASED: u16 = 1023;
    const PRESSED: u16 = 0;

    fn polled(adc: &ScriptedAdc) -> SwitchStateMachine {
        SwitchStateMachine::Polled(PolledSwitch::new(3, Box::new(adc.clone()), 100, 0.5))
    }

    /// Polls every 10ms from `from` (inclusive) to `to` (exclusive).
    fn run(
        switch: &mut SwitchStateMachine,
        from: f64,
        to: f64,
        events: &mut Vec<SwitchState>,
    ) {
        let mut t = from;
        while t < to - 1e-9 {
            if let Some(event) = switch.poll(t) {
                events.push(event.kind);
            }
            t += 0.01;
        }
    }

    #[test]
    fn short_press_emits_pressed_then_released() {
        let adc = ScriptedAdc::new(RELEASED);
        let mut switch = polled(&adc);
        let mut events = Vec::new();

        run(&mut switch, 0.0, 0.1, &mut events);
        adc.set(PRESSED);
        run(&mut switch, 0.1, 0.5, &mut events);
        adc.set(RELEASED);
        run(&mut switch, 0.5, 1.5, &mut events);

        assert_eq!(events, vec![SwitchState::Pressed, SwitchState::Released]);
        assert_eq!(switch.state(), SwitchState::Released);
    }

    #[test]
    fn long_hold_fires_longpress_once_and_releases_silently() {
        let adc = ScriptedAdc::new(PRESSED);
        let mut switch = polled(&adc);
        let mut events = Vec::new();

        run(&mut switch, 0.0, 2.0, &mut events);
        assert_eq!(events, vec![SwitchState::Pressed, SwitchState::LongPressed]);

        adc.set(RELEASED);
        run(&mut switch, 2.0, 2.5, &mut events);
        assert_eq!(events, vec![SwitchState::Pressed, SwitchState::LongPressed]);
        assert_eq!(switch.state(), SwitchState::Released);
    }

    #[test]
    fn longpress_fires_exactly_at_threshold() {
        let adc = ScriptedAdc::new(PRESSED);
        let mut switch = polled(&adc);
        assert_eq!(switch.poll(1.0).map(|e| e.kind), Some(SwitchState::Pressed));
        assert!(switch.poll(1.49).is_none());
        assert_eq!(
            switch.poll(1.5).map(|e| e.kind),
            Some(SwitchState::LongPressed)
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let adc = ScriptedAdc::new(100);
        let mut switch = polled(&adc);
        assert_eq!(switch.poll(0.0).map(|e| e.kind), Some(SwitchState::Pressed));
        adc.set(101);
        assert_eq!(switch.poll(0.01).map(|e| e.kind), Some(SwitchState::Released));
    }

    #[test]
    fn edge_switch_classifies_short_press() {
        let pin = ScriptedPin::new(true);
        let edges = EdgeQueue::new();
        let mut switch = SwitchStateMachine::Edge(EdgeSwitch::new(
            1,
            Box::new(pin.clone()),
            edges.clone(),
            0.5,
        ));

        assert!(switch.poll(0.0).is_none());

        // bounce: three falling edges for one press
        pin.set_pressed(true);
        edges.push(0.100);
        edges.push(0.102);
        edges.push(0.104);

        let pressed = switch.poll(0.11).expect("press");
        assert_eq!(pressed.kind, SwitchState::Pressed);
        assert_eq!(pressed.timestamp, 0.100);
        assert!(edges.is_empty());

        assert!(switch.poll(0.12).is_none());
        pin.set_pressed(false);
        assert_eq!(
            switch.poll(0.2).map(|e| e.kind),
            Some(SwitchState::Released)
        );
        assert!(switch.poll(0.3).is_none());
    }

    #[test]
    fn edge_switch_classifies_long_press() {
        let pin = ScriptedPin::new(true);
        let edges = EdgeQueue::new();
        let mut switch = SwitchStateMachine::Edge(EdgeSwitch::new(
            1,
            Box::new(pin.clone()),
            edges.clone(),
            0.5,
        ));

        pin.set_pressed(true);
        edges.push(1.0);
        let mut events = Vec::new();
        run(&mut switch, 1.0, 2.0, &mut events);
        assert_eq!(events, vec![SwitchState::Pressed, SwitchState::LongPressed]);

        // release bounce while long-pressed is ignored
        edges.push(2.0);
        pin.set_pressed(false);
        run(&mut switch, 2.0, 2.1, &mut events);
        assert_eq!(events.len(), 2);
        assert_eq!(switch.state(), SwitchState::Released);
    }

    #[test]
    fn edge_switch_ignores_release_bounce() {
        let pin = ScriptedPin::new(true);
        let edges = EdgeQueue::new();
        let mut switch = SwitchStateMachine::Edge(EdgeSwitch::new(
            4,
            Box::new(pin.clone()),
            edges.clone(),
            0.5,
        ));
        let mut events = Vec::new();

        pin.set_pressed(true);
        edges.push(0.0);
        run(&mut switch, 0.0, 0.1, &mut events);

        pin.set_pressed(false);
        run(&mut switch, 0.1, 0.101, &mut events);
        // contact chatter after the release was already seen
        edges.push(0.101);
        run(&mut switch, 0.11, 0.14, &mut events);

        assert_eq!(events, vec![SwitchState::Pressed, SwitchState::Released]);
        assert!(edges.is_empty());
        assert_eq!(switch.state(), SwitchState::Released);
    }

    #[test]
    fn edge_queue_is_bounded() {
        let edges = EdgeQueue::new();
        for i in 0..100 {
            edges.push(i as f64);
        }
        assert_eq!(edges.len(), EDGE_QUEUE_CAPACITY);
    }
}
