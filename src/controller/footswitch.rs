//! A physical footswitch: press classification plus its pedalboard bindings.
//!
//! Bindings are swapped on every pedalboard load; the state machine and the
//! tap tempo estimator survive the swap untouched.

use crate::clock::Timestamp;
use crate::controller::actions::{ActionSink, ControllerAction, LedMode, PresetTarget};
use crate::controller::longpress::LongpressCoordinator;
use crate::controller::switch::{SwitchEvent, SwitchId, SwitchState, SwitchStateMachine};
use crate::controller::tap_tempo::TapTempo;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Controller message sent for a toggled switch or a turned encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiBinding {
    /// 0-based MIDI channel
    pub channel: u8,
    pub controller: u8,
}

/// What a footswitch does when pressed.
///
/// Loaded from the settings file at startup and replaced at runtime when a
/// pedalboard is loaded. Every key is optional; an empty table binds nothing
/// and the switch only reports its LED state.
///
/// ## Short and long presses
/// A short press toggles the switch and sends `midi_cc` and the relay state,
/// unless `preset` is set, in which case it changes preset instead. A long
/// press stamps every group in `longpress_groups`.
///
/// # Examples
///
/// ```toml
/// [[footswitches]]
/// id = 0
/// input = { type = "gpio", pin = 17 }
///
/// [footswitches.bindings]
/// midi_cc = { channel = 0, controller = 80 }
/// relay = true
/// longpress_groups = ["bypass", "toggle_tuner"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootswitchBindings {
    /// CC sent with 127/0 on every toggle
    pub midi_cc: Option<MidiBinding>,
    /// Toggle the bypass relay
    pub relay: bool,
    /// Short press changes preset instead of toggling
    pub preset: Option<PresetTarget>,
    /// Longpress groups this switch stamps when held past the threshold
    pub longpress_groups: Vec<String>,
}

pub struct Footswitch {
    machine: SwitchStateMachine,
    bindings: FootswitchBindings,
    tap_tempo: Option<TapTempo>,
    enabled: bool,
}

impl Footswitch {
    pub fn new(machine: SwitchStateMachine, bindings: FootswitchBindings) -> Self {
        Self {
            machine,
            bindings,
            tap_tempo: None,
            enabled: false,
        }
    }

    pub fn with_tap_tempo(mut self, tap_tempo: TapTempo) -> Self {
        self.tap_tempo = Some(tap_tempo);
        self
    }

    pub fn id(&self) -> SwitchId {
        self.machine.id()
    }

    pub fn state(&self) -> SwitchState {
        self.machine.state()
    }

    pub fn bindings(&self) -> &FootswitchBindings {
        &self.bindings
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tap_tempo(&self) -> Option<&TapTempo> {
        self.tap_tempo.as_ref()
    }

    pub fn led_id(&self) -> String {
        format!("fs{}", self.id())
    }

    pub fn rebind(&mut self, bindings: FootswitchBindings) {
        info!("Rebinding footswitch {}: {:?}", self.id(), bindings);
        self.bindings = bindings;
    }

    pub fn clear_bindings(&mut self) {
        debug!("Clearing bindings of footswitch {}", self.id());
        self.bindings = FootswitchBindings::default();
    }

    /// Syncs the toggle state from the host without sending MIDI.
    pub fn set_enabled(&mut self, enabled: bool, sink: &mut dyn ActionSink) {
        self.enabled = enabled;
        sink.dispatch(self.led_action());
    }

    pub fn set_tap_tempo_enabled(&mut self, enabled: bool) -> bool {
        match self.tap_tempo.as_mut() {
            Some(tap_tempo) => {
                tap_tempo.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn poll(
        &mut self,
        now: Timestamp,
        coordinator: &mut LongpressCoordinator,
        sink: &mut dyn ActionSink,
    ) -> Option<SwitchEvent> {
        let event = self.machine.poll(now)?;
        match event.kind {
            SwitchState::Pressed => self.on_pressed(&event, sink),
            SwitchState::Released => self.on_short_press(sink),
            SwitchState::LongPressed => {
                for group in &self.bindings.longpress_groups {
                    coordinator.register_longpress(event.switch_id, group, event.timestamp);
                }
            }
        }
        Some(event)
    }

    fn on_pressed(&mut self, event: &SwitchEvent, sink: &mut dyn ActionSink) {
        let Some(tap_tempo) = self.tap_tempo.as_mut() else {
            return;
        };
        // the estimator's own callback reports the tempo
        if tap_tempo.stamp(event.timestamp).is_some() {
            sink.dispatch(ControllerAction::Led {
                id: self.led_id(),
                mode: LedMode::Blink,
            });
        }
    }

    fn on_short_press(&mut self, sink: &mut dyn ActionSink) {
        if let Some(target) = self.bindings.preset.clone() {
            sink.dispatch(ControllerAction::PresetChange(target));
            return;
        }

        self.enabled = !self.enabled;
        debug!("Footswitch {} toggled to {}", self.id(), self.enabled);

        if let Some(midi) = self.bindings.midi_cc {
            sink.dispatch(ControllerAction::MidiControlChange {
                channel: midi.channel,
                controller: midi.controller,
                value: if self.enabled { 127 } else { 0 },
            });
        }
        if self.bindings.relay {
            sink.dispatch(ControllerAction::Relay {
                enabled: self.enabled,
            });
        }
        sink.dispatch(self.led_action());
        sink.dispatch(ControllerAction::RefreshUi);
    }

    fn led_action(&self) -> ControllerAction {
        ControllerAction::Led {
            id: self.led_id(),
            mode: if self.enabled { LedMode::On } else { LedMode::Off },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::longpress::{LongpressGroup, Resolution};
    use crate::controller::switch::PolledSwitch;
    use crate::controller::tap_tempo::TapTempoSettings;
    use crate::hardware::scripted::ScriptedAdc;
    use std::sync::{Arc, Mutex};

    fn footswitch(id: SwitchId, adc: &ScriptedAdc, bindings: FootswitchBindings) -> Footswitch {
        let machine =
            SwitchStateMachine::Polled(PolledSwitch::new(id, Box::new(adc.clone()), 100, 0.5));
        Footswitch::new(machine, bindings)
    }

    fn coordinator() -> LongpressCoordinator {
        LongpressCoordinator::new(0.4, vec![LongpressGroup::new("bypass", 1, Box::new(|_| {}))])
    }

    #[test]
    fn short_press_toggles_and_sends_cc() {
        let adc = ScriptedAdc::new(1023);
        let bindings = FootswitchBindings {
            midi_cc: Some(MidiBinding {
                channel: 0,
                controller: 64,
            }),
            relay: true,
            ..Default::default()
        };
        let mut fs = footswitch(2, &adc, bindings);
        let mut coord = coordinator();
        let mut actions = Vec::new();

        adc.set(0);
        fs.poll(0.0, &mut coord, &mut actions);
        adc.set(1023);
        fs.poll(0.1, &mut coord, &mut actions);

        assert!(fs.enabled());
        assert_eq!(
            actions,
            vec![
                ControllerAction::MidiControlChange {
                    channel: 0,
                    controller: 64,
                    value: 127
                },
                ControllerAction::Relay { enabled: true },
                ControllerAction::Led {
                    id: "fs2".to_string(),
                    mode: LedMode::On
                },
                ControllerAction::RefreshUi,
            ]
        );
    }

    #[test]
    fn preset_binding_replaces_toggle() {
        let adc = ScriptedAdc::new(1023);
        let bindings = FootswitchBindings {
            preset: Some(PresetTarget::Next),
            ..Default::default()
        };
        let mut fs = footswitch(0, &adc, bindings);
        let mut coord = coordinator();
        let mut actions = Vec::new();

        adc.set(0);
        fs.poll(0.0, &mut coord, &mut actions);
        adc.set(1023);
        fs.poll(0.1, &mut coord, &mut actions);

        assert!(!fs.enabled());
        assert_eq!(
            actions,
            vec![ControllerAction::PresetChange(PresetTarget::Next)]
        );
    }

    #[test]
    fn long_press_stamps_groups_without_toggling() {
        let adc = ScriptedAdc::new(0);
        let bindings = FootswitchBindings {
            longpress_groups: vec!["bypass".to_string(), "unknown".to_string()],
            ..Default::default()
        };
        let mut fs = footswitch(1, &adc, bindings);
        let mut coord = coordinator();
        let mut actions = Vec::new();

        fs.poll(0.0, &mut coord, &mut actions);
        fs.poll(0.6, &mut coord, &mut actions);
        assert_eq!(coord.pending_count("bypass"), 1);

        adc.set(1023);
        fs.poll(0.7, &mut coord, &mut actions);
        assert!(actions.is_empty());
        assert!(!fs.enabled());

        let fire = coord.resolve(1.1).expect("single");
        assert_eq!(fire.resolution, Resolution::Single);
    }

    #[test]
    fn presses_feed_tap_tempo() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let log = reported.clone();
        let tap_tempo = TapTempo::new(TapTempoSettings::default())
            .with_callback(Box::new(move |bpm| log.lock().unwrap().push(bpm)));
        let adc = ScriptedAdc::new(1023);
        let mut fs = footswitch(0, &adc, FootswitchBindings::default()).with_tap_tempo(tap_tempo);
        let mut coord = coordinator();
        let mut actions = Vec::new();

        for tap in 0..4 {
            let t = tap as f64 * 0.5;
            adc.set(0);
            fs.poll(t, &mut coord, &mut actions);
            adc.set(1023);
            fs.poll(t + 0.1, &mut coord, &mut actions);
        }

        assert_eq!(fs.tap_tempo().map(TapTempo::get_bpm), Some(120.0));
        assert_eq!(*reported.lock().unwrap(), vec![120.0]);
        let blinks = actions
            .iter()
            .filter(|a| matches!(a, ControllerAction::Led { mode: LedMode::Blink, .. }))
            .count();
        assert_eq!(blinks, 1);
    }

    #[test]
    fn rebinding_keeps_press_in_progress() {
        let adc = ScriptedAdc::new(0);
        let mut fs = footswitch(4, &adc, FootswitchBindings::default());
        let mut coord = coordinator();
        let mut actions = Vec::new();

        fs.poll(0.0, &mut coord, &mut actions);
        assert_eq!(fs.state(), SwitchState::Pressed);

        fs.rebind(FootswitchBindings {
            midi_cc: Some(MidiBinding {
                channel: 1,
                controller: 20,
            }),
            ..Default::default()
        });
        assert_eq!(fs.state(), SwitchState::Pressed);

        adc.set(1023);
        fs.poll(0.1, &mut coord, &mut actions);
        assert_eq!(
            actions.first(),
            Some(&ControllerAction::MidiControlChange {
                channel: 1,
                controller: 20,
                value: 127
            })
        );

        fs.clear_bindings();
        assert_eq!(fs.bindings(), &FootswitchBindings::default());
    }
}
