//! Builds a running input host from [`Settings`].

use crate::clock::Clock;
use crate::config::{EncoderSettings, FootswitchSettings, GroupSettings, Settings, SwitchInput};
use crate::controller::actions::ActionSink;
use crate::controller::encoder::Encoder;
use crate::controller::footswitch::Footswitch;
use crate::controller::host::{InputHost, Polling};
use crate::controller::level::LevelMonitor;
use crate::controller::longpress::{LongpressCallback, LongpressCoordinator, LongpressGroup};
use crate::controller::rotary::{EdgeFeed, RotaryEncoder};
use crate::controller::switch::{EdgeQueue, EdgeSwitch, PolledSwitch, SwitchId, SwitchStateMachine};
use crate::controller::tap_tempo::{TapTempo, TempoCallback};
use crate::controller::ControllerError;
use crate::hardware::{InputProvider, LevelAsCount, ADC_MAX};
use std::sync::Arc;
use tracing::{debug, info};

/// A GPIO read as a count is either 0 or full scale
const GPIO_FALLING_THRESHOLD: u16 = ADC_MAX / 2;

/// Claims every configured input from `provider` and registers it.
/// `group_callback` supplies the action fired for each longpress group and
/// `tempo_callback` the receiver of each tap switch's BPM changes.
pub fn build_host(
    settings: &Settings,
    provider: &mut dyn InputProvider,
    clock: Arc<dyn Clock>,
    sink: Box<dyn ActionSink + Send>,
    mut group_callback: impl FnMut(&GroupSettings) -> LongpressCallback,
    mut tempo_callback: impl FnMut(SwitchId) -> TempoCallback,
) -> Result<InputHost<Polling>, ControllerError> {
    settings.validate()?;

    let groups = settings
        .longpress_groups
        .iter()
        .map(|group| LongpressGroup::new(group.name.clone(), group.members, group_callback(group)))
        .collect();
    let coordinator = LongpressCoordinator::new(settings.correlation_window_s, groups);
    let mut host = InputHost::create(clock.clone(), coordinator, sink);

    for fs in &settings.footswitches {
        let machine = switch_machine(fs, settings.longpress_threshold_s, provider, &clock)?;
        let mut footswitch = Footswitch::new(machine, fs.bindings.clone());
        if fs.tap_tempo {
            let tap_tempo =
                TapTempo::new(settings.tap_tempo_settings()).with_callback(tempo_callback(fs.id));
            footswitch = footswitch.with_tap_tempo(tap_tempo);
        }
        host.add_footswitch(footswitch)?;
    }

    for encoder in &settings.encoders {
        let rotary = rotary_encoder(encoder, provider)?;
        host.add_encoder(Encoder::new(encoder.id.clone(), rotary, encoder.midi_cc));
    }

    for monitor in &settings.level_monitors {
        let sensor = provider.adc_channel(monitor.adc_channel)?;
        host.add_level_monitor(monitor.id.clone(), LevelMonitor::new(sensor, settings.level.clone()));
    }

    info!("Input host built from settings");
    Ok(host.start())
}

fn switch_machine(
    fs: &FootswitchSettings,
    longpress_threshold: f64,
    provider: &mut dyn InputProvider,
    clock: &Arc<dyn Clock>,
) -> Result<SwitchStateMachine, ControllerError> {
    let machine = match fs.input {
        SwitchInput::Gpio {
            pin,
            interrupts: true,
        } => {
            debug!("Footswitch {} on GPIO {} with edge interrupts", fs.id, pin);
            let edges = EdgeQueue::new();
            let sensor = provider.switch_input(pin, edges.clone(), clock.clone())?;
            SwitchStateMachine::Edge(EdgeSwitch::new(fs.id, sensor, edges, longpress_threshold))
        }
        SwitchInput::Gpio {
            pin,
            interrupts: false,
        } => {
            debug!("Footswitch {} on polled GPIO {}", fs.id, pin);
            let sensor = LevelAsCount::new(provider.digital_input(pin)?);
            SwitchStateMachine::Polled(PolledSwitch::new(
                fs.id,
                Box::new(sensor),
                GPIO_FALLING_THRESHOLD,
                longpress_threshold,
            ))
        }
        SwitchInput::Adc { channel, threshold } => {
            debug!("Footswitch {} on ADC channel {}", fs.id, channel);
            let sensor = provider.adc_channel(channel)?;
            SwitchStateMachine::Polled(PolledSwitch::new(
                fs.id,
                sensor,
                threshold,
                longpress_threshold,
            ))
        }
    };
    Ok(machine)
}

fn rotary_encoder(
    encoder: &EncoderSettings,
    provider: &mut dyn InputProvider,
) -> Result<RotaryEncoder, ControllerError> {
    if encoder.interrupts {
        let feed = EdgeFeed::new();
        let (data, clock) = provider.encoder_inputs(encoder.data_pin, encoder.clock_pin, &feed)?;
        Ok(RotaryEncoder::with_feed(data, clock, feed))
    } else {
        let data = provider.digital_input(encoder.data_pin)?;
        let clock = provider.digital_input(encoder.clock_pin)?;
        Ok(RotaryEncoder::new(data, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LevelMonitorSettings;
    use crate::controller::actions::ControllerAction;
    use crate::controller::longpress::{GroupFire, Resolution};
    use crate::controller::rotary::Direction;
    use crate::controller::switch::SwitchState;
    use crate::hardware::scripted::ScriptedInputs;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    type Fired = Arc<Mutex<Vec<GroupFire>>>;

    fn recorder(fired: &Fired) -> impl FnMut(&GroupSettings) -> LongpressCallback {
        let fired = fired.clone();
        move |_: &GroupSettings| -> LongpressCallback {
            let fired = fired.clone();
            Box::new(move |fire: &GroupFire| fired.lock().unwrap().push(fire.clone()))
        }
    }

    #[test]
    fn example_pedal_builds_and_combines_longpresses() {
        let settings = Settings::example_pedal();
        let mut inputs = ScriptedInputs::new();
        let clock = ManualClock::new(0.0);
        let fired = Fired::default();
        let (tx, _rx) = mpsc::channel(256);

        let mut host = build_host(
            &settings,
            &mut inputs,
            Arc::new(clock.clone()),
            Box::new(tx),
            recorder(&fired),
            |_| Box::new(|_| {}),
        )
        .expect("build");
        assert!(host.footswitch(2).and_then(|fs| fs.tap_tempo()).is_some());
        assert!(host.encoder("enc0").is_some());
        assert!(inputs.feed(5, 6).is_some());

        let fs0 = inputs.pin(17);
        let fs1 = inputs.pin(27);
        fs0.set_pressed(true);
        host.poll_cycle();
        clock.advance(0.1);
        fs1.set_pressed(true);
        for _ in 0..60 {
            host.poll_cycle();
            clock.advance(0.01);
        }

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].group, "toggle_tuner");
        assert_eq!(fired[0].resolution, Resolution::Combined);
    }

    #[test]
    fn interrupt_inputs_are_armed() {
        let mut settings = Settings::example_pedal();
        settings.footswitches[2].input = SwitchInput::Gpio {
            pin: 22,
            interrupts: true,
        };
        let mut inputs = ScriptedInputs::new();
        let clock = ManualClock::new(1.0);
        let (tx, mut rx) = mpsc::channel(64);
        let mut host = build_host(
            &settings,
            &mut inputs,
            Arc::new(clock.clone()),
            Box::new(tx),
            |_| Box::new(|_| {}),
            |_| Box::new(|_| {}),
        )
        .expect("build");

        let edges = inputs.edges(22).expect("edge queue armed");
        inputs.pin(22).set_pressed(true);
        edges.push(0.99);
        let report = host.poll_cycle();
        assert_eq!(report.switch_events.len(), 1);
        assert_eq!(report.switch_events[0].kind, SwitchState::Pressed);

        // interrupt-driven encoder detent drained on the next cycle
        let feed = inputs.feed(5, 6).expect("feed");
        feed.clock_edge(false);
        feed.data_edge(false);
        feed.clock_edge(true);
        feed.data_edge(true);
        host.poll_cycle();
        let mut turned = None;
        while let Ok(action) = rx.try_recv() {
            if let ControllerAction::Encoder { direction, .. } = action {
                turned = Some(direction);
            }
        }
        assert_eq!(turned, Some(Direction::Clockwise));
    }

    #[test]
    fn tap_switch_reports_tempo_through_its_callback() {
        let settings = Settings::example_pedal();
        let mut inputs = ScriptedInputs::new();
        let clock = ManualClock::new(0.0);
        let tempos: Arc<Mutex<Vec<(SwitchId, f64)>>> = Arc::default();
        let sink = tempos.clone();
        let (tx, _rx) = mpsc::channel(256);

        let mut host = build_host(
            &settings,
            &mut inputs,
            Arc::new(clock.clone()),
            Box::new(tx),
            |_| Box::new(|_| {}),
            move |id: SwitchId| -> TempoCallback {
                let sink = sink.clone();
                Box::new(move |bpm| sink.lock().unwrap().push((id, bpm)))
            },
        )
        .expect("build");

        let tap = inputs.pin(22);
        for _ in 0..4 {
            tap.set_pressed(true);
            host.poll_cycle();
            clock.advance(0.1);
            tap.set_pressed(false);
            host.poll_cycle();
            clock.advance(0.4);
        }

        assert_eq!(*tempos.lock().unwrap(), vec![(2, 120.0)]);
    }

    #[test]
    fn invalid_settings_are_rejected_before_claiming_hardware() {
        let mut settings = Settings::default();
        settings.level_monitors.push(LevelMonitorSettings {
            id: "input".to_string(),
            adc_channel: 12,
        });
        let (tx, _rx) = mpsc::channel(1);
        let result = build_host(
            &settings,
            &mut ScriptedInputs::new(),
            Arc::new(ManualClock::new(0.0)),
            Box::new(tx),
            |_| Box::new(|_| {}),
            |_| Box::new(|_| {}),
        );
        assert!(matches!(result, Err(ControllerError::ConfigError(_))));
    }
}
