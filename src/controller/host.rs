//! The cooperative poll loop.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──start()──► Polling
//!  (register hardware)       (poll_cycle / apply)
//! ```
//!
//! Hardware can only be registered while initializing and cycles can only
//! run once started; statum enforces both at compile time.

use crate::clock::Clock;
use crate::controller::actions::{ActionSink, ControllerAction};
use crate::controller::controller_handle::HostCommand;
use crate::controller::encoder::Encoder;
use crate::controller::footswitch::Footswitch;
use crate::controller::level::LevelMonitor;
use crate::controller::longpress::{GroupFire, LongpressCoordinator};
use crate::controller::switch::{SwitchEvent, SwitchId};
use crate::controller::ControllerError;
use statum::{machine, state};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum HostState {
    Initializing,
    Polling,
}

#[machine]
pub struct InputHost<S: HostState> {
    clock: Arc<dyn Clock>,
    coordinator: LongpressCoordinator,
    sink: Box<dyn ActionSink + Send>,
    footswitches: Vec<Footswitch>,
    encoders: Vec<Encoder>,
    level_monitors: Vec<(String, LevelMonitor)>,
}

/// What one poll cycle produced
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub switch_events: Vec<SwitchEvent>,
    pub encoder_steps: usize,
    pub level_changes: usize,
    pub longpress: Option<GroupFire>,
}

impl CycleReport {
    pub fn event_count(&self) -> usize {
        self.switch_events.len()
            + self.encoder_steps
            + self.level_changes
            + usize::from(self.longpress.is_some())
    }
}

impl<S: HostState> InputHost<S> {
    pub fn footswitch(&self, id: SwitchId) -> Option<&Footswitch> {
        self.footswitches.iter().find(|fs| fs.id() == id)
    }

    pub fn encoder(&self, id: &str) -> Option<&Encoder> {
        self.encoders.iter().find(|encoder| encoder.id() == id)
    }

    pub fn coordinator(&self) -> &LongpressCoordinator {
        &self.coordinator
    }
}

impl InputHost<Initializing> {
    pub fn create(
        clock: Arc<dyn Clock>,
        coordinator: LongpressCoordinator,
        sink: Box<dyn ActionSink + Send>,
    ) -> Self {
        debug!("Creating input host");
        Self::new(clock, coordinator, sink, Vec::new(), Vec::new(), Vec::new())
    }

    /// Rejects duplicate ids and longpress groups the coordinator does not know.
    pub fn add_footswitch(&mut self, footswitch: Footswitch) -> Result<(), ControllerError> {
        let id = footswitch.id();
        if self.footswitch(id).is_some() {
            return Err(ControllerError::DuplicateSwitch(id));
        }
        self.coordinator
            .validate_groups(
                footswitch
                    .bindings()
                    .longpress_groups
                    .iter()
                    .map(String::as_str),
            )
            .map_err(|group| ControllerError::UnknownGroup { switch: id, group })?;
        info!("Registered footswitch {}", id);
        self.footswitches.push(footswitch);
        Ok(())
    }

    pub fn add_encoder(&mut self, encoder: Encoder) {
        info!("Registered encoder '{}'", encoder.id());
        self.encoders.push(encoder);
    }

    pub fn add_level_monitor(&mut self, id: impl Into<String>, monitor: LevelMonitor) {
        let id = id.into();
        info!("Registered level monitor '{}'", id);
        self.level_monitors.push((id, monitor));
    }

    pub fn start(self) -> InputHost<Polling> {
        info!(
            "Input host polling {} footswitches, {} encoders, {} level monitors",
            self.footswitches.len(),
            self.encoders.len(),
            self.level_monitors.len()
        );
        self.transition()
    }
}

impl InputHost<Polling> {
    /// Polls every input once, then resolves longpress groups.
    pub fn poll_cycle(&mut self) -> CycleReport {
        let now = self.clock.now();
        let mut report = CycleReport::default();

        for footswitch in &mut self.footswitches {
            if let Some(event) = footswitch.poll(now, &mut self.coordinator, self.sink.as_mut()) {
                report.switch_events.push(event);
            }
        }

        for encoder in &mut self.encoders {
            if encoder.poll(self.sink.as_mut()).is_some() {
                report.encoder_steps += 1;
            }
        }

        for (id, monitor) in &mut self.level_monitors {
            if let Some(state) = monitor.poll() {
                report.level_changes += 1;
                self.sink.dispatch(ControllerAction::Level {
                    id: id.clone(),
                    state,
                });
            }
        }

        report.longpress = self.coordinator.resolve(now);
        report
    }

    pub fn apply(&mut self, command: HostCommand) {
        debug!("Applying host command {:?}", command);
        match command {
            HostCommand::Rebind {
                switch_id,
                bindings,
            } => match self.footswitch_mut(switch_id) {
                Some(footswitch) => footswitch.rebind(bindings),
                None => warn!("Rebind for unknown footswitch {}", switch_id),
            },
            HostCommand::ClearBindings => {
                for footswitch in &mut self.footswitches {
                    footswitch.clear_bindings();
                }
            }
            HostCommand::SetSwitchEnabled { switch_id, enabled } => {
                match self.footswitches.iter_mut().find(|fs| fs.id() == switch_id) {
                    Some(footswitch) => footswitch.set_enabled(enabled, self.sink.as_mut()),
                    None => warn!("Enable for unknown footswitch {}", switch_id),
                }
            }
            HostCommand::SetTapTempoEnabled { switch_id, enabled } => {
                let applied = self
                    .footswitch_mut(switch_id)
                    .is_some_and(|footswitch| footswitch.set_tap_tempo_enabled(enabled));
                if !applied {
                    warn!("Footswitch {} has no tap tempo", switch_id);
                }
            }
            HostCommand::SetInputGain { gain_db } => {
                for (_, monitor) in &mut self.level_monitors {
                    monitor.set_input_gain(gain_db);
                }
            }
            HostCommand::RebindEncoder { id, midi, value } => {
                match self.encoders.iter_mut().find(|encoder| encoder.id() == id) {
                    Some(encoder) => encoder.rebind(midi, value),
                    None => warn!("Rebind for unknown encoder '{}'", id),
                }
            }
        }
    }

    fn footswitch_mut(&mut self, id: SwitchId) -> Option<&mut Footswitch> {
        self.footswitches.iter_mut().find(|fs| fs.id() == id)
    }
}
