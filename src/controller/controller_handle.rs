//! Controller Handle - runs the input host on a tokio task
//!
//! The host is single-threaded by construction; the handle owns the task
//! that polls it at a fixed cadence and forwards host commands (pedalboard
//! loads, gain changes) into it between cycles.
//!
//! ```text
//! main ─[HostCommand]→ run_host_loop ─poll_cycle()→ ActionSink
//!       (mpsc::channel(64))   ▲
//!                             └── interval tick / cancellation
//! ```

use crate::controller::footswitch::{FootswitchBindings, MidiBinding};
use crate::controller::host::{InputHost, Polling};
use crate::controller::switch::SwitchId;
use crate::controller::ControllerError;
use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const COMMAND_BUFFER: usize = 64;

/// Reconfiguration requests applied between two poll cycles
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    /// Pedalboard load: new bindings for one footswitch
    Rebind {
        switch_id: SwitchId,
        bindings: FootswitchBindings,
    },
    /// Pedalboard unload
    ClearBindings,
    SetSwitchEnabled {
        switch_id: SwitchId,
        enabled: bool,
    },
    SetTapTempoEnabled {
        switch_id: SwitchId,
        enabled: bool,
    },
    /// Codec input gain changed; level thresholds are recalibrated
    SetInputGain { gain_db: f64 },
    RebindEncoder {
        id: String,
        midi: Option<MidiBinding>,
        value: u8,
    },
}

/// Handle to the running poll task
pub struct ControllerHandle {
    commands: mpsc::Sender<HostCommand>,
    cancel: CancellationToken,
    task: JoinHandle<InputHost<Polling>>,
}

impl ControllerHandle {
    /// Moves the host onto its own task. The loop stops when `cancel` fires.
    pub fn spawn(host: InputHost<Polling>, poll_interval_ms: u64, cancel: CancellationToken) -> Self {
        info!("Spawning input host with {}ms poll interval", poll_interval_ms);
        let (commands, command_receiver) = mpsc::channel(COMMAND_BUFFER);

        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            info!("Input host task started");
            let host = run_host_loop(host, poll_interval_ms, command_receiver, loop_cancel).await;
            info!("Input host task finished");
            host
        });
        debug!("Input host task spawned");

        Self {
            commands,
            cancel,
            task,
        }
    }

    pub async fn send(&self, command: HostCommand) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .await
            .map_err(|e| ControllerError::ChannelError(e.to_string()))
    }

    /// Stops polling and hands the host back.
    pub async fn shutdown(self) -> Result<InputHost<Polling>, ControllerError> {
        info!("Shutting down input host");
        self.cancel.cancel();
        self.task.await.map_err(|e| {
            error!("Input host task failed: {}", e);
            ControllerError::ChannelError(e.to_string())
        })
    }
}

async fn run_host_loop(
    mut host: InputHost<Polling>,
    poll_interval_ms: u64,
    mut commands: mpsc::Receiver<HostCommand>,
    cancel: CancellationToken,
) -> InputHost<Polling> {
    let mut interval_timer = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Stats for performance monitoring
    let mut cycles: u64 = 0;
    let mut total_events: usize = 0;
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Input host loop cancelled after {} cycles", cycles);
                break;
            }
            _ = interval_timer.tick() => {}
        }

        while let Ok(command) = commands.try_recv() {
            host.apply(command);
        }

        let report = host.poll_cycle();
        total_events += report.event_count();
        cycles += 1;

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
            info!(
                "Input host stats: {} cycles, {} events in {} seconds",
                cycles, total_events, elapsed_seconds
            );
            info!(
                "Average: {:.2} cycles/sec, {:.2} events/sec",
                cycles as f64 / elapsed_seconds as f64,
                total_events as f64 / elapsed_seconds as f64
            );
            cycles = 0;
            total_events = 0;
            last_stats_time = now;
        }
    }

    host
}
