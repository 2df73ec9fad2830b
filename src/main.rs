use clap::Parser;
use color_eyre::Result;
use openstomp::clock::{Clock, MonotonicClock};
use openstomp::config::{self, GroupSettings};
use openstomp::controller::longpress::{GroupFire, LongpressCallback};
use openstomp::controller::switch::SwitchId;
use openstomp::controller::tap_tempo::TempoCallback;
use openstomp::controller::{ActionSink, ControllerAction, ControllerHandle};
use openstomp::hardware::rpi::{RpiInputs, RpiOutputs};
use openstomp::hardware::scripted::ScriptedInputs;
use openstomp::setup::build_host;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "openstomp", version, about = "Footswitch, encoder and level input host")]
struct Cli {
    /// Settings file, defaults to <config dir>/openstomp/settings.toml
    #[arg(short, long, env = "OPENSTOMP_CONFIG")]
    config: Option<PathBuf>,

    /// Use scripted inputs instead of GPIO and SPI
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let settings = config::load_or_create(&path).await?;
    debug!("Settings: {:?}", settings);

    let (action_sender, action_receiver) = mpsc::channel(256);
    let group_sender = action_sender.clone();
    let group_callback = move |group: &GroupSettings| -> LongpressCallback {
        debug!("Wiring longpress group '{}'", group.name);
        let mut sender = group_sender.clone();
        Box::new(move |fire: &GroupFire| {
            sender.dispatch(ControllerAction::Longpress {
                group: fire.group.clone(),
                resolution: fire.resolution,
            });
        })
    };

    let tempo_sender = action_sender.clone();
    let tempo_callback = move |switch_id: SwitchId| -> TempoCallback {
        debug!("Wiring tap tempo on footswitch {}", switch_id);
        let mut sender = tempo_sender.clone();
        Box::new(move |bpm| sender.dispatch(ControllerAction::Tempo { bpm }))
    };

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (host, outputs) = if cli.simulate {
        warn!("Running with scripted inputs, no hardware is touched");
        let mut inputs = ScriptedInputs::new();
        let host = build_host(
            &settings,
            &mut inputs,
            clock,
            Box::new(action_sender),
            group_callback,
            tempo_callback,
        )?;
        (host, None)
    } else {
        let mut inputs = RpiInputs::open(settings.uses_adc(), settings.edge_debounce_ms)?;
        let host = build_host(
            &settings,
            &mut inputs,
            clock,
            Box::new(action_sender),
            group_callback,
            tempo_callback,
        )?;
        let outputs = RpiOutputs::open(settings.outputs.relay_pin, &settings.outputs.leds)?;
        (host, Some(outputs))
    };

    let consumer = tokio::spawn(run_action_consumer(action_receiver, outputs));

    let cancel = CancellationToken::new();
    let handle = ControllerHandle::spawn(host, settings.poll_interval_ms, cancel);

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    // Dropping the host closes the action channel and ends the consumer
    drop(handle.shutdown().await?);
    consumer.await?;
    Ok(())
}

async fn run_action_consumer(
    mut actions: mpsc::Receiver<ControllerAction>,
    mut outputs: Option<RpiOutputs>,
) {
    info!("Action consumer started");
    while let Some(action) = actions.recv().await {
        match &action {
            ControllerAction::MidiControlChange {
                channel,
                controller,
                value,
            } => info!("MIDI CC ch {} cc {} = {}", channel, controller, value),
            ControllerAction::Tempo { bpm } => info!("Tap tempo {:.1} BPM", bpm),
            ControllerAction::Longpress { group, resolution } => {
                info!("Longpress '{}' ({:?})", group, resolution)
            }
            ControllerAction::PresetChange(target) => info!("Preset change: {:?}", target),
            other => debug!("Action {:?}", other),
        }

        if let Some(outputs) = outputs.as_mut() {
            if let Err(e) = outputs.apply(&action) {
                error!("Failed to drive outputs for {:?}: {}", action, e);
            }
        }
    }
    info!("Action consumer finished");
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
