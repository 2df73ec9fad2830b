//! Startup configuration, persisted as TOML.
//!
//! A missing file is not an error: an example pedal is written to the path
//! and used. Keys left out of an existing file take the empty defaults.

use crate::controller::footswitch::{FootswitchBindings, MidiBinding};
use crate::controller::level::LevelSettings;
use crate::controller::switch::SwitchId;
use crate::controller::tap_tempo::TapTempoSettings;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const APP_DIR: &str = "openstomp";
const SETTINGS_FILE: &str = "settings.toml";

/// MCP3008 has eight single-ended channels
const ADC_CHANNELS: u8 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Everything the input host needs at startup.
///
/// Timing and level keys fall back to their defaults when absent. The input
/// lists and outputs default to empty, so a hand-written file describes
/// exactly the hardware it lists. [`Settings::example_pedal`] is the
/// populated variant written for a first run.
///
/// ## Serialization
/// Read with `toml::from_str` and written with `toml::to_string_pretty`.
/// Switch inputs are tagged by `type`.
///
/// # Examples
///
/// ```toml
/// poll_interval_ms = 5
/// longpress_threshold_s = 0.6
///
/// [[longpress_groups]]
/// name = "toggle_tuner"
/// members = 2
///
/// [[footswitches]]
/// id = 0
/// input = { type = "gpio", pin = 17, interrupts = true }
/// bindings = { relay = true, longpress_groups = ["toggle_tuner"] }
///
/// [[footswitches]]
/// id = 1
/// input = { type = "adc", channel = 3, threshold = 100 }
/// tap_tempo = true
/// bindings = { longpress_groups = ["toggle_tuner"] }
///
/// [outputs]
/// relay_pin = 24
/// leds = { fs0 = 12, fs1 = 13 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cadence of the host poll loop
    pub poll_interval_ms: u64,
    /// Hold time before a press becomes a long press
    pub longpress_threshold_s: f64,
    /// Max spread between the long presses of a combined group
    pub correlation_window_s: f64,
    /// Taps averaged into one tempo, at least 2
    pub tap_tempo_samples: usize,
    /// Gap after which a tap run restarts
    pub tap_tempo_stale_s: f64,
    /// Tempos below this are computed but not reported
    pub min_bpm: f64,
    /// Kernel-side debounce for edge-triggered inputs
    pub edge_debounce_ms: u64,
    /// Windows and dB thresholds shared by all level monitors
    pub level: LevelSettings,
    pub longpress_groups: Vec<GroupSettings>,
    pub footswitches: Vec<FootswitchSettings>,
    pub encoders: Vec<EncoderSettings>,
    /// Analog inputs classified into Off/Sig/Warn/Clip
    pub level_monitors: Vec<LevelMonitorSettings>,
    /// Relay and LED pins driven by the action consumer
    pub outputs: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub name: String,
    /// 1 for a single-switch action, 2 or more for a combination
    pub members: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchInput {
    /// Active-low GPIO. With `interrupts` presses are stamped on the falling edge.
    Gpio {
        pin: u8,
        #[serde(default)]
        interrupts: bool,
    },
    /// Polled ADC channel; at or below `threshold` counts as pressed
    Adc { channel: u8, threshold: u16 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootswitchSettings {
    pub id: SwitchId,
    pub input: SwitchInput,
    #[serde(default)]
    pub tap_tempo: bool,
    #[serde(default)]
    pub bindings: FootswitchBindings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub id: String,
    pub data_pin: u8,
    pub clock_pin: u8,
    #[serde(default)]
    pub interrupts: bool,
    #[serde(default)]
    pub midi_cc: Option<MidiBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelMonitorSettings {
    pub id: String,
    pub adc_channel: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub relay_pin: Option<u8>,
    /// LED pin per footswitch LED id (`fs0`, `fs1`, ...)
    pub leds: HashMap<String, u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            longpress_threshold_s: 0.5,
            correlation_window_s: 0.4,
            tap_tempo_samples: 4,
            tap_tempo_stale_s: 1.5,
            min_bpm: 40.0,
            edge_debounce_ms: 5,
            level: LevelSettings::default(),
            longpress_groups: Vec::new(),
            footswitches: Vec::new(),
            encoders: Vec::new(),
            level_monitors: Vec::new(),
            outputs: OutputSettings::default(),
        }
    }
}

impl Settings {
    /// Pedal written on first run: three GPIO switches with LEDs, an
    /// interrupt-driven encoder and a bypass relay. Holding switches 0 and 1
    /// together toggles the tuner. Switch 2 taps tempo.
    pub fn example_pedal() -> Self {
        let gpio = |pin| SwitchInput::Gpio {
            pin,
            interrupts: false,
        };
        let groups = |names: &[&str]| FootswitchBindings {
            longpress_groups: names.iter().map(|name| name.to_string()).collect(),
            ..Default::default()
        };

        Self {
            longpress_groups: vec![
                GroupSettings {
                    name: "bypass".to_string(),
                    members: 1,
                },
                GroupSettings {
                    name: "toggle_tuner".to_string(),
                    members: 2,
                },
            ],
            footswitches: vec![
                FootswitchSettings {
                    id: 0,
                    input: gpio(17),
                    tap_tempo: false,
                    bindings: groups(&["bypass", "toggle_tuner"]),
                },
                FootswitchSettings {
                    id: 1,
                    input: gpio(27),
                    tap_tempo: false,
                    bindings: groups(&["toggle_tuner"]),
                },
                FootswitchSettings {
                    id: 2,
                    input: gpio(22),
                    tap_tempo: true,
                    bindings: FootswitchBindings::default(),
                },
            ],
            encoders: vec![EncoderSettings {
                id: "enc0".to_string(),
                data_pin: 5,
                clock_pin: 6,
                interrupts: true,
                midi_cc: None,
            }],
            outputs: OutputSettings {
                relay_pin: Some(24),
                leds: HashMap::from([
                    ("fs0".to_string(), 12),
                    ("fs1".to_string(), 13),
                    ("fs2".to_string(), 16),
                ]),
            },
            ..Self::default()
        }
    }

    pub fn tap_tempo_settings(&self) -> TapTempoSettings {
        TapTempoSettings {
            samples: self.tap_tempo_samples,
            stale_after_s: self.tap_tempo_stale_s,
            min_bpm: self.min_bpm,
        }
    }

    /// True if any input needs the SPI ADC.
    pub fn uses_adc(&self) -> bool {
        !self.level_monitors.is_empty()
            || self
                .footswitches
                .iter()
                .any(|fs| matches!(fs.input, SwitchInput::Adc { .. }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive".into());
        }
        if self.longpress_threshold_s <= 0.0 || self.correlation_window_s <= 0.0 {
            return invalid("longpress threshold and correlation window must be positive".into());
        }
        if self.tap_tempo_samples < 2 {
            return invalid(format!(
                "tap_tempo_samples must be at least 2, got {}",
                self.tap_tempo_samples
            ));
        }

        let level = &self.level;
        if level.short_window == 0 || level.long_window < level.short_window {
            return invalid(format!(
                "level windows must satisfy 0 < short ({}) <= long ({})",
                level.short_window, level.long_window
            ));
        }
        if !(level.signal_db < level.warn_db && level.warn_db < level.clip_db) {
            return invalid(format!(
                "level thresholds must ascend: signal {} < warn {} < clip {}",
                level.signal_db, level.warn_db, level.clip_db
            ));
        }

        let mut group_names = HashSet::new();
        for group in &self.longpress_groups {
            if group.members == 0 {
                return invalid(format!("longpress group '{}' has no members", group.name));
            }
            if !group_names.insert(group.name.as_str()) {
                return invalid(format!("longpress group '{}' defined twice", group.name));
            }
        }

        let mut switch_ids = HashSet::new();
        for fs in &self.footswitches {
            if !switch_ids.insert(fs.id) {
                return invalid(format!("footswitch {} defined twice", fs.id));
            }
            if let SwitchInput::Adc { channel, .. } = fs.input {
                check_channel(channel)?;
            }
            if let Some(group) = fs
                .bindings
                .longpress_groups
                .iter()
                .find(|name| !group_names.contains(name.as_str()))
            {
                return invalid(format!(
                    "footswitch {} references unknown longpress group '{}'",
                    fs.id, group
                ));
            }
        }

        for group in &self.longpress_groups {
            let bound = self
                .footswitches
                .iter()
                .filter(|fs| fs.bindings.longpress_groups.contains(&group.name))
                .count();
            if bound < group.members {
                warn!(
                    "Longpress group '{}' needs {} switches but only {} reference it",
                    group.name, group.members, bound
                );
            }
        }

        let mut encoder_ids = HashSet::new();
        for encoder in &self.encoders {
            if !encoder_ids.insert(encoder.id.as_str()) {
                return invalid(format!("encoder '{}' defined twice", encoder.id));
            }
        }

        let mut monitor_ids = HashSet::new();
        for monitor in &self.level_monitors {
            if !monitor_ids.insert(monitor.id.as_str()) {
                return invalid(format!("level monitor '{}' defined twice", monitor.id));
            }
            check_channel(monitor.adc_channel)?;
        }

        debug!("Settings validated");
        Ok(())
    }
}

fn check_channel(channel: u8) -> Result<(), ConfigError> {
    if channel >= ADC_CHANNELS {
        return Err(ConfigError::Invalid(format!(
            "ADC channel {} out of range 0..{}",
            channel, ADC_CHANNELS
        )));
    }
    Ok(())
}

/// `<config dir>/openstomp/settings.toml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// Loads and validates settings, writing the example pedal first if the file
/// is missing.
pub async fn load_or_create(path: &Path) -> Result<Settings, ConfigError> {
    let io_error = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let exists = tokio::fs::try_exists(path).await.map_err(io_error)?;
    if !exists {
        info!("No settings at {}, writing example pedal", path.display());
        let settings = Settings::example_pedal();
        save(path, &settings).await?;
        return Ok(settings);
    }

    let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub async fn save(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let io_error = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let content = toml::to_string_pretty(settings)?;
    tokio::fs::write(path, content).await.map_err(io_error)?;
    debug!("Settings written to {}", path.display());
    Ok(())
}
