//! Input classification and coordination
//!
//! Turns raw sensor samples into semantic events and side effects:
//!
//! 1. [`switch`] - debounce and short/long press classification
//! 2. [`rotary`] - quadrature detent decoding
//! 3. [`tap_tempo`] - BPM from press spacing
//! 4. [`longpress`] - cross-switch long press correlation
//! 5. [`level`] - hysteretic audio level classification
//! 6. [`host`] - the cooperative poll loop tying them together
//!
//! # Architecture
//!
//! ```text
//! Sensor ──► SwitchStateMachine ──► Footswitch ──► ActionSink
//!                                      │
//!                                      ├──► TapTempo
//!                                      └──► LongpressCoordinator ──resolve()──► group callback
//! Sensor ──► RotaryEncoder ──► Encoder ──► ActionSink
//! Sensor ──► LevelMonitor ──► ActionSink
//! ```
//!
//! Everything runs on one tokio task polling at a fixed cadence. GPIO
//! interrupt handlers only stamp an [`switch::EdgeQueue`] or decode into a
//! [`rotary::EdgeFeed`].

pub mod actions;
pub mod controller_handle;
pub mod encoder;
pub mod footswitch;
pub mod host;
pub mod level;
pub mod longpress;
pub mod rotary;
pub mod switch;
pub mod tap_tempo;

use crate::config::ConfigError;
use crate::hardware::HardwareError;
use switch::SwitchId;

pub use actions::{ActionSink, ControllerAction, LedMode, PresetTarget};
pub use controller_handle::{ControllerHandle, HostCommand};
pub use footswitch::{Footswitch, FootswitchBindings, MidiBinding};
pub use host::{HostState, InputHost};

// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Hardware error: {0}")]
    HardwareError(#[from] HardwareError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Footswitch {0} registered twice")]
    DuplicateSwitch(SwitchId),

    #[error("Footswitch {switch} references unknown longpress group '{group}'")]
    UnknownGroup { switch: SwitchId, group: String },

    #[error("Channel error: {0}")]
    ChannelError(String),
}
