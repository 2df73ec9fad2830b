//! Sensor collaborators.
//!
//! The classification core only ever sees two traits: [`DigitalSensor`] for a
//! GPIO level and [`AnalogSensor`] for an ADC count. The Raspberry Pi backing
//! lives in [`rpi`], in-memory sensors for tests and dry runs in [`scripted`].
//!
//! ```text
//! rppal InputPin ──► GpioInput ──► DigitalSensor ──► switch / rotary
//! rppal Spi ──► Mcp3008 ──► AdcChannel ──► AnalogSensor ──► switch / level
//! ```

pub mod rpi;
pub mod scripted;

use crate::clock::Clock;
use crate::controller::rotary::EdgeFeed;
use crate::controller::switch::EdgeQueue;
use std::sync::Arc;

/// Full scale of the 10-bit ADC.
pub const ADC_MAX: u16 = 1023;

/// A boolean pin level. Footswitch pins are active-low: `false` means pressed.
pub trait DigitalSensor: Send {
    fn is_high(&self) -> bool;
}

/// An integer ADC sample in `0..=ADC_MAX`.
pub trait AnalogSensor: Send {
    fn read(&mut self) -> u16;
}

impl<T: DigitalSensor + ?Sized> DigitalSensor for Box<T> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

impl<T: AnalogSensor + ?Sized> AnalogSensor for Box<T> {
    fn read(&mut self) -> u16 {
        (**self).read()
    }
}

/// Presents a digital pin as an ADC count so it can drive a threshold-polled
/// switch. High reads full scale, low reads zero.
pub struct LevelAsCount<D> {
    pin: D,
}

impl<D: DigitalSensor> LevelAsCount<D> {
    pub fn new(pin: D) -> Self {
        Self { pin }
    }
}

impl<D: DigitalSensor> AnalogSensor for LevelAsCount<D> {
    fn read(&mut self) -> u16 {
        if self.pin.is_high() {
            ADC_MAX
        } else {
            0
        }
    }
}

/// Hands out sensors for configured pins and channels, arming edge
/// interrupts where asked to.
pub trait InputProvider {
    /// Plain polled pin with pull-up.
    fn digital_input(&mut self, pin: u8) -> Result<Box<dyn DigitalSensor>, HardwareError>;

    /// Footswitch pin whose falling edges are stamped into `edges`.
    fn switch_input(
        &mut self,
        pin: u8,
        edges: EdgeQueue,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn DigitalSensor>, HardwareError>;

    /// Encoder pin pair whose edges of either direction drive `feed`.
    fn encoder_inputs(
        &mut self,
        data_pin: u8,
        clock_pin: u8,
        feed: &EdgeFeed,
    ) -> Result<(Box<dyn DigitalSensor>, Box<dyn DigitalSensor>), HardwareError>;

    fn adc_channel(&mut self, channel: u8) -> Result<Box<dyn AnalogSensor>, HardwareError>;
}

/// Errors raised while claiming or talking to hardware
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("ADC channel {0} out of range (0-7)")]
    InvalidAdcChannel(u8),

    #[error("No ADC configured but channel {0} was requested")]
    AdcUnavailable(u8),
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedPin;
    use super::*;

    #[test]
    fn level_as_count_maps_to_full_scale() {
        let pin = ScriptedPin::new(true);
        let mut count = LevelAsCount::new(pin.clone());
        assert_eq!(count.read(), ADC_MAX);
        pin.set_high(false);
        assert_eq!(count.read(), 0);
    }
}
