//! In-memory sensors whose value is set from the outside.
//!
//! Clones share state, so a test keeps one handle and gives the other to the
//! object under test.

use super::{AnalogSensor, DigitalSensor, HardwareError, InputProvider, ADC_MAX};
use crate::clock::Clock;
use crate::controller::rotary::EdgeFeed;
use crate::controller::switch::EdgeQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ScriptedPin {
    level: Arc<AtomicBool>,
}

impl ScriptedPin {
    pub fn new(high: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(high)),
        }
    }

    pub fn set_high(&self, high: bool) {
        self.level.store(high, Ordering::Relaxed);
    }

    /// Active-low convenience: pressed drives the pin low.
    pub fn set_pressed(&self, pressed: bool) {
        self.set_high(!pressed);
    }
}

impl DigitalSensor for ScriptedPin {
    fn is_high(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedAdc {
    value: Arc<AtomicU16>,
}

impl ScriptedAdc {
    pub fn new(value: u16) -> Self {
        Self {
            value: Arc::new(AtomicU16::new(value)),
        }
    }

    pub fn set(&self, value: u16) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl AnalogSensor for ScriptedAdc {
    fn read(&mut self) -> u16 {
        self.value.load(Ordering::Relaxed)
    }
}

/// [`InputProvider`] over scripted sensors. Pins and channels are created on
/// first request and stay reachable for the test driving them.
#[derive(Debug, Default)]
pub struct ScriptedInputs {
    pins: HashMap<u8, ScriptedPin>,
    channels: HashMap<u8, ScriptedAdc>,
    edges: HashMap<u8, EdgeQueue>,
    feeds: HashMap<(u8, u8), EdgeFeed>,
}

impl ScriptedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&mut self, pin: u8) -> ScriptedPin {
        self.pins
            .entry(pin)
            .or_insert_with(|| ScriptedPin::new(true))
            .clone()
    }

    pub fn channel(&mut self, channel: u8) -> ScriptedAdc {
        self.channels
            .entry(channel)
            .or_insert_with(|| ScriptedAdc::new(ADC_MAX))
            .clone()
    }

    /// Edge queue armed for a footswitch pin, if any.
    pub fn edges(&self, pin: u8) -> Option<EdgeQueue> {
        self.edges.get(&pin).cloned()
    }

    pub fn feed(&self, data_pin: u8, clock_pin: u8) -> Option<EdgeFeed> {
        self.feeds.get(&(data_pin, clock_pin)).cloned()
    }
}

impl InputProvider for ScriptedInputs {
    fn digital_input(&mut self, pin: u8) -> Result<Box<dyn DigitalSensor>, HardwareError> {
        Ok(Box::new(self.pin(pin)))
    }

    fn switch_input(
        &mut self,
        pin: u8,
        edges: EdgeQueue,
        _clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn DigitalSensor>, HardwareError> {
        self.edges.insert(pin, edges);
        Ok(Box::new(self.pin(pin)))
    }

    fn encoder_inputs(
        &mut self,
        data_pin: u8,
        clock_pin: u8,
        feed: &EdgeFeed,
    ) -> Result<(Box<dyn DigitalSensor>, Box<dyn DigitalSensor>), HardwareError> {
        self.feeds.insert((data_pin, clock_pin), feed.clone());
        Ok((Box::new(self.pin(data_pin)), Box::new(self.pin(clock_pin))))
    }

    fn adc_channel(&mut self, channel: u8) -> Result<Box<dyn AnalogSensor>, HardwareError> {
        if channel > 7 {
            return Err(HardwareError::InvalidAdcChannel(channel));
        }
        Ok(Box::new(self.channel(channel)))
    }
}
