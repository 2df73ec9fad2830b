//! Raspberry Pi backing: GPIO through `rppal`, analog inputs through an
//! MCP3008 on SPI0.

use super::{AnalogSensor, DigitalSensor, HardwareError, InputProvider};
use crate::clock::Clock;
use crate::controller::actions::{ControllerAction, LedMode};
use crate::controller::rotary::EdgeFeed;
use crate::controller::switch::EdgeQueue;
use parking_lot::Mutex;
use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SPI_CLOCK_HZ: u32 = 1_000_000;
const LED_BLINK_HZ: f64 = 2.0;

pub struct GpioInput {
    pin: InputPin,
}

impl DigitalSensor for GpioInput {
    fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}

/// 10-bit, 8-channel SPI ADC
#[derive(Clone)]
pub struct Mcp3008 {
    spi: Arc<Mutex<Spi>>,
}

impl Mcp3008 {
    pub fn open() -> Result<Self, HardwareError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;
        info!("MCP3008 opened on SPI0/CE0 at {} Hz", SPI_CLOCK_HZ);
        Ok(Self {
            spi: Arc::new(Mutex::new(spi)),
        })
    }

    pub fn channel(&self, channel: u8) -> Result<AdcChannel, HardwareError> {
        if channel > 7 {
            return Err(HardwareError::InvalidAdcChannel(channel));
        }
        Ok(AdcChannel {
            spi: self.spi.clone(),
            channel,
            last: 0,
        })
    }
}

pub struct AdcChannel {
    spi: Arc<Mutex<Spi>>,
    channel: u8,
    last: u16,
}

impl AnalogSensor for AdcChannel {
    /// Single-ended conversion. A failed transfer repeats the last sample.
    fn read(&mut self) -> u16 {
        let write = [0x01, (0x08 | self.channel) << 4, 0x00];
        let mut read = [0u8; 3];
        match self.spi.lock().transfer(&mut read, &write) {
            Ok(_) => {
                self.last = (u16::from(read[1] & 0x03) << 8) | u16::from(read[2]);
            }
            Err(e) => warn!("ADC channel {} read failed: {}", self.channel, e),
        }
        self.last
    }
}

pub struct RpiInputs {
    gpio: Gpio,
    adc: Option<Mcp3008>,
    edge_debounce: Option<Duration>,
}

impl RpiInputs {
    pub fn open(with_adc: bool, edge_debounce_ms: u64) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let adc = if with_adc { Some(Mcp3008::open()?) } else { None };
        let edge_debounce = (edge_debounce_ms > 0).then(|| Duration::from_millis(edge_debounce_ms));
        Ok(Self {
            gpio,
            adc,
            edge_debounce,
        })
    }

    fn input_pullup(&self, pin: u8) -> Result<InputPin, HardwareError> {
        Ok(self.gpio.get(pin)?.into_input_pullup())
    }
}

impl InputProvider for RpiInputs {
    fn digital_input(&mut self, pin: u8) -> Result<Box<dyn DigitalSensor>, HardwareError> {
        debug!("Claiming GPIO {} as polled input", pin);
        Ok(Box::new(GpioInput {
            pin: self.input_pullup(pin)?,
        }))
    }

    fn switch_input(
        &mut self,
        pin: u8,
        edges: EdgeQueue,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn DigitalSensor>, HardwareError> {
        debug!("Claiming GPIO {} as interrupt switch input", pin);
        let mut input = self.input_pullup(pin)?;
        input.set_async_interrupt(Trigger::FallingEdge, self.edge_debounce, move |_: Event| {
            edges.push(clock.now());
        })?;
        Ok(Box::new(GpioInput { pin: input }))
    }

    fn encoder_inputs(
        &mut self,
        data_pin: u8,
        clock_pin: u8,
        feed: &EdgeFeed,
    ) -> Result<(Box<dyn DigitalSensor>, Box<dyn DigitalSensor>), HardwareError> {
        debug!(
            "Claiming GPIO {}/{} as interrupt encoder inputs",
            data_pin, clock_pin
        );
        let mut data = self.input_pullup(data_pin)?;
        let mut clock = self.input_pullup(clock_pin)?;

        let data_feed = feed.clone();
        data.set_async_interrupt(Trigger::Both, None, move |event: Event| {
            data_feed.data_edge(matches!(event.trigger, Trigger::RisingEdge));
        })?;
        let clock_feed = feed.clone();
        clock.set_async_interrupt(Trigger::Both, None, move |event: Event| {
            clock_feed.clock_edge(matches!(event.trigger, Trigger::RisingEdge));
        })?;

        Ok((
            Box::new(GpioInput { pin: data }),
            Box::new(GpioInput { pin: clock }),
        ))
    }

    fn adc_channel(&mut self, channel: u8) -> Result<Box<dyn AnalogSensor>, HardwareError> {
        let adc = self
            .adc
            .as_ref()
            .ok_or(HardwareError::AdcUnavailable(channel))?;
        Ok(Box::new(adc.channel(channel)?))
    }
}

/// Relay and LED GPIO outputs
pub struct RpiOutputs {
    relay: Option<OutputPin>,
    leds: HashMap<String, OutputPin>,
}

impl RpiOutputs {
    pub fn open(relay_pin: Option<u8>, leds: &HashMap<String, u8>) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let relay = match relay_pin {
            Some(pin) => Some(gpio.get(pin)?.into_output_low()),
            None => None,
        };
        let mut led_pins = HashMap::new();
        for (id, pin) in leds {
            led_pins.insert(id.clone(), gpio.get(*pin)?.into_output_low());
        }
        info!(
            "Outputs ready: relay {:?}, {} LEDs",
            relay_pin,
            led_pins.len()
        );
        Ok(Self {
            relay,
            leds: led_pins,
        })
    }

    /// Drives the pins an action touches. Other actions are ignored.
    pub fn apply(&mut self, action: &ControllerAction) -> Result<(), HardwareError> {
        match action {
            ControllerAction::Relay { enabled } => {
                if let Some(relay) = self.relay.as_mut() {
                    if *enabled {
                        relay.set_high();
                    } else {
                        relay.set_low();
                    }
                }
            }
            ControllerAction::Led { id, mode } => {
                let Some(led) = self.leds.get_mut(id) else {
                    debug!("No LED wired for '{}'", id);
                    return Ok(());
                };
                match mode {
                    LedMode::On => {
                        led.clear_pwm()?;
                        led.set_high();
                    }
                    LedMode::Off => {
                        led.clear_pwm()?;
                        led.set_low();
                    }
                    LedMode::Blink => led.set_pwm_frequency(LED_BLINK_HZ, 0.5)?,
                }
            }
            _ => {}
        }
        Ok(())
    }
}
