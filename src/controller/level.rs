//! Audio input level classification from an ADC envelope tap.
//!
//! Samples are folded around the idle baseline and averaged over a short
//! window (fast attack) and a long window (slow release). The long average
//! decides when the input has gone quiet, the short average picks the
//! signal/warn/clip bucket.

use crate::hardware::AnalogSensor;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelState {
    Off,
    Sig,
    Warn,
    Clip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSettings {
    pub short_window: usize,
    pub long_window: usize,
    pub signal_db: f64,
    pub warn_db: f64,
    pub clip_db: f64,
    /// Codec input gain in dB. Raising it lowers every threshold.
    pub input_gain_db: f64,
    /// ADC count of a silent input
    pub baseline: f64,
    pub units_per_volt: f64,
    /// Long averages at or below this are treated as a disconnected tap
    pub off_floor: f64,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            short_window: 4,
            long_window: 50,
            signal_db: -39.0,
            warn_db: -20.0,
            clip_db: -15.0,
            input_gain_db: 0.0,
            baseline: 520.0,
            units_per_volt: 512.0 / 1.665,
            off_floor: 500.0,
        }
    }
}

/// Thresholds in ADC counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub signal: f64,
    pub warn: f64,
    pub clip: f64,
}

impl Thresholds {
    pub fn calibrate(settings: &LevelSettings, input_gain_db: f64) -> Self {
        let to_counts =
            |db: f64| settings.baseline + 10f64.powf((db - input_gain_db) / 20.0) * settings.units_per_volt;
        Self {
            signal: to_counts(settings.signal_db),
            warn: to_counts(settings.warn_db),
            clip: to_counts(settings.clip_db),
        }
    }

    fn bucket(&self, value: f64) -> Option<LevelState> {
        if value >= self.clip {
            Some(LevelState::Clip)
        } else if value >= self.warn {
            Some(LevelState::Warn)
        } else if value >= self.signal {
            Some(LevelState::Sig)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct SlidingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl SlidingWindow {
    fn filled(capacity: usize, value: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat(value).take(capacity).collect(),
            capacity,
            sum: value * capacity as f64,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    fn average(&self) -> f64 {
        self.sum / self.samples.len() as f64
    }
}

pub struct LevelMonitor {
    sensor: Box<dyn AnalogSensor>,
    settings: LevelSettings,
    thresholds: Thresholds,
    short: SlidingWindow,
    long: SlidingWindow,
    state: LevelState,
    last_short: Option<f64>,
}

impl LevelMonitor {
    pub fn new(sensor: Box<dyn AnalogSensor>, settings: LevelSettings) -> Self {
        let thresholds = Thresholds::calibrate(&settings, settings.input_gain_db);
        info!(
            "Level monitor thresholds: sig {:.1}, warn {:.1}, clip {:.1}",
            thresholds.signal, thresholds.warn, thresholds.clip
        );
        Self {
            sensor,
            short: SlidingWindow::filled(settings.short_window, settings.baseline),
            long: SlidingWindow::filled(settings.long_window, settings.baseline),
            settings,
            thresholds,
            state: LevelState::Off,
            last_short: None,
        }
    }

    pub fn state(&self) -> LevelState {
        self.state
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Recalibrates for a new codec gain. Averaging windows are kept.
    pub fn set_input_gain(&mut self, input_gain_db: f64) {
        self.settings.input_gain_db = input_gain_db;
        self.thresholds = Thresholds::calibrate(&self.settings, input_gain_db);
        info!(
            "Level monitor recalibrated for {:+.1} dB gain: sig {:.1}, warn {:.1}, clip {:.1}",
            input_gain_db, self.thresholds.signal, self.thresholds.warn, self.thresholds.clip
        );
    }

    /// Reads the sensor once. Returns the new state on a change.
    pub fn poll(&mut self) -> Option<LevelState> {
        let sample = self.sensor.read();
        self.sample(sample)
    }

    pub fn sample(&mut self, raw: u16) -> Option<LevelState> {
        let baseline = self.settings.baseline;
        let rectified = baseline + (raw as f64 - baseline).abs();
        self.short.push(rectified);
        self.long.push(rectified);

        let short = self.short.average();
        let long = self.long.average();

        let next = if long > self.settings.off_floor && long < self.thresholds.signal {
            Some(LevelState::Off)
        } else if self.last_short != Some(short) {
            self.thresholds.bucket(short)
        } else {
            None
        };
        self.last_short = Some(short);

        match next {
            Some(state) if state != self.state => {
                debug!(
                    "Level {:?} -> {:?} (short {:.1}, long {:.1})",
                    self.state, state, short, long
                );
                self.state = state;
                Some(state)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::scripted::ScriptedAdc;

    fn monitor() -> LevelMonitor {
        LevelMonitor::new(Box::new(ScriptedAdc::new(520)), LevelSettings::default())
    }

    fn feed(monitor: &mut LevelMonitor, samples: impl IntoIterator<Item = u16>) -> Vec<LevelState> {
        samples
            .into_iter()
            .filter_map(|sample| monitor.sample(sample))
            .collect()
    }

    #[test]
    fn default_thresholds_are_ascending() {
        let t = monitor().thresholds();
        assert!(520.0 < t.signal && t.signal < t.warn && t.warn < t.clip);
        assert!((t.signal - 523.45).abs() < 0.01);
        assert!((t.warn - 550.75).abs() < 0.01);
        assert!((t.clip - 574.68).abs() < 0.01);
    }

    #[test]
    fn sustained_overload_clips_within_four_samples() {
        let mut monitor = monitor();
        feed(&mut monitor, [620; 4]);
        assert_eq!(monitor.state(), LevelState::Clip);
    }

    #[test]
    fn return_to_baseline_goes_off_after_long_window() {
        let mut monitor = monitor();
        feed(&mut monitor, [620; 4]);
        assert_eq!(monitor.state(), LevelState::Clip);

        // the short window decays first, the long window still holds the burst
        feed(&mut monitor, [520; 45]);
        assert_ne!(monitor.state(), LevelState::Off);

        let changes = feed(&mut monitor, [520; 5]);
        assert_eq!(changes.last(), Some(&LevelState::Off));
        assert_eq!(monitor.state(), LevelState::Off);
    }

    #[test]
    fn negative_swings_are_rectified() {
        let mut monitor = monitor();
        feed(&mut monitor, [420; 4]);
        assert_eq!(monitor.state(), LevelState::Clip);
    }

    #[test]
    fn moderate_signal_reports_sig_once() {
        let mut monitor = monitor();
        let changes = feed(&mut monitor, (0..60).map(|i| 530 + (i % 3) * 10));
        assert_eq!(changes, vec![LevelState::Sig]);
    }

    #[test]
    fn unchanged_short_average_does_not_reclassify() {
        let mut monitor = monitor();
        feed(&mut monitor, [620; 10]);
        assert_eq!(monitor.state(), LevelState::Clip);
        // a steady level keeps the short average constant: no updates
        assert!(feed(&mut monitor, [620; 10]).is_empty());
    }

    #[test]
    fn higher_gain_lowers_thresholds_in_place() {
        let mut monitor = monitor();
        let before = monitor.thresholds();
        monitor.set_input_gain(10.0);
        let after = monitor.thresholds();
        assert!(after.clip < before.clip);
        assert!(after.signal < after.warn && after.warn < after.clip);

        // 545 is only WARN territory at 0 dB gain, clipping at +10 dB
        let changes = feed(&mut monitor, (0..20).map(|i| 545 + (i % 3)));
        assert_eq!(changes.last(), Some(&LevelState::Clip));
    }

    #[test]
    fn poll_reads_sensor() {
        let adc = ScriptedAdc::new(520);
        let mut monitor = LevelMonitor::new(Box::new(adc.clone()), LevelSettings::default());
        adc.set(700);
        for _ in 0..4 {
            monitor.poll();
        }
        assert_eq!(monitor.state(), LevelState::Clip);
    }
}
