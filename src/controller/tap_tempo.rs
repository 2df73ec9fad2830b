//! Tap tempo: BPM from the spacing of consecutive presses.

use crate::clock::Timestamp;
use std::collections::VecDeque;
use tracing::debug;

pub type TempoCallback = Box<dyn FnMut(f64) + Send>;

#[derive(Debug, Clone)]
pub struct TapTempoSettings {
    /// Ring buffer capacity
    pub samples: usize,
    /// A gap longer than this starts a new run
    pub stale_after_s: f64,
    /// Tempos below this are not reported
    pub min_bpm: f64,
}

impl Default for TapTempoSettings {
    fn default() -> Self {
        Self {
            samples: 4,
            stale_after_s: 1.5,
            min_bpm: 40.0,
        }
    }
}

pub struct TapTempo {
    settings: TapTempoSettings,
    stamps: VecDeque<Timestamp>,
    bpm: f64,
    reported: Option<f64>,
    enabled: bool,
    callback: Option<TempoCallback>,
}

impl TapTempo {
    pub fn new(settings: TapTempoSettings) -> Self {
        let capacity = settings.samples.max(2);
        Self {
            settings,
            stamps: VecDeque::with_capacity(capacity),
            bpm: 0.0,
            reported: None,
            enabled: true,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: TempoCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops collected taps so a later enable starts fresh.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.stamps.clear();
            self.reported = None;
        }
        self.enabled = enabled;
    }

    /// Last computed tempo, stale or not.
    pub fn get_bpm(&self) -> f64 {
        self.bpm
    }

    /// Records a tap. Returns the tempo if this tap reported a new one.
    pub fn stamp(&mut self, t: Timestamp) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        self.stamps.push_back(t);
        while self.stamps.len() > self.settings.samples.max(2) {
            self.stamps.pop_front();
        }
        self.recompute()
    }

    fn recompute(&mut self) -> Option<f64> {
        let count = self.stamps.len();
        if count < 2 {
            return None;
        }
        let newest = self.stamps[count - 1];
        let previous = self.stamps[count - 2];
        let oldest = self.stamps[0];
        let span = newest - oldest;

        if span > self.settings.stale_after_s && newest - previous > self.settings.stale_after_s {
            debug!("Tap run went stale after {:.2}s, restarting", newest - previous);
            self.stamps.clear();
            self.stamps.push_back(newest);
            self.reported = None;
            return None;
        }

        let period = span / (count - 1) as f64;
        if period <= 0.0 {
            return None;
        }
        self.bpm = (60.0 / period * 100.0).round() / 100.0;
        debug!("Tap tempo {:.2} bpm over {} taps", self.bpm, count);

        if self.bpm < self.settings.min_bpm || self.reported == Some(self.bpm) {
            return None;
        }
        self.reported = Some(self.bpm);
        if let Some(callback) = self.callback.as_mut() {
            callback(self.bpm);
        }
        Some(self.bpm)
    }
}
