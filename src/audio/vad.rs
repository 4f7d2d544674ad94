//! Energy-based voice activity detection
//!
//! Frames are cut into fixed windows (40ms by default) and each window's RMS
//! level is compared against a dBFS threshold. A short vote over the most
//! recent windows opens speech; a fully silent history closes it. The
//! detector only reports edges, it never touches timers or the recorder.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::AudioFrame;

/// Speech edge emitted on a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    /// Silent → active
    Speaking,
    /// Active → silent
    StoppedSpeaking,
}

/// Configurable VAD parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Analysis window length in milliseconds
    pub window_ms: u32,
    /// Level (dBFS) above which a window counts as active
    pub threshold_db: f32,
    /// Number of windows remembered; all must be silent to stop speaking
    pub history: usize,
    /// Number of most recent windows inspected for onset
    pub onset_windows: usize,
    /// Active windows among `onset_windows` required to start speaking
    pub onset_votes: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            window_ms: 40,
            threshold_db: -68.0,
            history: 10,
            onset_windows: 3,
            onset_votes: 2,
        }
    }
}

/// Voice activity detector with hysteresis
#[derive(Debug)]
pub struct EnergyVad {
    config: VadConfig,
    speaking: bool,
    /// Most recent window verdicts, oldest first
    votes: Vec<bool>,
    /// Samples carried over until a full window is available
    pending: Vec<i16>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let history = config.history.max(config.onset_windows).max(1);
        Self {
            votes: vec![false; history],
            config,
            speaking: false,
            pending: Vec::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one captured frame, returning the edges it produced in order
    pub fn process(&mut self, frame: &AudioFrame) -> Vec<VadEdge> {
        let window = (frame.sample_rate as usize * self.config.window_ms as usize / 1000)
            * frame.channels.max(1) as usize;
        if window == 0 {
            return Vec::new();
        }

        self.pending.extend_from_slice(&frame.samples);

        let mut edges = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= window {
            let level = level_db(&self.pending[offset..offset + window]);
            if let Some(edge) = self.classify(level) {
                edges.push(edge);
            }
            offset += window;
        }
        self.pending.drain(..offset);
        edges
    }

    /// Classify one window level and update the hysteresis state
    pub fn classify(&mut self, level_db: f32) -> Option<VadEdge> {
        let active = level_db > self.config.threshold_db;
        let mut edge = None;

        if active && !self.speaking {
            let recent = self.config.onset_windows.saturating_sub(1);
            let start = self.votes.len().saturating_sub(recent);
            let votes = self.votes[start..].iter().filter(|v| **v).count() + 1;
            if votes >= self.config.onset_votes {
                self.speaking = true;
                edge = Some(VadEdge::Speaking);
            }
        } else if !active && self.speaking {
            let remembered = self.votes.iter().skip(1).any(|v| *v);
            if !remembered {
                self.speaking = false;
                edge = Some(VadEdge::StoppedSpeaking);
            }
        }

        self.votes.remove(0);
        self.votes.push(active);

        if let Some(edge) = edge {
            debug!("VAD edge {:?} at {:.1} dB", edge, level_db);
        }
        edge
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.votes.iter_mut().for_each(|v| *v = false);
        self.pending.clear();
    }
}

/// RMS level of a window in dBFS (−inf for digital silence)
pub fn level_db(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / i16::MAX as f64;
            x * x
        })
        .sum();
    let rms = (sum / samples.len() as f64).sqrt();
    (20.0 * rms.log10()) as f32
}
