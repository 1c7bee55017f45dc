//! Capture / display timing configuration.
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file is fine. CLI flags are applied on top by the binary.

use crate::types::{DeltaMetric, ScopeError, ScopeResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Sample rate the backend delivers at (Hz)
    pub sample_rate: u32,
    /// Display ticks per second
    pub frame_rate: u32,
    /// How many display ticks each sample is drawn on
    pub draw_each_frame: u32,
    /// Seconds of history kept for rewinding
    pub buffer_seconds: f64,
    /// Metric accumulated by the Delta color mode
    pub delta_metric: DeltaMetric,
    /// Source port name fragment routed to the left input
    pub left_port_match: String,
    /// Source port name fragment routed to the right input
    pub right_port_match: String,
    /// Quiet period after the last port registration before reconnecting
    pub reconnect_debounce_ms: u64,
    /// Pace ticks to `frame_rate` instead of rendering as fast as possible
    pub limit_frame_rate: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_rate: 60,
            draw_each_frame: 2,
            buffer_seconds: 1.0,
            delta_metric: DeltaMetric::Length,
            left_port_match: "output_FL".into(),
            right_port_match: "output_FR".into(),
            reconnect_debounce_ms: 500,
            limit_frame_rate: true,
        }
    }
}

impl ScopeConfig {
    /// Load from a JSON file. Absent file ⇒ defaults; malformed file ⇒ error.
    pub fn load(path: &Path) -> ScopeResult<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let cfg: Self = serde_json::from_str(&data)
            .map_err(|e| ScopeError::Config(format!("{:?}: {}", path, e)))?;
        cfg.validate()?;
        info!("Loaded config from {:?}", path);
        Ok(cfg)
    }

    pub fn validate(&self) -> ScopeResult<()> {
        if self.sample_rate == 0 || self.frame_rate == 0 || self.draw_each_frame == 0 {
            return Err(ScopeError::Config(
                "sample_rate, frame_rate and draw_each_frame must be non-zero".into(),
            ));
        }
        if self.frame_rate > self.sample_rate {
            return Err(ScopeError::Config(format!(
                "frame_rate {} exceeds sample_rate {}",
                self.frame_rate, self.sample_rate
            )));
        }
        if !(self.buffer_seconds.is_finite() && self.buffer_seconds >= 0.0) {
            return Err(ScopeError::Config(format!(
                "buffer_seconds must be a non-negative number, got {}",
                self.buffer_seconds
            )));
        }
        Ok(())
    }

    /// Frames advanced per display tick: (sample_rate / frame_rate) × draw_each_frame.
    pub fn frames_per_window(&self) -> usize {
        (self.sample_rate / self.frame_rate) as usize * self.draw_each_frame as usize
    }

    /// Frames drawn per tick: one extra so consecutive windows join up.
    pub fn draw_frames(&self) -> usize {
        self.frames_per_window() + 1
    }

    /// Rewindable history in frames.
    pub fn history_frames(&self) -> usize {
        (self.sample_rate as f64 * self.buffer_seconds) as usize + self.frames_per_window()
    }

    /// Windows per second of audio; one "big" rewind/fast-forward step.
    pub fn windows_per_second(&self) -> usize {
        (self.frame_rate / self.draw_each_frame).max(1) as usize
    }

    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }
}
