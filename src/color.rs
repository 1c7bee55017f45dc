//! Per-sample coloring of a window and the frame-to-frame hue drift.

use crate::dsp::{hsv_to_rgb, radius, segment_length, wrap_hue};
use crate::types::{ColorMode, DeltaMetric, DisplayMode, Frame, Vertex};

/// Hue sweep across one window in Time display mode, at range 1.0.
const TIME_SWEEP_DEGREES: f64 = 90.0;

/// Evolving hue state carried between windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorState {
    /// Base hue in degrees, always in `[0, 360)`
    pub hue: f64,
    /// Previous window's accumulated distance (Delta color mode)
    pub threshold: f64,
    /// Relative growth of the last window over the one before
    pub delta: f64,
}

impl Default for ColorState {
    fn default() -> Self {
        Self {
            hue: 0.0,
            threshold: 0.0,
            delta: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColorMapper {
    pub display_mode: DisplayMode,
    pub color_mode: ColorMode,
    color_range: f64,
    color_rate: f64,
    metric: DeltaMetric,
    state: ColorState,
}

impl ColorMapper {
    pub fn new(metric: DeltaMetric) -> Self {
        Self {
            display_mode: DisplayMode::Standard,
            color_mode: ColorMode::Standard,
            color_range: 1.0,
            color_rate: 1.0,
            metric,
            state: ColorState::default(),
        }
    }

    pub fn state(&self) -> ColorState {
        self.state
    }

    pub fn hue(&self) -> f64 {
        self.state.hue
    }

    pub fn set_hue(&mut self, hue: f64) {
        self.state.hue = wrap_hue(hue);
    }

    pub fn color_range(&self) -> f64 {
        self.color_range
    }

    pub fn color_rate(&self) -> f64 {
        self.color_rate
    }

    pub fn metric(&self) -> DeltaMetric {
        self.metric
    }

    /// Restore saved settings, wrapping anything out of range.
    pub fn set_range_and_rate(&mut self, range: f64, rate: f64) {
        self.color_range = if range.is_finite() { wrap_range(range) } else { 1.0 };
        self.color_rate = if rate.is_finite() { wrap_rate(rate) } else { 1.0 };
    }

    pub fn adjust_color_range(&mut self, delta: f64) -> f64 {
        self.color_range = wrap_range(self.color_range + delta);
        self.color_range
    }

    pub fn adjust_color_rate(&mut self, delta: f64) -> f64 {
        self.color_rate = wrap_rate(self.color_rate + delta);
        self.color_rate
    }

    pub fn next_display_mode(&mut self) -> DisplayMode {
        self.display_mode = self.display_mode.next();
        self.display_mode
    }

    pub fn prev_display_mode(&mut self) -> DisplayMode {
        self.display_mode = self.display_mode.prev();
        self.display_mode
    }

    pub fn next_color_mode(&mut self) -> ColorMode {
        self.color_mode = self.color_mode.next();
        self.color_mode
    }

    pub fn prev_color_mode(&mut self) -> ColorMode {
        self.color_mode = self.color_mode.prev();
        self.color_mode
    }

    /// Color every frame of `window` in order, then advance the base hue for
    /// the next window. `scale_factor` is the view's current zoom, which
    /// stretches the Radius palette.
    pub fn map_window(&mut self, window: &[Frame], scale_factor: f64) -> Vec<Vertex> {
        let base = self.state.hue;
        let n = window.len().max(1) as f64;
        let fixed = hsv_to_rgb(base, 1.0, 1.0);
        let mut prev = Frame::SILENT;
        let mut dt = 0.0;
        let mut out = Vec::with_capacity(window.len());

        for (i, &frame) in window.iter().enumerate() {
            let magnitude = radius(frame);
            let length = segment_length(prev, frame);
            prev = frame;

            if self.color_mode == ColorMode::Delta {
                let d = match self.metric {
                    DeltaMetric::Length => length,
                    DeltaMetric::Radius => magnitude,
                };
                if d.is_finite() {
                    dt += d;
                }
            }

            let (r, g, b) = match self.display_mode {
                DisplayMode::Standard => fixed,
                DisplayMode::Radius => {
                    let h = magnitude * 360.0 * self.color_range * scale_factor + base;
                    hsv_to_rgb(wrap_hue(h), 1.0, 1.0)
                }
                DisplayMode::Length => {
                    let h = base + length_offset(length * 360.0 * self.color_range);
                    hsv_to_rgb(wrap_hue(h), 1.0, 1.0)
                }
                DisplayMode::Time => {
                    let h = i as f64 / n * TIME_SWEEP_DEGREES * self.color_range + base;
                    hsv_to_rgb(wrap_hue(h), 1.0, 1.0)
                }
            };
            out.push(Vertex {
                x: frame.left,
                y: frame.right,
                r: r as f32,
                g: g as f32,
                b: b as f32,
            });
        }

        self.end_frame(dt);
        out
    }

    fn end_frame(&mut self, dt: f64) {
        let s = &mut self.state;
        match self.color_mode {
            ColorMode::Standard => {
                s.hue = wrap_hue(s.hue - self.color_rate);
            }
            ColorMode::Delta => {
                s.delta = if s.threshold > 0.0 && dt > s.threshold {
                    dt / s.threshold - 1.0
                } else {
                    0.0
                };
                s.threshold = dt;
                s.hue = wrap_hue(s.hue - self.color_rate * s.delta);
            }
        }
    }
}

/// Keep a Length-mode hue offset inside one turn above the base hue.
fn length_offset(raw: f64) -> f64 {
    let off = if raw < 0.0 { raw + 360.0 } else { raw };
    off.clamp(0.0, 360.0)
}

fn wrap_range(v: f64) -> f64 {
    if v > 100.0 {
        v - 200.0
    } else if v <= -100.0 {
        v + 200.0
    } else {
        v
    }
}

fn wrap_rate(v: f64) -> f64 {
    if v > 180.0 {
        v - 360.0
    } else if v <= -180.0 {
        v + 360.0
    } else {
        v
    }
}
