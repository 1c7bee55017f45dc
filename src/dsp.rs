//! Shared numeric primitives: exponential smoothing, hue wrapping, HSV→RGB,
//! and the time-domain distance metrics used for coloring and auto-scale.

use crate::types::{Frame, ROOT_TWO};

/// Discrete-time exponential approach: `x += (target - x) * factor`.
///
/// Every low-pass in the scope (view bounds, hue, latency, peak tracking)
/// goes through this one law.
#[inline]
pub fn smooth(current: &mut f64, target: f64, factor: f64) {
    *current += (target - *current) * factor;
}

/// Normalize an angle in degrees into `[0, 360)`. Negative inputs wrap down
/// from 360. Non-finite input yields 0.
#[inline]
pub fn wrap_hue(h: f64) -> f64 {
    if !h.is_finite() {
        return 0.0;
    }
    let w = h.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if w >= 360.0 {
        0.0
    } else {
        w
    }
}

/// Standard six-sector HSV → RGB. `h` in degrees, `s`/`v` in 0..=1.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        // achromatic
        return (v, v, v);
    }
    let h = wrap_hue(h) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Distance of a frame from the origin, normalized so full-scale on both
/// channels is 1.0.
#[inline]
pub fn radius(frame: Frame) -> f64 {
    (frame.left as f64).hypot(frame.right as f64) / ROOT_TWO
}

/// Length of the segment between two consecutive frames, same normalization.
#[inline]
pub fn segment_length(prev: Frame, cur: Frame) -> f64 {
    let dl = cur.left as f64 - prev.left as f64;
    let dr = cur.right as f64 - prev.right as f64;
    dl.hypot(dr) / ROOT_TWO
}

/// Largest absolute channel value in the window.
pub fn window_peak(frames: &[Frame]) -> f64 {
    frames
        .iter()
        .map(|f| (f.left.abs() as f64).max(f.right.abs() as f64))
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}
