//! Visible coordinate rectangle: smoothed manual zoom/pan, or auto-scale
//! that follows signal magnitude.
//!
//! Two policies, chosen by `auto_scale`:
//!
//! * **Auto-scale**: each tick the window peak feeds a [`MagnitudeTracker`]
//!   (instant rise, damped fall) and the bounds snap to a symmetric
//!   rectangle around it.
//! * **Manual**: zoom/pan edit a *target* rectangle; the shown bounds
//!   approach it by 10% per tick.
//!
//! Every update that would leave a non-finite or inverted rectangle is
//! dropped and the previous bounds are kept.

use crate::dsp::{smooth, window_peak};
use crate::types::{Axis, Frame, ViewBounds, ZOOM_STEP};
use log::{debug, info};

/// Per-tick approach rate of the shown bounds toward the target.
const BOUNDS_SMOOTHING: f64 = 0.1;
/// Damping applied when the peak falls well below the tracked value.
const PEAK_DECAY: f64 = 0.2;
/// `set_sides` half-extent limits.
const MIN_HALF_EXTENT: f64 = 0.000005;
const MAX_HALF_EXTENT: f64 = 5000.0;
/// Zoom result limits (full side lengths).
const MIN_SIDE: f64 = 0.00001;
const MAX_SIDE: f64 = 10000.0;

// ─── Magnitude tracking ─────────────────────────────────────────────────────

/// Running peak of `max(|left|, |right|)` with asymmetric response.
#[derive(Debug, Clone, Copy)]
pub struct MagnitudeTracker {
    pub max_sample_value: f64,
}

impl MagnitudeTracker {
    pub fn new(initial: f64) -> Self {
        Self {
            max_sample_value: initial,
        }
    }

    /// Rises instantly to a louder peak; only once the peak drops under a
    /// third of the tracked value does it decay, and then gradually.
    pub fn update(&mut self, peak: f64) -> f64 {
        let m = self.max_sample_value;
        if peak > m {
            self.max_sample_value = peak;
        } else if peak < m / 3.0 {
            smooth(&mut self.max_sample_value, m * 2.0 / 3.0 + peak, PEAK_DECAY);
        }
        self.max_sample_value
    }
}

// ─── View transform ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ViewTransform {
    bounds: ViewBounds,
    target: ViewBounds,
    scale_factor: f64,
    auto_scale: bool,
    /// Bounds derive from a half-extent (set_sides) rather than free pan/zoom;
    /// decides how a viewport resize is absorbed.
    scale_locked: bool,
    tracker: MagnitudeTracker,
    /// Viewport in pixels: current and at the previous resize
    dim: [u32; 2],
    old_dim: [u32; 2],
}

impl ViewTransform {
    pub fn new(bounds: ViewBounds, dim: [u32; 2], auto_scale: bool) -> Self {
        let bounds = if bounds.is_valid() { bounds } else { ViewBounds::UNIT };
        let mut view = Self {
            bounds,
            target: bounds,
            scale_factor: 1.0,
            auto_scale,
            scale_locked: true,
            tracker: MagnitudeTracker::new(1.0),
            dim,
            old_dim: dim,
        };
        view.update_scale_factor();
        view
    }

    /// Restore the viewport size recorded at the last resize, so a free
    /// (unlocked) view rescales against it. Zero sizes are ignored.
    pub fn with_old_dim(mut self, old_dim: [u32; 2]) -> Self {
        if old_dim[0] > 0 && old_dim[1] > 0 {
            self.old_dim = old_dim;
        }
        self
    }

    pub fn bounds(&self) -> ViewBounds {
        self.bounds
    }

    pub fn target(&self) -> ViewBounds {
        self.target
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn auto_scale(&self) -> bool {
        self.auto_scale
    }

    pub fn scale_locked(&self) -> bool {
        self.scale_locked
    }

    pub fn set_scale_locked(&mut self, locked: bool) {
        self.scale_locked = locked;
    }

    pub fn max_sample_value(&self) -> f64 {
        self.tracker.max_sample_value
    }

    pub fn dim(&self) -> [u32; 2] {
        self.dim
    }

    pub fn old_dim(&self) -> [u32; 2] {
        self.old_dim
    }

    /// Width / height of the viewport.
    fn aspect(&self) -> f64 {
        let [w, h] = self.dim;
        if w == 0 || h == 0 {
            1.0
        } else {
            w as f64 / h as f64
        }
    }

    /// Advance one display tick over `window`.
    pub fn tick(&mut self, window: &[Frame]) {
        if self.auto_scale {
            let m = self.tracker.update(window_peak(window));
            self.set_sides(m, true);
        } else {
            let mut sides = self.bounds.sides();
            for (side, goal) in sides.iter_mut().zip(self.target.sides()) {
                smooth(side, goal, BOUNDS_SMOOTHING);
            }
            self.commit_bounds(ViewBounds::from_sides(sides));
        }
        self.update_scale_factor();
    }

    fn update_scale_factor(&mut self) {
        let s = 2.0 / self.bounds.height().min(self.bounds.width());
        if s.is_finite() && s > 0.0 {
            self.scale_factor = s;
        }
    }

    fn commit_bounds(&mut self, b: ViewBounds) -> bool {
        if b.is_valid() {
            self.bounds = b;
            true
        } else {
            debug!("Dropped degenerate view bounds {:?}", b);
            false
        }
    }

    fn commit_target(&mut self, b: ViewBounds) -> bool {
        if b.is_valid() {
            self.target = b;
            true
        } else {
            debug!("Dropped degenerate target bounds {:?}", b);
            false
        }
    }

    /// Symmetric rectangle of half-extent `x` on the shorter axis, stretched
    /// by the aspect ratio on the longer one. Rejected outside
    /// `[0.000005, 5000]`. With `snap` the shown bounds jump there at once.
    pub fn set_sides(&mut self, x: f64, snap: bool) -> bool {
        if !(MIN_HALF_EXTENT..=MAX_HALF_EXTENT).contains(&x) {
            return false;
        }
        let r = self.aspect();
        let (v, h) = if r >= 1.0 { (x, x * r) } else { (x / r, x) };
        let t = ViewBounds {
            top: v,
            bottom: -v,
            right: h,
            left: -h,
        };
        if !self.commit_target(t) {
            return false;
        }
        self.scale_locked = true;
        if snap {
            self.bounds = t;
        }
        true
    }

    /// Turn auto-scale off, announcing it once. Returns whether it was on.
    pub fn disable_auto_scale(&mut self) -> bool {
        if self.auto_scale {
            self.auto_scale = false;
            info!("Auto-scale: off");
            true
        } else {
            false
        }
    }

    pub fn toggle_auto_scale(&mut self) -> bool {
        // Seed the tracker from what is on screen so the switch is seamless.
        self.tracker.max_sample_value =
            (self.bounds.height() / 2.1).min(self.bounds.width() / 2.1);
        self.auto_scale = !self.auto_scale;
        info!("Auto-scale: {}", if self.auto_scale { "on" } else { "off" });
        self.auto_scale
    }

    /// Grow (factor < 1) or shrink (factor > 1) the target about its centre,
    /// keeping the aspect ratio. Rejected if the shortest side would fall to
    /// 0.00001 or the longest reach 10000. Always disables auto-scale.
    pub fn scale(&mut self, factor: f64) -> bool {
        self.disable_auto_scale();
        let t = self.target;
        let add = t.height().min(t.width()) * (1.0 - factor);
        let r = self.aspect();
        let (dv, dh) = if r >= 1.0 { (add, add * r) } else { (add / r, add) };
        let next = ViewBounds {
            top: t.top + dv / 2.0,
            bottom: t.bottom - dv / 2.0,
            right: t.right + dh / 2.0,
            left: t.left - dh / 2.0,
        };
        let shortest = next.height().min(next.width());
        let longest = next.height().max(next.width());
        if shortest > MIN_SIDE && longest < MAX_SIDE {
            self.commit_target(next)
        } else {
            debug!("Zoom by {} refused (sides {:.6}..{:.1})", factor, shortest, longest);
            false
        }
    }

    pub fn zoom_in(&mut self) -> bool {
        self.scale(ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.scale(1.0 / ZOOM_STEP)
    }

    /// Absolute zoom: half-extent `1 / factor`, smoothed in.
    pub fn set_zoom(&mut self, factor: f64) -> bool {
        self.disable_auto_scale();
        if factor <= 0.0 || !factor.is_finite() {
            return false;
        }
        self.set_sides(1.0 / factor, false)
    }

    /// Shift one axis of the target by `fraction` of its current extent.
    pub fn pan(&mut self, axis: Axis, fraction: f64) -> bool {
        self.scale_locked = false;
        self.disable_auto_scale();
        let mut t = self.target;
        match axis {
            Axis::Vertical => {
                let d = fraction * t.height();
                t.top += d;
                t.bottom += d;
            }
            Axis::Horizontal => {
                let d = fraction * t.width();
                t.right += d;
                t.left += d;
            }
        }
        self.commit_target(t)
    }

    /// Target the current extents centred on the origin.
    pub fn recenter(&mut self) -> bool {
        let v = self.bounds.height() / 2.0;
        let h = self.bounds.width() / 2.0;
        self.commit_target(ViewBounds {
            top: v,
            bottom: -v,
            right: h,
            left: -h,
        })
    }

    /// New viewport size. A scale-locked view keeps its half-extent; a free
    /// one keeps its world-to-pixel ratio.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.dim = [width, height];
        if self.scale_locked {
            let x = 1.0 / self.scale_factor;
            self.set_sides(x, true);
            self.old_dim = self.dim;
        } else {
            self.rescale();
        }
        self.update_scale_factor();
    }

    /// Multiply bounds by the per-axis ratio of new to old pixel size.
    pub fn rescale(&mut self) {
        let old_w = self.old_dim[0].max(1) as f64;
        let old_h = self.old_dim[1].max(1) as f64;
        let wr = self.dim[0] as f64 / old_w;
        let hr = self.dim[1] as f64 / old_h;
        self.old_dim = self.dim;
        let b = self.bounds;
        let next = ViewBounds {
            top: b.top * hr,
            bottom: b.bottom * hr,
            right: b.right * wr,
            left: b.left * wr,
        };
        if self.commit_bounds(next) {
            self.target = next;
        }
    }
}
