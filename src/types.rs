use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Audio data ─────────────────────────────────────────────────────────────

/// One stereo sample pair, normalized amplitude (nominally -1.0 to 1.0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub left: f32,
    pub right: f32,
}

impl Frame {
    pub const SILENT: Frame = Frame { left: 0.0, right: 0.0 };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Pack both channels into one word so a frame can be stored atomically.
    pub fn to_bits(self) -> u64 {
        ((self.left.to_bits() as u64) << 32) | self.right.to_bits() as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            left: f32::from_bits((bits >> 32) as u32),
            right: f32::from_bits(bits as u32),
        }
    }
}

/// Input side of the capture session. Index 0 = left, 1 = right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    pub fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Left => write!(f, "in1"),
            Channel::Right => write!(f, "in2"),
        }
    }
}

// ─── Display / color modes ──────────────────────────────────────────────────

/// How per-sample hue is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    /// One hue for the whole window
    Standard,
    /// Hue follows distance from the origin
    Radius,
    /// Hue follows segment length between consecutive samples
    Length,
    /// Hue sweeps along the window
    Time,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::Standard,
        DisplayMode::Radius,
        DisplayMode::Length,
        DisplayMode::Time,
    ];

    pub fn next(self) -> Self {
        Self::ALL[(self.ordinal() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.ordinal() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Unknown ordinals (e.g. from a stale preferences file) fall back to Standard.
    pub fn from_ordinal(n: u8) -> Self {
        Self::ALL.get(n as usize).copied().unwrap_or(DisplayMode::Standard)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayMode::Standard => "Standard",
            DisplayMode::Radius => "Radius",
            DisplayMode::Length => "Length",
            DisplayMode::Time => "Time",
        };
        f.write_str(name)
    }
}

/// How the base hue moves from one frame to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Constant drift by `color_rate` per frame
    Standard,
    /// Drift proportional to how much busier this window is than the last
    Delta,
}

impl ColorMode {
    pub const ALL: [ColorMode; 2] = [ColorMode::Standard, ColorMode::Delta];

    pub fn next(self) -> Self {
        Self::ALL[(self.ordinal() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.ordinal() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(n: u8) -> Self {
        Self::ALL.get(n as usize).copied().unwrap_or(ColorMode::Standard)
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorMode::Standard => f.write_str("Standard"),
            ColorMode::Delta => f.write_str("Delta"),
        }
    }
}

/// Which per-sample distance feeds the Delta color accumulator.
///
/// `Length`: accumulate consecutive-sample distance (Radius display still
/// colors by magnitude). `Radius`: accumulate magnitude (Length display still
/// colors by consecutive distance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeltaMetric {
    Radius,
    Length,
}

/// Pan axis. Vertical moves top/bottom, Horizontal moves right/left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Vertical,
    Horizontal,
}

// ─── Render output ──────────────────────────────────────────────────────────

/// One plotted point of the polyline with its color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// Visible coordinate rectangle. Always top > bottom and right > left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewBounds {
    pub top: f64,
    pub bottom: f64,
    pub right: f64,
    pub left: f64,
}

impl ViewBounds {
    pub const UNIT: ViewBounds = ViewBounds {
        top: 1.0,
        bottom: -1.0,
        right: 1.0,
        left: -1.0,
    };

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// `[top, bottom, right, left]`
    pub fn sides(&self) -> [f64; 4] {
        [self.top, self.bottom, self.right, self.left]
    }

    pub fn from_sides(s: [f64; 4]) -> Self {
        Self {
            top: s[0],
            bottom: s[1],
            right: s[2],
            left: s[3],
        }
    }

    /// Finite and strictly ordered on both axes.
    pub fn is_valid(&self) -> bool {
        self.sides().iter().all(|v| v.is_finite()) && self.top > self.bottom && self.right > self.left
    }
}

/// Scalars shown alongside the plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hud {
    pub fps: f64,
    pub latency_seconds: f64,
    pub scale_factor: f64,
    /// Seconds relative to the pause point; None while live
    pub paused_counter_seconds: Option<f64>,
    pub auto_scale: bool,
    pub display_mode: DisplayMode,
    pub color_mode: ColorMode,
    pub color_range: f64,
    pub color_rate: f64,
    pub line_width: u32,
    pub full_screen: bool,
    pub stats_group: u32,
}

/// Everything the renderer needs for one display tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeFrame {
    pub tick: u64,
    pub bounds: ViewBounds,
    pub vertices: Vec<Vertex>,
    pub hud: Hud,
}

impl fmt::Display for ScopeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick={:>8}  n={:<5} scale={:.5}  fps={:.1}  lat={:.0}µs{}",
            self.tick,
            self.vertices.len(),
            self.hud.scale_factor,
            self.hud.fps,
            self.hud.latency_seconds * 1_000_000.0,
            match self.hud.paused_counter_seconds {
                Some(s) => format!("  paused {:+.2}s", s),
                None => String::new(),
            }
        )
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ScopeError {
    /// The audio backend could not be reached or started. Fatal.
    Backend(String),
    /// The backend went away mid-run. Fatal.
    BackendLost(String),
    /// One port connection attempt failed. Logged and retried.
    Connect { port: String, reason: String },
    /// The sample ring could not be sized.
    RingAllocation(usize),
    /// A blocking wait was aborted by shutdown.
    Cancelled,
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::Backend(msg) => write!(f, "audio backend unavailable: {}", msg),
            ScopeError::BackendLost(msg) => write!(f, "audio backend shut down: {}", msg),
            ScopeError::Connect { port, reason } => {
                write!(f, "cannot connect to {}: {}", port, reason)
            }
            ScopeError::RingAllocation(frames) => {
                write!(f, "cannot allocate a ring buffer of {} frames", frames)
            }
            ScopeError::Cancelled => write!(f, "wait cancelled by shutdown"),
            ScopeError::Config(msg) => write!(f, "configuration error: {}", msg),
            ScopeError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ScopeError {}

impl From<std::io::Error> for ScopeError {
    fn from(err: std::io::Error) -> Self {
        ScopeError::Io(err)
    }
}

pub type ScopeResult<T> = Result<T, ScopeError>;

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock shared by the capture and render sides.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

pub const ROOT_TWO: f64 = std::f64::consts::SQRT_2;

/// Longest line the renderer is asked to draw.
pub const MAX_LINE_WIDTH: u32 = 8;

/// Zoom step for one zoom-in / zoom-out.
pub const ZOOM_STEP: f64 = 1.1;
