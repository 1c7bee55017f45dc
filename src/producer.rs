use crate::capture::CaptureShared;
use crate::color::ColorMapper;
use crate::config::ScopeConfig;
use crate::cursor::{CursorMode, ScrubCursor};
use crate::dsp::smooth;
use crate::prefs::Preferences;
use crate::types::*;
use crate::view::ViewTransform;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, trace};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest a live tick waits for audio before drawing what it has.
const LIVE_WAIT: Duration = Duration::from_millis(100);
/// Latency decay toward the current delivery age.
const LATENCY_SMOOTHING: f64 = 0.01;
const STATS_GROUPS: u32 = 4;

/// User operations, applied by the producer thread between ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePause,
    Rewind(u32),
    FastForward(u32),
    ZoomIn,
    ZoomOut,
    SetZoom(f64),
    Scale(f64),
    Pan { axis: Axis, fraction: f64 },
    ToggleAutoScale,
    Recenter,
    NextColorMode,
    PrevColorMode,
    NextDisplayMode,
    PrevDisplayMode,
    SetLineWidth(u32),
    AdjustLineWidth(i32),
    AdjustColorRange(f64),
    AdjustColorRate(f64),
    Resize { width: u32, height: u32 },
    ToggleFullScreen,
    NextStatsGroup,
    PrevStatsGroup,
    Quit,
}

// ─── Frame-rate meter ───────────────────────────────────────────────────────

/// Ticks per second, refreshed once at least a second has passed.
#[derive(Debug)]
struct FpsMeter {
    started: Instant,
    ticks: u32,
    fps: f64,
}

impl FpsMeter {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            ticks: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) -> f64 {
        self.ticks += 1;
        let elapsed = self.started.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.ticks as f64 / elapsed.as_secs_f64();
            self.ticks = 0;
            self.started = Instant::now();
        }
        self.fps
    }
}

// ─── Producer ───────────────────────────────────────────────────────────────

/// Render-side owner of the cursor, view and color state. Each tick resolves
/// one window from the ring and publishes it as a [`ScopeFrame`].
pub struct FrameProducer {
    config: ScopeConfig,
    shared: Arc<CaptureShared>,
    cmd_rx: Receiver<Command>,
    frame_txs: Vec<Sender<ScopeFrame>>,
    cursor: ScrubCursor,
    view: ViewTransform,
    color: ColorMapper,
    /// Fields the producer carries through untouched (window position,
    /// normal size)
    base_prefs: Preferences,
    line_width: u32,
    full_screen: bool,
    stats_group: u32,
    latency: f64,
    fps: FpsMeter,
    window: Vec<Frame>,
    tick: u64,
}

impl FrameProducer {
    pub fn new(
        config: ScopeConfig,
        shared: Arc<CaptureShared>,
        cmd_rx: Receiver<Command>,
        frame_txs: Vec<Sender<ScopeFrame>>,
        prefs: &Preferences,
    ) -> Self {
        let cursor = ScrubCursor::new(config.frames_per_window(), shared.ring().history_frames());
        let mut view = ViewTransform::new(prefs.bounds, prefs.dim, prefs.auto_scale)
            .with_old_dim(prefs.old_dim);
        view.set_scale_locked(prefs.scale_locked);
        let mut color = ColorMapper::new(config.delta_metric);
        color.display_mode = prefs.display_mode;
        color.color_mode = prefs.color_mode;
        color.set_range_and_rate(prefs.color_range, prefs.color_rate);
        color.set_hue(prefs.hue);
        let window = vec![Frame::SILENT; config.draw_frames()];

        Self {
            config,
            shared,
            cmd_rx,
            frame_txs,
            cursor,
            view,
            color,
            base_prefs: prefs.clone(),
            line_width: prefs.line_width.clamp(1, MAX_LINE_WIDTH),
            full_screen: prefs.full_screen,
            stats_group: prefs.show_stats % STATS_GROUPS,
            latency: 0.0,
            fps: FpsMeter::new(),
            window,
            tick: 0,
        }
    }

    pub fn cursor(&self) -> &ScrubCursor {
        &self.cursor
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn color(&self) -> &ColorMapper {
        &self.color
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Current settings in persistable form.
    pub fn preferences(&self) -> Preferences {
        let s = self.color.state();
        Preferences {
            dim: self.view.dim(),
            old_dim: self.view.old_dim(),
            bounds: self.view.bounds(),
            scale_factor: self.view.scale_factor(),
            scale_locked: self.view.scale_locked(),
            full_screen: self.full_screen,
            auto_scale: self.view.auto_scale(),
            color_mode: self.color.color_mode,
            color_range: self.color.color_range(),
            color_rate: self.color.color_rate(),
            display_mode: self.color.display_mode,
            line_width: self.line_width,
            show_stats: self.stats_group,
            hue: s.hue,
            ..self.base_prefs.clone()
        }
    }

    /// Tick until Quit, the backend goes away or the wait is cancelled.
    pub fn run(&mut self) -> ScopeResult<()> {
        info!(
            "Frame producer running: {} frames/window, {} fps target",
            self.config.frames_per_window(),
            self.config.frame_rate
        );
        let interval = self.config.tick_interval();
        let start = Instant::now();
        let mut due: u32 = 0;

        loop {
            if self.config.limit_frame_rate || self.cursor.is_paused() {
                let target = interval * due;
                let elapsed = start.elapsed();
                if elapsed < target {
                    thread::sleep(target - elapsed);
                }
                due = due.wrapping_add(1);
            }

            match self.tick()? {
                Some(frame) => self.emit(frame),
                None => break,
            }
        }

        info!("Frame producer stopping after {} ticks", self.tick);
        Ok(())
    }

    fn emit(&self, frame: ScopeFrame) {
        for tx in &self.frame_txs {
            match tx.try_send(frame.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => trace!("Renderer behind, dropped tick {}", frame.tick),
            }
        }
    }

    /// Apply pending commands, then produce one frame. `Ok(None)` once Quit
    /// has been received.
    pub fn tick(&mut self) -> ScopeResult<Option<ScopeFrame>> {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if cmd == Command::Quit {
                info!("Quit requested");
                return Ok(None);
            }
            self.apply(cmd);
        }
        self.check_backend()?;

        self.cursor.track_oldest(self.oldest_safe());
        let draw = self.config.draw_frames();
        let ring = self.shared.ring();
        let n = match self.cursor.window_start(draw) {
            None => {
                if let Err(e) = ring.wait_ready(Some(LIVE_WAIT)) {
                    self.check_backend()?;
                    return Err(e);
                }
                // Land exactly one window behind the writer.
                let available = ring.available_to_read() as i64;
                ring.advance_read(available - draw as i64);
                ring.read(&mut self.window[..draw])
            }
            Some(start) => ring.read_at(start, &mut self.window[..draw]),
        };
        let window = &self.window[..n];

        self.view.tick(window);
        let vertices = self.color.map_window(window, self.view.scale_factor());
        self.update_latency();
        let fps = self.fps.tick();

        let frame = ScopeFrame {
            tick: self.tick,
            bounds: self.view.bounds(),
            vertices,
            hud: Hud {
                fps,
                latency_seconds: self.latency,
                scale_factor: self.view.scale_factor(),
                paused_counter_seconds: self.cursor.counter_seconds(self.config.sample_rate),
                auto_scale: self.view.auto_scale(),
                display_mode: self.color.display_mode,
                color_mode: self.color.color_mode,
                color_range: self.color.color_range(),
                color_rate: self.color.color_rate(),
                line_width: self.line_width,
                full_screen: self.full_screen,
                stats_group: self.stats_group,
            },
        };

        self.tick += 1;
        if self.tick % 1000 == 0 {
            debug!("Producer: {} ticks, {:.1} fps", self.tick, fps);
            trace!("Latest: {}", frame);
        }
        Ok(Some(frame))
    }

    /// Oldest frame a paused read can rely on: one window of slack inside
    /// the ring so the writer cannot lap it mid-copy.
    fn oldest_safe(&self) -> u64 {
        let ring = self.shared.ring();
        let reach = ring.capacity().saturating_sub(self.config.frames_per_window());
        ring.write_index().saturating_sub(reach as u64)
    }

    fn check_backend(&self) -> ScopeResult<()> {
        match self.shared.lost_reason() {
            Some(reason) => Err(ScopeError::BackendLost(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Max-with-decay of the time since the last delivered block.
    fn update_latency(&mut self) {
        let last = self.shared.last_delivery_us();
        if last == 0 {
            return;
        }
        let now = self.shared.clock().now_us();
        let elapsed = now.saturating_sub(last) as f64 / 1_000_000.0;
        if elapsed > self.latency {
            self.latency = elapsed;
        } else {
            smooth(&mut self.latency, elapsed, LATENCY_SMOOTHING);
        }
        self.latency = self.latency.max(0.0);
    }

    pub fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePause => {
                let mode = self.cursor.toggle_pause(self.shared.ring().write_index());
                if mode == CursorMode::Live {
                    self.latency = 0.0;
                }
                info!("{}", if mode == CursorMode::Paused { "Paused" } else { "Live" });
            }
            Command::Rewind(n) => {
                self.cursor.track_oldest(self.oldest_safe());
                self.cursor.rewind(n);
            }
            Command::FastForward(n) => {
                self.cursor.fast_forward(n);
            }
            Command::ZoomIn => {
                self.view.zoom_in();
            }
            Command::ZoomOut => {
                self.view.zoom_out();
            }
            Command::SetZoom(f) => {
                self.view.set_zoom(f);
            }
            Command::Scale(f) => {
                self.view.scale(f);
            }
            Command::Pan { axis, fraction } => {
                self.view.pan(axis, fraction);
            }
            Command::ToggleAutoScale => {
                self.view.toggle_auto_scale();
            }
            Command::Recenter => {
                self.view.recenter();
            }
            Command::NextColorMode => {
                let mode = self.color.next_color_mode();
                info!("Color mode: {}", mode);
            }
            Command::PrevColorMode => {
                let mode = self.color.prev_color_mode();
                info!("Color mode: {}", mode);
            }
            Command::NextDisplayMode => {
                let mode = self.color.next_display_mode();
                info!("Display mode: {}", mode);
            }
            Command::PrevDisplayMode => {
                let mode = self.color.prev_display_mode();
                info!("Display mode: {}", mode);
            }
            Command::SetLineWidth(w) => {
                if (1..=MAX_LINE_WIDTH).contains(&w) {
                    self.line_width = w;
                }
            }
            Command::AdjustLineWidth(d) => {
                let w = self.line_width as i64 + d as i64;
                self.line_width = if w < 1 {
                    MAX_LINE_WIDTH
                } else if w > MAX_LINE_WIDTH as i64 {
                    1
                } else {
                    w as u32
                };
            }
            Command::AdjustColorRange(d) => {
                let range = self.color.adjust_color_range(d);
                debug!("Color range: {:.2}", range);
            }
            Command::AdjustColorRate(d) => {
                let rate = self.color.adjust_color_rate(d);
                debug!("Color rate: {:.2}", rate);
            }
            Command::Resize { width, height } => self.view.resize(width, height),
            Command::ToggleFullScreen => self.full_screen = !self.full_screen,
            Command::NextStatsGroup => self.stats_group = (self.stats_group + 1) % STATS_GROUPS,
            Command::PrevStatsGroup => {
                self.stats_group = (self.stats_group + STATS_GROUPS - 1) % STATS_GROUPS
            }
            Command::Quit => {}
        }
    }
}
