//! End-to-end integration tests for the XY scope pipeline.
//!
//! These tests exercise the full data flow:
//!   Backend → CaptureSession → SampleRing → FrameProducer → ScopeFrame → assertions
//!
//! Most use a scripted backend whose blocks and port registrations are
//! driven by the test itself, so every window is deterministic.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use xy_scope::backends::{SyntheticBackend, WavBackend};
use xy_scope::capture::{AudioBackend, CaptureSession, DeliveryHandle, PortEvents};
use xy_scope::config::ScopeConfig;
use xy_scope::dsp::hsv_to_rgb;
use xy_scope::prefs::Preferences;
use xy_scope::producer::{Command, FrameProducer};
use xy_scope::types::*;

// ─── Helpers ───────────────────────────────────────────────────────────────

/// Backend driven from the test: ports and deliveries are pushed by hand.
struct ScriptedBackend {
    ports: Arc<Mutex<Vec<String>>>,
    delivery: Arc<Mutex<Option<DeliveryHandle>>>,
    events: Arc<Mutex<Option<PortEvents>>>,
    connected: [bool; 2],
}

/// Test-side handles onto a running ScriptedBackend.
#[derive(Clone)]
struct Script {
    ports: Arc<Mutex<Vec<String>>>,
    delivery: Arc<Mutex<Option<DeliveryHandle>>>,
    events: Arc<Mutex<Option<PortEvents>>>,
}

impl Script {
    fn deliver(&self, frames: &[Frame]) {
        let left: Vec<f32> = frames.iter().map(|f| f.left).collect();
        let right: Vec<f32> = frames.iter().map(|f| f.right).collect();
        let guard = self.delivery.lock().unwrap();
        let handle = guard.as_ref().expect("backend not active");
        for (l, r) in left.chunks(512).zip(right.chunks(512)) {
            handle.deliver(l, r);
        }
    }

    fn add_port(&self, name: &str) {
        self.ports.lock().unwrap().push(name.to_string());
        self.events.lock().unwrap().as_ref().unwrap().port_registered(name);
    }

    fn shut_down(&self, reason: &str) {
        self.delivery.lock().unwrap().as_ref().unwrap().backend_lost(reason);
    }
}

fn scripted(ports: &[&str]) -> (ScriptedBackend, Script) {
    let backend = ScriptedBackend {
        ports: Arc::new(Mutex::new(ports.iter().map(|s| s.to_string()).collect())),
        delivery: Arc::new(Mutex::new(None)),
        events: Arc::new(Mutex::new(None)),
        connected: [false; 2],
    };
    let script = Script {
        ports: Arc::clone(&backend.ports),
        delivery: Arc::clone(&backend.delivery),
        events: Arc::clone(&backend.events),
    };
    (backend, script)
}

impl AudioBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn activate(&mut self, delivery: DeliveryHandle, ports: PortEvents) -> ScopeResult<()> {
        *self.delivery.lock().unwrap() = Some(delivery);
        *self.events.lock().unwrap() = Some(ports);
        Ok(())
    }

    fn output_ports(&self) -> Vec<String> {
        self.ports.lock().unwrap().clone()
    }

    fn connect(&mut self, port: &str, input: Channel) -> ScopeResult<()> {
        if !self.ports.lock().unwrap().iter().any(|p| p == port) {
            return Err(ScopeError::Connect { port: port.into(), reason: "gone".into() });
        }
        self.connected[input.index()] = true;
        Ok(())
    }

    fn is_connected(&self, input: Channel) -> bool {
        self.connected[input.index()]
    }

    fn deactivate(&mut self) {
        *self.delivery.lock().unwrap() = None;
    }
}

/// Backend that cannot start.
struct DeadBackend;

impl AudioBackend for DeadBackend {
    fn name(&self) -> &str {
        "dead"
    }
    fn activate(&mut self, _: DeliveryHandle, _: PortEvents) -> ScopeResult<()> {
        Err(ScopeError::Backend("server not running".into()))
    }
    fn output_ports(&self) -> Vec<String> {
        Vec::new()
    }
    fn connect(&mut self, port: &str, _: Channel) -> ScopeResult<()> {
        Err(ScopeError::Connect { port: port.into(), reason: "dead".into() })
    }
    fn is_connected(&self, _: Channel) -> bool {
        false
    }
    fn deactivate(&mut self) {}
}

struct Pipeline {
    session: CaptureSession,
    script: Script,
    producer: FrameProducer,
    cmd_tx: Sender<Command>,
}

fn pipeline(config: ScopeConfig) -> Pipeline {
    let (backend, script) = scripted(&["script:output_FL", "script:output_FR"]);
    let session = CaptureSession::start(Box::new(backend), &config).unwrap();
    let (cmd_tx, cmd_rx) = unbounded();
    let producer = FrameProducer::new(config, session.shared(), cmd_rx, Vec::new(), &Preferences::default());
    Pipeline { session, script, producer, cmd_tx }
}

/// `n` frames with left = absolute index (starting at `start`), right = -left.
fn ramp(start: usize, n: usize) -> Vec<Frame> {
    (start..start + n).map(|i| Frame::new(i as f32, -(i as f32))).collect()
}

fn constant(amp: f32, n: usize) -> Vec<Frame> {
    vec![Frame::new(amp, -amp); n]
}

fn rgb(h: f64) -> (f32, f32, f32) {
    let (r, g, b) = hsv_to_rgb(h, 1.0, 1.0);
    (r as f32, g as f32, b as f32)
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn test_pipeline_silent_window_draws_red_origin() {
    let mut p = pipeline(ScopeConfig::default());
    assert!(p.session.is_connected(Channel::Left));
    assert!(p.session.is_connected(Channel::Right));

    p.script.deliver(&vec![Frame::SILENT; 1470]);
    let f = p.producer.tick().unwrap().unwrap();
    assert_eq!(f.vertices.len(), 1470);
    for v in &f.vertices {
        assert_eq!((v.x, v.y), (0.0, 0.0));
        assert_eq!((v.r, v.g, v.b), (1.0, 0.0, 0.0), "hue 0 should be pure red");
    }
    assert!((p.producer.color().hue() - 359.0).abs() < 1e-9, "hue decays by color_rate");

    // next window carries the decayed hue
    p.script.deliver(&vec![Frame::SILENT; 1470]);
    let g = p.producer.tick().unwrap().unwrap();
    let (r, gg, b) = rgb(359.0);
    assert_eq!((g.vertices[0].r, g.vertices[0].g, g.vertices[0].b), (r, gg, b));
}

#[test]
fn test_pipeline_live_windows_end_at_newest_frame() {
    let mut p = pipeline(ScopeConfig::default());
    let mut written = 0;
    for block in [1470usize, 1400, 1600, 1470, 1024] {
        p.script.deliver(&ramp(written, block));
        written += block;
        let f = p.producer.tick().unwrap().unwrap();
        let xs: Vec<f32> = f.vertices.iter().map(|v| v.x).collect();
        assert_eq!(xs.len(), 1471.min(written));
        assert_eq!(*xs.last().unwrap(), (written - 1) as f32, "window ends at newest frame");
        for w in xs.windows(2) {
            assert_eq!(w[1], w[0] + 1.0, "frames stay in write order");
        }
    }
}

#[test]
fn test_pipeline_pause_rewind_fast_forward() {
    let mut p = pipeline(ScopeConfig::default());
    p.script.deliver(&ramp(0, 30_000));
    p.producer.tick().unwrap();

    p.cmd_tx.send(Command::TogglePause).unwrap();
    let at_pause = p.producer.tick().unwrap().unwrap();
    assert_eq!(at_pause.hud.paused_counter_seconds, Some(0.0));
    let end = at_pause.vertices.last().unwrap().x;
    assert_eq!(end, 29_999.0);

    // the producer keeps writing underneath a paused view
    p.script.deliver(&ramp(30_000, 5_000));
    let still = p.producer.tick().unwrap().unwrap();
    assert_eq!(still.vertices.last().unwrap().x, end);

    p.cmd_tx.send(Command::Rewind(3)).unwrap();
    let back = p.producer.tick().unwrap().unwrap();
    assert_eq!(back.vertices.last().unwrap().x, end - 3.0 * 1470.0);

    p.cmd_tx.send(Command::FastForward(3)).unwrap();
    let fwd = p.producer.tick().unwrap().unwrap();
    assert_eq!(fwd.vertices.last().unwrap().x, end);

    // cannot move past the pause point
    p.cmd_tx.send(Command::FastForward(1)).unwrap();
    let stuck = p.producer.tick().unwrap().unwrap();
    assert_eq!(stuck.vertices.last().unwrap().x, end);

    // resume jumps to the newest window
    p.cmd_tx.send(Command::TogglePause).unwrap();
    let live = p.producer.tick().unwrap().unwrap();
    assert_eq!(live.hud.paused_counter_seconds, None);
    assert_eq!(live.vertices.last().unwrap().x, 34_999.0);
}

#[test]
fn test_pipeline_rewind_stops_at_history_start() {
    let mut p = pipeline(ScopeConfig::default());
    p.script.deliver(&ramp(0, 60_000));
    p.cmd_tx.send(Command::TogglePause).unwrap();
    p.producer.tick().unwrap();

    let mut accepted = 0;
    let mut prev = p.producer.cursor().offset();
    for _ in 0..40 {
        p.producer.apply(Command::Rewind(1));
        if p.producer.cursor().offset() != prev {
            accepted += 1;
        }
        prev = p.producer.cursor().offset();
    }
    assert_eq!(accepted, 30, "one second of history is 30 windows back");
    let oldest = p.producer.tick().unwrap().unwrap();
    assert_eq!(oldest.vertices.len(), 1471);
    let counter = oldest.hud.paused_counter_seconds.unwrap();
    assert!((counter + 1.0).abs() < 1e-9, "counter={}", counter);
}

#[test]
fn test_pipeline_auto_scale_snaps_up_and_decays() {
    let mut p = pipeline(ScopeConfig::default());
    p.producer.apply(Command::ToggleAutoScale);
    assert!(p.producer.view().auto_scale());

    p.script.deliver(&constant(1.0, 1471));
    let f = p.producer.tick().unwrap().unwrap();
    assert_eq!(p.producer.view().max_sample_value(), 1.0);
    assert_eq!(f.bounds.top, 1.0);
    assert_eq!(f.bounds.top, -f.bounds.bottom);

    // the next window still opens with the last loud frame
    p.script.deliver(&constant(0.1, 1470));
    p.producer.tick().unwrap();
    assert_eq!(p.producer.view().max_sample_value(), 1.0);

    let mut prev = 1.0;
    for _ in 0..20 {
        p.script.deliver(&constant(0.1, 1470));
        p.producer.tick().unwrap();
        let m = p.producer.view().max_sample_value();
        assert!(m < prev, "decays every tick");
        assert!(prev - m < 0.1, "never in one step");
        prev = m;
    }
    assert!(prev > 0.1);

    p.script.deliver(&constant(0.9, 1470));
    p.producer.tick().unwrap();
    assert!(p.producer.view().max_sample_value() >= 0.9);
}

#[test]
fn test_pipeline_manual_zoom_smooths_bounds() {
    let mut p = pipeline(ScopeConfig::default());
    p.cmd_tx.send(Command::SetZoom(2.0)).unwrap();
    p.script.deliver(&constant(0.1, 1471));
    let f = p.producer.tick().unwrap().unwrap();
    assert!((f.bounds.top - 0.95).abs() < 1e-12, "10% of the way to 0.5");

    // recentering targets what is shown, so the zoom stops where it is
    p.producer.apply(Command::Recenter);
    for _ in 0..50 {
        p.producer.tick().unwrap();
    }
    assert!((p.producer.view().bounds().top - 0.95).abs() < 1e-9);
}

#[test]
fn test_pipeline_delta_color_mode_drifts_with_loudness() {
    let config = ScopeConfig { delta_metric: DeltaMetric::Radius, ..ScopeConfig::default() };
    let mut p = pipeline(config);
    p.producer.apply(Command::NextColorMode);
    p.producer.apply(Command::AdjustColorRate(9.0)); // rate 10

    p.script.deliver(&constant(0.25, 1471));
    p.producer.tick().unwrap();
    let h1 = p.producer.color().hue();
    assert_eq!(h1, 0.0, "first window has nothing to compare with");

    p.script.deliver(&constant(0.5, 1470));
    p.producer.tick().unwrap();
    // 1471 quiet frames against one quiet plus 1470 twice-as-loud ones
    let before = 1471.0 * 0.25;
    let after = 0.25 + 1470.0 * 0.5;
    let expected = 360.0 - 10.0 * (after / before - 1.0);
    let h2 = p.producer.color().hue();
    assert!((h2 - expected).abs() < 1e-6, "hue={} expected={}", h2, expected);
}

#[test]
fn test_pipeline_late_port_is_connected() {
    let config = ScopeConfig { reconnect_debounce_ms: 40, ..ScopeConfig::default() };
    let (backend, script) = scripted(&["script:output_FL"]);
    let session = CaptureSession::start(Box::new(backend), &config).unwrap();
    assert!(session.is_connected(Channel::Left));
    assert!(!session.is_connected(Channel::Right));

    script.add_port("script:output_FR");
    assert!(wait_until(Duration::from_secs(2), || session.is_connected(Channel::Right)));
}

#[test]
fn test_pipeline_start_failure_is_reported() {
    let r = CaptureSession::start(Box::new(DeadBackend), &ScopeConfig::default());
    assert!(matches!(r, Err(ScopeError::Backend(_))));
}

#[test]
fn test_pipeline_backend_shutdown_aborts_run() {
    let Pipeline { session, script, mut producer, .. } = pipeline(ScopeConfig::default());
    let runner = thread::spawn(move || producer.run());
    script.deliver(&ramp(0, 3000));
    thread::sleep(Duration::from_millis(50));
    script.shut_down("server exited");
    let result = runner.join().unwrap();
    assert!(matches!(result, Err(ScopeError::BackendLost(ref r)) if r == "server exited"));
    drop(session);
}

#[test]
fn test_pipeline_stop_cancels_blocked_producer() {
    let Pipeline { mut session, mut producer, .. } = pipeline(ScopeConfig::default());
    let runner = thread::spawn(move || producer.run());
    thread::sleep(Duration::from_millis(50));
    session.stop();
    let result = runner.join().unwrap();
    assert!(matches!(result, Err(ScopeError::Cancelled)));
}

#[test]
fn test_synthetic_source_end_to_end() {
    let config = ScopeConfig::default();
    let session = CaptureSession::start(Box::new(SyntheticBackend::new(config.sample_rate)), &config)
        .unwrap();
    let (cmd_tx, cmd_rx) = unbounded();
    let (frame_tx, frame_rx): (Sender<ScopeFrame>, Receiver<ScopeFrame>) = bounded(256);
    let mut producer =
        FrameProducer::new(config, session.shared(), cmd_rx, vec![frame_tx], &Preferences::default());
    let runner = thread::spawn(move || producer.run());

    thread::sleep(Duration::from_millis(300));
    cmd_tx.send(Command::Quit).unwrap();
    assert!(runner.join().unwrap().is_ok());

    let frames: Vec<ScopeFrame> = frame_rx.try_iter().collect();
    assert!(frames.len() >= 5, "only {} frames", frames.len());
    for w in frames.windows(2) {
        assert!(w[1].tick > w[0].tick);
    }
    let last = frames.last().unwrap();
    assert!(!last.vertices.is_empty());
    assert!(last.vertices.iter().all(|v| v.x.abs() <= 0.8 + 1e-6 && v.y.abs() <= 0.8 + 1e-6));
    assert!(last.vertices.iter().any(|v| v.x.abs() > 0.2));
}

#[test]
fn test_wav_source_ends_with_backend_lost() {
    let path = std::env::temp_dir().join(format!("xy_scope_it_{}.wav", std::process::id()));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..4410 {
        let s = (i as f64 / 44100.0 * 440.0 * std::f64::consts::TAU).sin();
        w.write_sample((s * 16000.0) as i16).unwrap();
    }
    w.finalize().unwrap();

    let config = ScopeConfig::default();
    let session =
        CaptureSession::start(Box::new(WavBackend::new(path.clone(), 44100)), &config).unwrap();
    let (_cmd_tx, cmd_rx) = unbounded();
    let mut producer =
        FrameProducer::new(config, session.shared(), cmd_rx, Vec::new(), &Preferences::default());
    let result = producer.run();
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(ScopeError::BackendLost(_))));
    assert_eq!(session.shared().ring().write_index(), 4410);
}

#[test]
fn test_preferences_carry_state_across_runs() {
    let path = std::env::temp_dir().join(format!("xy_scope_it_prefs_{}.bin", std::process::id()));
    {
        let mut p = pipeline(ScopeConfig::default());
        p.producer.apply(Command::NextDisplayMode);
        p.producer.apply(Command::NextDisplayMode);
        p.producer.apply(Command::AdjustLineWidth(3));
        p.producer.apply(Command::SetZoom(4.0));
        for _ in 0..200 {
            p.script.deliver(&constant(0.0, 735));
            p.producer.tick().unwrap();
        }
        p.producer.preferences().save(&path).unwrap();
    }
    let prefs = Preferences::load(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(prefs.display_mode, DisplayMode::Length);
    assert_eq!(prefs.line_width, 5);
    assert!((prefs.bounds.top - 0.25).abs() < 1e-6);

    let (backend, _script) = scripted(&["s:output_FL", "s:output_FR"]);
    let config = ScopeConfig::default();
    let session = CaptureSession::start(Box::new(backend), &config).unwrap();
    let (_tx, rx) = unbounded();
    let producer = FrameProducer::new(config, session.shared(), rx, Vec::new(), &prefs);
    assert_eq!(producer.color().display_mode, DisplayMode::Length);
    assert!((producer.view().bounds().top - 0.25).abs() < 1e-6);
}

#[test]
fn test_scope_frame_json_serialization() {
    let mut p = pipeline(ScopeConfig::default());
    p.script.deliver(&constant(0.5, 1471));
    let f = p.producer.tick().unwrap().unwrap();
    let json = serde_json::to_string(&f).unwrap();
    assert!(json.contains("\"vertices\""));
    assert!(json.contains("\"latency_seconds\""));
    let back: ScopeFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back.vertices.len(), f.vertices.len());
}
