//! Concrete audio sources behind [`AudioBackend`].
//!
//! Every backend exposes two output ports named `<prefix>:output_FL` and
//! `<prefix>:output_FR` and delivers silence on an input until something is
//! connected to it.

use crate::capture::{AudioBackend, DeliveryHandle, PortEvents};
use crate::types::{Channel, ScopeError, ScopeResult};
use hound::{SampleFormat, WavReader};
use log::{error, info, warn};
use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Frames per delivered block. ~23ms at 44.1kHz.
const BLOCK_FRAMES: usize = 1024;

const PORT_SUFFIXES: [&str; 2] = ["output_FL", "output_FR"];

fn port_names(prefix: &str) -> Vec<String> {
    PORT_SUFFIXES.iter().map(|s| format!("{}:{}", prefix, s)).collect()
}

// ─── Routing ────────────────────────────────────────────────────────────────

const UNROUTED: usize = usize::MAX;

/// Which source port feeds each input. Written by the control thread, read
/// lock-free by the delivery thread.
struct Routing {
    sources: [AtomicUsize; 2],
}

impl Routing {
    fn new() -> Self {
        Self {
            sources: [AtomicUsize::new(UNROUTED), AtomicUsize::new(UNROUTED)],
        }
    }

    fn connect(&self, input: Channel, source: usize) {
        self.sources[input.index()].store(source, Ordering::Release);
    }

    fn source(&self, input: Channel) -> Option<usize> {
        match self.sources[input.index()].load(Ordering::Acquire) {
            UNROUTED => None,
            s => Some(s),
        }
    }

    fn clear(&self) {
        for s in &self.sources {
            s.store(UNROUTED, Ordering::Release);
        }
    }

    /// Copy each input's source into `out`, or silence if unrouted.
    fn apply(&self, sources: [&[f32]; 2], left: &mut [f32], right: &mut [f32]) {
        for (input, out) in [(Channel::Left, left), (Channel::Right, right)] {
            match self.source(input) {
                Some(s) => out.copy_from_slice(&sources[s][..out.len()]),
                None => out.fill(0.0),
            }
        }
    }
}

/// Resolve `port` to a source index for `connect`.
fn source_index(ports: &[String], port: &str) -> ScopeResult<usize> {
    ports.iter().position(|p| p == port).ok_or_else(|| ScopeError::Connect {
        port: port.to_string(),
        reason: "no such port".into(),
    })
}

/// Sleep until block `i` is due, pacing delivery to real time.
fn pace(start: Instant, block_dur: Duration, i: u32) {
    let target = block_dur * i;
    let elapsed = start.elapsed();
    if elapsed < target {
        thread::sleep(target - elapsed);
    }
}

// ─── Synthetic ──────────────────────────────────────────────────────────────

/// Lissajous figure generator, always available.
pub struct SyntheticBackend {
    sample_rate: u32,
    /// Frequencies of the left / right oscillators (Hz)
    freqs: [f64; 2],
    amplitude: f64,
    /// Slow phase drift of the right oscillator (rad/s), rotates the figure
    drift: f64,
    ports: Vec<String>,
    routing: Arc<Routing>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            freqs: [220.0, 330.0],
            amplitude: 0.8,
            drift: 0.5,
            ports: port_names("synth"),
            routing: Arc::new(Routing::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_shape(mut self, left_hz: f64, right_hz: f64, amplitude: f64) -> Self {
        self.freqs = [left_hz, right_hz];
        self.amplitude = amplitude;
        self
    }
}

/// Fill one block of the two oscillators starting at absolute frame `n0`.
fn lissajous_block(
    freqs: [f64; 2],
    amplitude: f64,
    drift: f64,
    sample_rate: u32,
    n0: u64,
    out: [&mut [f32]; 2],
) {
    let [l, r] = out;
    let sr = sample_rate as f64;
    for (i, (a, b)) in l.iter_mut().zip(r.iter_mut()).enumerate() {
        let t = (n0 + i as u64) as f64 / sr;
        *a = (amplitude * (TAU * freqs[0] * t).sin()) as f32;
        *b = (amplitude * (TAU * freqs[1] * t + drift * t).sin()) as f32;
    }
}

impl AudioBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn activate(&mut self, delivery: DeliveryHandle, ports: PortEvents) -> ScopeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScopeError::Backend("synthetic backend already active".into()));
        }
        let (freqs, amplitude, drift, sr) = (self.freqs, self.amplitude, self.drift, self.sample_rate);
        let routing = Arc::clone(&self.routing);
        let running = Arc::clone(&self.running);
        info!(
            "Synthetic source: {:.0} Hz / {:.0} Hz @ {} Hz, amplitude {:.2}",
            freqs[0], freqs[1], sr, amplitude
        );

        let worker = thread::Builder::new()
            .name("synth-backend".into())
            .spawn(move || {
                let mut src = [vec![0.0f32; BLOCK_FRAMES], vec![0.0f32; BLOCK_FRAMES]];
                let mut left = vec![0.0f32; BLOCK_FRAMES];
                let mut right = vec![0.0f32; BLOCK_FRAMES];
                let block_dur = Duration::from_secs_f64(BLOCK_FRAMES as f64 / sr as f64);
                let start = Instant::now();
                let mut i: u32 = 0;
                while running.load(Ordering::Relaxed) {
                    pace(start, block_dur, i);
                    let [a, b] = &mut src;
                    let n0 = i as u64 * BLOCK_FRAMES as u64;
                    lissajous_block(freqs, amplitude, drift, sr, n0, [a.as_mut_slice(), b.as_mut_slice()]);
                    routing.apply([src[0].as_slice(), src[1].as_slice()], &mut left, &mut right);
                    delivery.deliver(&left, &right);
                    i = i.wrapping_add(1);
                }
            })
            .map_err(|e| ScopeError::Backend(e.to_string()))?;
        self.worker = Some(worker);

        for p in &self.ports {
            ports.port_registered(p);
        }
        Ok(())
    }

    fn output_ports(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn connect(&mut self, port: &str, input: Channel) -> ScopeResult<()> {
        let source = source_index(&self.ports, port)?;
        self.routing.connect(input, source);
        Ok(())
    }

    fn is_connected(&self, input: Channel) -> bool {
        self.routing.source(input).is_some()
    }

    fn deactivate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Synthetic backend thread panicked");
            }
        }
        self.routing.clear();
    }
}

// ─── WAV file ───────────────────────────────────────────────────────────────

/// Decoded file, split into two channels. Mono files feed both.
pub struct WavClip {
    pub sample_rate: u32,
    pub channels: [Vec<f32>; 2],
}

impl WavClip {
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }
}

/// Read and normalize a WAV file. Channels beyond the second are ignored.
pub fn read_wav(path: &Path) -> ScopeResult<WavClip> {
    let reader = WavReader::open(path)
        .map_err(|e| ScopeError::Backend(format!("cannot open WAV {:?}: {}", path, e)))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(ScopeError::Backend(format!("{:?} has no channels", path)));
    }

    info!(
        "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
        path.file_name().unwrap_or_default(),
        spec.sample_rate,
        channels,
        spec.sample_format,
        spec.bits_per_sample,
    );

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().filter_map(|s| s.ok()).collect(),
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max)
                .collect()
        }
    };

    let (left, right): (Vec<f32>, Vec<f32>) = samples
        .chunks_exact(channels)
        .map(|f| (f[0], if channels > 1 { f[1] } else { f[0] }))
        .unzip();

    Ok(WavClip {
        sample_rate: spec.sample_rate,
        channels: [left, right],
    })
}

/// Streams a WAV file at real-time pace, then reports the backend gone.
pub struct WavBackend {
    path: PathBuf,
    expected_rate: u32,
    ports: Vec<String>,
    routing: Arc<Routing>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WavBackend {
    pub fn new(path: PathBuf, expected_rate: u32) -> Self {
        Self {
            path,
            expected_rate,
            ports: port_names("wav"),
            routing: Arc::new(Routing::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl AudioBackend for WavBackend {
    fn name(&self) -> &str {
        "wav"
    }

    fn activate(&mut self, delivery: DeliveryHandle, ports: PortEvents) -> ScopeResult<()> {
        let clip = read_wav(&self.path)?;
        if clip.sample_rate != self.expected_rate {
            warn!(
                "WAV sample rate is {} Hz but the scope runs at {} Hz; playback speed will be off",
                clip.sample_rate, self.expected_rate
            );
        }
        info!(
            "WAV: {:.2}s, {} frames → streaming at real-time pace",
            clip.frames() as f64 / clip.sample_rate as f64,
            clip.frames()
        );

        self.running.store(true, Ordering::SeqCst);
        let routing = Arc::clone(&self.routing);
        let running = Arc::clone(&self.running);
        let name = self.path.display().to_string();
        let worker = thread::Builder::new()
            .name("wav-backend".into())
            .spawn(move || {
                let mut left = vec![0.0f32; BLOCK_FRAMES];
                let mut right = vec![0.0f32; BLOCK_FRAMES];
                let block_dur =
                    Duration::from_secs_f64(BLOCK_FRAMES as f64 / clip.sample_rate.max(1) as f64);
                let start = Instant::now();
                let [a, b] = &clip.channels;
                for (i, (ca, cb)) in a.chunks(BLOCK_FRAMES).zip(b.chunks(BLOCK_FRAMES)).enumerate() {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    pace(start, block_dur, i as u32);
                    let n = ca.len();
                    routing.apply([ca, cb], &mut left[..n], &mut right[..n]);
                    delivery.deliver(&left[..n], &right[..n]);
                }
                info!("WAV playback complete.");
                delivery.backend_lost(format!("end of {}", name));
            })
            .map_err(|e| ScopeError::Backend(e.to_string()))?;
        self.worker = Some(worker);

        for p in &self.ports {
            ports.port_registered(p);
        }
        Ok(())
    }

    fn output_ports(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn connect(&mut self, port: &str, input: Channel) -> ScopeResult<()> {
        let source = source_index(&self.ports, port)?;
        self.routing.connect(input, source);
        Ok(())
    }

    fn is_connected(&self, input: Channel) -> bool {
        self.routing.source(input).is_some()
    }

    fn deactivate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("WAV backend thread panicked");
            }
        }
        self.routing.clear();
    }
}

// ─── Live input (cpal) ──────────────────────────────────────────────────────

/// Convert an interleaved i16 period through the fixed `scratch` buffer, one
/// whole-frame chunk at a time, so the realtime callback never allocates.
#[cfg(any(feature = "audio", test))]
fn deliver_i16_interleaved(
    delivery: &DeliveryHandle,
    data: &[i16],
    scratch: &mut [f32],
    channels: usize,
) -> usize {
    const SCALE: f32 = i16::MAX as f32;
    let channels = channels.max(1);
    let chunk = scratch.len() / channels * channels;
    if chunk == 0 {
        return 0;
    }
    let mut frames = 0;
    for block in data.chunks(chunk) {
        let out = &mut scratch[..block.len()];
        for (o, &s) in out.iter_mut().zip(block) {
            *o = s as f32 / SCALE;
        }
        frames += delivery.deliver_interleaved(out, channels);
    }
    frames
}

#[cfg(feature = "audio")]
pub use live::CpalBackend;

#[cfg(feature = "audio")]
mod live {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use crossbeam_channel::{bounded, Sender};

    /// Default input device. The stream starts once both inputs are routed;
    /// it lives on its own thread because cpal streams are not `Send`.
    pub struct CpalBackend {
        sample_rate: u32,
        device_name: String,
        ports: Vec<String>,
        routed: [bool; 2],
        delivery: Option<DeliveryHandle>,
        stop_tx: Option<Sender<()>>,
        worker: Option<JoinHandle<()>>,
    }

    impl CpalBackend {
        pub fn new(sample_rate: u32) -> Self {
            Self {
                sample_rate,
                device_name: String::new(),
                ports: Vec::new(),
                routed: [false; 2],
                delivery: None,
                stop_tx: None,
                worker: None,
            }
        }

        fn start_stream(&mut self) -> ScopeResult<()> {
            let Some(delivery) = self.delivery.clone() else {
                return Err(ScopeError::Backend("cpal backend not active".into()));
            };
            let preferred = cpal::SampleRate(self.sample_rate);
            let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
            let (stop_tx, stop_rx) = bounded::<()>(1);

            let worker = thread::Builder::new()
                .name("cpal-input".into())
                .spawn(move || {
                    let stream = match build_stream(preferred, delivery) {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream until told to stop.
                    let _ = stop_rx.recv();
                    drop(stream);
                })
                .map_err(|e| ScopeError::Backend(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    self.stop_tx = Some(stop_tx);
                    self.worker = Some(worker);
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = worker.join();
                    Err(ScopeError::Backend(e))
                }
                Err(_) => Err(ScopeError::Backend("input thread exited early".into())),
            }
        }
    }

    fn build_stream(preferred: cpal::SampleRate, delivery: DeliveryHandle) -> Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| "No default audio input device found".to_string())?;
        let supported = device
            .default_input_config()
            .map_err(|e| format!("No supported input config: {e}"))?;

        let matching = device.supported_input_configs().ok().and_then(|configs| {
            configs
                .filter(|c| c.min_sample_rate() <= preferred && c.max_sample_rate() >= preferred)
                .max_by_key(|c| c.channels())
                .map(|c| c.with_sample_rate(preferred))
        });
        let chosen = match matching {
            Some(c) => c,
            None => {
                warn!(
                    "Input device cannot run at {} Hz; using {} Hz",
                    preferred.0,
                    supported.sample_rate().0
                );
                supported
            }
        };
        let format = chosen.sample_format();
        let config: StreamConfig = chosen.into();
        let channels = config.channels as usize;
        info!("Capture config: {}Hz  {} ch  {:?}", config.sample_rate.0, channels, format);

        let lost = delivery.clone();
        let err_fn = move |e: cpal::StreamError| {
            error!("Audio stream error: {e}");
            if matches!(e, cpal::StreamError::DeviceNotAvailable) {
                lost.backend_lost("input device disappeared");
            }
        };

        let stream = match format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        delivery.deliver_interleaved(data, channels);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            SampleFormat::I16 => {
                let mut scratch = vec![0.0f32; BLOCK_FRAMES * channels.max(1)];
                device
                    .build_input_stream(
                        &config,
                        move |data: &[i16], _| {
                            deliver_i16_interleaved(&delivery, data, &mut scratch, channels);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| e.to_string())?
            }
            fmt => {
                return Err(format!("Unsupported sample format {fmt:?}. Use an F32 or I16 device."))
            }
        };
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    impl AudioBackend for CpalBackend {
        fn name(&self) -> &str {
            "cpal"
        }

        fn activate(&mut self, delivery: DeliveryHandle, ports: PortEvents) -> ScopeResult<()> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| ScopeError::Backend("no default audio input device".into()))?;
            self.device_name = device.name().unwrap_or_else(|_| "input".into());
            info!("Audio input: {}", self.device_name);
            self.ports = port_names(&self.device_name);
            self.delivery = Some(delivery);
            for p in &self.ports {
                ports.port_registered(p);
            }
            Ok(())
        }

        fn output_ports(&self) -> Vec<String> {
            self.ports.clone()
        }

        fn connect(&mut self, port: &str, input: Channel) -> ScopeResult<()> {
            source_index(&self.ports, port)?;
            self.routed[input.index()] = true;
            if self.routed.iter().all(|&r| r) && self.worker.is_none() {
                if let Err(e) = self.start_stream() {
                    self.routed[input.index()] = false;
                    return Err(ScopeError::Connect {
                        port: port.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
            Ok(())
        }

        fn is_connected(&self, input: Channel) -> bool {
            self.routed[input.index()]
        }

        fn deactivate(&mut self) {
            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
            self.routed = [false; 2];
        }
    }
}
