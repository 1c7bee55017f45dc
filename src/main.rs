use xy_scope::backends::{SyntheticBackend, WavBackend};
use xy_scope::capture::{AudioBackend, CaptureSession};
use xy_scope::config::ScopeConfig;
use xy_scope::console_display::ConsoleDisplay;
use xy_scope::keymap::Keymap;
use xy_scope::prefs::Preferences;
use xy_scope::producer::{Command, FrameProducer};
use xy_scope::types::*;

use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, error, info, warn};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Built-in Lissajous generator
    Synthetic,
    /// Stream a WAV file (requires --wav)
    Wav,
    /// Default audio input device (requires the 'audio' feature)
    Cpal,
}

#[derive(Parser)]
#[command(name = "xy-scope")]
#[command(about = "Real-time stereo XY oscilloscope")]
struct Cli {
    /// Audio source
    #[arg(long, value_enum, default_value_t = Source::Synthetic)]
    source: Source,

    /// WAV file for --source wav
    #[arg(long)]
    wav: Option<PathBuf>,

    /// JSON config file (missing file = defaults)
    #[arg(long, default_value = "xy-scope.json")]
    config: PathBuf,

    /// Preferences record, read at start and written at exit
    #[arg(long, default_value = ".xy-scope.prefs")]
    prefs: PathBuf,

    /// Override sample rate (Hz)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Override display ticks per second
    #[arg(long)]
    frame_rate: Option<u32>,

    /// Override how many ticks each sample stays on screen
    #[arg(long)]
    draw_each_frame: Option<u32>,

    /// Override rewindable history (seconds)
    #[arg(long)]
    buffer_seconds: Option<f64>,

    /// Override the metric feeding the Delta color mode
    #[arg(long, value_enum)]
    delta_metric: Option<DeltaMetric>,

    /// Draw the scope in the terminal
    #[arg(long)]
    console: bool,

    /// Console redraw rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Console plot width (characters)
    #[arg(long, default_value_t = 80)]
    cols: usize,

    /// Console plot height (lines)
    #[arg(long, default_value_t = 32)]
    rows: usize,

    /// Do not read key commands from stdin. Input is line-buffered: type
    /// one or more keys and press Enter (e.g. "dd" then Enter)
    #[arg(long)]
    no_input: bool,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut ScopeConfig) {
        if let Some(v) = self.sample_rate {
            cfg.sample_rate = v;
        }
        if let Some(v) = self.frame_rate {
            cfg.frame_rate = v;
        }
        if let Some(v) = self.draw_each_frame {
            cfg.draw_each_frame = v;
        }
        if let Some(v) = self.buffer_seconds {
            cfg.buffer_seconds = v;
        }
        if let Some(v) = self.delta_metric {
            cfg.delta_metric = v;
        }
    }
}

fn fatal(err: ScopeError) -> ! {
    error!("{}", err);
    process::exit(1);
}

fn make_backend(cli: &Cli, config: &ScopeConfig) -> ScopeResult<Box<dyn AudioBackend>> {
    match cli.source {
        Source::Synthetic => Ok(Box::new(SyntheticBackend::new(config.sample_rate))),
        Source::Wav => {
            let path = cli
                .wav
                .clone()
                .ok_or_else(|| ScopeError::Config("--source wav needs --wav <file>".into()))?;
            Ok(Box::new(WavBackend::new(path, config.sample_rate)))
        }
        Source::Cpal => {
            #[cfg(feature = "audio")]
            {
                Ok(Box::new(xy_scope::backends::CpalBackend::new(config.sample_rate)))
            }
            #[cfg(not(feature = "audio"))]
            {
                error!("Live input requires the 'audio' feature. Falling back to the synthetic source.");
                Ok(Box::new(SyntheticBackend::new(config.sample_rate)))
            }
        }
    }
}

/// Read key presses from stdin (one command per character) until Quit or EOF.
/// The terminal stays in line mode, so keys arrive when Enter is pressed.
fn dispatch_keys(keymap: Keymap, tx: Sender<Command>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { return };
        for key in line.chars() {
            let Some(cmd) = keymap.command_for_key(key) else {
                debug!("Unbound key {:?}", key);
                continue;
            };
            if tx.send(cmd).is_err() || cmd == Command::Quit {
                return;
            }
        }
    }
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();

    let mut config = ScopeConfig::load(&cli.config).unwrap_or_else(|e| fatal(e));
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        fatal(e);
    }
    let prefs = Preferences::load(&cli.prefs);

    info!("═══════════════════════════════════════════════");
    info!("  XY SCOPE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Source: {:?}", cli.source);
    info!(
        "  {} Hz, {} fps × {} → {} frames/window, {:.1}s history",
        config.sample_rate,
        config.frame_rate,
        config.draw_each_frame,
        config.frames_per_window(),
        config.buffer_seconds
    );
    info!("  Delta metric: {:?}", config.delta_metric);
    if cli.console { info!("  UI: Console ({}×{})", cli.cols, cli.rows); }
    if !cli.no_input {
        info!("  Keys: type command keys on stdin, then press Enter");
    }
    info!("═══════════════════════════════════════════════");

    // ─── Capture ────────────────────────────────────────────────────
    let backend = make_backend(&cli, &config).unwrap_or_else(|e| fatal(e));
    let mut session = CaptureSession::start(backend, &config).unwrap_or_else(|e| fatal(e));

    let (cmd_tx, cmd_rx) = unbounded::<Command>();
    let mut frame_txs: Vec<Sender<ScopeFrame>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<ScopeFrame>(4);
        frame_txs.push(tx);
        let (hz, cols, rows) = (cli.display_hz, cli.cols, cli.rows);
        let spawned = thread::Builder::new()
            .name("display".into())
            .spawn(move || ConsoleDisplay::new(rx, hz, cols, rows).run());
        match spawned {
            Ok(h) => handles.push(h),
            Err(e) => warn!("Console display unavailable: {}", e),
        }
    }

    // ─── Key input ──────────────────────────────────────────────────
    if !cli.no_input {
        let keymap = Keymap::new(&config);
        let tx = cmd_tx.clone();
        // Detached: a blocked stdin read must not hold up shutdown.
        if let Err(e) = thread::Builder::new()
            .name("keys".into())
            .spawn(move || dispatch_keys(keymap, tx))
        {
            warn!("Key input unavailable: {}", e);
        }
    }

    // ─── Frame producer ─────────────────────────────────────────────
    let mut producer = FrameProducer::new(config, session.shared(), cmd_rx, frame_txs, &prefs);
    let producer_handle = thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            let result = producer.run();
            (producer.preferences(), result)
        })
        .unwrap_or_else(|e| fatal(ScopeError::Io(e)));

    let (final_prefs, result) = match producer_handle.join() {
        Ok(r) => r,
        Err(_) => fatal(ScopeError::Backend("producer thread panicked".into())),
    };
    drop(cmd_tx);
    session.stop();
    for h in handles {
        let _ = h.join();
    }

    match result {
        Ok(()) | Err(ScopeError::Cancelled) => {
            if let Err(e) = final_prefs.save(&cli.prefs) {
                warn!("Could not save preferences: {}", e);
            }
            info!("Bye.");
        }
        Err(e) => fatal(e),
    }
}
