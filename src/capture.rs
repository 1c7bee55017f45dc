//! Link between an audio backend and the sample ring.
//!
//! The backend delivers blocks on its own thread through a [`DeliveryHandle`]
//! and announces new output ports through [`PortEvents`]. A watcher thread
//! coalesces bursts of port registrations and then connects whichever input
//! is still unconnected.

use crate::config::ScopeConfig;
use crate::ring::SampleRing;
use crate::types::{Channel, ScopeError, ScopeResult, SessionClock};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pending port notifications the watcher can lag behind by.
const PORT_EVENT_QUEUE: usize = 64;

// ─── Backend seam ───────────────────────────────────────────────────────────

/// An external audio source with named output ports.
///
/// Backends own their delivery thread; every call here is made from the
/// session or watcher thread and must not block on the delivery thread.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Start producing audio. The backend keeps both handles for its lifetime.
    fn activate(&mut self, delivery: DeliveryHandle, ports: PortEvents) -> ScopeResult<()>;

    /// Currently available source ports.
    fn output_ports(&self) -> Vec<String>;

    /// Route `port` into one input.
    fn connect(&mut self, port: &str, input: Channel) -> ScopeResult<()>;

    fn is_connected(&self, input: Channel) -> bool;

    /// Stop delivery and release the device. Idempotent.
    fn deactivate(&mut self);
}

// ─── State shared by both threads ───────────────────────────────────────────

pub struct CaptureShared {
    ring: SampleRing,
    clock: SessionClock,
    /// Session time of the most recent delivery, µs
    last_delivery_us: AtomicU64,
    lost: OnceLock<String>,
}

impl CaptureShared {
    pub fn new(ring: SampleRing, clock: SessionClock) -> Self {
        Self {
            ring,
            clock,
            last_delivery_us: AtomicU64::new(0),
            lost: OnceLock::new(),
        }
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn last_delivery_us(&self) -> u64 {
        self.last_delivery_us.load(Ordering::Acquire)
    }

    /// Why the backend went away, if it did.
    pub fn lost_reason(&self) -> Option<&str> {
        self.lost.get().map(String::as_str)
    }
}

/// Producer-side entry point handed to a backend.
#[derive(Clone)]
pub struct DeliveryHandle {
    shared: Arc<CaptureShared>,
}

impl DeliveryHandle {
    pub fn new(shared: Arc<CaptureShared>) -> Self {
        Self { shared }
    }

    /// Write one block of two channel buffers, then wake the consumer.
    /// Bounded time, no allocation, no blocking lock.
    pub fn deliver(&self, left: &[f32], right: &[f32]) -> usize {
        let n = self.shared.ring.write_block(left, right);
        self.stamp();
        n
    }

    /// Interleaved variant (channel 0 left, channel 1 right).
    pub fn deliver_interleaved(&self, data: &[f32], channels: usize) -> usize {
        let n = self.shared.ring.write_interleaved(data, channels);
        self.stamp();
        n
    }

    #[inline]
    fn stamp(&self) {
        self.shared
            .last_delivery_us
            .store(self.shared.clock.now_us(), Ordering::Release);
        self.shared.ring.signal_ready();
    }

    /// The backend stopped for good. Wakes the consumer so it can abort.
    pub fn backend_lost(&self, reason: impl Into<String>) {
        let _ = self.shared.lost.set(reason.into());
        self.shared.ring.cancel_wait();
    }
}

/// Port-registration notifier handed to a backend. Only queues the name.
#[derive(Clone)]
pub struct PortEvents {
    tx: Sender<String>,
}

impl PortEvents {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }

    pub fn port_registered(&self, port: &str) {
        if self.tx.try_send(port.to_string()).is_err() {
            // Watcher is behind or gone; the next registration retries anyway.
            debug!("Dropped port notification for {}", port);
        }
    }
}

// ─── Port routing ───────────────────────────────────────────────────────────

/// Name fragments picking the source port for each input.
#[derive(Debug, Clone)]
pub struct PortRules {
    pub left: String,
    pub right: String,
}

impl PortRules {
    pub fn from_config(config: &ScopeConfig) -> Self {
        Self {
            left: config.left_port_match.clone(),
            right: config.right_port_match.clone(),
        }
    }

    pub fn pattern(&self, input: Channel) -> &str {
        match input {
            Channel::Left => &self.left,
            Channel::Right => &self.right,
        }
    }
}

type SharedBackend = Arc<Mutex<Box<dyn AudioBackend>>>;

fn lock_backend(backend: &SharedBackend) -> MutexGuard<'_, Box<dyn AudioBackend>> {
    backend.lock().unwrap_or_else(|p| p.into_inner())
}

/// Connect every unconnected input to the first port matching its rule.
/// Failures are logged and left for the next pass. Returns how many
/// connections were made.
pub fn connect_unconnected(backend: &mut dyn AudioBackend, rules: &PortRules) -> usize {
    let ports = backend.output_ports();
    let mut made = 0;
    for input in Channel::BOTH {
        if backend.is_connected(input) {
            continue;
        }
        let pattern = rules.pattern(input);
        let Some(port) = ports.iter().find(|p| p.contains(pattern)) else {
            debug!("No port matching '{}' for {}", pattern, input);
            continue;
        };
        match backend.connect(port, input) {
            Ok(()) => {
                info!("Connected {} → {}", port, input);
                made += 1;
            }
            Err(e) => warn!("{}", e),
        }
    }
    made
}

// ─── Session ────────────────────────────────────────────────────────────────

pub struct CaptureSession {
    shared: Arc<CaptureShared>,
    backend: SharedBackend,
    watcher: Option<JoinHandle<()>>,
    shutdown_tx: Option<Sender<()>>,
}

impl CaptureSession {
    /// Allocate the ring, activate the backend and make the initial
    /// connections. Any failure here is fatal to the caller.
    pub fn start(mut backend: Box<dyn AudioBackend>, config: &ScopeConfig) -> ScopeResult<Self> {
        let ring = SampleRing::new(config.history_frames(), config.draw_frames())?;
        info!(
            "Ring: {} slots ({} frames history, {} per window)",
            ring.capacity(),
            ring.history_frames(),
            config.frames_per_window()
        );
        let shared = Arc::new(CaptureShared::new(ring, SessionClock::new()));

        let (port_tx, port_rx) = bounded::<String>(PORT_EVENT_QUEUE);
        backend.activate(DeliveryHandle::new(Arc::clone(&shared)), PortEvents::new(port_tx))?;
        info!("Audio backend '{}' active", backend.name());

        let rules = PortRules::from_config(config);
        connect_unconnected(&mut *backend, &rules);

        let backend: SharedBackend = Arc::new(Mutex::new(backend));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let watcher = {
            let backend = Arc::clone(&backend);
            let debounce = config.reconnect_debounce();
            thread::Builder::new()
                .name("port-watcher".into())
                .spawn(move || watch_ports(backend, rules, port_rx, shutdown_rx, debounce))
                .map_err(|e| ScopeError::Backend(format!("cannot spawn port watcher: {}", e)))?
        };

        Ok(Self {
            shared,
            backend,
            watcher: Some(watcher),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn shared(&self) -> Arc<CaptureShared> {
        Arc::clone(&self.shared)
    }

    pub fn is_connected(&self, input: Channel) -> bool {
        lock_backend(&self.backend).is_connected(input)
    }

    /// Stop the watcher, release the backend and abort any pending ready
    /// wait. Safe to call more than once.
    pub fn stop(&mut self) {
        let Some(tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = tx.send(());
        if let Some(handle) = self.watcher.take() {
            if handle.join().is_err() {
                error!("Port watcher panicked");
            }
        }
        lock_backend(&self.backend).deactivate();
        self.shared.ring.cancel_wait();
        info!("Capture session stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Debounced edge-triggered reconnect: after a registration, wait until the
/// port list has been quiet for `debounce`, then make one connection pass.
fn watch_ports(
    backend: SharedBackend,
    rules: PortRules,
    port_rx: Receiver<String>,
    shutdown_rx: Receiver<()>,
    debounce: Duration,
) {
    loop {
        select! {
            recv(shutdown_rx) -> _ => return,
            recv(port_rx) -> msg => {
                let Ok(port) = msg else {
                    debug!("Backend dropped its port notifier");
                    return;
                };
                debug!("Port registered: {}", port);
            }
        }

        // Coalesce the burst.
        loop {
            select! {
                recv(shutdown_rx) -> _ => return,
                recv(port_rx) -> msg => match msg {
                    Ok(port) => debug!("Port registered: {}", port),
                    Err(_) => return,
                },
                default(debounce) => break,
            }
        }

        let mut guard = lock_backend(&backend);
        let made = connect_unconnected(&mut **guard, &rules);
        debug!("Reconnect pass made {} connection(s)", made);
    }
}
