//! Fixed-capacity stereo ring shared by one producer (the audio callback) and
//! one consumer (the render tick).
//!
//! Frames are packed into `AtomicU64` slots so a stereo pair is always
//! written and read whole. The write index is only advanced by the producer
//! and the read index only by the consumer; both are monotonically counted
//! frame positions, reduced modulo the power-of-two slot count on access.
//! Writes never block and never fail: a slow or paused consumer simply sees
//! the oldest history overwritten.
//!
//! The only lock is the one inside [`ReadySignal`], and the producer only
//! ever `try_lock`s it.

use crate::types::{Frame, ScopeError, ScopeResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, TryLockError};
use std::time::{Duration, Instant};

pub struct SampleRing {
    slots: Box<[AtomicU64]>,
    mask: u64,
    /// Rewindable history, excluding the slack for one draw window
    history: usize,
    write_idx: AtomicU64,
    read_idx: AtomicU64,
    ready: ReadySignal,
}

impl SampleRing {
    /// Allocate a ring holding `history_frames` of rewindable history plus one
    /// draw window, rounded up to a power of two. Never resized afterwards.
    pub fn new(history_frames: usize, draw_frames: usize) -> ScopeResult<Self> {
        let wanted = history_frames
            .checked_add(draw_frames)
            .filter(|&n| n > 0)
            .ok_or(ScopeError::RingAllocation(history_frames))?;
        let capacity = wanted
            .checked_next_power_of_two()
            .ok_or(ScopeError::RingAllocation(wanted))?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| ScopeError::RingAllocation(capacity))?;
        // Touch every slot now so the realtime writer never page-faults.
        slots.extend((0..capacity).map(|_| AtomicU64::new(Frame::SILENT.to_bits())));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
            history: history_frames,
            write_idx: AtomicU64::new(0),
            read_idx: AtomicU64::new(0),
            ready: ReadySignal::new(),
        })
    }

    /// Physical slot count (power of two).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How far back a paused reader may scrub.
    pub fn history_frames(&self) -> usize {
        self.history
    }

    /// Total frames ever written.
    pub fn write_index(&self) -> u64 {
        self.write_idx.load(Ordering::Acquire)
    }

    pub fn read_index(&self) -> u64 {
        self.read_idx.load(Ordering::Relaxed)
    }

    // ─── Producer side ──────────────────────────────────────────────────

    /// Append one frame. Producer thread only.
    #[inline]
    pub fn write(&self, frame: Frame) {
        let w = self.write_idx.load(Ordering::Relaxed);
        self.slots[(w & self.mask) as usize].store(frame.to_bits(), Ordering::Relaxed);
        self.write_idx.store(w + 1, Ordering::Release);
    }

    /// Interleave two channel buffers into frames. Publishes the new write
    /// index once, after the whole block. Extra samples in the longer buffer
    /// are ignored.
    pub fn write_block(&self, left: &[f32], right: &[f32]) -> usize {
        let n = left.len().min(right.len());
        let mut w = self.write_idx.load(Ordering::Relaxed);
        for (&l, &r) in left.iter().zip(right.iter()) {
            self.slots[(w & self.mask) as usize].store(Frame::new(l, r).to_bits(), Ordering::Relaxed);
            w += 1;
        }
        self.write_idx.store(w, Ordering::Release);
        n
    }

    /// Same as [`write_block`](Self::write_block) for an interleaved buffer.
    /// Channel 0 is left, channel 1 right; a mono stream feeds both.
    pub fn write_interleaved(&self, data: &[f32], channels: usize) -> usize {
        if channels == 0 {
            return 0;
        }
        let mut w = self.write_idx.load(Ordering::Relaxed);
        let mut n = 0;
        for chunk in data.chunks_exact(channels) {
            let l = chunk[0];
            let r = if channels > 1 { chunk[1] } else { chunk[0] };
            self.slots[(w & self.mask) as usize].store(Frame::new(l, r).to_bits(), Ordering::Relaxed);
            w += 1;
            n += 1;
        }
        self.write_idx.store(w, Ordering::Release);
        n
    }

    /// Wake the consumer. Never blocks.
    #[inline]
    pub fn signal_ready(&self) {
        self.ready.signal();
    }

    // ─── Consumer side ──────────────────────────────────────────────────

    /// Unread frames still present in the ring.
    pub fn available_to_read(&self) -> usize {
        let w = self.write_index();
        let r = self.read_idx.load(Ordering::Relaxed);
        (w.saturating_sub(r)).min(self.slots.len() as u64) as usize
    }

    /// Move the read cursor without copying. Clamped so it never passes the
    /// writer and never points at already-overwritten slots.
    pub fn advance_read(&self, delta: i64) {
        let w = self.write_index();
        let oldest = w.saturating_sub(self.slots.len() as u64);
        let r = self.read_idx.load(Ordering::Relaxed) as i128 + delta as i128;
        let r = r.clamp(oldest as i128, w as i128) as u64;
        self.read_idx.store(r, Ordering::Relaxed);
    }

    /// Copy up to `out.len()` unread frames and consume them. Returns the
    /// number copied; short only when fewer frames are available.
    pub fn read(&self, out: &mut [Frame]) -> usize {
        let w = self.write_index();
        let oldest = w.saturating_sub(self.slots.len() as u64);
        let r = self.read_idx.load(Ordering::Relaxed).max(oldest);
        let n = ((w - r) as usize).min(out.len());
        self.copy_out(r, &mut out[..n]);
        self.read_idx.store(r + n as u64, Ordering::Relaxed);
        n
    }

    /// Copy frames starting at absolute position `start` without touching
    /// the read cursor. Frames not yet written, or already overwritten, are
    /// skipped, so the result may be short; the copied frames are always
    /// contiguous and in write order.
    pub fn read_at(&self, start: u64, out: &mut [Frame]) -> usize {
        let w = self.write_index();
        let oldest = w.saturating_sub(self.slots.len() as u64);
        let from = start.max(oldest);
        let to = (start + out.len() as u64).min(w);
        if to <= from {
            return 0;
        }
        let n = (to - from) as usize;
        self.copy_out(from, &mut out[..n]);
        // The writer may have lapped us mid-copy; drop whatever it reached.
        let lapped = self.write_index().saturating_sub(self.slots.len() as u64);
        if lapped > from {
            let lost = ((lapped - from) as usize).min(n);
            out.copy_within(lost..n, 0);
            return n - lost;
        }
        n
    }

    fn copy_out(&self, from: u64, out: &mut [Frame]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let pos = (from + i as u64) & self.mask;
            *slot = Frame::from_bits(self.slots[pos as usize].load(Ordering::Relaxed));
        }
    }

    /// Block until the producer signals, the timeout passes, or the wait is
    /// cancelled. Returns `Ok(true)` on a signal, `Ok(false)` on timeout.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> ScopeResult<bool> {
        self.ready.wait(timeout)
    }

    /// Abort any current and future `wait_ready` immediately.
    pub fn cancel_wait(&self) {
        self.ready.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ready.is_cancelled()
    }
}

// ─── Ready signal ───────────────────────────────────────────────────────────

#[derive(Default)]
struct ReadyState {
    pending: bool,
    cancelled: bool,
}

/// Single-producer/single-consumer wakeup. The producer's `signal` only
/// `try_lock`s; a signal raised while no one is waiting is latched.
pub struct ReadySignal {
    state: Mutex<ReadyState>,
    cond: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadyState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut state = match self.state.try_lock() {
            Ok(s) => s,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            // Consumer is between checks; it will see the next block.
            Err(TryLockError::WouldBlock) => return,
        };
        state.pending = true;
        self.cond.notify_one();
    }

    pub fn wait(&self, timeout: Option<Duration>) -> ScopeResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if state.cancelled {
                return Err(ScopeError::Cancelled);
            }
            if state.pending {
                state.pending = false;
                return Ok(true);
            }
            match deadline {
                None => {
                    state = self.cond.wait(state).unwrap_or_else(|p| p.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    state = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .map(|(s, _)| s)
                        .unwrap_or_else(|p| p.into_inner().0);
                }
            }
        }
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.cancelled = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().map(|s| s.cancelled).unwrap_or(true)
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}
