//! Where in buffered history the consumer reads from.
//!
//! Live: always the newest window, offset ignored.
//! Paused: a fixed window `offset` frames before the write position captured
//! at pause time. Only rewind/fast-forward move it; nothing auto-advances,
//! and the producer keeps writing underneath.

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Live,
    Paused,
}

#[derive(Debug, Clone)]
pub struct ScrubCursor {
    mode: CursorMode,
    /// Frames before the anchor, in `[-history, -step]` while paused
    offset: i64,
    /// One window's worth of frames
    step: i64,
    /// Oldest reachable offset magnitude
    history: i64,
    /// Ring write position when the pause started
    anchor: u64,
    /// Oldest absolute frame still safe to read
    oldest: u64,
}

impl ScrubCursor {
    pub fn new(frames_per_window: usize, history_frames: usize) -> Self {
        Self {
            mode: CursorMode::Live,
            offset: -(frames_per_window as i64),
            step: frames_per_window as i64,
            history: history_frames as i64,
            anchor: 0,
            oldest: 0,
        }
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn is_paused(&self) -> bool {
        self.mode == CursorMode::Paused
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn anchor(&self) -> u64 {
        self.anchor
    }

    /// Flip Live ⇄ Paused. Entering Paused always starts at the most recent
    /// window relative to `write_index`.
    pub fn toggle_pause(&mut self, write_index: u64) -> CursorMode {
        self.mode = match self.mode {
            CursorMode::Live => {
                self.offset = -self.step;
                self.anchor = write_index;
                CursorMode::Paused
            }
            CursorMode::Paused => CursorMode::Live,
        };
        self.mode
    }

    /// First absolute frame a window at `offset` reads, counting the one
    /// overlap frame before it. Negative near the start of the session.
    fn first_frame(&self, offset: i64) -> i64 {
        self.anchor as i64 + offset - 1
    }

    /// Follow the writer's wraparound. Frames before `oldest` may already be
    /// overwritten: rewinds may not reach them, and a paused window that has
    /// fallen behind moves forward by whole windows, dragging the pause
    /// point along once even the newest paused window is gone.
    pub fn track_oldest(&mut self, oldest: u64) {
        self.oldest = oldest;
        if !self.is_paused() {
            return;
        }
        let behind = oldest as i64 - self.first_frame(self.offset);
        if behind <= 0 {
            return;
        }
        let moved = (behind + self.step - 1) / self.step * self.step;
        if self.offset + moved <= -self.step {
            self.offset += moved;
        } else {
            self.anchor = (self.anchor as i64 + self.offset + moved + self.step) as u64;
            self.offset = -self.step;
        }
        debug!("Paused window overrun by the writer, now at {} / {}", self.anchor, self.offset);
    }

    /// Step back `n` windows. No-op when live, or when it would pass either
    /// the rewindable history or the oldest frame still in the ring.
    /// Returns whether the cursor moved.
    pub fn rewind(&mut self, n: u32) -> bool {
        if !self.is_paused() {
            return false;
        }
        let delta = self.step * n as i64;
        let target = self.offset - delta;
        if target >= -self.history && self.first_frame(target) >= self.oldest as i64 {
            self.offset = target;
            true
        } else {
            debug!("Rewind by {} windows refused at offset {}", n, self.offset);
            false
        }
    }

    /// Step forward `n` windows. No-op when live or when it would pass the
    /// pause point. Returns whether the cursor moved.
    pub fn fast_forward(&mut self, n: u32) -> bool {
        if !self.is_paused() {
            return false;
        }
        let delta = self.step * n as i64;
        if self.offset < -delta {
            self.offset += delta;
            true
        } else {
            false
        }
    }

    /// Absolute ring position of the first frame to draw while paused.
    /// The window ends where offset `-step` would put "now".
    pub fn window_start(&self, draw_frames: usize) -> Option<u64> {
        if !self.is_paused() {
            return None;
        }
        let end = self.anchor as i64 + self.offset + self.step;
        Some((end - draw_frames as i64).max(0) as u64)
    }

    /// Seconds relative to the pause point (0 at pause, negative after
    /// rewinding). None while live.
    pub fn counter_seconds(&self, sample_rate: u32) -> Option<f64> {
        self.is_paused()
            .then(|| (self.offset + self.step) as f64 / sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPW: usize = 1470;
    const HISTORY: usize = 44100 + FPW;

    fn paused() -> ScrubCursor {
        let mut c = ScrubCursor::new(FPW, HISTORY);
        c.toggle_pause(100_000);
        c
    }

    #[test]
    fn test_live_ignores_scrubbing() {
        let mut c = ScrubCursor::new(FPW, HISTORY);
        assert!(!c.rewind(1));
        assert!(!c.fast_forward(1));
        assert_eq!(c.window_start(FPW + 1), None);
        assert_eq!(c.counter_seconds(44100), None);
    }

    #[test]
    fn test_pause_starts_at_latest_window() {
        let c = paused();
        assert_eq!(c.offset(), -(FPW as i64));
        assert_eq!(c.window_start(FPW + 1), Some(100_000 - FPW as u64 - 1));
        assert_eq!(c.counter_seconds(44100), Some(0.0));
    }

    #[test]
    fn test_rewind_then_fast_forward_restores_offset() {
        let mut c = paused();
        let start = c.offset();
        assert!(c.rewind(3));
        assert_eq!(c.offset(), start - 3 * FPW as i64);
        assert!(c.fast_forward(3));
        assert_eq!(c.offset(), start);
    }

    #[test]
    fn test_rewind_stops_at_history_boundary() {
        let mut c = paused();
        let mut moves = 0;
        while c.rewind(1) {
            moves += 1;
        }
        // offsets -1470·k for k = 1..=31 stay within -45570
        assert_eq!(moves, 30);
        let at_edge = c.offset();
        assert!(at_edge >= -(HISTORY as i64));
        assert!(!c.rewind(1));
        assert_eq!(c.offset(), at_edge);
    }

    #[test]
    fn test_fast_forward_cannot_pass_now() {
        let mut c = paused();
        assert!(!c.fast_forward(1));
        assert_eq!(c.offset(), -(FPW as i64));
        c.rewind(2);
        assert_eq!(c.offset(), -3 * FPW as i64);
        assert!(!c.fast_forward(3));
        assert!(c.fast_forward(2));
        assert_eq!(c.offset(), -(FPW as i64));
        assert!(!c.fast_forward(1));
    }

    #[test]
    fn test_rewind_refused_past_oldest_ring_frame() {
        let mut c = paused();
        // window at offset -1470·k starts at 100_000 - 1470·k - 1
        c.track_oldest(100_000 - 4 * FPW as u64 - 1);
        assert!(c.rewind(3));
        assert!(!c.rewind(1));
        assert_eq!(c.offset(), -4 * FPW as i64);
        assert!(c.fast_forward(1));
    }

    #[test]
    fn test_overrun_window_moves_forward_by_whole_windows() {
        let mut c = paused();
        c.rewind(10);
        let oldest = 100_000 - 5 * FPW as u64;
        c.track_oldest(oldest);
        assert_eq!(c.anchor(), 100_000);
        assert_eq!(c.offset(), -4 * FPW as i64);
        assert!(c.window_start(FPW + 1).unwrap() >= oldest);
    }

    #[test]
    fn test_overrun_pause_point_is_dragged_along() {
        let mut c = paused();
        c.track_oldest(105_000);
        assert_eq!(c.offset(), -(FPW as i64));
        let start = c.window_start(FPW + 1).unwrap();
        assert!(start >= 105_000);
        assert!(start < 105_000 + FPW as u64);
        assert_eq!(c.anchor(), start + FPW as u64 + 1);
        assert_eq!(c.counter_seconds(44100), Some(0.0));
    }

    #[test]
    fn test_track_oldest_leaves_live_cursor_alone() {
        let mut c = ScrubCursor::new(FPW, HISTORY);
        c.track_oldest(1_000_000);
        assert_eq!(c.window_start(FPW + 1), None);
        assert_eq!(c.toggle_pause(2_000_000), CursorMode::Paused);
        assert_eq!(c.offset(), -(FPW as i64));
    }

    #[test]
    fn test_resume_and_repause_resets_offset() {
        let mut c = paused();
        c.rewind(5);
        assert_eq!(c.toggle_pause(200_000), CursorMode::Live);
        assert_eq!(c.toggle_pause(300_000), CursorMode::Paused);
        assert_eq!(c.offset(), -(FPW as i64));
        assert_eq!(c.anchor(), 300_000);
    }

    #[test]
    fn test_counter_goes_negative_after_rewind() {
        let mut c = paused();
        c.rewind(30);
        let s = c.counter_seconds(44100).unwrap();
        assert!((s - (-1.0)).abs() < 1e-9, "counter={}", s);
    }

    #[test]
    fn test_window_start_near_session_start_saturates() {
        let mut c = ScrubCursor::new(FPW, HISTORY);
        c.toggle_pause(10);
        assert_eq!(c.window_start(FPW + 1), Some(0));
    }
}
