//! Transport clock arithmetic
//!
//! Sources without an intrinsic position (decoded file, chord stream) track
//! elapsed time manually: a logical offset of seconds already consumed, plus
//! the engine-clock instant at which playback last resumed. While running,
//! elapsed = offset + (now - started_at); while stopped, elapsed = offset.

/// Offset/start-instant pair for one transport timeline.
///
/// `now` is always the monotonic engine clock in seconds. The clock itself
/// holds no reference to the engine; callers pass the current reading in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportClock {
    offset: f64,
    started_at: Option<f64>,
}

impl TransportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds of material consumed so far.
    pub fn elapsed(&self, now: f64) -> f64 {
        match self.started_at {
            Some(start) => self.offset + (now - start).max(0.0),
            None => self.offset,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Begin (or resume) running from the stored offset.
    pub fn start(&mut self, now: f64) {
        self.started_at = Some(now);
    }

    /// Stop running, folding the run into the offset.
    ///
    /// `clamp_to` bounds the new offset for fixed-duration sources; open-ended
    /// sources pass `None` and accumulate without bound.
    pub fn pause(&mut self, now: f64, clamp_to: Option<f64>) {
        let mut elapsed = self.elapsed(now);
        if let Some(limit) = clamp_to {
            elapsed = elapsed.clamp(0.0, limit);
        }
        self.offset = elapsed;
        self.started_at = None;
    }

    /// Jump the stored offset. Leaves the running flag alone; callers that
    /// seek while playing restart the run themselves.
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Back to zero, stopped.
    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_advances_while_running() {
        let mut clock = TransportClock::new();
        clock.start(10.0);
        assert!((clock.elapsed(10.0) - 0.0).abs() < 1e-9);
        assert!((clock.elapsed(12.5) - 2.5).abs() < 1e-9);
        assert!(clock.is_running());
    }

    #[test]
    fn elapsed_frozen_while_paused() {
        let mut clock = TransportClock::new();
        clock.start(0.0);
        clock.pause(3.0, None);
        assert!((clock.elapsed(3.0) - 3.0).abs() < 1e-9);
        assert!((clock.elapsed(100.0) - 3.0).abs() < 1e-9);
        assert!(!clock.is_running());
    }

    #[test]
    fn resume_continues_from_offset() {
        let mut clock = TransportClock::new();
        clock.start(0.0);
        clock.pause(2.0, None);
        clock.start(50.0);
        assert!((clock.elapsed(51.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn pause_clamps_to_duration() {
        let mut clock = TransportClock::new();
        clock.set_offset(8.0);
        clock.start(0.0);
        // Ran 5 seconds past a 10-second duration
        clock.pause(7.0, Some(10.0));
        assert!((clock.offset() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unclamped_pause_accumulates_without_bound() {
        let mut clock = TransportClock::new();
        for i in 0..4 {
            let base = i as f64 * 100.0;
            clock.start(base);
            clock.pause(base + 7.0, None);
        }
        assert!((clock.offset() - 28.0).abs() < 1e-9);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut clock = TransportClock::new();
        clock.start(0.0);
        clock.pause(5.0, None);
        clock.reset();
        assert_eq!(clock.elapsed(99.0), 0.0);
        assert!(!clock.is_running());
    }
}
