//! Drift-corrected frame clock.
//!
//! The clock is polled with wall-clock timestamps far more often than it fires.
//! On each fire the reference point is pulled back by the overshoot
//! (`elapsed mod interval`), so late polls do not accumulate drift.

#[derive(Debug, Clone)]
pub struct FrameClock {
    interval_ms: f64,
    prev_ms: Option<f64>,
}

impl FrameClock {
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval_ms: 1000.0 / f64::from(target_fps.max(1)),
            prev_ms: None,
        }
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Returns `true` when a frame is due at `now_ms`. The first poll fires.
    pub fn poll(&mut self, now_ms: f64) -> bool {
        let Some(prev) = self.prev_ms else {
            self.prev_ms = Some(now_ms);
            return true;
        };
        let elapsed = now_ms - prev;
        if elapsed < self.interval_ms {
            return false;
        }
        self.prev_ms = Some(now_ms - elapsed % self.interval_ms);
        true
    }

    pub fn reset(&mut self) {
        self.prev_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut clock = FrameClock::new(10);
        assert!(clock.poll(0.0));
        assert!(!clock.poll(50.0));
        assert!(clock.poll(100.0));
        assert!(!clock.poll(150.0));
    }

    #[test]
    fn late_poll_does_not_accumulate_drift() {
        let mut clock = FrameClock::new(10);
        clock.poll(0.0);
        assert!(clock.poll(130.0));
        // reference moved back to 100, so 200 is due again.
        assert!(clock.poll(200.0));
        assert!(!clock.poll(299.0));
    }
}
