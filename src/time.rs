use std::time::{Duration, Instant};

/// Frame timestamps in milliseconds since start, either from the wall clock or a fixed step.
pub struct FrameClock {
    start: Instant,
    step: Option<Duration>,
    frames: u64,
    pub delta: Duration,
}

impl FrameClock {
    pub fn wall() -> Self {
        Self { start: Instant::now(), step: None, frames: 0, delta: Duration::ZERO }
    }

    /// Simulated clock advancing `step_ms` per tick, for headless runs.
    pub fn fixed(step_ms: f64) -> Self {
        let step = Duration::from_secs_f64(step_ms.max(0.0) / 1000.0);
        Self { start: Instant::now(), step: Some(step), frames: 0, delta: Duration::ZERO }
    }

    /// Advance one frame and return its timestamp.
    pub fn tick(&mut self) -> f64 {
        let before = self.elapsed();
        self.frames += 1;
        let after = self.elapsed();
        self.delta = after.saturating_sub(before);
        after.as_secs_f64() * 1000.0
    }

    pub fn now_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn elapsed(&self) -> Duration {
        match self.step {
            Some(step) => step.saturating_mul(self.frames.min(u32::MAX as u64) as u32),
            None => self.start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_steps_evenly() {
        let mut clock = FrameClock::fixed(20.0);
        assert_eq!(clock.now_ms(), 0.0);
        assert!((clock.tick() - 20.0).abs() < 1e-6);
        assert!((clock.tick() - 40.0).abs() < 1e-6);
        assert_eq!(clock.frames(), 2);
        assert!((clock.delta.as_secs_f64() - 0.02).abs() < 1e-9);
    }
}
