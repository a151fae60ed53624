use std::collections::VecDeque;
use std::time::Instant;

const DEFAULT_WINDOW: usize = 30;

/// Rolling frames-per-second over the most recent completions.
pub struct FpsMeter {
    window: usize,
    ticks: VecDeque<Instant>,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            ticks: VecDeque::with_capacity(window),
        }
    }

    /// Record a completed frame at `now` and return the updated rate.
    pub fn tick(&mut self, now: Instant) -> f32 {
        if self.ticks.len() == self.window {
            self.ticks.pop_front();
        }
        self.ticks.push_back(now);
        self.fps()
    }

    pub fn fps(&self) -> f32 {
        let (Some(first), Some(last)) = (self.ticks.front(), self.ticks.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first).as_secs_f32();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.ticks.len() - 1) as f32 / elapsed
    }
}
