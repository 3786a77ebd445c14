//! Windowed pacing
//!
//! Instead of sleeping the exact per-iteration delay, the pacer tracks how
//! much delay is owed inside a short window and sleeps only the part that
//! wall-clock time has not already covered. Timer overshoot on one iteration
//! is absorbed by the next ones.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use tokio::time::Instant;

/// Length of the owed-delay window
pub const PACING_WINDOW: Duration = Duration::from_secs(4);

/// Upper bound on a single computed delay
const MAX_DELAY_SECS: f64 = 86_400.0;

/// Jittered delays are capped at this multiple of the mean
const JITTER_CAP: f64 = 5.0;

fn secs(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(value.min(MAX_DELAY_SECS))
    }
}

/// Owed delay versus elapsed time inside a fixed window
#[derive(Debug, Clone)]
pub struct PacingWindow {
    base: Instant,
    owed: Duration,
}

impl PacingWindow {
    /// Open a window at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            base: now,
            owed: Duration::ZERO,
        }
    }

    /// Add `delay` to the debt and return how long to sleep now
    pub fn owe(&mut self, delay: Duration, now: Instant) -> Duration {
        let mut position = now.saturating_duration_since(self.base);
        if position > PACING_WINDOW {
            self.base = now;
            self.owed = Duration::ZERO;
            position = Duration::ZERO;
        }
        self.owed += delay;
        self.owed.saturating_sub(position)
    }
}

/// Per-Worker rate controller
///
/// Pure apart from the optional RNG: callers pass the current time in.
#[derive(Debug)]
pub struct Pacer {
    rate: f64,
    ramp: Duration,
    ramp_origin: Instant,
    first: bool,
    jitter: Option<StdRng>,
    window: PacingWindow,
}

impl Pacer {
    /// Create a pacer; the ramp (if any) starts at `now`
    pub fn new(rate: f64, ramp: Duration, jitter: bool, now: Instant) -> Self {
        let ramp = if rate > 0.0 { ramp } else { Duration::ZERO };
        Self {
            rate: rate.max(0.0),
            ramp,
            ramp_origin: now,
            first: true,
            jitter: jitter.then(StdRng::from_entropy),
            window: PacingWindow::new(now),
        }
    }

    /// Replace the jitter RNG with a seeded one
    pub fn with_seed(mut self, seed: u64) -> Self {
        if self.jitter.is_some() {
            self.jitter = Some(StdRng::seed_from_u64(seed));
        }
        self
    }

    /// Current target rate in iterations per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// True when a rate is set
    pub fn is_throttled(&self) -> bool {
        self.rate > 0.0
    }

    /// Restart pacing with a new rate
    ///
    /// The owed-delay window restarts; an in-progress ramp keeps its origin.
    pub fn set_rate(&mut self, rate: f64, now: Instant) {
        self.rate = rate.max(0.0);
        self.window = PacingWindow::new(now);
    }

    /// Mean delay before the next iteration
    pub fn mean_delay(&mut self, now: Instant) -> Duration {
        if !self.is_throttled() {
            return Duration::ZERO;
        }
        let steady = 1.0 / self.rate;
        if self.ramp.is_zero() {
            return secs(steady);
        }

        let ramp_secs = self.ramp.as_secs_f64();
        let elapsed = now.saturating_duration_since(self.ramp_origin).as_secs_f64();
        let remaining = ramp_secs - elapsed;
        if remaining <= 0.0 {
            self.first = false;
            return secs(steady);
        }

        if self.first {
            // the instantaneous rate at the ramp origin is ~0, so wait until
            // the integrated rate reaches one iteration
            self.first = false;
            return secs((2.0 * ramp_secs / self.rate).sqrt());
        }

        let rate_now = self.rate * (1.0 - remaining / ramp_secs);
        if rate_now <= 0.0 {
            return secs(remaining + steady);
        }
        secs((1.0 / rate_now).min(remaining + steady))
    }

    /// Delay drawn for the next iteration, with jitter when enabled
    pub fn draw_delay(&mut self, now: Instant) -> Duration {
        let mean = self.mean_delay(now);
        match self.jitter.as_mut() {
            Some(rng) => {
                let factor: f64 = rng.sample(Exp1);
                mean.mul_f64(factor.min(JITTER_CAP))
            }
            None => mean,
        }
    }

    /// How long to sleep before the next iteration
    pub fn next_sleep(&mut self, now: Instant) -> Duration {
        if !self.is_throttled() {
            return Duration::ZERO;
        }
        let delay = self.draw_delay(now);
        self.window.owe(delay, now)
    }
}
