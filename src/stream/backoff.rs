//! Exponential reconnection backoff.

// std
use std::time::Duration as StdDuration;
// crates.io
use rand::Rng;
// self
use crate::config::ReconnectConfig;

/// Tracks reconnection attempts and yields the delay before each one.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
	config: ReconnectConfig,
	current_delay: StdDuration,
	attempts: u32,
}
impl ReconnectPolicy {
	/// Creates a policy that has not attempted anything yet.
	pub fn new(config: ReconnectConfig) -> Self {
		let current_delay = config.base_delay;

		Self { config, current_delay, attempts: 0 }
	}

	/// Delay before the next attempt, or `None` once `max_attempts` have been spent.
	pub fn next_delay(&mut self) -> Option<StdDuration> {
		if self.attempts >= self.config.max_attempts {
			return None;
		}

		self.attempts += 1;

		let delay = self.apply_jitter(self.current_delay);
		let scaled = self.current_delay.as_secs_f64() * self.config.multiplier;

		self.current_delay = if scaled.is_finite() && scaled > 0.0 {
			StdDuration::from_secs_f64(scaled.min(self.config.max_delay.as_secs_f64()))
		} else {
			self.config.max_delay
		};

		Some(delay.min(self.config.max_delay))
	}

	/// Starts over after a successful connection.
	pub fn reset(&mut self) {
		self.current_delay = self.config.base_delay;
		self.attempts = 0;
	}

	/// Attempts handed out since the last reset.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	fn apply_jitter(&self, delay: StdDuration) -> StdDuration {
		let factor = self.config.jitter_factor;

		if !factor.is_finite() || factor <= 0.0 || delay.is_zero() {
			return delay;
		}

		let base = delay.as_secs_f64();
		let range = base * factor.min(1.0);
		let jitter = rand::rng().random_range(-range..=range);

		StdDuration::from_secs_f64((base + jitter).max(0.0))
	}
}
