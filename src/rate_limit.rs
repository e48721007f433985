//! Per-endpoint request budgets learned from `x-ratelimit-*` response headers.
//!
//! The limiter never errors. [`RateLimiter::wait_for_slot`] either returns immediately or sleeps
//! until the recorded reset instant, after which the budget is treated as fully replenished.

// self
use crate::{
	_prelude::*,
	config::DEFAULT_RATE_LIMIT,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Header carrying the request ceiling for the current window.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header carrying the requests left in the current window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Header carrying the window reset instant as Unix epoch seconds.
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Budget snapshot for one endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateBudget {
	/// Requests allowed per window.
	pub limit: u64,
	/// Requests left in the window; `None` when the server did not say.
	pub remaining: Option<u64>,
	/// Instant the window resets.
	pub reset_at: Option<OffsetDateTime>,
}
impl RateBudget {
	/// Returns what a caller should do at `now`.
	pub fn decide(&self, now: OffsetDateTime) -> RateLimitDecision {
		match (self.remaining, self.reset_at) {
			(Some(0), Some(reset_at)) if reset_at > now => RateLimitDecision::Delay(reset_at),
			(Some(0), _) => RateLimitDecision::Replenish,
			_ => RateLimitDecision::Allow,
		}
	}

	fn replenish(&mut self) {
		self.remaining = Some(self.limit);
	}
}

/// Result of inspecting a [`RateBudget`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// Budget left or unknown; proceed.
	Allow,
	/// Budget exhausted but the window already reset; replenish and proceed.
	Replenish,
	/// Budget exhausted until the given instant.
	Delay(OffsetDateTime),
}

/// Header-driven rate limiter keyed by endpoint path.
#[derive(Debug)]
pub struct RateLimiter {
	default_limit: u64,
	budgets: Mutex<HashMap<String, RateBudget>>,
}
impl RateLimiter {
	/// Creates a limiter that assumes `default_limit` when responses omit the limit header.
	pub fn new(default_limit: u64) -> Self {
		Self { default_limit, budgets: Default::default() }
	}

	/// Overrides the assumed limit.
	pub fn with_default_limit(mut self, limit: u64) -> Self {
		self.default_limit = limit;

		self
	}

	/// Limit assumed when responses omit `x-ratelimit-limit`.
	pub fn default_limit(&self) -> u64 {
		self.default_limit
	}

	/// Records the budget advertised by a response for `endpoint`.
	///
	/// A missing limit header resets the entry to the default limit with no known remaining
	/// count. Unparseable values are ignored.
	pub fn update_limits(&self, endpoint: &str, headers: &HeaderMap) {
		let limit = header_number(headers, LIMIT_HEADER);
		let budget = match limit {
			Some(limit) => RateBudget {
				limit,
				remaining: header_number(headers, REMAINING_HEADER),
				reset_at: header_number(headers, RESET_HEADER).and_then(epoch_seconds),
			},
			None => RateBudget { limit: self.default_limit, remaining: None, reset_at: None },
		};

		tracing::trace!(endpoint, ?budget, "Rate budget updated.");

		self.budgets.lock().insert(endpoint.to_owned(), budget);
	}

	/// Waits until `endpoint` has budget left.
	pub async fn wait_for_slot(&self, endpoint: &str) {
		loop {
			let now = OffsetDateTime::now_utc();
			let reset_at = {
				let mut budgets = self.budgets.lock();
				let Some(budget) = budgets.get_mut(endpoint) else { return };

				match budget.decide(now) {
					RateLimitDecision::Allow => return,
					RateLimitDecision::Replenish => {
						budget.replenish();

						return;
					},
					RateLimitDecision::Delay(reset_at) => reset_at,
				}
			};
			let delay = std::time::Duration::try_from(reset_at - now).unwrap_or_default();

			tracing::debug!(
				endpoint,
				delay_ms = delay.as_millis() as u64,
				"Rate budget exhausted; waiting for reset."
			);
			obs::record_outcome(OpKind::RateLimitWait, OpOutcome::Attempt);
			OpSpan::new(OpKind::RateLimitWait, "wait_for_slot")
				.instrument(tokio::time::sleep(delay))
				.await;
			obs::record_outcome(OpKind::RateLimitWait, OpOutcome::Success);
			obs::record_rate_limit_wait(delay);
			self.replenish_if_due(endpoint, reset_at);
		}
	}

	/// Current budget for `endpoint`.
	pub fn get_rate_limit(&self, endpoint: &str) -> Option<RateBudget> {
		self.budgets.lock().get(endpoint).cloned()
	}

	/// Forgets the budget for `endpoint`; returns `true` when one existed.
	pub fn clear(&self, endpoint: &str) -> bool {
		self.budgets.lock().remove(endpoint).is_some()
	}

	/// Replenishes only the window the waiter slept through, so a newer header update wins.
	fn replenish_if_due(&self, endpoint: &str, reset_at: OffsetDateTime) {
		let mut budgets = self.budgets.lock();

		if let Some(budget) = budgets
			.get_mut(endpoint)
			.filter(|budget| budget.reset_at == Some(reset_at) && budget.remaining == Some(0))
		{
			budget.replenish();
		}
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(DEFAULT_RATE_LIMIT)
	}
}

fn header_number(headers: &HeaderMap, name: &'static str) -> Option<u64> {
	let raw = headers.get(name)?;
	let parsed = raw.to_str().ok().and_then(|value| value.trim().parse::<i64>().ok());

	match parsed {
		Some(value) => Some(u64::try_from(value).unwrap_or(0)),
		None => {
			tracing::debug!(header = name, ?raw, "Ignoring unparseable rate-limit header.");

			None
		},
	}
}

fn epoch_seconds(secs: u64) -> Option<OffsetDateTime> {
	OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok()
}
