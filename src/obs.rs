//! Observability helpers shared by the token manager, gateway, and stream supervisor.
//!
//! # Feature Flags
//!
//! - Spans named `tradestation_core.op` carry the `op` and `stage` fields and are always emitted
//!   through `tracing`.
//! - Enable `metrics` to increment the `tradestation_core_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`, and to record rate-limit waits in the
//!   `tradestation_core_rate_limit_wait_seconds` histogram.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// OAuth refresh-token grant.
	TokenRefresh,
	/// Waiting on an exhausted rate budget.
	RateLimitWait,
	/// Gateway-issued REST call.
	Request,
	/// Initial stream connection.
	StreamConnect,
	/// Background stream reconnection.
	StreamReconnect,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::TokenRefresh => "token_refresh",
			OpKind::RateLimitWait => "rate_limit_wait",
			OpKind::Request => "request",
			OpKind::StreamConnect => "stream_connect",
			OpKind::StreamReconnect => "stream_reconnect",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller or logged by a background task.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
