// std
use std::time::Duration as StdDuration;
// self
use crate::obs::{OpKind, OpOutcome};

/// Counter incremented once per recorded outcome.
pub const OP_COUNTER: &str = "tradestation_core_op_total";
/// Histogram of time spent waiting for an exhausted rate budget to reset.
pub const RATE_LIMIT_WAIT_HISTOGRAM: &str = "tradestation_core_rate_limit_wait_seconds";

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(OP_COUNTER, "op" => kind.as_str(), "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records how long a caller slept before its rate budget replenished.
pub fn record_rate_limit_wait(waited: StdDuration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!(RATE_LIMIT_WAIT_HISTOGRAM).record(waited.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = waited;
	}
}
