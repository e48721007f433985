// std
use std::{sync::Arc, time::Instant};
// crates.io
use reqwest::header::{HeaderMap, HeaderValue};
use time::OffsetDateTime;
// self
use tradestation_core::rate_limit::{LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER, RateLimiter};

fn exhausted(limit: u64, reset_epoch: i64) -> HeaderMap {
	let mut headers = HeaderMap::new();

	headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
	headers.insert(REMAINING_HEADER, HeaderValue::from_static("0"));
	headers.insert(RESET_HEADER, HeaderValue::from(reset_epoch));

	headers
}

#[tokio::test]
async fn unknown_endpoint_is_not_delayed() {
	let limiter = RateLimiter::default();
	let started = Instant::now();

	limiter.wait_for_slot("/v3/marketdata/quotes/MSFT").await;

	assert!(started.elapsed().as_millis() < 50);
	assert!(limiter.get_rate_limit("/v3/marketdata/quotes/MSFT").is_none());
}

#[tokio::test]
async fn exhausted_budget_waits_for_reset_then_replenishes() {
	let limiter = RateLimiter::default();
	let reset = OffsetDateTime::now_utc().unix_timestamp() + 3;

	limiter.update_limits("/v3/brokerage/accounts", &exhausted(100, reset));

	let started = Instant::now();

	limiter.wait_for_slot("/v3/brokerage/accounts").await;

	assert!(started.elapsed().as_secs_f64() >= 2.0);
	assert_eq!(
		limiter.get_rate_limit("/v3/brokerage/accounts").and_then(|budget| budget.remaining),
		Some(100)
	);
}

#[tokio::test]
async fn past_reset_is_released_immediately() {
	let limiter = RateLimiter::default();
	let reset = OffsetDateTime::now_utc().unix_timestamp() - 10;

	limiter.update_limits("/v3/orders", &exhausted(30, reset));

	let started = Instant::now();

	limiter.wait_for_slot("/v3/orders").await;

	assert!(started.elapsed().as_millis() < 50);
	assert_eq!(limiter.get_rate_limit("/v3/orders").and_then(|budget| budget.remaining), Some(30));
}

#[tokio::test]
async fn other_endpoints_are_unaffected() {
	let limiter = RateLimiter::default();
	let reset = OffsetDateTime::now_utc().unix_timestamp() + 30;

	limiter.update_limits("/v3/orders", &exhausted(30, reset));

	let started = Instant::now();

	limiter.wait_for_slot("/v3/positions").await;

	assert!(started.elapsed().as_millis() < 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_waiter_is_released_after_reset() {
	let limiter = Arc::new(RateLimiter::default());
	let reset = OffsetDateTime::now_utc().unix_timestamp() + 2;

	limiter.update_limits("/v3/marketdata/barcharts", &exhausted(10, reset));

	let started = Instant::now();
	let waiters = (0..3)
		.map(|_| {
			let limiter = limiter.clone();

			tokio::spawn(async move { limiter.wait_for_slot("/v3/marketdata/barcharts").await })
		})
		.collect::<Vec<_>>();

	for waiter in waiters {
		tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
			.await
			.expect("Waiter should be released after the reset.")
			.expect("Waiter task should not panic.");
	}

	assert!(started.elapsed().as_secs_f64() >= 1.0);
}

#[tokio::test]
async fn fresh_headers_replace_the_exhausted_window() {
	let limiter = RateLimiter::default();
	let reset = OffsetDateTime::now_utc().unix_timestamp() + 30;
	let mut fresh = HeaderMap::new();

	limiter.update_limits("/v3/orders", &exhausted(30, reset));

	fresh.insert(LIMIT_HEADER, HeaderValue::from_static("30"));
	fresh.insert(REMAINING_HEADER, HeaderValue::from_static("12"));
	limiter.update_limits("/v3/orders", &fresh);

	let started = Instant::now();

	limiter.wait_for_slot("/v3/orders").await;

	assert!(started.elapsed().as_millis() < 50);
	assert_eq!(limiter.get_rate_limit("/v3/orders").and_then(|budget| budget.remaining), Some(12));
}
