//! Shared fixtures for integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	future::Future,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
// self
use tradestation_core::{
	ClientConfig,
	auth::TokenManager,
	config::{Credentials, ReconnectConfig, StreamConfig},
	error::{ProtocolError, TransportError},
	stream::{StreamConnection, StreamManager, StreamTransport, TransportFuture},
	url::Url,
};

pub const CLIENT_ID: &str = "client-it";

/// Token endpoint body in the shape the refresh grant returns.
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: i64) -> String {
	match refresh {
		Some(refresh) => format!(
			"{{\"access_token\":\"{access}\",\"refresh_token\":\"{refresh}\",\"token_type\":\"Bearer\",\"expires_in\":{expires_in}}}"
		),
		None => format!(
			"{{\"access_token\":\"{access}\",\"token_type\":\"Bearer\",\"expires_in\":{expires_in}}}"
		),
	}
}

/// Configuration pointing the token and REST endpoints at `server`.
pub fn config(server: &MockServer, refresh_token: Option<&str>) -> ClientConfig {
	let mut credentials = Credentials::new(CLIENT_ID);

	credentials.client_secret = Some("secret-it".into());
	credentials.refresh_token = refresh_token.map(str::to_owned);

	ClientConfig::new(credentials)
		.with_token_endpoint(
			Url::parse(&server.url("/oauth/token")).expect("Mock token endpoint should parse."),
		)
		.with_base_url(Url::parse(&server.base_url()).expect("Mock base URL should parse."))
}

pub fn token_manager(server: &MockServer, refresh_token: Option<&str>) -> TokenManager {
	TokenManager::new(&config(server, refresh_token)).expect("Token manager should build.")
}

/// Stream settings with millisecond backoff so reconnect paths finish quickly.
pub fn fast_stream_config(max_concurrent_streams: usize, max_attempts: u32) -> StreamConfig {
	StreamConfig {
		max_concurrent_streams,
		heartbeat_timeout: StdDuration::from_secs(5),
		reconnect: ReconnectConfig {
			base_delay: StdDuration::from_millis(10),
			max_delay: StdDuration::from_millis(40),
			multiplier: 2.0,
			jitter_factor: 0.0,
			max_attempts,
		},
	}
}

pub fn base_url() -> Url {
	Url::parse("https://sim.api.tradestation.com").expect("Base URL should parse.")
}

/// Event fed into a scripted session.
#[derive(Debug)]
pub enum MockEvent {
	Text(String),
	/// A frame the transport could not decode.
	Undecodable,
	Close,
}

/// Outcome of one scripted connect attempt.
pub enum Script {
	Refuse,
	Session(UnboundedReceiver<MockEvent>),
}

/// Transport whose connect attempts follow a script; once the script runs out, connects are
/// refused.
#[derive(Default)]
pub struct MockTransport {
	script: Mutex<VecDeque<Script>>,
	pub connects: AtomicUsize,
	pub closes: Arc<AtomicUsize>,
	pub bearers: Mutex<Vec<Option<String>>>,
}
impl MockTransport {
	/// Queues a session and returns the sender that drives it.
	pub fn push_session(&self) -> UnboundedSender<MockEvent> {
		let (tx, rx) = mpsc::unbounded_channel();

		self.script.lock().push_back(Script::Session(rx));

		tx
	}

	pub fn push_refusal(&self) {
		self.script.lock().push_back(Script::Refuse);
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}
}
impl StreamTransport for MockTransport {
	fn connect<'a>(
		&'a self,
		_url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, Box<dyn StreamConnection>> {
		Box::pin(async move {
			self.connects.fetch_add(1, Ordering::SeqCst);
			self.bearers.lock().push(bearer.map(str::to_owned));

			let next = self.script.lock().pop_front();

			match next {
				Some(Script::Session(events)) => Ok(Box::new(MockConnection {
					events,
					closes: self.closes.clone(),
				}) as Box<dyn StreamConnection>),
				Some(Script::Refuse) | None => Err(TransportError::Closed.into()),
			}
		})
	}
}

struct MockConnection {
	events: UnboundedReceiver<MockEvent>,
	closes: Arc<AtomicUsize>,
}
impl StreamConnection for MockConnection {
	fn recv(&mut self) -> TransportFuture<'_, Option<String>> {
		Box::pin(async move {
			match self.events.recv().await {
				Some(MockEvent::Text(text)) => Ok(Some(text)),
				Some(MockEvent::Undecodable) => Err(ProtocolError::InvalidUtf8.into()),
				Some(MockEvent::Close) | None => Ok(None),
			}
		})
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			self.closes.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}
}

pub fn stream_manager(config: StreamConfig, transport: Arc<MockTransport>) -> StreamManager {
	StreamManager::new(config, base_url(), transport)
}

/// Polls `check` until it holds or the deadline passes.
pub async fn eventually<F>(mut check: F) -> bool
where
	F: FnMut() -> bool,
{
	for _ in 0..200 {
		if check() {
			return true;
		}

		tokio::time::sleep(StdDuration::from_millis(10)).await;
	}

	check()
}

/// Awaits `future` with a test-friendly ceiling.
pub async fn within<F>(future: F) -> F::Output
where
	F: Future,
{
	tokio::time::timeout(StdDuration::from_secs(5), future)
		.await
		.expect("Operation should finish within five seconds.")
}
