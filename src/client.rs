//! Top-level client owning one token manager, rate limiter, stream manager, and gateway.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{AccessTokenProvider, TokenManager, TokenSecret},
	config::{ClientConfig, Environment},
	error::ConfigError,
	gateway::RequestGateway,
	rate_limit::RateLimiter,
	stream::{ConnectOutcome, HttpStreamTransport, StreamManager, StreamTransport},
};

/// Entry point for REST and streaming calls.
///
/// Configuration is resolved once and every component is built up front; nothing is shared
/// between two clients.
pub struct Client {
	config: ClientConfig,
	tokens: Arc<TokenManager>,
	limiter: Arc<RateLimiter>,
	streams: StreamManager,
	gateway: RequestGateway,
	running: AtomicBool,
	closed: AtomicBool,
}
impl Client {
	/// Builds a client whose streams use the chunked HTTP transport.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let http_client = ReqwestClient::builder().build().map_err(ConfigError::http_client_build)?;
		let transport = Arc::new(HttpStreamTransport::with_client(http_client.clone()));

		Self::build(config, http_client, transport)
	}

	/// Builds a client from `CLIENT_ID`, `CLIENT_SECRET`, `REFRESH_TOKEN`, `ENVIRONMENT`, and
	/// `MAX_CONCURRENT_STREAMS`.
	pub fn from_env() -> Result<Self> {
		Self::new(ClientConfig::from_env()?)
	}

	/// Builds a client whose streams use `transport`.
	pub fn with_stream_transport(
		config: ClientConfig,
		transport: Arc<dyn StreamTransport>,
	) -> Result<Self> {
		let http_client = ReqwestClient::builder().build().map_err(ConfigError::http_client_build)?;

		Self::build(config, http_client, transport)
	}

	fn build(
		config: ClientConfig,
		http_client: ReqwestClient,
		transport: Arc<dyn StreamTransport>,
	) -> Result<Self> {
		config.validate()?;

		let base_url = config.resolved_base_url()?;
		let tokens = Arc::new(TokenManager::new(&config)?);
		let provider: Arc<dyn AccessTokenProvider> = tokens.clone();
		let limiter = Arc::new(RateLimiter::new(config.default_rate_limit));
		let streams = StreamManager::new(config.stream.clone(), base_url.clone(), transport)
			.with_token_provider(provider.clone());
		let gateway = RequestGateway::new(provider, limiter.clone(), http_client, base_url);

		tracing::debug!(
			environment = %config.credentials.environment,
			max_concurrent_streams = config.stream.max_concurrent_streams,
			"Client built."
		);

		Ok(Self {
			config,
			tokens,
			limiter,
			streams,
			gateway,
			running: AtomicBool::new(false),
			closed: AtomicBool::new(false),
		})
	}

	/// Marks the client running. Fails once the client has been closed.
	pub fn start(&self) -> Result<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(ConfigError::Closed.into());
		}

		self.running.store(true, Ordering::Release);

		Ok(())
	}

	/// Disconnects every stream and stops accepting new ones; returns how many were live.
	pub async fn close(&self) -> usize {
		self.closed.store(true, Ordering::Release);
		self.running.store(false, Ordering::Release);

		let disconnected = self.streams.disconnect_all().await;

		tracing::info!(disconnected, "Client closed.");

		disconnected
	}

	/// Returns `true` between [`start`](Self::start) and [`close`](Self::close).
	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Returns `true` once [`close`](Self::close) has been called.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Opens a stream unless the client has been closed.
	pub async fn connect_stream(&self, uri: &str, id: impl Into<String>) -> Result<ConnectOutcome> {
		if self.is_closed() {
			return Err(ConfigError::Closed.into());
		}

		self.streams.connect_stream(uri, id).await
	}

	/// Current refresh token, which may have been rotated since construction.
	pub fn get_refresh_token(&self) -> Option<TokenSecret> {
		self.tokens.get_refresh_token()
	}

	/// Environment the client talks to.
	pub fn environment(&self) -> Environment {
		self.config.credentials.environment
	}

	/// Resolved configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Token manager.
	pub fn tokens(&self) -> &Arc<TokenManager> {
		&self.tokens
	}

	/// Rate limiter.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Stream manager.
	pub fn streams(&self) -> &StreamManager {
		&self.streams
	}

	/// Request gateway.
	pub fn gateway(&self) -> &RequestGateway {
		&self.gateway
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("config", &self.config)
			.field("running", &self.is_running())
			.field("closed", &self.is_closed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::config::Credentials;

	fn client() -> Client {
		let config = ClientConfig::new(Credentials::new("client-id"))
			.with_refresh_token("R1")
			.with_environment(Environment::Simulation);

		Client::new(config).expect("Client should build.")
	}

	#[test]
	fn invalid_config_is_rejected() {
		assert!(matches!(
			Client::new(ClientConfig::new(Credentials::new(" "))),
			Err(Error::Config(ConfigError::MissingClientId))
		));
	}

	#[test]
	fn exposes_components() {
		let client = client();

		assert_eq!(client.environment(), Environment::Simulation);
		assert_eq!(client.gateway().base_url().as_str(), "https://sim.api.tradestation.com/");
		assert_eq!(client.get_refresh_token().map(|t| t.expose().to_owned()), Some("R1".into()));
		assert_eq!(client.limiter().default_limit(), 120);
	}

	#[test]
	fn custom_stream_transport_is_accepted() {
		let config = ClientConfig::new(Credentials::new("client-id"))
			.with_base_url(Url::parse("http://127.0.0.1:8080").expect("Base URL should parse."));
		let client =
			Client::with_stream_transport(config, Arc::new(crate::stream::WebSocketTransport))
				.expect("Client should build.");

		assert_eq!(client.streams().live_streams(), 0);
		assert_eq!(client.gateway().base_url().as_str(), "http://127.0.0.1:8080/");
		assert!(!client.is_running());
	}

	#[tokio::test]
	async fn close_stops_new_streams() {
		let client = client();

		client.start().expect("Fresh client should start.");

		assert!(client.is_running());
		assert_eq!(client.close().await, 0);
		assert!(!client.is_running());
		assert!(matches!(
			client.connect_stream("/v3/marketdata/stream/quotes/MSFT", "quotes").await,
			Err(Error::Config(ConfigError::Closed))
		));
		assert!(matches!(client.start(), Err(Error::Config(ConfigError::Closed))));
	}
}
