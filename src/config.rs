//! Typed client configuration resolved once and passed into every component.
//!
//! Components never read process state themselves; [`ClientConfig::from_env`] is the single
//! place environment variables are consulted.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, error::ConfigError};

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://signin.tradestation.com/oauth/token";
/// Default stream ceiling when none is configured.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 10;
/// Default request budget assumed when responses omit `x-ratelimit-limit`.
pub const DEFAULT_RATE_LIMIT: u64 = 120;

/// Target API environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
	/// Live trading.
	#[default]
	#[serde(alias = "Live", alias = "live", alias = "production")]
	Production,
	/// Paper trading.
	#[serde(alias = "simulation", alias = "Sim", alias = "sim")]
	Simulation,
}
impl Environment {
	/// REST and streaming base URL for this environment.
	pub const fn base_url(self) -> &'static str {
		match self {
			Self::Production => "https://api.tradestation.com",
			Self::Simulation => "https://sim.api.tradestation.com",
		}
	}

	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Production => "production",
			Self::Simulation => "simulation",
		}
	}
}
impl FromStr for Environment {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"production" | "live" => Ok(Self::Production),
			"simulation" | "sim" => Ok(Self::Simulation),
			_ => Err(ConfigError::InvalidEnvironment { value: s.to_owned() }),
		}
	}
}
impl Display for Environment {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// OAuth client credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Optional client secret for confidential clients.
	#[serde(default)]
	pub client_secret: Option<String>,
	/// Long-lived refresh token.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Target environment.
	#[serde(default)]
	pub environment: Environment,
}
impl Credentials {
	/// Creates credentials for a public client.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self { client_id: client_id.into(), ..Default::default() }
	}

	/// Ensures required fields are present.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingClientId);
		}

		Ok(())
	}
}
impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credentials")
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("refresh_token_set", &self.refresh_token.is_some())
			.field("environment", &self.environment)
			.finish()
	}
}

/// Exponential backoff parameters for stream reconnection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	/// Delay before the first reconnection attempt.
	#[serde(with = "millis")]
	pub base_delay: StdDuration,
	/// Upper bound for any single delay.
	#[serde(with = "millis")]
	pub max_delay: StdDuration,
	/// Growth factor applied after each attempt.
	pub multiplier: f64,
	/// Fractional jitter (0.1 = ±10%); zero disables it.
	pub jitter_factor: f64,
	/// Attempts before the connection is given up.
	pub max_attempts: u32,
}
impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			base_delay: StdDuration::from_secs(1),
			max_delay: StdDuration::from_secs(30),
			multiplier: 2.0,
			jitter_factor: 0.0,
			max_attempts: 5,
		}
	}
}

/// Streaming settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
	/// Maximum number of live connections.
	pub max_concurrent_streams: usize,
	/// Longest silence tolerated before the connection is treated as dead.
	#[serde(with = "millis")]
	pub heartbeat_timeout: StdDuration,
	/// Reconnection backoff.
	pub reconnect: ReconnectConfig,
}
impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
			heartbeat_timeout: StdDuration::from_secs(60),
			reconnect: ReconnectConfig::default(),
		}
	}
}

/// Complete client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// OAuth credentials and environment.
	#[serde(flatten)]
	pub credentials: Credentials,
	/// Token endpoint used for the refresh grant.
	#[serde(default = "default_token_endpoint")]
	pub token_endpoint: Url,
	/// Overrides the environment's REST/streaming base URL.
	#[serde(default)]
	pub base_url: Option<Url>,
	/// Refresh tokens this long before they expire.
	#[serde(default = "default_refresh_margin")]
	pub refresh_margin: Duration,
	/// Budget assumed when responses omit `x-ratelimit-limit`.
	#[serde(default = "default_rate_limit")]
	pub default_rate_limit: u64,
	/// Streaming settings.
	#[serde(default)]
	pub stream: StreamConfig,
}
impl ClientConfig {
	/// Creates a configuration with defaults for everything but the credentials.
	pub fn new(credentials: Credentials) -> Self {
		Self {
			credentials,
			token_endpoint: default_token_endpoint(),
			base_url: None,
			refresh_margin: default_refresh_margin(),
			default_rate_limit: DEFAULT_RATE_LIMIT,
			stream: StreamConfig::default(),
		}
	}

	/// Resolves configuration from `CLIENT_ID`, `CLIENT_SECRET`, `REFRESH_TOKEN`, `ENVIRONMENT`,
	/// and `MAX_CONCURRENT_STREAMS`.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Resolves configuration through an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
		let mut credentials = Credentials::new(read("CLIENT_ID").unwrap_or_default());

		credentials.client_secret = read("CLIENT_SECRET");
		credentials.refresh_token = read("REFRESH_TOKEN");

		if let Some(env) = read("ENVIRONMENT") {
			credentials.environment = env.parse()?;
		}

		let mut config = Self::new(credentials);

		if let Some(raw) = read("MAX_CONCURRENT_STREAMS") {
			config.stream.max_concurrent_streams = raw.trim().parse().map_err(|_| {
				ConfigError::InvalidSetting { name: "MAX_CONCURRENT_STREAMS", value: raw.clone() }
			})?;
		}

		config.validate()?;

		Ok(config)
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.credentials.client_secret = Some(secret.into());

		self
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.credentials.refresh_token = Some(token.into());

		self
	}

	/// Sets the environment.
	pub fn with_environment(mut self, environment: Environment) -> Self {
		self.credentials.environment = environment;

		self
	}

	/// Overrides the token endpoint.
	pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
		self.token_endpoint = endpoint;

		self
	}

	/// Overrides the REST/streaming base URL.
	pub fn with_base_url(mut self, base_url: Url) -> Self {
		self.base_url = Some(base_url);

		self
	}

	/// Overrides the refresh safety margin; negative values clamp to zero.
	pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Overrides the default rate budget.
	pub fn with_default_rate_limit(mut self, limit: u64) -> Self {
		self.default_rate_limit = limit;

		self
	}

	/// Overrides the streaming settings.
	pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
		self.stream = stream;

		self
	}

	/// Ensures required fields are present and numeric settings are usable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.credentials.validate()?;

		if self.stream.max_concurrent_streams == 0 {
			return Err(ConfigError::InvalidSetting {
				name: "max_concurrent_streams",
				value: "0".into(),
			});
		}
		if self.stream.reconnect.multiplier.is_nan() || self.stream.reconnect.multiplier < 1.0 {
			return Err(ConfigError::InvalidSetting {
				name: "reconnect.multiplier",
				value: self.stream.reconnect.multiplier.to_string(),
			});
		}
		if !self.stream.reconnect.jitter_factor.is_finite() || self.stream.reconnect.jitter_factor < 0.0
		{
			return Err(ConfigError::InvalidSetting {
				name: "reconnect.jitter_factor",
				value: self.stream.reconnect.jitter_factor.to_string(),
			});
		}

		Ok(())
	}

	/// Base URL requests and relative stream URIs resolve against.
	pub fn resolved_base_url(&self) -> Result<Url, ConfigError> {
		match &self.base_url {
			Some(url) => Ok(url.clone()),
			None => Ok(Url::parse(self.credentials.environment.base_url())?),
		}
	}
}

fn default_token_endpoint() -> Url {
	Url::parse(DEFAULT_TOKEN_ENDPOINT).expect("Default token endpoint must be a valid URL.")
}

fn default_refresh_margin() -> Duration {
	Duration::seconds(60)
}

fn default_rate_limit() -> u64 {
	DEFAULT_RATE_LIMIT
}

mod millis {
	// std
	use std::time::Duration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
