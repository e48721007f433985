//! Crate-level error taxonomy shared by the token manager, gateway, and stream supervisor.
//!
//! Every variant is `Clone` so a single refresh outcome can be handed to every caller that
//! coalesced onto it; sources that are not `Clone` themselves are held behind [`Arc`].

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Credentials are missing, invalid, or the refresh grant failed.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Stream registry is full.
	#[error("Maximum concurrent streams ({max}) reached.")]
	Capacity {
		/// Configured stream ceiling.
		max: usize,
	},
	/// Connection-level failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Network(#[from] TransportError),
	/// Payload could not be decoded.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// Upstream answered with a 5xx status.
	#[error("Server error (status {status}): {message}.")]
	Server {
		/// HTTP status code.
		status: u16,
		/// Server-provided message.
		message: String,
	},
	/// Upstream rejected the request with a 4xx status other than auth.
	#[error("The request was invalid (status {status}): {message}.")]
	Validation {
		/// HTTP status code.
		status: u16,
		/// Server-provided message.
		message: String,
	},
	/// Upstream returned 404.
	#[error("The requested resource was not found: {message}.")]
	NotFound {
		/// Server-provided message.
		message: String,
	},
	/// Upstream returned 429.
	#[error("API rate limit exceeded: {message}.")]
	RateLimited {
		/// Server-provided message.
		message: String,
		/// Retry-After hint, when supplied.
		retry_after: Option<Duration>,
	},
	/// Any other non-success status.
	#[error("API returned status {status}: {message}.")]
	Api {
		/// HTTP status code.
		status: u16,
		/// Server-provided message.
		message: String,
	},
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Stream was disconnected while its transport was still opening.
	#[error("Stream `{id}` was disconnected before it became active.")]
	StreamCancelled {
		/// Stream identifier.
		id: String,
	},
}
impl Error {
	/// Returns `true` for failures a caller may retry with backoff.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. })
	}

	/// HTTP status attached to the failure, when one is known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Auth(err) => err.status(),
			Self::Server { status, .. }
			| Self::Validation { status, .. }
			| Self::Api { status, .. } => Some(*status),
			Self::NotFound { .. } => Some(404),
			Self::RateLimited { .. } => Some(429),
			_ => None,
		}
	}
}

/// Authentication failures.
#[derive(Clone, Debug, ThisError)]
pub enum AuthError {
	/// No refresh token is configured and no valid access token is cached.
	#[error("No refresh token available.")]
	MissingRefreshToken,
	/// Token endpoint answered with an OAuth error body.
	#[error("Token refresh failed with status {}: {}.", fmt_status(*.status), .description.as_deref().unwrap_or(.error))]
	RefreshRejected {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// OAuth error code (`invalid_grant`, ...).
		error: String,
		/// Server-provided `error_description`.
		description: Option<String>,
	},
	/// Token endpoint answered with a body that is not a valid token or error document.
	#[error("Token endpoint returned malformed JSON (status {}).", fmt_status(*.status))]
	MalformedResponse {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// Token endpoint answered with something the OAuth client could not interpret.
	#[error("Token endpoint returned an unexpected response (status {}): {message}.", fmt_status(*.status))]
	UnexpectedResponse {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Summary of the failure.
		message: String,
	},
	/// Token endpoint returned a non-positive or out-of-range `expires_in`.
	#[error("Token endpoint returned an invalid expires_in.")]
	InvalidExpiry,
	/// A data endpoint answered 401/403.
	#[error("Authentication failed (status {status}): {message}.")]
	Unauthorized {
		/// HTTP status code.
		status: u16,
		/// Server-provided message.
		message: String,
	},
}
impl AuthError {
	/// HTTP status attached to the failure, when one is known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::RefreshRejected { status, .. }
			| Self::MalformedResponse { status, .. }
			| Self::UnexpectedResponse { status, .. } => *status,
			Self::Unauthorized { status, .. } => Some(*status),
			Self::MissingRefreshToken | Self::InvalidExpiry => None,
		}
	}
}

/// Transport-level failures (network, TLS, timeouts).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying client reported a network failure.
	#[error("Network error occurred: {source}.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// No data arrived within the allotted window.
	#[error("Timed out after {after:?}.")]
	Timeout {
		/// Elapsed window.
		after: std::time::Duration,
	},
	/// Peer closed the connection.
	#[error("Connection closed by peer.")]
	Closed,
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
	fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
		Self::network(e)
	}
}

/// Payload decoding failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ProtocolError {
	/// Payload is not valid JSON.
	#[error("Invalid JSON payload: {reason}.")]
	InvalidJson {
		/// Parser message.
		reason: String,
	},
	/// Binary frame is not valid UTF-8.
	#[error("Frame is not valid UTF-8.")]
	InvalidUtf8,
}
impl From<serde_json::Error> for ProtocolError {
	fn from(e: serde_json::Error) -> Self {
		Self::InvalidJson { reason: e.to_string() }
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// Client identifier is empty.
	#[error("Client ID is required.")]
	MissingClientId,
	/// Environment label is not recognised.
	#[error("Environment `{value}` is not one of Production/Live/Simulation.")]
	InvalidEnvironment {
		/// Rejected value.
		value: String,
	},
	/// Numeric setting could not be parsed or is out of range.
	#[error("Setting `{name}` has an invalid value `{value}`.")]
	InvalidSetting {
		/// Setting name.
		name: &'static str,
		/// Rejected value.
		value: String,
	},
	/// URL could not be parsed or joined.
	#[error("URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// HTTP client or request could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying builder failure.
		#[source]
		source: SharedError,
	},
	/// Header value contains characters HTTP does not allow.
	#[error("Header `{name}` has an invalid value.")]
	InvalidHeader {
		/// Header name.
		name: &'static str,
	},
	/// Client has been closed and no longer accepts streams.
	#[error("Client is closed.")]
	Closed,
}
impl ConfigError {
	/// Wraps a builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<url::ParseError> for ConfigError {
	fn from(source: url::ParseError) -> Self {
		Self::InvalidUrl { source }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::http_client_build(e)
	}
}

fn fmt_status(status: Option<u16>) -> String {
	status.map_or_else(|| "unknown".into(), |code| code.to_string())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn refresh_rejection_prefers_description() {
		let err = AuthError::RefreshRejected {
			status: Some(400),
			error: "invalid_grant".into(),
			description: Some("Invalid refresh token".into()),
		};

		assert_eq!(err.to_string(), "Token refresh failed with status 400: Invalid refresh token.");
		assert_eq!(Error::from(err).status(), Some(400));
	}

	#[test]
	fn refresh_rejection_falls_back_to_error_code() {
		let err = AuthError::RefreshRejected {
			status: None,
			error: "invalid_client".into(),
			description: None,
		};

		assert_eq!(err.to_string(), "Token refresh failed with status unknown: invalid_client.");
	}

	#[test]
	fn transient_classification() {
		assert!(Error::from(TransportError::Closed).is_transient());
		assert!(Error::Server { status: 503, message: "down".into() }.is_transient());
		assert!(!Error::Capacity { max: 3 }.is_transient());
		assert!(!Error::from(AuthError::MissingRefreshToken).is_transient());
	}

	#[test]
	fn errors_clone_with_shared_sources() {
		let err = Error::from(TransportError::network(std::io::Error::other("reset")));
		let copy = err.clone();

		assert_eq!(err.to_string(), copy.to_string());
		assert!(copy.to_string().contains("reset"));
	}
}
