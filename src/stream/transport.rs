//! Transport seam for streaming connections.
//!
//! [`StreamTransport`] opens one connection; the supervisor owns the returned
//! [`StreamConnection`] inside the stream's read task and closes it when the task ends.

mod http;
mod websocket;

pub use http::{HttpStreamTransport, STREAM_MEDIA_TYPE};
pub use websocket::WebSocketTransport;

// self
use crate::{_prelude::*, error::ConfigError};

/// Boxed future returned by stream transports.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Opens streaming connections.
pub trait StreamTransport
where
	Self: 'static + Send + Sync,
{
	/// Connects to `url`, authenticating with `bearer` when provided.
	fn connect<'a>(
		&'a self,
		url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, Box<dyn StreamConnection>>;
}

/// One open stream delivering newline- or frame-delimited JSON documents.
pub trait StreamConnection
where
	Self: Send,
{
	/// Next message; `Ok(None)` once the peer closed the stream.
	fn recv(&mut self) -> TransportFuture<'_, Option<String>>;

	/// Releases the underlying connection.
	fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// Resolves `uri` against `base` unless it is already absolute.
pub fn resolve_stream_url(base: &Url, uri: &str) -> Result<Url> {
	match Url::parse(uri) {
		Ok(url) => Ok(url),
		Err(url::ParseError::RelativeUrlWithoutBase) => Ok(base.join(uri).map_err(ConfigError::from)?),
		Err(err) => Err(ConfigError::from(err).into()),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn relative_uris_join_the_base() {
		let base = Url::parse("https://sim.api.tradestation.com").expect("Base URL should parse.");

		assert_eq!(
			resolve_stream_url(&base, "/v3/marketdata/stream/quotes/MSFT")
				.expect("Relative URI should resolve.")
				.as_str(),
			"https://sim.api.tradestation.com/v3/marketdata/stream/quotes/MSFT"
		);
		assert_eq!(
			resolve_stream_url(&base, "wss://stream.example.com/feed")
				.expect("Absolute URI should parse.")
				.as_str(),
			"wss://stream.example.com/feed"
		);
	}
}
