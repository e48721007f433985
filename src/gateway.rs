//! Request gateway composing token retrieval, rate budgets, and error mapping for REST calls.
//!
//! Every endpoint call runs the same path: obtain a valid bearer token, wait for a rate slot on
//! the endpoint, send, then feed the response headers back into the limiter.

// crates.io
use reqwest::{RequestBuilder, Response, StatusCode, header::AUTHORIZATION};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::AccessTokenProvider,
	error::{AuthError, ConfigError, ProtocolError, TransportError},
	http,
	obs::{self, OpKind, OpOutcome, OpSpan},
	rate_limit::RateLimiter,
};

/// Authorizes, throttles, and classifies REST calls.
#[derive(Clone)]
pub struct RequestGateway {
	tokens: Arc<dyn AccessTokenProvider>,
	limiter: Arc<RateLimiter>,
	http_client: ReqwestClient,
	base_url: Url,
}
impl RequestGateway {
	/// Creates a gateway that resolves endpoint paths against `base_url`.
	pub fn new(
		tokens: Arc<dyn AccessTokenProvider>,
		limiter: Arc<RateLimiter>,
		http_client: ReqwestClient,
		base_url: Url,
	) -> Self {
		Self { tokens, limiter, http_client, base_url }
	}

	/// Rate limiter the gateway feeds.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Base URL endpoint paths resolve against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Returns the `Authorization` header value for a call to `endpoint`, waiting for a rate slot
	/// after the token is secured.
	pub async fn authorize(&self, endpoint: &str) -> Result<String> {
		let token = self.tokens.access_token().await?;

		self.limiter.wait_for_slot(endpoint).await;

		Ok(format!("Bearer {token}"))
	}

	/// Feeds response headers for `endpoint` back into the limiter.
	pub fn record_response(&self, endpoint: &str, headers: &HeaderMap) {
		self.limiter.update_limits(endpoint, headers);
	}

	/// Resolves `endpoint` against the base URL.
	pub fn url(&self, endpoint: &str) -> Result<Url> {
		Ok(self.base_url.join(endpoint).map_err(ConfigError::from)?)
	}

	/// Sends `request` on behalf of `endpoint`, returning successful responses untouched.
	pub async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
		const KIND: OpKind = OpKind::Request;

		let span = OpSpan::new(KIND, "send");

		obs::record_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let bearer = self.authorize(endpoint).await?;
				let response = request
					.header(AUTHORIZATION, bearer)
					.send()
					.await
					.map_err(TransportError::from)?;

				self.record_response(endpoint, response.headers());

				let status = response.status();

				if status.is_success() {
					return Ok(response);
				}

				let retry_after = http::parse_retry_after(response.headers());
				let body = response.text().await.unwrap_or_default();

				Err(map_http_error(status.as_u16(), &body, retry_after))
			})
			.await;

		match &result {
			Ok(_) => obs::record_outcome(KIND, OpOutcome::Success),
			Err(err) => {
				obs::record_outcome(KIND, OpOutcome::Failure);
				tracing::debug!(endpoint, error = %err, "Request failed.");
			},
		}

		result
	}

	/// `GET endpoint` decoded as `T`.
	pub async fn get_json<T>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let request = self.http_client.get(self.url(endpoint)?).query(query);

		decode_json(self.send(endpoint, request).await?).await
	}

	/// `POST endpoint` with a JSON body, decoded as `T`.
	pub async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let request = self.http_client.post(self.url(endpoint)?).json(body);

		decode_json(self.send(endpoint, request).await?).await
	}

	/// `PUT endpoint` with a JSON body, decoded as `T`.
	pub async fn put_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let request = self.http_client.put(self.url(endpoint)?).json(body);

		decode_json(self.send(endpoint, request).await?).await
	}

	/// `DELETE endpoint`, decoded as `T`.
	pub async fn delete_json<T>(&self, endpoint: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let request = self.http_client.delete(self.url(endpoint)?);

		decode_json(self.send(endpoint, request).await?).await
	}
}
impl Debug for RequestGateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGateway")
			.field("base_url", &self.base_url.as_str())
			.field("limiter", &self.limiter)
			.finish()
	}
}

/// Classifies a non-success response.
///
/// The message is taken from `error_description`, then `Message`/`message`, then `error`, and
/// falls back to the raw body or the status reason.
pub fn map_http_error(status: u16, body: &str, retry_after: Option<Duration>) -> Error {
	let message = error_message(status, body);

	match status {
		400 | 422 => Error::Validation { status, message },
		401 | 403 => AuthError::Unauthorized { status, message }.into(),
		404 => Error::NotFound { message },
		429 => Error::RateLimited { message, retry_after },
		500..=599 => Error::Server { status, message },
		_ => Error::Api { status, message },
	}
}

fn error_message(status: u16, body: &str) -> String {
	let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
		["error_description", "Message", "message", "error"].into_iter().find_map(|key| {
			value
				.get(key)
				.and_then(Value::as_str)
				.map(str::trim)
				.filter(|text| !text.is_empty())
				.map(str::to_owned)
		})
	});
	let message = match from_json {
		Some(message) => message,
		None if !body.trim().is_empty() => body.trim().to_owned(),
		None => StatusCode::from_u16(status)
			.ok()
			.and_then(|code| code.canonical_reason())
			.unwrap_or("Unknown error")
			.to_owned(),
	};

	message.trim_end_matches('.').to_owned()
}

async fn decode_json<T>(response: Response) -> Result<T>
where
	T: DeserializeOwned,
{
	let body = response.text().await.map_err(TransportError::from)?;
	let mut deserializer = serde_json::Deserializer::from_str(&body);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|err| ProtocolError::InvalidJson { reason: err.to_string() }.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn statuses_map_to_categories() {
		assert!(matches!(map_http_error(400, "", None), Error::Validation { status: 400, .. }));
		assert!(matches!(map_http_error(422, "", None), Error::Validation { status: 422, .. }));
		assert!(matches!(
			map_http_error(401, "", None),
			Error::Auth(AuthError::Unauthorized { status: 401, .. })
		));
		assert!(matches!(
			map_http_error(403, "", None),
			Error::Auth(AuthError::Unauthorized { status: 403, .. })
		));
		assert!(matches!(map_http_error(404, "", None), Error::NotFound { .. }));
		assert!(matches!(
			map_http_error(429, "", Some(Duration::seconds(3))),
			Error::RateLimited { retry_after: Some(_), .. }
		));
		assert!(matches!(map_http_error(503, "", None), Error::Server { status: 503, .. }));
		assert!(matches!(map_http_error(409, "", None), Error::Api { status: 409, .. }));
	}

	#[test]
	fn message_precedence() {
		let body = r#"{"error":"invalid_request","Message":"Bad symbol","error_description":"Symbol XYZ is unknown."}"#;

		assert_eq!(error_message(400, body), "Symbol XYZ is unknown");
		assert_eq!(error_message(400, r#"{"error":"x","message":"lower"}"#), "lower");
		assert_eq!(error_message(400, r#"{"error":"only_code"}"#), "only_code");
		assert_eq!(error_message(502, "upstream timeout"), "upstream timeout");
		assert_eq!(error_message(404, ""), "Not Found");
	}
}
