//! Internal OAuth client facade for the refresh-token grant.

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	error::{AuthError, ConfigError, TransportError},
	http::{AuthHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Successful refresh grant, before it is folded into the cached token state.
#[derive(Clone, Debug)]
pub(crate) struct RefreshGrant {
	pub(crate) access_token: String,
	/// `None` when the endpoint omitted the field or returned it empty.
	pub(crate) refresh_token: Option<String>,
	pub(crate) expires_in: Duration,
}

/// Form-encoded `grant_type=refresh_token` exchange against a fixed token endpoint.
///
/// Client credentials travel in the request body (`client_id`, optional `client_secret`).
pub(crate) struct RefreshFacade<C>
where
	C: ?Sized + AuthHttpClient,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
}
impl<C> RefreshFacade<C>
where
	C: ?Sized + AuthHttpClient,
{
	pub(crate) fn new(
		token_endpoint: &Url,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: Arc<C>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = client_secret.filter(|value| !value.is_empty()) {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}

		Ok(Self { oauth_client, http_client })
	}

	pub(crate) async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());
		let secret = RefreshToken::new(refresh_token.to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&secret)
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;
		let expires_in = response.expires_in().ok_or(AuthError::InvalidExpiry)?.as_secs();
		let expires_in = i64::try_from(expires_in).map_err(|_| AuthError::InvalidExpiry)?;

		if expires_in <= 0 {
			return Err(AuthError::InvalidExpiry.into());
		}

		Ok(RefreshGrant {
			access_token: response.access_token().secret().to_owned(),
			refresh_token: response
				.refresh_token()
				.map(|token| token.secret().to_owned())
				.filter(|token| !token.is_empty()),
			expires_in: Duration::seconds(expires_in),
		})
	}
}

fn map_request_error<E>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	let status = meta.and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response(status, response),
		RequestTokenError::Request(error) => map_transport_error(status, error),
		RequestTokenError::Parse(source, _body) =>
			AuthError::MalformedResponse { status, source: Arc::new(source) }.into(),
		RequestTokenError::Other(message) =>
			AuthError::UnexpectedResponse { status, message }.into(),
	}
}

fn map_server_response(status: Option<u16>, response: BasicErrorResponse) -> Error {
	AuthError::RefreshRejected {
		status,
		error: response.error().as_ref().to_owned(),
		description: response.error_description().cloned(),
	}
	.into()
}

fn map_transport_error<E>(status: Option<u16>, err: HttpClientError<E>) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::network(inner).into(),
		HttpClientError::Other(message) =>
			AuthError::UnexpectedResponse { status, message }.into(),
		_ => AuthError::UnexpectedResponse {
			status,
			message: "HTTP client error occurred while calling the token endpoint".into(),
		}
		.into(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::ReqwestHttpClient;

	fn endpoint() -> Url {
		Url::parse("https://example.com/oauth/token").expect("Failed to parse token endpoint URL.")
	}

	#[test]
	fn builds_public_client() {
		let facade = <RefreshFacade<ReqwestHttpClient>>::new(
			&endpoint(),
			"client-id",
			None,
			Arc::new(ReqwestHttpClient::default()),
		);

		assert!(facade.is_ok());
	}

	#[test]
	fn builds_confidential_client() {
		let facade = <RefreshFacade<ReqwestHttpClient>>::new(
			&endpoint(),
			"client-id",
			Some("secret"),
			Arc::new(ReqwestHttpClient::default()),
		);

		assert!(facade.is_ok());
	}

	#[test]
	fn other_transport_failures_keep_status() {
		let err = map_transport_error::<std::io::Error>(
			Some(502),
			HttpClientError::Other("bad gateway".into()),
		);

		assert_eq!(err.status(), Some(502));
		assert!(matches!(err, Error::Auth(AuthError::UnexpectedResponse { .. })));
	}

	#[test]
	fn io_failures_map_to_network() {
		let err = map_transport_error::<std::io::Error>(
			None,
			HttpClientError::Io(std::io::Error::other("reset")),
		);

		assert!(matches!(err, Error::Network(_)));
	}
}
