//! Token manager with a single-flight refresh path.
//!
//! Callers that observe an expired (or nearly expired) access token serialize on one async
//! guard. The first one through performs the `grant_type=refresh_token` exchange and publishes
//! the outcome under a new generation; callers that were already queued notice the generation
//! moved while they waited and return that same outcome instead of issuing a second request.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, RefreshMetrics, TokenSecret},
	config::ClientConfig,
	error::{AuthError, ConfigError},
	http::{AuthHttpClient, ReqwestHttpClient},
	oauth::{RefreshFacade, RefreshGrant},
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Boxed future returned by [`AccessTokenProvider`].
pub type TokenFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Source of bearer tokens for components that must not depend on the HTTP client type.
pub trait AccessTokenProvider
where
	Self: 'static + Send + Sync,
{
	/// Returns an access token valid beyond the safety margin, refreshing when needed.
	fn access_token(&self) -> TokenFuture<'_, String>;
}

/// Owns the credentials and the cached access token.
pub struct TokenManager<C = ReqwestHttpClient>
where
	C: ?Sized + AuthHttpClient,
{
	/// Shared counters for refreshes that reached the token endpoint.
	pub refresh_metrics: Arc<RefreshMetrics>,
	client_id: String,
	refresh_margin: Duration,
	facade: RefreshFacade<C>,
	state: RwLock<TokenState>,
	refresh_guard: AsyncMutex<()>,
}
impl TokenManager<ReqwestHttpClient> {
	/// Creates a manager backed by a reqwest client that does not follow redirects.
	pub fn new(config: &ClientConfig) -> Result<Self> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(ConfigError::http_client_build)?;

		Self::with_http_client(config, ReqwestHttpClient::with_client(client))
	}
}
impl<C> TokenManager<C>
where
	C: ?Sized + AuthHttpClient,
{
	/// Creates a manager that exchanges tokens through a caller-provided transport.
	pub fn with_http_client(config: &ClientConfig, http_client: impl Into<Arc<C>>) -> Result<Self> {
		config.credentials.validate()?;

		let credentials = &config.credentials;
		let facade = RefreshFacade::new(
			&config.token_endpoint,
			&credentials.client_id,
			credentials.client_secret.as_deref(),
			http_client.into(),
		)?;
		let refresh_token = credentials
			.refresh_token
			.as_deref()
			.filter(|token| !token.is_empty())
			.map(TokenSecret::new);

		Ok(Self {
			refresh_metrics: Default::default(),
			client_id: credentials.client_id.clone(),
			refresh_margin: config.refresh_margin,
			facade,
			state: RwLock::new(TokenState { refresh_token, ..Default::default() }),
			refresh_guard: AsyncMutex::new(()),
		})
	}

	/// Seeds the cache with a token persisted elsewhere.
	pub fn with_access_token(self, token: AccessToken) -> Self {
		self.state.write().access_token = Some(token);

		self
	}

	/// Client identifier the manager refreshes on behalf of.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Returns a bearer token valid beyond the safety margin, refreshing when needed.
	pub async fn get_valid_access_token(&self) -> Result<String> {
		if let Some(token) = self.cached_token(OffsetDateTime::now_utc()) {
			return Ok(token.secret.expose().to_owned());
		}

		let token = self.refresh_single_flight(false).await?;

		Ok(token.secret.expose().to_owned())
	}

	/// Forces a refresh-token exchange. Concurrent calls share one request.
	pub async fn refresh_access_token(&self) -> Result<AccessToken> {
		self.refresh_single_flight(true).await
	}

	/// Current refresh token, which may have been rotated by the token endpoint.
	pub fn get_refresh_token(&self) -> Option<TokenSecret> {
		self.state.read().refresh_token.clone()
	}

	/// Returns `true` when a refresh token is available.
	pub fn get_refresh_token_is_set(&self) -> bool {
		self.state.read().refresh_token.is_some()
	}

	/// Cached access token, valid or not.
	pub fn current_access_token(&self) -> Option<AccessToken> {
		self.state.read().access_token.clone()
	}

	/// Expiry of the cached access token.
	pub fn access_token_expires_at(&self) -> Option<OffsetDateTime> {
		self.state.read().access_token.as_ref().map(|token| token.expires_at)
	}

	/// Returns `true` when the cached token is valid beyond the safety margin.
	pub fn has_valid_token(&self) -> bool {
		self.cached_token(OffsetDateTime::now_utc()).is_some()
	}

	fn cached_token(&self, now: OffsetDateTime) -> Option<AccessToken> {
		self.state
			.read()
			.access_token
			.as_ref()
			.filter(|token| token.is_valid_at(now, self.refresh_margin))
			.cloned()
	}

	async fn refresh_single_flight(&self, force: bool) -> Result<AccessToken> {
		let observed = self.state.read().generation;
		let _singleflight = self.refresh_guard.lock().await;

		{
			let state = self.state.read();

			if let Some(outcome) =
				state.last_outcome.as_ref().filter(|_| state.generation != observed)
			{
				self.refresh_metrics.record_coalesced();

				return outcome.clone();
			}
			if !force {
				let now = OffsetDateTime::now_utc();

				if let Some(token) = state
					.access_token
					.as_ref()
					.filter(|token| token.is_valid_at(now, self.refresh_margin))
				{
					return Ok(token.clone());
				}
			}
		}

		let outcome = self.perform_refresh().await;
		let mut state = self.state.write();

		state.generation = state.generation.wrapping_add(1);
		state.last_outcome = Some(outcome.clone());

		outcome
	}

	async fn perform_refresh(&self) -> Result<AccessToken> {
		const KIND: OpKind = OpKind::TokenRefresh;

		let span = OpSpan::new(KIND, "refresh_access_token");
		let refresh_token = self.state.read().refresh_token.clone();
		let Some(refresh_token) = refresh_token else {
			tracing::warn!(client_id = %self.client_id, "No refresh token available for refresh.");

			return Err(AuthError::MissingRefreshToken.into());
		};

		obs::record_outcome(KIND, OpOutcome::Attempt);
		self.refresh_metrics.record_attempt();

		let result = span.instrument(self.facade.refresh(refresh_token.expose())).await;

		match result {
			Ok(grant) => {
				let token = self.apply_grant(grant);

				obs::record_outcome(KIND, OpOutcome::Success);
				self.refresh_metrics.record_success();
				tracing::debug!(expires_at = %token.expires_at, "Access token refreshed.");

				Ok(token)
			},
			Err(err) => {
				obs::record_outcome(KIND, OpOutcome::Failure);
				self.refresh_metrics.record_failure();
				tracing::warn!(error = %err, status = ?err.status(), "Access token refresh failed.");

				Err(err)
			},
		}
	}

	fn apply_grant(&self, grant: RefreshGrant) -> AccessToken {
		let token = AccessToken::new(grant.access_token, OffsetDateTime::now_utc(), grant.expires_in);
		let mut state = self.state.write();

		state.access_token = Some(token.clone());

		if let Some(rotated) = grant.refresh_token {
			state.refresh_token = Some(TokenSecret::new(rotated));
		}

		token
	}
}
impl<C> AccessTokenProvider for TokenManager<C>
where
	C: ?Sized + AuthHttpClient,
{
	fn access_token(&self) -> TokenFuture<'_, String> {
		Box::pin(self.get_valid_access_token())
	}
}
impl<C> Debug for TokenManager<C>
where
	C: ?Sized + AuthHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.read();

		f.debug_struct("TokenManager")
			.field("client_id", &self.client_id)
			.field("refresh_margin", &self.refresh_margin)
			.field("access_token_expires_at", &state.access_token.as_ref().map(|t| t.expires_at))
			.field("refresh_token_set", &state.refresh_token.is_some())
			.finish()
	}
}

#[derive(Default)]
struct TokenState {
	access_token: Option<AccessToken>,
	refresh_token: Option<TokenSecret>,
	/// Bumped once per completed refresh; queued callers compare against it.
	generation: u64,
	last_outcome: Option<Result<AccessToken>>,
}
