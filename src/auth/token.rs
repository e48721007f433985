//! Access-token model and the redacting secret wrapper.

// self
use crate::_prelude::*;

/// Token string that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret holds no characters.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Bearer access token together with its validity window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// Token value sent as `Authorization: Bearer <secret>`.
	pub secret: TokenSecret,
	/// Instant the token endpoint answered.
	pub issued_at: OffsetDateTime,
	/// Instant after which the token must not be used.
	pub expires_at: OffsetDateTime,
}
impl AccessToken {
	/// Builds a token issued at `issued_at` that lives for `expires_in`.
	pub fn new(
		secret: impl Into<TokenSecret>,
		issued_at: OffsetDateTime,
		expires_in: Duration,
	) -> Self {
		Self { secret: secret.into(), issued_at, expires_at: issued_at + expires_in }
	}

	/// Builds a token from an absolute expiry, e.g. one restored from external storage.
	pub fn with_expiry(secret: impl Into<TokenSecret>, expires_at: OffsetDateTime) -> Self {
		Self { secret: secret.into(), issued_at: OffsetDateTime::now_utc(), expires_at }
	}

	/// Returns `true` when the token remains usable for longer than `margin` after `now`.
	pub fn is_valid_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		self.expires_at - margin > now
	}

	/// Remaining lifetime at `now`, clamped at zero.
	pub fn expires_in_at(&self, now: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - now;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}

	/// `Authorization` header value for this token.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.secret.expose())
	}
}
