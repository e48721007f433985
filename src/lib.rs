//! Resilience core for a brokerage REST and streaming SDK: single-flight OAuth 2.0 token
//! refresh, header-driven per-endpoint rate budgets, and supervised streaming connections that
//! detect dead peers and reconnect with bounded backoff.
//!
//! Endpoint methods go through [`gateway::RequestGateway`], which pulls a bearer token from
//! [`auth::TokenManager`], waits on [`rate_limit::RateLimiter`], and feeds the response headers
//! back. Streaming methods go through [`stream::StreamManager`]. [`client::Client`] owns one of
//! each.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod obs;
pub mod rate_limit;
pub mod stream;

mod oauth;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError, header::HeaderMap};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use client::Client;
pub use config::{ClientConfig, Environment};
pub use error::{Error, Result};
pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
