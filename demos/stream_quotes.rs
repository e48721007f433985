//! Demonstrates streaming quotes through the client against a local mock server.
//!
//! The token endpoint rotates the refresh token, the stream emits a heartbeat, two quotes, and a
//! `GoAway`, after which the subscriber channel closes on its own.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use tradestation_core::{
	Client, ClientConfig,
	config::Credentials,
	stream::{STREAM_MEDIA_TYPE, StreamState},
};

const QUOTES: &str = "/v3/marketdata/stream/quotes/MSFT,AAPL";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"refresh_token\":\"demo-refresh-2\",\"token_type\":\"Bearer\",\"expires_in\":1200}",
			);
		})
		.await;
	let stream_mock = server
		.mock_async(|when, then| {
			when.method(GET).path(QUOTES).header("authorization", "Bearer demo-access");
			then.status(200).header("content-type", STREAM_MEDIA_TYPE).body(concat!(
				"{\"Heartbeat\":1,\"Timestamp\":\"2025-01-24T14:30:00Z\"}\n",
				"{\"Symbol\":\"MSFT\",\"Last\":\"410.20\"}\n",
				"{\"Symbol\":\"AAPL\",\"Last\":\"223.75\"}\n",
				"{\"Error\":\"GoAway\",\"Message\":\"Demo finished\"}\n",
			));
		})
		.await;
	let mut credentials = Credentials::new("demo-client");

	credentials.refresh_token = Some("demo-refresh-1".into());

	let config = ClientConfig::new(credentials)
		.with_token_endpoint(Url::parse(&server.url("/oauth/token"))?)
		.with_base_url(Url::parse(&server.base_url())?);
	let client = Client::new(config)?;
	let (_, mut quotes) = client.streams().subscribe_channel("quotes");

	client.start()?;
	client.connect_stream(QUOTES, "quotes").await?;

	while let Some(quote) = quotes.recv().await {
		println!("Quote: {quote}");
	}

	token_mock.assert_async().await;
	stream_mock.assert_async().await;

	println!(
		"Stream state: {}.",
		client.streams().stream_state("quotes").unwrap_or(StreamState::Disconnected)
	);
	println!(
		"Rotated refresh token present: {}.",
		client.get_refresh_token().is_some_and(|token| token.expose() == "demo-refresh-2")
	);

	client.close().await;

	Ok(())
}
