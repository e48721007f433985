mod common;

// crates.io
use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use time::Duration;
// self
use common::*;
use tradestation_core::{Client, Error, error::ProtocolError};

#[derive(Debug, Deserialize)]
struct Accounts {
	#[serde(rename = "Accounts")]
	accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
	#[serde(rename = "AccountID")]
	account_id: String,
}

async fn client_with_token(server: &MockServer) -> Client {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body("A1", Some("R2"), 1200));
		})
		.await;

	Client::new(config(server, Some("R1"))).expect("Client should build.")
}

#[tokio::test]
async fn get_json_authorizes_and_records_the_budget() {
	let server = MockServer::start_async().await;
	let client = client_with_token(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v3/brokerage/accounts")
				.query_param("type", "margin")
				.header("authorization", "Bearer A1");
			then.status(200)
				.header("content-type", "application/json")
				.header("x-ratelimit-limit", "250")
				.header("x-ratelimit-remaining", "249")
				.header("x-ratelimit-reset", "1706108400")
				.body("{\"Accounts\":[{\"AccountID\":\"11111111\"}]}");
		})
		.await;
	let accounts = client
		.gateway()
		.get_json::<Accounts>("/v3/brokerage/accounts", &[("type", "margin")])
		.await
		.expect("Accounts should decode.");

	mock.assert_calls_async(1).await;

	assert_eq!(accounts.accounts.len(), 1);
	assert_eq!(accounts.accounts[0].account_id, "11111111");

	let budget = client
		.limiter()
		.get_rate_limit("/v3/brokerage/accounts")
		.expect("Response headers should be recorded.");

	assert_eq!(budget.limit, 250);
	assert_eq!(budget.remaining, Some(249));
}

#[tokio::test]
async fn post_json_sends_the_body() {
	let server = MockServer::start_async().await;
	let client = client_with_token(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v3/orderexecution/orders")
				.header("content-type", "application/json")
				.json_body(json!({ "Symbol": "MSFT", "Quantity": "10" }));
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"Orders\":[{\"OrderID\":\"42\"}]}");
		})
		.await;
	let response = client
		.gateway()
		.post_json::<_, Value>(
			"/v3/orderexecution/orders",
			&json!({ "Symbol": "MSFT", "Quantity": "10" }),
		)
		.await
		.expect("Order response should decode.");

	mock.assert_calls_async(1).await;

	assert_eq!(response["Orders"][0]["OrderID"], "42");
}

#[tokio::test]
async fn statuses_are_classified() {
	let server = MockServer::start_async().await;
	let client = client_with_token(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/missing");
			then.status(404);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/invalid");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"Error\":\"BadRequest\",\"Message\":\"Symbol is required.\"}");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/throttled");
			then.status(429).header("retry-after", "7").body("Too many requests");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/broken");
			then.status(503).body("");
		})
		.await;

	let gateway = client.gateway();

	assert!(matches!(
		gateway.get_json::<Value>("/missing", &[]).await,
		Err(Error::NotFound { message }) if message == "Not Found"
	));
	assert!(matches!(
		gateway.get_json::<Value>("/invalid", &[]).await,
		Err(Error::Validation { status: 400, message }) if message == "Symbol is required"
	));

	let throttled = gateway.get_json::<Value>("/throttled", &[]).await;

	match throttled {
		Err(Error::RateLimited { message, retry_after }) => {
			assert_eq!(message, "Too many requests");
			assert_eq!(retry_after, Some(Duration::seconds(7)));
		},
		other => panic!("Unexpected result: {other:?}."),
	}

	let broken = gateway.get_json::<Value>("/broken", &[]).await.expect_err("503 should fail.");

	assert!(matches!(broken, Error::Server { status: 503, .. }));
	assert!(broken.is_transient());
}

#[tokio::test]
async fn undecodable_bodies_report_the_path() {
	let server = MockServer::start_async().await;
	let client = client_with_token(&server).await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v3/brokerage/accounts");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"Accounts\":[{\"AccountID\":7}]}");
		})
		.await;

	let err = client
		.gateway()
		.get_json::<Accounts>("/v3/brokerage/accounts", &[])
		.await
		.expect_err("Numeric account id should not decode.");

	match err {
		Error::Protocol(ProtocolError::InvalidJson { reason }) => {
			assert!(reason.contains("Accounts[0].AccountID"), "Unexpected reason: {reason}.");
		},
		other => panic!("Unexpected error: {other:?}."),
	}
}

#[tokio::test]
async fn token_failures_stop_the_request() {
	let server = MockServer::start_async().await;
	let client = Client::new(config(&server, None)).expect("Client should build.");
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/v3/brokerage/accounts");
			then.status(200).body("{}");
		})
		.await;
	let err = client
		.gateway()
		.get_json::<Value>("/v3/brokerage/accounts", &[])
		.await
		.expect_err("Missing refresh token should fail before sending.");

	assert!(matches!(
		err,
		Error::Auth(tradestation_core::error::AuthError::MissingRefreshToken)
	));

	mock.assert_calls_async(0).await;
}
