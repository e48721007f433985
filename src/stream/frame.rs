//! Classification of inbound stream lines.

// crates.io
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, error::ProtocolError};

/// Error code the server sends before it drops a connection for good.
pub const GO_AWAY: &str = "GoAway";

/// One decoded stream message.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
	/// Keep-alive such as `{"Heartbeat": 1, "Timestamp": "..."}`; never dispatched.
	Heartbeat {
		/// Server-side heartbeat counter.
		sequence: Option<u64>,
		/// Server timestamp, verbatim.
		timestamp: Option<String>,
	},
	/// Server-reported error such as `{"Error": "GoAway", "Message": "..."}`.
	Error {
		/// Error code.
		code: String,
		/// Human-readable message.
		message: Option<String>,
	},
	/// Anything else, handed to subscribers unchanged.
	Payload(Value),
}
impl StreamFrame {
	/// Parses one JSON document.
	pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
		let value = serde_json::from_str::<Value>(raw)?;

		Ok(match value.as_object() {
			Some(object) if object.contains_key("Heartbeat") => Self::Heartbeat {
				sequence: object.get("Heartbeat").and_then(Value::as_u64),
				timestamp: string_field(object, "Timestamp"),
			},
			Some(object) if object.contains_key("Error") => Self::Error {
				code: string_field(object, "Error").unwrap_or_default(),
				message: string_field(object, "Message"),
			},
			_ => Self::Payload(value),
		})
	}

	/// Returns `true` for errors after which reconnecting is pointless.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Error { code, .. } if code == GO_AWAY)
	}
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
	match object.get(key)? {
		Value::String(text) => Some(text.clone()),
		Value::Null => None,
		other => Some(other.to_string()),
	}
}
