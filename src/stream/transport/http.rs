//! Chunked HTTP streaming transport.
//!
//! The server keeps the response open and writes one JSON document per line. Server-sent-event
//! framing is tolerated: `data:` prefixes are stripped and comment lines are skipped.

// crates.io
use futures_util::{StreamExt, stream::BoxStream};
use reqwest::header::ACCEPT;
// self
use crate::{
	_prelude::*,
	error::{ProtocolError, TransportError},
	gateway,
	stream::transport::{StreamConnection, StreamTransport, TransportFuture},
};

/// Media type the streaming endpoints answer with.
pub const STREAM_MEDIA_TYPE: &str = "application/vnd.tradestation.streams.v2+json";

/// Opens long-lived HTTP GET streams.
#[derive(Clone, Debug, Default)]
pub struct HttpStreamTransport {
	client: ReqwestClient,
}
impl HttpStreamTransport {
	/// Uses an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}
}
impl StreamTransport for HttpStreamTransport {
	fn connect<'a>(
		&'a self,
		url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, Box<dyn StreamConnection>> {
		Box::pin(async move {
			let mut request = self.client.get(url.clone()).header(ACCEPT, STREAM_MEDIA_TYPE);

			if let Some(token) = bearer {
				request = request.bearer_auth(token);
			}

			let response = request.send().await.map_err(TransportError::from)?;
			let status = response.status();

			if !status.is_success() {
				let body = response.text().await.unwrap_or_default();

				return Err(gateway::map_http_error(status.as_u16(), &body, None));
			}

			tracing::debug!(url = %url, status = status.as_u16(), "HTTP stream opened.");

			let chunks = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));

			Ok(Box::new(HttpStreamConnection::new(chunks.boxed())) as Box<dyn StreamConnection>)
		})
	}
}

struct HttpStreamConnection {
	chunks: Option<BoxStream<'static, Result<Vec<u8>, ReqwestError>>>,
	buffer: Vec<u8>,
}
impl HttpStreamConnection {
	fn new(chunks: BoxStream<'static, Result<Vec<u8>, ReqwestError>>) -> Self {
		Self { chunks: Some(chunks), buffer: Vec::new() }
	}

	/// Pops the next payload line; a line that is not UTF-8 is consumed and reported.
	fn next_line(&mut self, flush: bool) -> Option<Result<String>> {
		loop {
			let end = match self.buffer.iter().position(|byte| *byte == b'\n') {
				Some(idx) => idx + 1,
				None if flush && !self.buffer.is_empty() => self.buffer.len(),
				None => return None,
			};
			let raw = self.buffer.drain(..end).collect::<Vec<_>>();
			let Ok(line) = String::from_utf8(raw) else {
				return Some(Err(ProtocolError::InvalidUtf8.into()));
			};

			if let Some(payload) = extract_payload(&line) {
				return Some(Ok(payload));
			}
		}
	}
}
impl StreamConnection for HttpStreamConnection {
	fn recv(&mut self) -> TransportFuture<'_, Option<String>> {
		Box::pin(async move {
			loop {
				if let Some(line) = self.next_line(false) {
					return line.map(Some);
				}

				let Some(chunks) = self.chunks.as_mut() else {
					return self.next_line(true).transpose();
				};

				match chunks.next().await {
					Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
					Some(Err(err)) => return Err(TransportError::from(err).into()),
					None => {
						self.chunks = None;

						return self.next_line(true).transpose();
					},
				}
			}
		})
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			self.chunks = None;
			self.buffer.clear();

			Ok(())
		})
	}
}

fn extract_payload(line: &str) -> Option<String> {
	let line = line.trim();
	let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);

	if line.is_empty() || line.starts_with(':') || line.starts_with("event:") || line.starts_with("id:")
	{
		return None;
	}

	Some(line.to_owned())
}

#[cfg(test)]
mod tests {
	// crates.io
	use futures_util::stream;
	// self
	use super::*;

	fn connection(chunks: &[&str]) -> HttpStreamConnection {
		raw_connection(chunks.iter().map(|chunk| chunk.as_bytes().to_vec()).collect())
	}

	fn raw_connection(chunks: Vec<Vec<u8>>) -> HttpStreamConnection {
		HttpStreamConnection::new(stream::iter(chunks.into_iter().map(Ok)).boxed())
	}

	#[tokio::test]
	async fn lines_split_across_chunks_are_reassembled() {
		let mut conn = connection(&["{\"Symbol\":", "\"MSFT\"}\n{\"Heart", "beat\":1}\n"]);

		assert_eq!(conn.recv().await.expect("Line should arrive."), Some("{\"Symbol\":\"MSFT\"}".into()));
		assert_eq!(conn.recv().await.expect("Line should arrive."), Some("{\"Heartbeat\":1}".into()));
		assert_eq!(conn.recv().await.expect("End should be clean."), None);
	}

	#[tokio::test]
	async fn sse_framing_is_stripped() {
		let mut conn = connection(&[": keep-alive\n\ndata: {\"A\":1}\r\n", "event: quote\ndata:{\"B\":2}"]);

		assert_eq!(conn.recv().await.expect("Line should arrive."), Some("{\"A\":1}".into()));
		assert_eq!(conn.recv().await.expect("Trailing line should flush."), Some("{\"B\":2}".into()));
		assert_eq!(conn.recv().await.expect("End should be clean."), None);
	}

	#[tokio::test]
	async fn invalid_utf8_line_is_reported_and_reading_continues() {
		let mut conn = raw_connection(vec![vec![0xff, 0xfe, 0xfd, b'\n'], b"{\"Seq\":0}\n".to_vec()]);

		assert!(matches!(conn.recv().await, Err(Error::Protocol(ProtocolError::InvalidUtf8))));
		assert_eq!(conn.recv().await.expect("Line should arrive."), Some("{\"Seq\":0}".into()));
		assert_eq!(conn.recv().await.expect("End should be clean."), None);
	}
}
