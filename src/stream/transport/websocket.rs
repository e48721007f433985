//! WebSocket transport backed by `tokio-tungstenite`.

// crates.io
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream,
	tungstenite::{
		Message,
		client::IntoClientRequest,
		http::{HeaderValue, header::AUTHORIZATION},
	},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ProtocolError, TransportError},
	stream::transport::{StreamConnection, StreamTransport, TransportFuture},
};

/// Opens WebSocket connections; `http(s)` URLs are upgraded to `ws(s)`.
#[derive(Clone, Debug, Default)]
pub struct WebSocketTransport;
impl StreamTransport for WebSocketTransport {
	fn connect<'a>(
		&'a self,
		url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, Box<dyn StreamConnection>> {
		Box::pin(async move {
			let mut url = url.clone();
			let upgraded = match url.scheme() {
				"http" => Some("ws"),
				"https" => Some("wss"),
				_ => None,
			};

			if let Some(scheme) = upgraded {
				url.set_scheme(scheme)
					.map_err(|_| ConfigError::InvalidSetting { name: "stream_url", value: url.to_string() })?;
			}

			let mut request = url.as_str().into_client_request().map_err(TransportError::from)?;

			if let Some(token) = bearer {
				let value = HeaderValue::from_str(&format!("Bearer {token}"))
					.map_err(|_| ConfigError::InvalidHeader { name: "authorization" })?;

				request.headers_mut().insert(AUTHORIZATION, value);
			}

			let (socket, response) =
				tokio_tungstenite::connect_async(request).await.map_err(TransportError::from)?;

			tracing::debug!(url = %url, status = response.status().as_u16(), "WebSocket opened.");

			Ok(Box::new(WebSocketConnection { socket }) as Box<dyn StreamConnection>)
		})
	}
}

struct WebSocketConnection {
	socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}
impl StreamConnection for WebSocketConnection {
	fn recv(&mut self) -> TransportFuture<'_, Option<String>> {
		Box::pin(async move {
			loop {
				match self.socket.next().await {
					Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
					Some(Ok(Message::Binary(bytes))) =>
						return String::from_utf8(bytes.to_vec())
							.map(Some)
							.map_err(|_| ProtocolError::InvalidUtf8.into()),
					Some(Ok(Message::Ping(payload))) => {
						self.socket.send(Message::Pong(payload)).await.map_err(TransportError::from)?;
					},
					Some(Ok(Message::Close(_))) | None => return Ok(None),
					Some(Ok(_)) => continue,
					Some(Err(err)) => return Err(TransportError::from(err).into()),
				}
			}
		})
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			if let Err(err) = self.socket.close(None).await {
				tracing::debug!(error = %err, "WebSocket close did not complete cleanly.");
			}

			Ok(())
		})
	}
}
