//! Supervised streaming connections.
//!
//! Each connection gets one background task that reads messages, detects dead peers through a
//! heartbeat timeout, classifies frames, and fans payloads out to subscribers. Abnormal closes
//! are followed by bounded exponential backoff; a `GoAway` error or exhausted attempts leave the
//! connection `Disconnected` without raising anything to the caller that opened it.
//!
//! State machine: `Disconnected -> Connecting -> Active -> (Reconnecting -> Active) | Disconnected`.

mod backoff;
mod frame;
mod subscriber;
mod transport;

pub use backoff::*;
pub use frame::*;
pub use subscriber::*;
pub use transport::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use serde_json::Value;
use tokio::{
	sync::mpsc::{self, UnboundedReceiver},
	task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};
// self
use crate::{
	_prelude::*,
	auth::AccessTokenProvider,
	config::StreamConfig,
	error::TransportError,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Lifecycle of one stream connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
	/// Not running; either never opened, closed, or given up.
	Disconnected,
	/// Transport is being opened for the first time.
	Connecting,
	/// Reading messages.
	Active,
	/// Waiting out a backoff delay or reopening the transport.
	Reconnecting,
}
impl StreamState {
	/// Returns `true` for every state that occupies a connection slot.
	pub const fn is_live(self) -> bool {
		!matches!(self, Self::Disconnected)
	}

	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Active => "active",
			Self::Reconnecting => "reconnecting",
		}
	}
}
impl Display for StreamState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Result of [`StreamManager::connect_stream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
	/// A new connection was opened.
	Connected,
	/// The id was already live; nothing changed.
	AlreadyConnected,
}

/// Registry of supervised stream connections.
///
/// Cloning is cheap and every clone manages the same connections. Once the last clone is
/// dropped every read task is cancelled and closes its transport.
#[derive(Clone)]
pub struct StreamManager {
	inner: Arc<Supervisor>,
	_shutdown: Arc<DropGuard>,
}
impl StreamManager {
	/// Creates a manager that opens connections through `transport` and resolves relative URIs
	/// against `base_url`.
	pub fn new(config: StreamConfig, base_url: Url, transport: Arc<dyn StreamTransport>) -> Self {
		let shutdown = CancellationToken::new();

		Self {
			inner: Arc::new(Supervisor {
				config,
				base_url,
				transport,
				tokens: RwLock::new(None),
				shutdown: shutdown.clone(),
				generation: AtomicU64::new(0),
				registry: Default::default(),
				subscribers: Default::default(),
			}),
			_shutdown: Arc::new(shutdown.drop_guard()),
		}
	}

	/// Authenticates every connection opened from now on with a bearer token from `tokens`.
	pub fn with_token_provider(self, tokens: Arc<dyn AccessTokenProvider>) -> Self {
		*self.inner.tokens.write() = Some(tokens);

		self
	}

	/// Settings the manager was built with.
	pub fn config(&self) -> &StreamConfig {
		&self.inner.config
	}

	/// Opens `uri` under `id` and starts its read task.
	///
	/// Returns [`ConnectOutcome::AlreadyConnected`] when `id` is already live and
	/// [`Error::Capacity`] when every slot is taken. A transport failure removes the entry and is
	/// returned as is.
	pub async fn connect_stream(&self, uri: &str, id: impl Into<String>) -> Result<ConnectOutcome> {
		const KIND: OpKind = OpKind::StreamConnect;

		let id = id.into();
		let url = resolve_stream_url(&self.inner.base_url, uri)?;
		let cancel = self.inner.shutdown.child_token();
		let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

		{
			let mut registry = self.inner.registry.lock();

			if registry.get(&id).is_some_and(|entry| entry.state.is_live()) {
				return Ok(ConnectOutcome::AlreadyConnected);
			}

			let live = registry.values().filter(|entry| entry.state.is_live()).count();
			let max = self.inner.config.max_concurrent_streams;

			if live >= max {
				tracing::warn!(stream_id = %id, max, "Stream capacity reached.");

				return Err(Error::Capacity { max });
			}

			registry.insert(id.clone(), Entry::connecting(url.clone(), cancel.clone(), generation));
		}

		obs::record_outcome(KIND, OpOutcome::Attempt);

		let span = OpSpan::new(KIND, "connect_stream");
		let opened = span
			.instrument(async {
				tokio::select! {
					() = cancel.cancelled() => Err(Error::StreamCancelled { id: id.clone() }),
					opened = self.inner.open(&url) => opened,
				}
			})
			.await;
		let connection = match opened {
			Ok(connection) => connection,
			Err(err) => {
				obs::record_outcome(KIND, OpOutcome::Failure);
				self.inner.remove_if_current(&id, generation);
				tracing::warn!(stream_id = %id, error = %err, "Stream failed to open.");

				return Err(err);
			},
		};
		let orphaned = {
			let mut registry = self.inner.registry.lock();

			match registry.get_mut(&id).filter(|entry| entry.generation == generation) {
				Some(entry) => {
					let span = tracing::info_span!("tradestation_core.stream", stream_id = %id);
					let task = Arc::clone(&self.inner).run(
						id.clone(),
						generation,
						url,
						connection,
						cancel,
					);

					entry.state = StreamState::Active;
					entry.last_heartbeat = Some(OffsetDateTime::now_utc());
					entry.task = Some(tokio::spawn(tracing::Instrument::instrument(task, span)));

					None
				},
				// Disconnected while the transport was opening.
				None => Some(connection),
			}
		};

		if let Some(mut connection) = orphaned {
			if let Err(err) = connection.close().await {
				tracing::debug!(stream_id = %id, error = %err, "Closing a cancelled stream failed.");
			}

			obs::record_outcome(KIND, OpOutcome::Failure);

			return Err(Error::StreamCancelled { id });
		}

		obs::record_outcome(KIND, OpOutcome::Success);
		tracing::info!(stream_id = %id, "Stream connected.");

		Ok(ConnectOutcome::Connected)
	}

	/// Stops `id`, waits for its task to close the transport, and forgets it.
	///
	/// Returns `false` when `id` is unknown or no longer live. Subscribers registered for `id`
	/// are dropped, which closes their channels.
	pub async fn disconnect_stream(&self, id: &str) -> bool {
		let Some(mut entry) = self.inner.registry.lock().remove(id) else {
			return false;
		};
		let was_live = entry.state.is_live();

		entry.cancel.cancel();

		let joined = match entry.task.take() {
			Some(task) => task.await,
			None => Ok(()),
		};

		if let Err(err) = joined {
			tracing::error!(stream_id = id, error = %err, "Stream task ended abnormally.");
		}

		self.inner.subscribers.lock().remove(id);

		if was_live {
			tracing::info!(stream_id = id, "Stream disconnected.");
		}

		was_live
	}

	/// Disconnects every stream; returns how many were live.
	pub async fn disconnect_all(&self) -> usize {
		let ids = self.inner.registry.lock().keys().cloned().collect::<Vec<_>>();
		let mut disconnected = 0;

		for id in ids {
			if self.disconnect_stream(&id).await {
				disconnected += 1;
			}
		}

		disconnected
	}

	/// Registers `subscriber` for payloads of `id`. Subscribers may be added before connecting
	/// and survive reconnects.
	pub fn add_message_callback(
		&self,
		id: impl Into<String>,
		subscriber: Arc<dyn StreamSubscriber>,
	) -> SubscriberId {
		let subscriber_id = SubscriberId::next();

		self.inner.subscribers.lock().entry(id.into()).or_default().push((subscriber_id, subscriber));

		subscriber_id
	}

	/// Registers a channel that receives every payload of `id`.
	///
	/// The receiver yields `None` once the stream is disconnected or given up.
	pub fn subscribe_channel(&self, id: impl Into<String>) -> (SubscriberId, UnboundedReceiver<Value>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let subscriber_id = self.add_message_callback(id, Arc::new(ChannelSubscriber::new(tx)));

		(subscriber_id, rx)
	}

	/// Removes one subscriber; returns `false` when it was not registered.
	pub fn remove_message_callback(&self, id: &str, subscriber_id: SubscriberId) -> bool {
		let mut subscribers = self.inner.subscribers.lock();
		let Some(list) = subscribers.get_mut(id) else { return false };
		let before = list.len();

		list.retain(|(existing, _)| *existing != subscriber_id);

		let removed = list.len() != before;

		if list.is_empty() {
			subscribers.remove(id);
		}

		removed
	}

	/// Returns `true` when `id` is reading messages.
	pub fn is_connected(&self, id: &str) -> bool {
		self.stream_state(id) == Some(StreamState::Active)
	}

	/// Maps every known id to whether it is reading messages.
	pub fn get_connection_status(&self) -> HashMap<String, bool> {
		self.inner
			.registry
			.lock()
			.iter()
			.map(|(id, entry)| (id.clone(), entry.state == StreamState::Active))
			.collect()
	}

	/// Current state of `id`.
	pub fn stream_state(&self, id: &str) -> Option<StreamState> {
		self.inner.registry.lock().get(id).map(|entry| entry.state)
	}

	/// Last instant `id` proved it was alive.
	pub fn last_heartbeat(&self, id: &str) -> Option<OffsetDateTime> {
		self.inner.registry.lock().get(id).and_then(|entry| entry.last_heartbeat)
	}

	/// Why the most recent session of `id` ended, when it ended abnormally.
	pub fn last_error(&self, id: &str) -> Option<Error> {
		self.inner.registry.lock().get(id).and_then(|entry| entry.last_error.clone())
	}

	/// Reconnection attempts since `id` was last active.
	pub fn reconnect_attempts(&self, id: &str) -> Option<u32> {
		self.inner.registry.lock().get(id).map(|entry| entry.reconnect_attempts)
	}

	/// URL `id` is connected to.
	pub fn stream_url(&self, id: &str) -> Option<Url> {
		self.inner.registry.lock().get(id).map(|entry| entry.url.clone())
	}

	/// Number of connections occupying a slot.
	pub fn live_streams(&self) -> usize {
		self.inner.registry.lock().values().filter(|entry| entry.state.is_live()).count()
	}
}
impl Debug for StreamManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StreamManager")
			.field("config", &self.inner.config)
			.field("base_url", &self.inner.base_url.as_str())
			.field("live_streams", &self.live_streams())
			.finish()
	}
}

struct Supervisor {
	config: StreamConfig,
	base_url: Url,
	transport: Arc<dyn StreamTransport>,
	tokens: RwLock<Option<Arc<dyn AccessTokenProvider>>>,
	/// Parent of every per-stream token; cancelled when the last manager handle drops.
	shutdown: CancellationToken,
	generation: AtomicU64,
	registry: Mutex<HashMap<String, Entry>>,
	subscribers: Mutex<HashMap<String, SubscriberList>>,
}
impl Supervisor {
	async fn open(&self, url: &Url) -> Result<Box<dyn StreamConnection>> {
		let tokens = self.tokens.read().clone();
		let bearer = match tokens {
			Some(tokens) => Some(tokens.access_token().await?),
			None => None,
		};

		self.transport.connect(url, bearer.as_deref()).await
	}

	/// Read task: one session at a time, reconnecting between sessions until cancelled or done.
	async fn run(
		self: Arc<Self>,
		id: String,
		generation: u64,
		url: Url,
		mut connection: Box<dyn StreamConnection>,
		cancel: CancellationToken,
	) {
		let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

		loop {
			let end = self.read_session(&id, generation, connection.as_mut(), &cancel).await;

			if let Err(err) = connection.close().await {
				tracing::debug!(error = %err, "Stream transport did not close cleanly.");
			}

			match end {
				SessionEnd::Cancelled => return,
				SessionEnd::Terminal => {
					self.finish(&id, generation);

					return;
				},
				SessionEnd::Abnormal(err) => {
					tracing::warn!(error = %err, "Stream session ended abnormally.");
					self.update(&id, generation, |entry| entry.last_error = Some(err));
				},
			}

			match self.reconnect(&id, generation, &url, &mut policy, &cancel).await {
				Some(reopened) => connection = reopened,
				None => return,
			}
		}
	}

	async fn read_session(
		&self,
		id: &str,
		generation: u64,
		connection: &mut dyn StreamConnection,
		cancel: &CancellationToken,
	) -> SessionEnd {
		let heartbeat_timeout = self.config.heartbeat_timeout;

		loop {
			let next = tokio::select! {
				() = cancel.cancelled() => return SessionEnd::Cancelled,
				next = tokio::time::timeout(heartbeat_timeout, connection.recv()) => next,
			};
			let raw = match next {
				Ok(Ok(Some(raw))) => raw,
				Ok(Ok(None)) => return SessionEnd::Abnormal(TransportError::Closed.into()),
				// A single undecodable frame does not invalidate the session.
				Ok(Err(Error::Protocol(err))) => {
					tracing::warn!(error = %err, "Skipping undecodable stream message.");

					continue;
				},
				Ok(Err(err)) => return SessionEnd::Abnormal(err),
				Err(_) =>
					return SessionEnd::Abnormal(
						TransportError::Timeout { after: heartbeat_timeout }.into(),
					),
			};

			match StreamFrame::parse(&raw) {
				Ok(StreamFrame::Heartbeat { sequence, .. }) => {
					tracing::trace!(?sequence, "Heartbeat received.");
					self.update(id, generation, |entry| {
						entry.last_heartbeat = Some(OffsetDateTime::now_utc());
					});
				},
				Ok(frame @ StreamFrame::Error { .. }) => {
					let terminal = frame.is_terminal();

					if let StreamFrame::Error { code, message } = frame {
						tracing::warn!(code = %code, ?message, terminal, "Stream reported an error.");
					}
					if terminal {
						return SessionEnd::Terminal;
					}
				},
				Ok(StreamFrame::Payload(value)) => {
					let subscribers = self.subscribers.lock().get(id).cloned().unwrap_or_default();

					dispatch(id, &subscribers, &value);
				},
				Err(err) => {
					tracing::warn!(error = %err, "Skipping malformed stream message.");
				},
			}
		}
	}

	/// Backs off and reopens; `None` when cancelled or out of attempts.
	async fn reconnect(
		&self,
		id: &str,
		generation: u64,
		url: &Url,
		policy: &mut ReconnectPolicy,
		cancel: &CancellationToken,
	) -> Option<Box<dyn StreamConnection>> {
		const KIND: OpKind = OpKind::StreamReconnect;

		loop {
			let Some(delay) = policy.next_delay() else {
				tracing::error!(
					attempts = policy.attempts(),
					"Stream reconnection attempts exhausted; giving up."
				);
				self.finish(id, generation);

				return None;
			};
			let attempt = policy.attempts();

			self.update(id, generation, |entry| {
				entry.state = StreamState::Reconnecting;
				entry.reconnect_attempts = attempt;
			});
			tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting stream.");

			tokio::select! {
				() = cancel.cancelled() => return None,
				() = tokio::time::sleep(delay) => (),
			}

			obs::record_outcome(KIND, OpOutcome::Attempt);

			let opened = tokio::select! {
				() = cancel.cancelled() => return None,
				opened = OpSpan::new(KIND, "reconnect").instrument(self.open(url)) => opened,
			};

			match opened {
				Ok(connection) => {
					obs::record_outcome(KIND, OpOutcome::Success);
					policy.reset();
					self.update(id, generation, |entry| {
						entry.state = StreamState::Active;
						entry.reconnect_attempts = 0;
						entry.last_heartbeat = Some(OffsetDateTime::now_utc());
					});
					tracing::info!(attempt, "Stream reconnected.");

					return Some(connection);
				},
				Err(err) => {
					obs::record_outcome(KIND, OpOutcome::Failure);
					tracing::warn!(attempt, error = %err, "Stream reconnection failed.");
				},
			}
		}
	}

	/// Marks the connection given up and releases its subscribers.
	fn finish(&self, id: &str, generation: u64) {
		let current = self.update(id, generation, |entry| {
			entry.state = StreamState::Disconnected;
			entry.task = None;
		});

		if current {
			self.subscribers.lock().remove(id);
		}
	}

	/// Applies `f` when `id` still belongs to `generation`; returns whether it did.
	fn update(&self, id: &str, generation: u64, f: impl FnOnce(&mut Entry)) -> bool {
		match self.registry.lock().get_mut(id).filter(|entry| entry.generation == generation) {
			Some(entry) => {
				f(entry);

				true
			},
			None => false,
		}
	}

	fn remove_if_current(&self, id: &str, generation: u64) {
		let mut registry = self.registry.lock();

		if registry.get(id).is_some_and(|entry| entry.generation == generation) {
			registry.remove(id);
		}
	}
}

struct Entry {
	url: Url,
	state: StreamState,
	last_heartbeat: Option<OffsetDateTime>,
	reconnect_attempts: u32,
	last_error: Option<Error>,
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
	/// Distinguishes this connection from earlier ones that reused the same id.
	generation: u64,
}
impl Entry {
	fn connecting(url: Url, cancel: CancellationToken, generation: u64) -> Self {
		Self {
			url,
			state: StreamState::Connecting,
			last_heartbeat: None,
			reconnect_attempts: 0,
			last_error: None,
			cancel,
			task: None,
			generation,
		}
	}
}

enum SessionEnd {
	Cancelled,
	Terminal,
	Abnormal(Error),
}
