//! Message subscribers and the fan-out that isolates them from each other.

// std
use std::{
	panic::{self, AssertUnwindSafe},
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
// self
use crate::_prelude::*;

/// Error a subscriber may return; it is logged and otherwise ignored.
pub type SubscriberError = Box<dyn StdError + Send + Sync>;

/// Receives every payload frame of one stream.
///
/// Calls happen on the stream's read task, so implementations should hand heavy work off
/// elsewhere. Errors and panics are contained per subscriber.
pub trait StreamSubscriber
where
	Self: 'static + Send + Sync,
{
	/// Handles one payload.
	fn on_message(&self, stream_id: &str, message: &Value) -> Result<(), SubscriberError>;
}
impl<F> StreamSubscriber for F
where
	F: 'static + Send + Sync + Fn(&str, &Value) -> Result<(), SubscriberError>,
{
	fn on_message(&self, stream_id: &str, message: &Value) -> Result<(), SubscriberError> {
		self(stream_id, message)
	}
}

/// Handle returned when a subscriber is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);
impl SubscriberId {
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);

		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}
impl Display for SubscriberId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "subscriber-{}", self.0)
	}
}

/// Forwards payloads into an unbounded channel.
#[derive(Debug)]
pub struct ChannelSubscriber(UnboundedSender<Value>);
impl ChannelSubscriber {
	/// Wraps the sending half of a channel.
	pub fn new(sender: UnboundedSender<Value>) -> Self {
		Self(sender)
	}
}
impl StreamSubscriber for ChannelSubscriber {
	fn on_message(&self, _: &str, message: &Value) -> Result<(), SubscriberError> {
		self.0.send(message.clone()).map_err(|_| "Subscriber channel is closed.".into())
	}
}

pub(crate) type SubscriberList = Vec<(SubscriberId, Arc<dyn StreamSubscriber>)>;

/// Invokes every subscriber; returns how many accepted the message.
pub(crate) fn dispatch(stream_id: &str, subscribers: &SubscriberList, message: &Value) -> usize {
	let mut delivered = 0;

	for (id, subscriber) in subscribers {
		match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_message(stream_id, message))) {
			Ok(Ok(())) => delivered += 1,
			Ok(Err(err)) => {
				tracing::warn!(stream_id, subscriber = %id, error = %err, "Subscriber failed.");
			},
			Err(_) => {
				tracing::error!(stream_id, subscriber = %id, "Subscriber panicked.");
			},
		}
	}

	delivered
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// crates.io
	use serde_json::json;
	use tokio::sync::mpsc;
	// self
	use super::*;

	fn entry(subscriber: impl StreamSubscriber) -> (SubscriberId, Arc<dyn StreamSubscriber>) {
		(SubscriberId::next(), Arc::new(subscriber))
	}

	#[test]
	fn failing_and_panicking_subscribers_do_not_block_siblings() {
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		let subscribers: SubscriberList = vec![
			entry(|_: &str, _: &Value| -> Result<(), SubscriberError> { panic!("subscriber bug") }),
			entry(|_: &str, _: &Value| -> Result<(), SubscriberError> { Err("rejected".into()) }),
			entry(move |_: &str, _: &Value| -> Result<(), SubscriberError> {
				counter.fetch_add(1, Ordering::SeqCst);

				Ok(())
			}),
		];

		assert_eq!(dispatch("quotes", &subscribers, &json!({ "Symbol": "MSFT" })), 1);
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn channel_subscriber_forwards_until_closed() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let subscriber = ChannelSubscriber::new(tx);

		subscriber.on_message("quotes", &json!(1)).expect("Open channel should accept.");

		assert_eq!(rx.try_recv().expect("Message should be queued."), json!(1));

		drop(rx);

		assert!(subscriber.on_message("quotes", &json!(2)).is_err());
	}

	#[test]
	fn ids_are_unique() {
		assert_ne!(SubscriberId::next(), SubscriberId::next());
	}
}
