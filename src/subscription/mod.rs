// SPDX-License-Identifier: MIT

//! Long-lived GraphQL subscription sessions.
//!
//! A [`Subscription`] owns one persistent WebSocket connection carrying one
//! logical subscription. [`Subscription::open`] dials the server, spawns the
//! reader task, and performs the `connection_init` / `start` handshake before
//! returning; decoded messages are then pulled through [`Subscription::recv`]
//! until the queue closes.
//!
//! Two flows of control exist per session: the opening flow (dials, runs the
//! handshake, returns) and the reader task, which lives for the rest of the
//! connection and is the sole writer to and closer of the message queue.
//!
//! Shutdown never sends a protocol-level `stop` frame; the session is torn
//! down by closing the socket with a standard close control frame. A slow
//! consumer never stalls the reader: overflow handling is governed by
//! [`OverflowPolicy`] and defaults to dropping frames.

mod reader;

use std::time::Duration;

use futures_util::{
	SinkExt, StreamExt,
	stream::{SplitSink, SplitStream},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::{
	net::TcpStream,
	sync::{mpsc, watch},
	task::JoinHandle,
	time::{Instant, timeout, timeout_at},
};
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{
		self, Message as WsMessage,
		client::IntoClientRequest,
		http::{HeaderValue, header},
	},
};

use crate::{
	error::Error,
	protocol::OperationMessage,
	request::Request,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const DEFAULT_BUFFER_SIZE: usize = 1024;
const DISCONNECT_DEADLINE: Duration = Duration::from_secs(5);

/// Query status reported while a server-side page is still being produced.
const STATUS_RUNNING: &str = "RUNNING";

/// What the reader does with a decoded message when the queue is full.
#[derive(Debug, Clone)]
pub enum OverflowPolicy {
	/// Drop the message and log it. The reader keeps running; the consumer
	/// never observes the drop as an error. This is the default.
	Drop,
	/// Wait for queue space up to the given deadline, then drop.
	Block { deadline: Duration },
}

impl Default for OverflowPolicy {
	fn default() -> Self {
		Self::Drop
	}
}

/// The payload of one consumer-visible message.
#[derive(Debug)]
pub enum Payload<T> {
	/// A decoded `data` frame.
	Data(T),
	/// A surfaced keep-alive frame (only with
	/// [`SubscriptionOptions::surface_keep_alives`]).
	KeepAlive,
}

/// The unit delivered to consumers.
///
/// A `data` frame can carry partial data next to field errors, so `payload`
/// and `error` are both optional and not mutually exclusive.
#[derive(Debug)]
pub struct Message<T> {
	pub payload: Option<Payload<T>>,
	pub error: Option<Error>,
}

/// Configuration for [`Subscription::open`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
	buffer_size: Option<usize>,
	surface_keep_alives: bool,
	overflow: OverflowPolicy,
	token: Option<String>,
	tenant_id: Option<String>,
	vars: Map<String, Value>,
	headers: Vec<(String, String)>,
}

impl SubscriptionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Capacity of the message queue. Defaults to 1024.
	pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
		self.buffer_size = Some(buffer_size);
		self
	}

	/// Deliver keep-alive frames to the consumer instead of swallowing them.
	pub fn surface_keep_alives(mut self) -> Self {
		self.surface_keep_alives = true;
		self
	}

	/// What to do with a message when the queue is full.
	pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
		self.overflow = overflow;
		self
	}

	/// Bearer token, attached to the upgrade request as an `access_token`
	/// cookie.
	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	/// Tenant id, attached to the upgrade request as an `x-tenant-context`
	/// cookie.
	pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant_id.into());
		self
	}

	/// Set a single GraphQL variable.
	pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.vars.insert(key.into(), value.into());
		self
	}

	/// Set all GraphQL variables at once.
	pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
		for (key, value) in vars {
			self.vars.insert(key, value);
		}
		self
	}

	/// Attach an extra header to the connection upgrade request.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}
}

/// One live subscription session.
///
/// `T` is the decode target for `data` payloads; a fresh value is
/// deserialized for every frame.
pub struct Subscription<T> {
	write: Option<WsSink>,
	messages: mpsc::Receiver<Message<T>>,
	done: watch::Receiver<bool>,
	reader: JoinHandle<()>,
}

impl<T> Subscription<T>
where
	T: DeserializeOwned + Send + 'static,
{
	/// Open a subscription session.
	///
	/// Validates the query, dials the server, starts the reader task, and
	/// performs the two-step handshake before returning. On any handshake
	/// failure the partially-built session is torn down and no handle
	/// escapes.
	///
	/// The call itself carries no deadline; bound it with
	/// [`tokio::time::timeout`] where needed.
	///
	/// # Arguments
	/// * `url` - WebSocket URL of the GraphQL endpoint (e.g.,
	///   "ws://localhost:8080/graphql"); the caller is responsible for
	///   translating `http(s)` to `ws(s)`
	/// * `query` - subscription text; must begin with the `subscription`
	///   keyword
	/// * `options` - buffer size, keep-alive surfacing, auth metadata,
	///   variables
	pub async fn open(
		url: &str,
		query: &str,
		options: SubscriptionOptions,
	) -> Result<Self, Error> {
		if !query.trim_start().starts_with("subscription") {
			return Err(Error::NotASubscription);
		}

		let mut request = url.into_client_request().map_err(Error::Connect)?;
		{
			let headers = request.headers_mut();
			if let Some(token) = &options.token {
				let cookie = format!("access_token={}", token);
				headers.append(
					header::COOKIE,
					HeaderValue::from_str(&cookie)
						.map_err(|e| Error::InvalidMetadata(e.into()))?,
				);
			}
			if let Some(tenant_id) = &options.tenant_id {
				let cookie = format!("x-tenant-context={}", tenant_id);
				headers.append(
					header::COOKIE,
					HeaderValue::from_str(&cookie)
						.map_err(|e| Error::InvalidMetadata(e.into()))?,
				);
			}
			for (name, value) in &options.headers {
				headers.append(
					header::HeaderName::from_bytes(name.as_bytes())
						.map_err(|e| Error::InvalidMetadata(e.into()))?,
					HeaderValue::from_str(value)
						.map_err(|e| Error::InvalidMetadata(e.into()))?,
				);
			}
		}

		let (stream, _) = match connect_async(request).await {
			Ok(connected) => connected,
			Err(tungstenite::Error::Http(response)) => {
				return Err(Error::Rejected {
					status: response.status().as_u16(),
				});
			}
			Err(e) => return Err(Error::Connect(e)),
		};
		tracing::debug!(url, "subscription connected");

		let (write, read) = stream.split();
		let (queue_tx, queue_rx) =
			mpsc::channel(options.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1));
		let (done_tx, done_rx) = watch::channel(false);

		// Start the reader before the handshake so an early ack cannot
		// arrive with nobody listening.
		let reader = tokio::spawn(
			reader::Reader::new(
				read,
				queue_tx,
				done_tx,
				options.surface_keep_alives,
				options.overflow.clone(),
			)
			.run(),
		);

		let mut subscription = Self {
			write: Some(write),
			messages: queue_rx,
			done: done_rx,
			reader,
		};

		if let Err(e) = subscription.handshake(query, &options).await {
			tracing::warn!(url, query, error = %e, "failed connecting to subscription");
			let _ = timeout(DISCONNECT_DEADLINE, subscription.shutdown()).await;
			return Err(e);
		}

		Ok(subscription)
	}

	/// Send `connection_init` followed by `start`.
	///
	/// Runs on the opening flow, never on the reader. Before each write the
	/// done signal is checked so we do not write into a connection whose
	/// reader has already died.
	async fn handshake(
		&mut self,
		query: &str,
		options: &SubscriptionOptions,
	) -> Result<(), Error> {
		tracing::debug!("write state: connection init");
		self.send_checked(OperationMessage::connection_init()).await?;

		tracing::debug!("write state: start subscription");
		let request = Request {
			query: query.to_string(),
			variables: options.vars.clone(),
		};
		let payload = serde_json::to_value(&request).map_err(Error::Marshal)?;
		self.send_checked(OperationMessage::start(payload)).await
	}

	async fn send_checked(&mut self, message: OperationMessage) -> Result<(), Error> {
		if *self.done.borrow() {
			return Err(Error::ReaderDown);
		}
		let json = serde_json::to_string(&message).map_err(Error::Marshal)?;
		let write = self.write.as_mut().ok_or(Error::AlreadyDown)?;
		write.send(WsMessage::Text(json.into())).await.map_err(Error::Handshake)
	}

	/// Receive the next message, waiting if necessary.
	///
	/// Returns `None` once the session has reached a terminal state and the
	/// queue is drained. Bound the wait with [`tokio::time::timeout`] to get
	/// a distinguishable cancellation error; a timed-out call leaves the
	/// session untouched.
	pub async fn recv(&mut self) -> Option<Message<T>> {
		self.messages.recv().await
	}

	/// Try to receive a message without blocking.
	pub fn try_recv(&mut self) -> Result<Message<T>, mpsc::error::TryRecvError> {
		self.messages.try_recv()
	}

	/// Close the session.
	///
	/// Sends a close control frame (bounded by a fixed write deadline;
	/// failure is logged, not returned), tears the write half down, and
	/// waits for the reader task to finish. Callers bound the wait with
	/// [`tokio::time::timeout`]; if that fires first, the transport is
	/// already torn down but the reader's completion is unobserved (see
	/// the module docs).
	///
	/// Calling `shutdown` on an already-down session returns
	/// [`Error::AlreadyDown`].
	pub async fn shutdown(&mut self) -> Result<(), Error> {
		let Some(mut write) = self.write.take() else {
			return Err(Error::AlreadyDown);
		};
		tracing::debug!("subscription close called");

		match timeout(DISCONNECT_DEADLINE, write.send(WsMessage::Close(None))).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				tracing::warn!(error = %e, "failed sending close message");
			}
			Err(_) => {
				tracing::warn!("timed out sending close message");
			}
		}
		drop(write);

		while !*self.done.borrow_and_update() {
			if self.done.changed().await.is_err() {
				break;
			}
		}
		tracing::debug!("subscription reader done");
		tracing::info!("subscription closed");
		Ok(())
	}
}

impl<T> Drop for Subscription<T> {
	fn drop(&mut self) {
		// The reader task owns the read half of the socket; an abandoned
		// session would otherwise keep the connection open until the
		// server closes it.
		self.reader.abort();
	}
}

/// Decode targets that report a page-style completion status, enabling
/// [`Subscription::drain`].
pub trait Drainable {
	type Item;

	/// Status reported by the server, e.g. `"RUNNING"` or `"SUCCEEDED"`.
	/// Only consulted when the inner result is absent.
	fn status(&self) -> Option<&str>;

	/// The inner result, if this delivery carried one.
	fn into_item(self) -> Option<Self::Item>;
}

impl<T> Subscription<T>
where
	T: Drainable + DeserializeOwned + Send + 'static,
{
	/// Pull until the page is exhausted or the deadline passes, aggregating
	/// results.
	///
	/// Keep-alives and deliveries whose result is absent while the status is
	/// still `"RUNNING"` are skipped; any other absent-result status ends
	/// the drain successfully, as does end-of-stream. A delivered error
	/// ends the drain and is returned together with everything accumulated
	/// so far. The deadline likewise hands back the partial results rather
	/// than discarding them, which is why it is a parameter and not a
	/// [`tokio::time::timeout`] wrapper around the call.
	pub async fn drain(&mut self, deadline: Duration) -> (Vec<T::Item>, Option<Error>) {
		let mut results = Vec::new();
		let deadline = Instant::now() + deadline;
		loop {
			let message = match timeout_at(deadline, self.recv()).await {
				Ok(Some(message)) => message,
				Ok(None) | Err(_) => return (results, None),
			};
			if let Some(error) = message.error {
				// Errors here typically mean the request itself is
				// broken and retrying would loop forever.
				return (results, Some(error));
			}
			match message.payload {
				Some(Payload::Data(value)) => {
					let running =
						value.status() == Some(STATUS_RUNNING);
					match value.into_item() {
						Some(item) => results.push(item),
						None if running => continue,
						None => return (results, None),
					}
				}
				Some(Payload::KeepAlive) | None => continue,
			}
		}
	}
}
