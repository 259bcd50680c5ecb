// SPDX-License-Identifier: MIT

//! The session's decode loop.
//!
//! An explicit read state machine running as an independent task for the
//! lifetime of the connection. The reader is the sole writer to and sole
//! closer of the message queue; whichever terminal branch it takes, the
//! queue is closed and the done signal is raised exactly once.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
	sync::{mpsc, watch},
	time::timeout,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Message, OverflowPolicy, Payload, WsSource};
use crate::{
	error::Error,
	protocol::{FieldErrors, MessageType, OperationMessage, Response},
};

/// Decode states. `Terminated` carries the error surfaced to the consumer,
/// if any.
enum ReadState {
	AwaitAck,
	ReadLoop,
	Terminated(Option<Error>),
}

/// How one attempt to read a frame ended without producing a frame.
enum ReadEnd {
	/// The transport is gone (close frame, EOF, or read failure). Nothing
	/// is delivered; the consumer observes the queue closing.
	Transport,
	/// The frame violated the protocol; delivered as a final error message.
	Protocol(Error),
}

pub(super) struct Reader<T> {
	read: WsSource,
	queue: mpsc::Sender<Message<T>>,
	done: watch::Sender<bool>,
	surface_keep_alives: bool,
	overflow: OverflowPolicy,
}

impl<T> Reader<T>
where
	T: DeserializeOwned + Send + 'static,
{
	pub(super) fn new(
		read: WsSource,
		queue: mpsc::Sender<Message<T>>,
		done: watch::Sender<bool>,
		surface_keep_alives: bool,
		overflow: OverflowPolicy,
	) -> Self {
		Self {
			read,
			queue,
			done,
			surface_keep_alives,
			overflow,
		}
	}

	pub(super) async fn run(mut self) {
		tracing::debug!("started reader task");

		let mut state = ReadState::AwaitAck;
		loop {
			state = match state {
				ReadState::AwaitAck => self.await_ack().await,
				ReadState::ReadLoop => self.read_message().await,
				ReadState::Terminated(reason) => {
					match reason {
						Some(error) => {
							tracing::warn!(error = %error, "reader ended");
							self.deliver_final(Message {
								payload: None,
								error: Some(error),
							})
							.await;
						}
						None => tracing::debug!("reader ended"),
					}
					break;
				}
			};
		}

		// Dropping the sender closes the queue; both happen exactly once,
		// on every terminal path.
		let Reader {
			queue,
			done,
			..
		} = self;
		drop(queue);
		let _ = done.send(true);
	}

	/// Expects exactly one `connection_ack`; anything else is fatal.
	async fn await_ack(&mut self) -> ReadState {
		tracing::debug!("read state: await ack");
		match self.next_frame().await {
			Ok(frame) if frame.r#type == MessageType::ConnectionAck => ReadState::ReadLoop,
			Ok(frame) => ReadState::Terminated(Some(Error::AckMismatch(frame.r#type))),
			Err(ReadEnd::Protocol(error)) => ReadState::Terminated(Some(error)),
			Err(ReadEnd::Transport) => ReadState::Terminated(None),
		}
	}

	/// Read one frame and branch on its type; self-transitions until a
	/// terminal frame or a transport failure.
	async fn read_message(&mut self) -> ReadState {
		let frame = match self.next_frame().await {
			Ok(frame) => frame,
			Err(ReadEnd::Protocol(error)) => return ReadState::Terminated(Some(error)),
			Err(ReadEnd::Transport) => return ReadState::Terminated(None),
		};
		tracing::debug!(message_type = ?frame.r#type, "subscription got message");

		match frame.r#type {
			MessageType::Data => {
				let payload = frame.payload.unwrap_or(Value::Null);
				let response: Response<T> = match serde_json::from_value(payload) {
					Ok(response) => response,
					Err(e) => {
						return ReadState::Terminated(Some(Error::Decode(e)));
					}
				};
				let error = if response.errors.is_empty() {
					None
				} else {
					Some(Error::Fields(FieldErrors(response.errors)))
				};
				self.deliver(Message {
					payload: response.data.map(Payload::Data),
					error,
				})
				.await;
				ReadState::ReadLoop
			}
			MessageType::ConnectionKeepAlive => {
				// Soft-ignored unless configured to surface.
				if self.surface_keep_alives {
					self.deliver(Message {
						payload: Some(Payload::KeepAlive),
						error: None,
					})
					.await;
				}
				ReadState::ReadLoop
			}
			MessageType::Error => {
				let text = frame
					.payload
					.map(|payload| match payload {
						Value::String(s) => s,
						other => other.to_string(),
					})
					.unwrap_or_default();
				ReadState::Terminated(Some(Error::Server(text)))
			}
			MessageType::Complete => ReadState::Terminated(None),
			other => ReadState::Terminated(Some(Error::UnexpectedMessage(other))),
		}
	}

	/// Read the next protocol frame off the socket, skipping control frames.
	async fn next_frame(&mut self) -> Result<OperationMessage, ReadEnd> {
		loop {
			match self.read.next().await {
				Some(Ok(WsMessage::Text(text))) => {
					return serde_json::from_str(text.as_str())
						.map_err(|e| ReadEnd::Protocol(Error::Decode(e)));
				}
				Some(Ok(WsMessage::Binary(bytes))) => {
					return serde_json::from_slice(&bytes)
						.map_err(|e| ReadEnd::Protocol(Error::Decode(e)));
				}
				// tungstenite answers pings itself
				Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
				Some(Ok(WsMessage::Frame(_))) => continue,
				Some(Ok(WsMessage::Close(_))) | None => return Err(ReadEnd::Transport),
				Some(Err(e)) => {
					tracing::warn!(error = %e, "socket read failed");
					return Err(ReadEnd::Transport);
				}
			}
		}
	}

	/// Deliver the terminal error message, skipping the overflow policy:
	/// the queue is about to close and the consumer must still observe the
	/// reason. The wait is bounded so an abandoned session cannot pin the
	/// task.
	async fn deliver_final(&self, message: Message<T>) {
		match timeout(super::DISCONNECT_DEADLINE, self.queue.send(message)).await {
			Ok(_) => {}
			Err(_) => {
				tracing::warn!("queue full, dropping final error message");
			}
		}
	}

	/// Hand a message to the consumer queue under the configured overflow
	/// policy. Never fails the reader.
	async fn deliver(&self, message: Message<T>) {
		match self.overflow {
			OverflowPolicy::Drop => match self.queue.try_send(message) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					tracing::warn!("queue full, dropping message");
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			},
			OverflowPolicy::Block {
				deadline,
			} => match timeout(deadline, self.queue.send(message)).await {
				Ok(Ok(())) => {}
				Ok(Err(_)) => {}
				Err(_) => {
					tracing::warn!(
						deadline = ?deadline,
						"queue full, dropping message after deadline"
					);
				}
			},
		}
	}
}
