// SPDX-License-Identifier: MIT

use tokio_tungstenite::tungstenite;

use crate::protocol::{FieldErrors, MessageType};

/// Everything that can go wrong while opening, consuming, or shutting down a
/// subscription.
///
/// Construction failures are returned synchronously from
/// [`Subscription::open`](crate::Subscription::open) and never reach the
/// message queue. Protocol and decode failures observed after the handshake
/// are delivered as the `error` field of the final
/// [`Message`](crate::Message), immediately followed by end-of-stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The query text does not begin with the `subscription` keyword.
	#[error("query must be a subscription")]
	NotASubscription,

	/// A configured header or cookie value is not valid HTTP metadata.
	#[error("invalid connection metadata")]
	InvalidMetadata(#[source] tungstenite::http::Error),

	/// The server answered the connection upgrade with a non-success status.
	#[error("websocket error with status: {status}")]
	Rejected { status: u16 },

	/// The connection could not be established at the transport level.
	#[error("websocket error")]
	Connect(#[source] tungstenite::Error),

	/// A handshake frame could not be written.
	#[error("failed sending handshake message")]
	Handshake(#[source] tungstenite::Error),

	/// The reader task terminated before the handshake finished.
	#[error("reader down")]
	ReaderDown,

	/// The outgoing `{query, variables}` payload could not be serialized.
	#[error("failed marshalling query")]
	Marshal(#[source] serde_json::Error),

	/// The first server frame was not a `connection_ack`.
	#[error("expected ack message, got {0:?}")]
	AckMismatch(MessageType),

	/// The server sent a frame type that has no meaning mid-subscription.
	#[error("unexpected message type: {0:?}")]
	UnexpectedMessage(MessageType),

	/// The server terminated the subscription with an `error` frame.
	#[error("subscription error from server: {0}")]
	Server(String),

	/// A frame or payload could not be decoded. For `data` payloads this
	/// usually means the decode target type does not match the schema.
	#[error("failed decoding message, make sure the target type matches the graphql schema")]
	Decode(#[source] serde_json::Error),

	/// GraphQL field errors carried alongside (or instead of) the data of
	/// one `data` frame.
	#[error(transparent)]
	Fields(#[from] FieldErrors),

	/// Shutdown was invoked on a session that is already down.
	#[error("subscription is already down")]
	AlreadyDown,
}
