// SPDX-License-Identifier: MIT

//! Wire types for the GraphQL-over-WebSocket subscription protocol.
//!
//! Every frame exchanged over the socket is one JSON object with a `type`
//! discriminator and optional `id` and `payload` fields.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single operation id used per connection.
///
/// The protocol supports multiplexing several operations over one socket, but
/// this client deliberately runs one subscription per connection.
pub(crate) const OPERATION_ID: &str = "1";

/// Frame discriminator.
///
/// `Unknown` catches any type this client does not speak, so an unrecognized
/// frame is rejected as a protocol violation rather than a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum MessageType {
	ConnectionInit,
	ConnectionAck,
	ConnectionKeepAlive,
	Start,
	Data,
	Error,
	Complete,
	Unknown,
}

impl From<String> for MessageType {
	fn from(name: String) -> Self {
		match name.as_str() {
			"connection_init" => Self::ConnectionInit,
			"connection_ack" => Self::ConnectionAck,
			"connection_keep_alive" => Self::ConnectionKeepAlive,
			"start" => Self::Start,
			"data" => Self::Data,
			"error" => Self::Error,
			"complete" => Self::Complete,
			_ => Self::Unknown,
		}
	}
}

/// One JSON-encoded protocol frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMessage {
	pub r#type: MessageType,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
}

impl OperationMessage {
	/// The first client frame of the handshake, sent with an empty payload.
	pub(crate) fn connection_init() -> Self {
		Self {
			r#type: MessageType::ConnectionInit,
			id: None,
			payload: None,
		}
	}

	/// The second client frame of the handshake, carrying `{query, variables}`.
	pub(crate) fn start(payload: Value) -> Self {
		Self {
			r#type: MessageType::Start,
			id: Some(OPERATION_ID.to_string()),
			payload: Some(payload),
		}
	}
}

/// Source position of a GraphQL field error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Location {
	#[serde(default)]
	pub line: u32,
	#[serde(default)]
	pub column: u32,
}

/// A single entry of the `errors` array in a GraphQL response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
	pub message: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub locations: Vec<Location>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub path: Vec<String>,
}

impl Display for GraphQlError {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.path.is_empty() {
			write!(f, "message: {}", self.message)
		} else {
			write!(f, "message: {} (path {})", self.message, self.path.join("/"))
		}
	}
}

impl std::error::Error for GraphQlError {}

/// All field errors carried by one `data` frame, aggregated into a single
/// error value so a message never splits one server response across several
/// deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldErrors(pub Vec<GraphQlError>);

impl FieldErrors {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &GraphQlError> {
		self.0.iter()
	}
}

impl Display for FieldErrors {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for error in &self.0 {
			if !first {
				write!(f, "; ")?;
			}
			write!(f, "{}", error)?;
			first = false;
		}
		Ok(())
	}
}

impl std::error::Error for FieldErrors {}

/// The standard GraphQL response envelope carried by `data` frames.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T> {
	pub data: Option<T>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<GraphQlError>,
}
