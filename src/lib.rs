// SPDX-License-Identifier: MIT

//! GraphQL subscription client speaking the GraphQL-over-WebSocket protocol.
//!
//! This crate implements the client side of the common GraphQL subscription
//! protocol: it opens a persistent WebSocket connection, performs the
//! `connection_init` / `start` handshake, and runs an independent reader task
//! that demultiplexes server frames into typed messages delivered through a
//! bounded queue.
//!
//! # Message Protocol
//!
//! All frames are JSON-formatted with the following structure:
//!
//! ```json
//! {
//!   "type": "connection_init|connection_ack|connection_keep_alive|start|data|error|complete",
//!   "id": "1",
//!   "payload": { ... }
//! }
//! ```
//!
//! A connection carries exactly one logical subscription under the hardcoded
//! operation id `"1"`; there is no multi-operation multiplexing.
//!
//! # Example
//!
//! ```no_run
//! use gql_subscription::{Payload, Subscription, SubscriptionOptions};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct MessageAdded {
//! 	#[serde(rename = "messageAdded")]
//! 	message_added: Message,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Message {
//! 	text: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! 	let mut sub = Subscription::<MessageAdded>::open(
//! 		"ws://localhost:8080/graphql",
//! 		r#"subscription { messageAdded(roomName: "general") { text } }"#,
//! 		SubscriptionOptions::new().with_token("bearer-token"),
//! 	)
//! 	.await?;
//!
//! 	while let Some(message) = sub.recv().await {
//! 		if let Some(Payload::Data(added)) = message.payload {
//! 			println!("{}", added.message_added.text);
//! 		}
//! 	}
//!
//! 	sub.shutdown().await?;
//! 	Ok(())
//! }
//! ```

mod error;
mod protocol;
mod request;
pub mod subscription;

pub use error::Error;
pub use protocol::{FieldErrors, GraphQlError, Location, MessageType, OperationMessage, Response};
pub use request::{Request, add_var_names};
pub use subscription::{
	Drainable, Message, OverflowPolicy, Payload, Subscription, SubscriptionOptions,
};
