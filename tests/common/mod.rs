// SPDX-License-Identifier: MIT

//! Shared mock subscription server for integration tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
	net::{TcpListener, TcpStream},
	sync::oneshot,
	task::JoinHandle,
};
use tokio_tungstenite::{
	WebSocketStream, accept_async, accept_hdr_async,
	tungstenite::{
		Message as WsMessage,
		handshake::server::{ErrorResponse, Request, Response},
	},
};

/// One scripted server step, played after the subscription handshake.
#[allow(dead_code)]
pub enum Step {
	/// Send a `data` frame with the given response envelope.
	Data(Value),
	KeepAlive,
	/// Send a terminal `error` frame with the given payload.
	Error(Value),
	Complete,
	/// Send an arbitrary frame.
	Raw(Value),
}

impl Step {
	fn into_frame(self) -> Value {
		match self {
			Step::Data(payload) => json!({"type": "data", "id": "1", "payload": payload}),
			Step::KeepAlive => json!({"type": "connection_keep_alive"}),
			Step::Error(payload) => json!({"type": "error", "id": "1", "payload": payload}),
			Step::Complete => json!({"type": "complete", "id": "1"}),
			Step::Raw(frame) => frame,
		}
	}
}

/// Spawn a one-connection mock server.
///
/// The server asserts the `connection_init` / `start` exchange (including
/// query text and variables), replies `connection_ack`, plays the script,
/// and then holds the socket open until the client closes it.
///
/// Await the returned handle after shutting the client down to propagate
/// assertions made inside the server task.
pub async fn mock_sub_server(
	expected_query: &str,
	expected_vars: Value,
	script: Vec<Step>,
) -> (String, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let expected_query = expected_query.to_string();

	let handle = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = accept_async(stream).await.unwrap();

		read_handshake(&mut ws, &expected_query, &expected_vars).await;
		send_json(&mut ws, json!({"type": "connection_ack"})).await;

		for step in script {
			send_json(&mut ws, step.into_frame()).await;
		}

		hold_until_closed(ws).await;
	});

	(format!("ws://{}", addr), handle)
}

/// Like [`mock_sub_server`], but answers the handshake with the given frame
/// instead of `connection_ack`. The frame is only sent after the full
/// handshake has been read, so `open` completes deterministically.
#[allow(dead_code)]
pub async fn mock_sub_server_no_ack(first_frame: Value) -> (String, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let handle = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = accept_async(stream).await.unwrap();

		let init = next_json(&mut ws).await;
		assert_eq!(init["type"], "connection_init");
		let start = next_json(&mut ws).await;
		assert_eq!(start["type"], "start");

		send_json(&mut ws, first_frame).await;
		hold_until_closed(ws).await;
	});

	(format!("ws://{}", addr), handle)
}

/// Spawn a mock that captures the `Cookie` headers of the upgrade request
/// and delivers them through the returned receiver.
#[allow(dead_code)]
pub async fn mock_sub_server_capture_cookies(
	script: Vec<Step>,
) -> (String, oneshot::Receiver<Vec<String>>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (cookies_tx, cookies_rx) = oneshot::channel();

	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut captured = Vec::new();
		let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
			for value in request.headers().get_all("cookie") {
				captured.push(value.to_str().unwrap_or_default().to_string());
			}
			Ok(response)
		};
		let mut ws = accept_hdr_async(stream, callback).await.unwrap();
		let _ = cookies_tx.send(captured);

		let _ = next_json(&mut ws).await;
		send_json(&mut ws, json!({"type": "connection_ack"})).await;
		let _ = next_json(&mut ws).await;

		for step in script {
			send_json(&mut ws, step.into_frame()).await;
		}
		hold_until_closed(ws).await;
	});

	(format!("ws://{}", addr), cookies_rx)
}

/// Spawn a plain HTTP server that rejects the connection upgrade with the
/// given status.
#[allow(dead_code)]
pub async fn rejecting_server(status: u16, reason: &'static str) -> String {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	tokio::spawn(async move {
		let (mut stream, _) = listener.accept().await.unwrap();
		let mut buf = [0u8; 4096];
		let _ = stream.read(&mut buf).await;
		let response = format!("HTTP/1.1 {} {}\r\ncontent-length: 0\r\n\r\n", status, reason);
		let _ = stream.write_all(response.as_bytes()).await;
	});

	format!("ws://{}", addr)
}

async fn read_handshake(
	ws: &mut WebSocketStream<TcpStream>,
	expected_query: &str,
	expected_vars: &Value,
) {
	let init = next_json(ws).await;
	assert_eq!(init["type"], "connection_init");

	let start = next_json(ws).await;
	assert_eq!(start["type"], "start");
	assert_eq!(start["id"], "1");
	assert_eq!(start["payload"]["query"], expected_query);
	assert_eq!(&start["payload"]["variables"], expected_vars);
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
	loop {
		match ws.next().await {
			Some(Ok(WsMessage::Text(text))) => {
				return serde_json::from_str(text.as_str()).unwrap();
			}
			Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
			other => panic!("expected a text frame, got {:?}", other),
		}
	}
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
	ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
}

async fn hold_until_closed(mut ws: WebSocketStream<TcpStream>) {
	while let Some(Ok(message)) = ws.next().await {
		if matches!(message, WsMessage::Close(_)) {
			break;
		}
	}
}
