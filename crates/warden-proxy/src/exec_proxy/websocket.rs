//! WebSocket utilities for exec sessions
//!
//! Helpers for the K8s channel protocol and for converting frames between
//! the axum (caller side) and tungstenite (backend side) message types.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::Message as BackendMessage;

/// K8s WebSocket channel IDs
pub mod channel {
    /// Channel 0: stdin
    pub const STDIN: u8 = 0;
    /// Channel 1: stdout
    pub const STDOUT: u8 = 1;
    /// Channel 2: stderr
    pub const STDERR: u8 = 2;
    /// Channel 3: error
    pub const ERROR: u8 = 3;
    /// Channel 4: terminal resize
    pub const RESIZE: u8 = 4;
}

/// K8s WebSocket subprotocols in order of preference
pub const K8S_PROTOCOLS: [&str; 5] = [
    "v5.channel.k8s.io",
    "v4.channel.k8s.io",
    "v3.channel.k8s.io",
    "v2.channel.k8s.io",
    "channel.k8s.io",
];

const NORMAL_CLOSE: u16 = 1000;

/// Check if headers indicate a WebSocket upgrade request
pub fn has_websocket_upgrade_headers(headers: &HeaderMap) -> bool {
    let has_upgrade = headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let has_connection = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    has_upgrade && has_connection
}

/// Build a K8s WebSocket message with channel prefix
pub fn build_k8s_message(channel: u8, data: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(1 + data.len());
    msg.push(channel);
    msg.extend_from_slice(data);
    msg
}

/// Send an error on the K8s error channel, then close the WebSocket
///
/// kubectl and browser terminals show errors from channel 3, not from the
/// close frame reason.
pub async fn send_k8s_error_and_close(
    sender: &mut SplitSink<WebSocket, Message>,
    error: impl Into<String>,
) {
    let error_msg = build_k8s_message(channel::ERROR, error.into().as_bytes());
    let _ = sender.send(Message::Binary(error_msg.into())).await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: NORMAL_CLOSE,
            reason: "".into(),
        })))
        .await;
}

/// Caller frame as sent to the backend
///
/// Ping and pong are answered per hop and not relayed.
pub fn client_to_backend(message: Message) -> Option<BackendMessage> {
    match message {
        Message::Binary(data) => Some(BackendMessage::Binary(data)),
        Message::Text(text) => Some(BackendMessage::Text(text.as_str().into())),
        Message::Close(frame) => Some(BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Backend frame as sent to the caller
pub fn backend_to_client(message: BackendMessage) -> Option<Message> {
    match message {
        BackendMessage::Binary(data) => Some(Message::Binary(data)),
        BackendMessage::Text(text) => Some(Message::Text(text.as_str().into())),
        BackendMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        }))),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => None,
    }
}
