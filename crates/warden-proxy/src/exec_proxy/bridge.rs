//! Relay between the caller's WebSocket and the environment's

use axum::extract::ws::{Message, WebSocket};
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderValue;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::websocket::{backend_to_client, client_to_backend};
use crate::error::{Error, Result};
use crate::transport::UpgradeTarget;

/// WebSocket dialled to an environment
pub type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the environment's exec endpoint
///
/// `protocols` is the caller's `Sec-WebSocket-Protocol` offer. Returns the
/// stream and the subprotocol the environment selected.
pub async fn connect_backend(
    target: &UpgradeTarget,
    protocols: Option<&HeaderValue>,
) -> Result<(BackendStream, Option<String>)> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::BadRequest(format!("invalid exec URL: {}", e)))?;
    request.headers_mut().extend(target.headers.clone());
    if let Some(protocols) = protocols {
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocols.clone());
    }

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(target.accept_invalid_certs)
        .build()
        .map_err(|e| Error::Config(format!("failed to build TLS connector: {}", e)))?;

    let (stream, response) =
        connect_async_tls_with_config(request, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| Error::Proxy(format!("exec connection failed: {}", e)))?;

    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(protocol = ?protocol, "Exec backend connected");
    Ok((stream, protocol))
}

/// Relay frames until either side closes
///
/// The first pump to finish reports on a capacity-one channel and both are
/// torn down.
pub async fn bridge(client: WebSocket, backend: BackendStream) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();
    let (done_tx, mut done_rx) = mpsc::channel::<&'static str>(1);

    let done = done_tx.clone();
    let upstream = tokio::spawn(async move {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, Message::Close(_));
            if let Some(message) = client_to_backend(message) {
                if let Err(e) = backend_tx.send(message).await {
                    warn!(error = %e, "Failed to send to exec backend");
                    break;
                }
            }
            if closing {
                break;
            }
        }
        let _ = backend_tx.close().await;
        let _ = done.try_send("client");
    });

    let done = done_tx;
    let downstream = tokio::spawn(async move {
        while let Some(Ok(message)) = backend_rx.next().await {
            let closing = matches!(
                message,
                tokio_tungstenite::tungstenite::Message::Close(_)
            );
            if let Some(message) = backend_to_client(message) {
                if client_tx.send(message).await.is_err() {
                    break;
                }
            }
            if closing {
                break;
            }
        }
        let _ = client_tx.close().await;
        let _ = done.try_send("backend");
    });

    let ended_by = done_rx.recv().await.unwrap_or("unknown");
    upstream.abort();
    downstream.abort();
    debug!(ended_by, "Exec session ended");
}
