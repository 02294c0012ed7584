//! Exec sessions over WebSocket
//!
//! The caller's WebSocket is accepted by the gateway and bridged to a second
//! WebSocket dialled to the environment with the caller's backend
//! credential. Frames are relayed unchanged in both directions.

mod bridge;
mod websocket;

pub use bridge::{bridge, connect_backend, BackendStream};
pub use websocket::{
    backend_to_client, channel, client_to_backend, has_websocket_upgrade_headers,
    send_k8s_error_and_close, K8S_PROTOCOLS,
};
