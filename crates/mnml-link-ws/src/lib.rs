//! WebSocket transport for `mnml-link`, backed by `tokio-tungstenite`.
//!
//! This crate provides the production [`Transport`](mnml_link::Transport)
//! implementation. Each handle runs its own I/O thread with a current-thread
//! tokio runtime, delivering open/message/close/error events from that
//! thread — the threading model the core's scheduler glue is built around.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mnml_link::ConnectionManager;
//! use mnml_link_ws::WsTransport;
//!
//! let manager = ConnectionManager::new(Arc::new(WsTransport::new()), scheduler);
//! ```

pub mod transport;

pub use transport::{WsHandle, WsTransport};
