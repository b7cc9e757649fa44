//! # Lobby Client Library
//!
//! The client side of a lobby session: a tick-driven engine holding one
//! outbound connection, and a session view rebuilt from the messages the
//! server sends.
//!
//! ## Architecture Overview
//!
//! ### Engine
//! `Client::init` connects and immediately queues a JOIN carrying the display
//! name. Every `update` services the transport and drains all pending events:
//! frames are parsed and published on the dispatch table, and a disconnect
//! from the server returns the engine to `Inactive` and fires the
//! server-disconnect callback.
//!
//! ### Keep-Alive Echo
//! A KEEP_ALIVE from the server is answered inside the same tick, before the
//! message is published, unless `ClientConfig::echo_keep_alive` is off.
//!
//! ### Session View
//! `Session` subscribes to the lobby opcodes and keeps the roster, the id the
//! server assigned, and the moves relayed so far.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The `Client` engine.
//!
//! ### Session Module (`session`)
//! Roster and game progress as seen by this client.
//!
//! ### Config Module (`config`)
//! Defaults for address, port and keep-alive echo.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{Client, ClientConfig, Session};
//! use shared::{NetDispatch, TcpNetwork};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut dispatch = NetDispatch::new();
//!     let session = Session::new();
//!     session.attach(&mut dispatch);
//!
//!     let mut client = Client::new(TcpNetwork, ClientConfig::default());
//!     client.init("127.0.0.1", 8007, "Alice")?;
//!
//!     while client.is_active() {
//!         client.update(&mut dispatch);
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod session;

pub use config::ClientConfig;
pub use network::Client;
pub use session::{Session, SessionState};
