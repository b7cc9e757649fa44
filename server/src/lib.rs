//! # Lobby Server Library
//!
//! The server side of a lobby session: a tick-driven engine that accepts
//! clients, keeps their connections alive, and hands every message it
//! receives to the dispatch table, plus the lobby roster built on top of it.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Each tick the engine services its transport, drops connections the
//! transport no longer reports, accepts new ones, and drains every pending
//! event per connection. A client that goes away is announced to everyone
//! else with a DISCONNECT carrying its id.
//!
//! ### Keep-Alive
//! A KEEP_ALIVE goes to every client once per configured interval (20 seconds
//! by default) so idle connections are not reaped by the transport.
//!
//! ### Shutdown
//! `shutdown` disconnects every client immediately; the transport itself is
//! released at the end of the following tick.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Ordered list of live connection handles with swap-back compaction.
//!
//! ### Network Module (`network`)
//! The `Server` engine: init, update, shutdown, and the send family.
//!
//! ### Lobby Module (`lobby`)
//! Roster, ready checks, and move relaying. Pure state; it returns messages
//! for the caller to send.
//!
//! ### Config Module (`config`)
//! Defaults and validation for the engine settings.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::{NetDispatch, TcpNetwork};
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut dispatch = NetDispatch::new();
//!     let mut server = Server::new(TcpNetwork, ServerConfig::default());
//!     server.init(8007, 10)?;
//!
//!     loop {
//!         server.update(Instant::now(), &mut dispatch);
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//! }
//! ```

pub mod config;
pub mod lobby;
pub mod network;
pub mod registry;

pub use config::ServerConfig;
pub use lobby::{Lobby, LobbyInbox, Outgoing};
pub use network::Server;
pub use registry::ConnectionRegistry;
