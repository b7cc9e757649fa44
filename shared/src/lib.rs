//! # Shared Networking Core
//!
//! Everything both sides of a lobby session agree on: the wire protocol, the
//! dispatch table that routes received messages to domain code, and the
//! transport seam the engines are polled through.
//!
//! ## Protocol (`protocol`, `player`)
//! Every frame is an opcode byte followed by the variant's payload. The set of
//! messages is closed (`NetMessage`), so adding a message means adding one
//! variant and one arm to each match in `protocol`.
//!
//! ## Dispatch (`dispatch`)
//! Parsing never runs game logic. A parsed message only publishes itself on a
//! `NetDispatch`, separately for the server and client directions, and domain
//! code subscribes per opcode.
//!
//! ## Transport (`transport`)
//! Engines see a `Driver` that is polled once per tick. Two are provided:
//! - `LoopbackNetwork`: in-process, for a host running server and client
//!   together and for deterministic tests
//! - `TcpNetwork`: length-prefixed frames over TCP on the tokio runtime
//!
//! ## Threading
//! All engine work happens inside synchronous ticks on one thread. Only the
//! TCP driver's socket tasks run elsewhere, and they talk to the driver
//! exclusively through a channel drained during the tick.

pub mod dispatch;
pub mod error;
pub mod player;
pub mod protocol;
pub mod transport;

pub use dispatch::{NetDispatch, SubscriptionId};
pub use error::{NetError, ProtocolError};
pub use player::{Player, MAX_NAME_LEN};
pub use protocol::{NetMessage, OpCode, MAX_FRAME_LEN};
pub use transport::{Connection, Driver, LoopbackNetwork, Network, NetworkEvent, TcpNetwork};

/// Lifecycle of a server or client engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No transport bound.
    #[default]
    Inactive,
    /// Transport bound, ticks do work.
    Active,
    /// Shutdown requested; resources are released at the end of the next tick.
    ShuttingDown,
}

impl EngineState {
    pub fn is_running(self) -> bool {
        !matches!(self, EngineState::Inactive)
    }
}
