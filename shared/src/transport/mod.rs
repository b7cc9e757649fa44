//! Transport seam between the engines and the network.
//!
//! The engines only need a reliable, ordered, connection-oriented channel of
//! discrete frames. A `Network` opens drivers, a `Driver` is polled once per
//! tick and never blocks.

pub mod loopback;
pub mod tcp;

use crate::error::NetError;
use std::fmt;

pub use loopback::{LoopbackDriver, LoopbackNetwork};
pub use tcp::{TcpDriver, TcpNetwork};

/// Value handle to one transport connection.
///
/// `internal_id` is the driver slot, reused once a connection is gone;
/// `version` changes on every reuse so stale handles never match new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    internal_id: u8,
    version: u16,
}

impl Connection {
    pub fn new(internal_id: u8, version: u16) -> Self {
        Self {
            internal_id,
            version,
        }
    }

    pub fn internal_id(&self) -> u8 {
        self.internal_id
    }

    pub fn version(&self) -> u16 {
        self.version
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.internal_id, self.version)
    }
}

/// What a driver hands back when a connection is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Nothing pending for this connection.
    Empty,
    /// Outbound connection finished its handshake.
    Connect,
    /// One complete frame.
    Data(Vec<u8>),
    /// Peer closed or the link failed. The handle is invalid after this.
    Disconnect,
}

/// One bound or connected transport endpoint.
pub trait Driver {
    /// Moves transport-side progress into the driver's queues.
    fn schedule_update(&mut self);

    /// Next connection accepted since the last call, if any.
    fn accept(&mut self) -> Option<Connection>;

    fn pop_event_for_connection(&mut self, connection: Connection) -> NetworkEvent;

    /// Queues one frame for `connection`.
    fn send(&mut self, connection: Connection, frame: Vec<u8>) -> Result<(), NetError>;

    /// Closes `connection` locally. No Disconnect event is produced for it.
    fn disconnect(&mut self, connection: Connection);

    /// True while the handle refers to a connection the driver still tracks.
    fn is_created(&self, connection: Connection) -> bool;
}

/// Factory for drivers, one per engine `init`.
pub trait Network {
    type Driver: Driver;

    /// Binds `port` on every interface and starts listening. At most
    /// `max_connections` connections are accepted at a time; the driver
    /// refuses any beyond that.
    fn listen(&self, port: u16, max_connections: usize) -> Result<Self::Driver, NetError>;

    /// Opens a single outbound connection.
    fn connect(&self, address: &str, port: u16) -> Result<(Self::Driver, Connection), NetError>;
}

/// Lowest free slot in `slots`, growing up to `capacity` entries.
pub(crate) fn free_slot<T>(slots: &mut Vec<Option<T>>, capacity: usize) -> Option<usize> {
    if let Some(index) = slots.iter().position(Option::is_none) {
        return Some(index);
    }
    if slots.len() < capacity {
        slots.push(None);
        return Some(slots.len() - 1);
    }
    None
}
