//! Error types shared by the protocol, the transports and both engines.

use crate::protocol::OpCode;
use crate::transport::Connection;
use thiserror::Error;

/// Failures while encoding or decoding a single frame.
///
/// A decode failure means the peer sent a payload whose shape does not match
/// its opcode. Engines log these and drop the frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is empty, no opcode tag")]
    EmptyFrame,

    #[error("unknown opcode {0}")]
    UnknownOpCode(u8),

    #[error("malformed payload (opcode {code:?}): {source}")]
    Malformed {
        code: Option<OpCode>,
        #[source]
        source: bincode::Error,
    },

    #[error("{remaining} trailing bytes after {code:?} payload")]
    TrailingBytes { code: OpCode, remaining: usize },

    #[error("player name is {len} bytes, max {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("frame is {len} bytes, max {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("failed to encode payload: {0}")]
    Encode(#[source] bincode::Error),
}

/// Transport and engine level failures.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("unable to bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is not active")]
    NotActive,

    #[error("connection {0} is not known to the driver")]
    UnknownConnection(Connection),

    #[error("transport rejected frame for connection {0}")]
    SendFailed(Connection),

    #[error("tcp transport needs a running tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
