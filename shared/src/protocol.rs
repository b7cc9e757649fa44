//! Wire protocol: an opcode tag followed by the variant's payload.
//!
//! ```text
//! [0]   : opcode (OpCode as u8)
//! [1..] : payload fields, in declaration order
//!
//! KEEP_ALIVE (1):  no payload
//! WELCOME    (2):  assigned_id u8
//! JOIN       (3):  player { id u8, name (u64 LE len + UTF-8), ready bool, is_host bool }
//! DISCONNECT (4):  player_id u8
//! READY      (5):  player_id u8, ready bool
//! START_GAME (6):  first_turn u8
//! MAKE_MOVE  (7):  player_id u8, x u8, y u8
//! ```
//!
//! Payload fields go through bincode with fixed-width integers, so strings
//! and collections carry their own length prefix. A frame holds exactly one
//! message; the transport is responsible for delimiting frames.

use crate::dispatch::NetDispatch;
use crate::error::ProtocolError;
use crate::player::Player;
use crate::transport::Connection;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame either side will encode or accept.
pub const MAX_FRAME_LEN: usize = 4096;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_FRAME_LEN as u64)
}

/// Identifies a message variant on the wire. Values must never be reused.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpCode {
    KeepAlive = 1,
    Welcome = 2,
    Join = 3,
    Disconnect = 4,
    Ready = 5,
    StartGame = 6,
    MakeMove = 7,
}

impl OpCode {
    pub const ALL: [OpCode; 7] = [
        OpCode::KeepAlive,
        OpCode::Welcome,
        OpCode::Join,
        OpCode::Disconnect,
        OpCode::Ready,
        OpCode::StartGame,
        OpCode::MakeMove,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(OpCode::KeepAlive),
            2 => Some(OpCode::Welcome),
            3 => Some(OpCode::Join),
            4 => Some(OpCode::Disconnect),
            5 => Some(OpCode::Ready),
            6 => Some(OpCode::StartGame),
            7 => Some(OpCode::MakeMove),
            _ => None,
        }
    }
}

/// Append-only buffer a message serializes itself into.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
        }
    }

    pub fn write_op_code(&mut self, code: OpCode) {
        self.buf.push(code as u8);
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        wire_options()
            .serialize_into(&mut self.buf, value)
            .map_err(ProtocolError::Encode)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over one received frame.
///
/// Remembers the opcode once it has been read so decode errors can name the
/// variant that failed.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    code: Option<OpCode>,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, code: None }
    }

    pub fn with_code(mut self, code: OpCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn read_op_code(&mut self) -> Result<OpCode, ProtocolError> {
        let (&tag, rest) = self.buf.split_first().ok_or(ProtocolError::EmptyFrame)?;
        let code = OpCode::from_u8(tag).ok_or(ProtocolError::UnknownOpCode(tag))?;
        self.buf = rest;
        self.code = Some(code);
        Ok(code)
    }

    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let code = self.code;
        wire_options()
            .deserialize_from(&mut self.buf)
            .map_err(|source| ProtocolError::Malformed { code, source })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetWelcome {
    pub assigned_id: u8,
}

impl NetWelcome {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(&self.assigned_id)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            assigned_id: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetJoin {
    pub player: Player,
}

impl NetJoin {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        self.player.serialize(writer)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player: Player::deserialize(reader)?,
        })
    }
}

/// Sent by the server when the connection with `player_id` goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDisconnect {
    pub player_id: u8,
}

impl NetDisconnect {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(&self.player_id)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetReady {
    pub player_id: u8,
    pub ready: bool,
}

impl NetReady {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(&self.player_id)?;
        writer.write(&self.ready)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: reader.read()?,
            ready: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetStartGame {
    pub first_turn: u8,
}

impl NetStartGame {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(&self.first_turn)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            first_turn: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetMakeMove {
    pub player_id: u8,
    pub x: u8,
    pub y: u8,
}

impl NetMakeMove {
    fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(&self.player_id)?;
        writer.write(&self.x)?;
        writer.write(&self.y)
    }

    fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: reader.read()?,
            x: reader.read()?,
            y: reader.read()?,
        })
    }
}

/// Every message that can travel between client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetMessage {
    KeepAlive,
    Welcome(NetWelcome),
    Join(NetJoin),
    Disconnect(NetDisconnect),
    Ready(NetReady),
    StartGame(NetStartGame),
    MakeMove(NetMakeMove),
}

impl NetMessage {
    pub fn join(player: Player) -> Self {
        NetMessage::Join(NetJoin { player })
    }

    pub fn disconnect(player_id: u8) -> Self {
        NetMessage::Disconnect(NetDisconnect { player_id })
    }

    pub fn code(&self) -> OpCode {
        match self {
            NetMessage::KeepAlive => OpCode::KeepAlive,
            NetMessage::Welcome(_) => OpCode::Welcome,
            NetMessage::Join(_) => OpCode::Join,
            NetMessage::Disconnect(_) => OpCode::Disconnect,
            NetMessage::Ready(_) => OpCode::Ready,
            NetMessage::StartGame(_) => OpCode::StartGame,
            NetMessage::MakeMove(_) => OpCode::MakeMove,
        }
    }

    /// Writes the opcode tag, then the variant's fields.
    pub fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write_op_code(self.code());
        match self {
            NetMessage::KeepAlive => Ok(()),
            NetMessage::Welcome(msg) => msg.serialize(writer),
            NetMessage::Join(msg) => msg.serialize(writer),
            NetMessage::Disconnect(msg) => msg.serialize(writer),
            NetMessage::Ready(msg) => msg.serialize(writer),
            NetMessage::StartGame(msg) => msg.serialize(writer),
            NetMessage::MakeMove(msg) => msg.serialize(writer),
        }
    }

    /// Reads the payload of the variant selected by `code`. The tag itself
    /// must already have been consumed.
    pub fn deserialize(code: OpCode, reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        let message = match code {
            OpCode::KeepAlive => NetMessage::KeepAlive,
            OpCode::Welcome => NetMessage::Welcome(NetWelcome::deserialize(reader)?),
            OpCode::Join => NetMessage::Join(NetJoin::deserialize(reader)?),
            OpCode::Disconnect => NetMessage::Disconnect(NetDisconnect::deserialize(reader)?),
            OpCode::Ready => NetMessage::Ready(NetReady::deserialize(reader)?),
            OpCode::StartGame => NetMessage::StartGame(NetStartGame::deserialize(reader)?),
            OpCode::MakeMove => NetMessage::MakeMove(NetMakeMove::deserialize(reader)?),
        };
        Ok(message)
    }

    /// Encodes this message into a fresh buffer.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut writer = FrameWriter::new();
        self.serialize(&mut writer)?;
        if writer.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: writer.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(writer.into_bytes())
    }

    /// Decodes one complete frame. Every byte must be consumed.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }

        let mut reader = FrameReader::new(frame);
        let code = reader.read_op_code()?;
        let message = Self::deserialize(code, &mut reader)?;

        if reader.remaining() > 0 {
            return Err(ProtocolError::TrailingBytes {
                code,
                remaining: reader.remaining(),
            });
        }
        Ok(message)
    }

    /// Server-side reaction: notify everything subscribed to this opcode.
    pub fn received_on_server(&self, connection: Connection, dispatch: &mut NetDispatch) {
        dispatch.publish_on_server(self, connection);
    }

    /// Client-side reaction: notify everything subscribed to this opcode.
    pub fn received_on_client(&self, dispatch: &mut NetDispatch) {
        dispatch.publish_on_client(self);
    }
}
