use crate::error::ProtocolError;
use crate::protocol::{FrameReader, FrameWriter};
use serde::{Deserialize, Serialize};

/// Longest display name accepted on the wire, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Identity of a player as it travels inside JOIN and roster messages.
///
/// Field order is the wire order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u8,
    pub name: String,
    pub ready: bool,
    pub is_host: bool,
}

impl Player {
    /// Creates a player that is not ready and not the host.
    ///
    /// Names longer than `MAX_NAME_LEN` bytes are cut at the last char
    /// boundary that fits.
    pub fn new(id: u8, name: &str) -> Self {
        Self {
            id,
            name: truncate_name(name).to_string(),
            ready: false,
            is_host: false,
        }
    }

    pub fn serialize(&self, writer: &mut FrameWriter) -> Result<(), ProtocolError> {
        writer.write(self)
    }

    pub fn deserialize(reader: &mut FrameReader<'_>) -> Result<Self, ProtocolError> {
        let player: Player = reader.read()?;
        if player.name.len() > MAX_NAME_LEN {
            return Err(ProtocolError::NameTooLong {
                len: player.name.len(),
                max: MAX_NAME_LEN,
            });
        }
        Ok(player)
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn roundtrip(player: &Player) -> Player {
        let mut writer = FrameWriter::new();
        player.serialize(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = FrameReader::new(&bytes);
        let decoded = Player::deserialize(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        decoded
    }

    #[test]
    fn test_player_creation() {
        let player = Player::new(3, "Alice");
        assert_eq!(player.id, 3);
        assert_eq!(player.name, "Alice");
        assert!(!player.ready);
        assert!(!player.is_host);
    }

    #[test]
    fn test_long_name_is_truncated() {
        let player = Player::new(1, &"x".repeat(MAX_NAME_LEN + 10));
        assert_eq!(player.name.len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes, so 17 of them straddle the limit
        let player = Player::new(1, &"é".repeat(17));
        assert_eq!(player.name.len(), 32);
        assert_eq!(player.name.chars().count(), 16);

        let odd = format!("a{}", "é".repeat(16));
        let player = Player::new(1, &odd);
        assert_eq!(player.name.len(), 31);
    }

    #[test]
    fn test_roundtrip_empty_name() {
        let player = Player::new(0, "");
        assert_eq!(roundtrip(&player), player);
    }

    #[test]
    fn test_roundtrip_max_length_name() {
        let mut player = Player::new(255, &"z".repeat(MAX_NAME_LEN));
        player.ready = true;
        player.is_host = true;
        assert_eq!(roundtrip(&player), player);
    }

    #[test]
    fn test_roundtrip_id_bounds() {
        for id in [0u8, 255] {
            let player = Player::new(id, "Bob");
            assert_eq!(roundtrip(&player).id, id);
        }
    }

    #[test]
    fn test_oversized_name_rejected_on_decode() {
        let player = Player {
            id: 1,
            name: "n".repeat(MAX_NAME_LEN + 1),
            ready: false,
            is_host: false,
        };
        let mut writer = FrameWriter::new();
        player.serialize(&mut writer).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = FrameReader::new(&bytes);
        match Player::deserialize(&mut reader) {
            Err(ProtocolError::NameTooLong { len, max }) => {
                assert_eq!(len, MAX_NAME_LEN + 1);
                assert_eq!(max, MAX_NAME_LEN);
            }
            other => panic!("expected NameTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_player_is_malformed() {
        let mut writer = FrameWriter::new();
        Player::new(9, "Carol").serialize(&mut writer).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = FrameReader::new(&bytes[..bytes.len() - 2]).with_code(OpCode::Join);
        assert!(matches!(
            Player::deserialize(&mut reader),
            Err(ProtocolError::Malformed {
                code: Some(OpCode::Join),
                ..
            })
        ));
    }
}
