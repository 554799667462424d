use bytes::{Buf, BufMut, BytesMut};
use chisel_types::FixedPos;

use crate::codec::{pack_string, unpack_string, CodecError, CodecResult, StringMode};

/// Payload size of a level data chunk, always padded to this length.
pub const LEVEL_CHUNK_LEN: usize = 1024;

/// Maximum number of block changes one BulkBlockUpdate packet carries.
pub const BULK_UPDATE_LEN: usize = 256;

/// A packet sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// 0x00 — the login handshake.
    PlayerIdentification {
        protocol_version: u8,
        username: String,
        verification_key: String,
        magic: u8,
    },
    /// 0x05 — place or break a block.
    UpdateBlock {
        x: i16,
        y: i16,
        z: i16,
        mode: u8,
        block_id: u8,
    },
    /// 0x08 — the client's own position (player id is always 0xFF).
    MovementUpdate { player_id: u8, pos: FixedPos },
    /// 0x0D — chat message or command.
    PlayerMessage { flag: u8, message: String },
    /// 0x10 — CPE handshake header.
    ExtInfo { app_name: String, ext_count: i16 },
    /// 0x11 — one CPE extension supported by the client.
    ExtEntry { ext_name: String, ext_version: i32 },
}

impl ClientPacket {
    pub fn id(&self) -> u8 {
        match self {
            ClientPacket::PlayerIdentification { .. } => 0x00,
            ClientPacket::UpdateBlock { .. } => 0x05,
            ClientPacket::MovementUpdate { .. } => 0x08,
            ClientPacket::PlayerMessage { .. } => 0x0D,
            ClientPacket::ExtInfo { .. } => 0x10,
            ClientPacket::ExtEntry { .. } => 0x11,
        }
    }

    /// Total on-wire size (including the id byte) for a client packet id.
    pub fn size_of(id: u8) -> Option<usize> {
        match id {
            0x00 => Some(131),
            0x05 => Some(9),
            0x08 => Some(10),
            0x0D => Some(66),
            0x10 => Some(67),
            0x11 => Some(69),
            _ => None,
        }
    }

    /// Whether this packet is accepted during the in-game player loop
    /// (as opposed to the identification/negotiation phase).
    pub fn in_player_loop(id: u8) -> bool {
        matches!(id, 0x05 | 0x08 | 0x0D)
    }

    /// Decode a packet body (everything after the id byte).
    pub fn decode(id: u8, body: &[u8], mode: StringMode) -> CodecResult<Self> {
        let expected = Self::size_of(id).ok_or(CodecError::UnknownPacket(id))? - 1;
        if body.len() != expected {
            return Err(CodecError::NotEnoughData {
                expected,
                got: body.len(),
            });
        }
        let mut buf = body;
        let packet = match id {
            0x00 => {
                let protocol_version = buf.get_u8();
                let username = unpack_string(&buf[..64], mode);
                buf.advance(64);
                let verification_key = unpack_string(&buf[..64], mode);
                buf.advance(64);
                let magic = buf.get_u8();
                ClientPacket::PlayerIdentification {
                    protocol_version,
                    username,
                    verification_key,
                    magic,
                }
            }
            0x05 => ClientPacket::UpdateBlock {
                x: buf.get_i16(),
                y: buf.get_i16(),
                z: buf.get_i16(),
                mode: buf.get_u8(),
                block_id: buf.get_u8(),
            },
            0x08 => {
                let player_id = buf.get_u8();
                let x = buf.get_i16();
                let y = buf.get_i16();
                let z = buf.get_i16();
                let yaw = buf.get_u8();
                let pitch = buf.get_u8();
                ClientPacket::MovementUpdate {
                    player_id,
                    pos: FixedPos::new(x, y, z, yaw, pitch),
                }
            }
            0x0D => {
                let flag = buf.get_u8();
                let message = unpack_string(&buf[..64], mode);
                ClientPacket::PlayerMessage { flag, message }
            }
            0x10 => {
                let app_name = unpack_string(&buf[..64], mode);
                buf.advance(64);
                let ext_count = buf.get_i16();
                ClientPacket::ExtInfo {
                    app_name,
                    ext_count,
                }
            }
            0x11 => {
                let ext_name = unpack_string(&buf[..64], mode);
                buf.advance(64);
                let ext_version = buf.get_i32();
                ClientPacket::ExtEntry {
                    ext_name,
                    ext_version,
                }
            }
            _ => return Err(CodecError::UnknownPacket(id)),
        };
        Ok(packet)
    }

    /// Encode a client packet back to its wire form (id byte included).
    pub fn encode(&self, mode: StringMode) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::size_of(self.id()).unwrap_or(64));
        buf.put_u8(self.id());
        match self {
            ClientPacket::PlayerIdentification {
                protocol_version,
                username,
                verification_key,
                magic,
            } => {
                buf.put_u8(*protocol_version);
                buf.put_slice(&pack_string(username, mode));
                buf.put_slice(&pack_string(verification_key, mode));
                buf.put_u8(*magic);
            }
            ClientPacket::UpdateBlock {
                x,
                y,
                z,
                mode: update_mode,
                block_id,
            } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*update_mode);
                buf.put_u8(*block_id);
            }
            ClientPacket::MovementUpdate { player_id, pos } => {
                buf.put_u8(*player_id);
                put_fixed_pos(&mut buf, pos);
            }
            ClientPacket::PlayerMessage { flag, message } => {
                buf.put_u8(*flag);
                buf.put_slice(&pack_string(message, mode));
            }
            ClientPacket::ExtInfo {
                app_name,
                ext_count,
            } => {
                buf.put_slice(&pack_string(app_name, mode));
                buf.put_i16(*ext_count);
            }
            ClientPacket::ExtEntry {
                ext_name,
                ext_version,
            } => {
                buf.put_slice(&pack_string(ext_name, mode));
                buf.put_i32(*ext_version);
            }
        }
        buf
    }
}

/// A packet sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// 0x00 — handshake reply: server name, MOTD, op flag.
    ServerIdentification {
        protocol_version: u8,
        name: String,
        motd: String,
        is_op: bool,
    },
    /// 0x01 — keepalive.
    Ping,
    /// 0x02 — start of a level transfer.
    LevelInitialize,
    /// 0x03 — one 1024-byte slice of the gzipped map stream.
    LevelDataChunk { data: Vec<u8>, percent: u8 },
    /// 0x04 — end of a level transfer, carrying the world dimensions.
    LevelFinalize { x: i16, y: i16, z: i16 },
    /// 0x06 — one authoritative block change.
    SetBlock { x: i16, y: i16, z: i16, block_id: u8 },
    /// 0x07 — a player entering view.
    SpawnPlayer {
        player_id: u8,
        name: String,
        pos: FixedPos,
    },
    /// 0x08 — absolute position/orientation update.
    PlayerPositionUpdate { player_id: u8, pos: FixedPos },
    /// 0x0C — a player leaving view.
    DespawnPlayer { player_id: u8 },
    /// 0x0D — chat line.
    Message { player_id: u8, message: String },
    /// 0x0E — connection termination with a reason.
    DisconnectPlayer { reason: String },
    /// 0x0F — op status change (0x64 = op, 0x00 = normal).
    UpdateUserType { is_op: bool },
    /// 0x10 — CPE handshake header.
    ExtInfo { app_name: String, ext_count: i16 },
    /// 0x11 — one CPE extension supported by the server.
    ExtEntry { ext_name: String, ext_version: i32 },
    /// 0x12 — CPE ClickDistance: how far the client may reach.
    SetClickDistance { distance: i16 },
    /// 0x26 — up to 256 block changes addressed by linear map index.
    BulkBlockUpdate {
        indices: Vec<i32>,
        block_ids: Vec<u8>,
    },
}

impl ServerPacket {
    pub fn id(&self) -> u8 {
        match self {
            ServerPacket::ServerIdentification { .. } => 0x00,
            ServerPacket::Ping => 0x01,
            ServerPacket::LevelInitialize => 0x02,
            ServerPacket::LevelDataChunk { .. } => 0x03,
            ServerPacket::LevelFinalize { .. } => 0x04,
            ServerPacket::SetBlock { .. } => 0x06,
            ServerPacket::SpawnPlayer { .. } => 0x07,
            ServerPacket::PlayerPositionUpdate { .. } => 0x08,
            ServerPacket::DespawnPlayer { .. } => 0x0C,
            ServerPacket::Message { .. } => 0x0D,
            ServerPacket::DisconnectPlayer { .. } => 0x0E,
            ServerPacket::UpdateUserType { .. } => 0x0F,
            ServerPacket::ExtInfo { .. } => 0x10,
            ServerPacket::ExtEntry { .. } => 0x11,
            ServerPacket::SetClickDistance { .. } => 0x12,
            ServerPacket::BulkBlockUpdate { .. } => 0x26,
        }
    }

    /// Critical packets must reach the client even while a connection is
    /// being torn down; dropping one desyncs the session irrecoverably.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ServerPacket::ServerIdentification { .. }
                | ServerPacket::LevelInitialize
                | ServerPacket::LevelDataChunk { .. }
                | ServerPacket::LevelFinalize { .. }
                | ServerPacket::DespawnPlayer { .. }
                | ServerPacket::DisconnectPlayer { .. }
                | ServerPacket::ExtInfo { .. }
                | ServerPacket::ExtEntry { .. }
        )
    }

    /// Encode to the exact fixed wire size for this packet id.
    pub fn encode(&self, mode: StringMode) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u8(self.id());
        match self {
            ServerPacket::ServerIdentification {
                protocol_version,
                name,
                motd,
                is_op,
            } => {
                buf.put_u8(*protocol_version);
                buf.put_slice(&pack_string(name, mode));
                buf.put_slice(&pack_string(motd, mode));
                buf.put_u8(if *is_op { 0x64 } else { 0x00 });
            }
            ServerPacket::Ping | ServerPacket::LevelInitialize => {}
            ServerPacket::LevelDataChunk { data, percent } => {
                debug_assert!(data.len() <= LEVEL_CHUNK_LEN);
                buf.put_i16(data.len() as i16);
                buf.put_slice(data);
                buf.put_bytes(0, LEVEL_CHUNK_LEN - data.len());
                buf.put_u8(*percent);
            }
            ServerPacket::LevelFinalize { x, y, z } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
            }
            ServerPacket::SetBlock { x, y, z, block_id } => {
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_i16(*z);
                buf.put_u8(*block_id);
            }
            ServerPacket::SpawnPlayer {
                player_id,
                name,
                pos,
            } => {
                buf.put_u8(*player_id);
                buf.put_slice(&pack_string(name, mode));
                put_fixed_pos(&mut buf, pos);
            }
            ServerPacket::PlayerPositionUpdate { player_id, pos } => {
                buf.put_u8(*player_id);
                put_fixed_pos(&mut buf, pos);
            }
            ServerPacket::DespawnPlayer { player_id } => {
                buf.put_u8(*player_id);
            }
            ServerPacket::Message { player_id, message } => {
                buf.put_u8(*player_id);
                buf.put_slice(&pack_string(message, mode));
            }
            ServerPacket::DisconnectPlayer { reason } => {
                buf.put_slice(&pack_string(reason, mode));
            }
            ServerPacket::UpdateUserType { is_op } => {
                buf.put_u8(if *is_op { 0x64 } else { 0x00 });
            }
            ServerPacket::ExtInfo {
                app_name,
                ext_count,
            } => {
                buf.put_slice(&pack_string(app_name, mode));
                buf.put_i16(*ext_count);
            }
            ServerPacket::ExtEntry {
                ext_name,
                ext_version,
            } => {
                buf.put_slice(&pack_string(ext_name, mode));
                buf.put_i32(*ext_version);
            }
            ServerPacket::SetClickDistance { distance } => {
                buf.put_i16(*distance);
            }
            ServerPacket::BulkBlockUpdate { indices, block_ids } => {
                debug_assert!(indices.len() == block_ids.len());
                debug_assert!(!indices.is_empty() && indices.len() <= BULK_UPDATE_LEN);
                buf.put_u8((indices.len() - 1) as u8);
                for i in 0..BULK_UPDATE_LEN {
                    buf.put_i32(indices.get(i).copied().unwrap_or(0));
                }
                for i in 0..BULK_UPDATE_LEN {
                    buf.put_u8(block_ids.get(i).copied().unwrap_or(0));
                }
            }
        }
        debug_assert_eq!(buf.len(), self.wire_size());
        buf
    }

    /// Declared wire size (including the id byte).
    pub fn wire_size(&self) -> usize {
        match self {
            ServerPacket::ServerIdentification { .. } => 131,
            ServerPacket::Ping => 1,
            ServerPacket::LevelInitialize => 1,
            ServerPacket::LevelDataChunk { .. } => 1028,
            ServerPacket::LevelFinalize { .. } => 7,
            ServerPacket::SetBlock { .. } => 8,
            ServerPacket::SpawnPlayer { .. } => 74,
            ServerPacket::PlayerPositionUpdate { .. } => 10,
            ServerPacket::DespawnPlayer { .. } => 2,
            ServerPacket::Message { .. } => 66,
            ServerPacket::DisconnectPlayer { .. } => 65,
            ServerPacket::UpdateUserType { .. } => 2,
            ServerPacket::ExtInfo { .. } => 67,
            ServerPacket::ExtEntry { .. } => 69,
            ServerPacket::SetClickDistance { .. } => 3,
            ServerPacket::BulkBlockUpdate { .. } => 1282,
        }
    }
}

fn put_fixed_pos(buf: &mut BytesMut, pos: &FixedPos) {
    buf.put_i16(pos.x);
    buf.put_i16(pos.y);
    buf.put_i16(pos.z);
    buf.put_u8(pos.yaw);
    buf.put_u8(pos.pitch);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: ClientPacket) {
        let encoded = packet.encode(StringMode::Ascii);
        let decoded =
            ClientPacket::decode(encoded[0], &encoded[1..], StringMode::Ascii).unwrap();
        assert_eq!(decoded, packet);
        // Re-encoding the decoded packet must reproduce the exact bytes.
        assert_eq!(decoded.encode(StringMode::Ascii), encoded);
    }

    #[test]
    fn test_client_packet_roundtrips() {
        roundtrip(ClientPacket::PlayerIdentification {
            protocol_version: 7,
            username: "alex".into(),
            verification_key: "abc".into(),
            magic: 0x42,
        });
        roundtrip(ClientPacket::UpdateBlock {
            x: 1,
            y: 2,
            z: 3,
            mode: 1,
            block_id: 1,
        });
        roundtrip(ClientPacket::MovementUpdate {
            player_id: 0xFF,
            pos: FixedPos::new(100, 200, 300, 64, 32),
        });
        roundtrip(ClientPacket::PlayerMessage {
            flag: 0,
            message: "hello world".into(),
        });
        roundtrip(ClientPacket::ExtInfo {
            app_name: "ClassiCube".into(),
            ext_count: 3,
        });
        roundtrip(ClientPacket::ExtEntry {
            ext_name: "BulkBlockUpdate".into(),
            ext_version: 1,
        });
    }

    #[test]
    fn test_client_packet_sizes() {
        assert_eq!(ClientPacket::size_of(0x00), Some(131));
        assert_eq!(ClientPacket::size_of(0x05), Some(9));
        assert_eq!(ClientPacket::size_of(0x08), Some(10));
        assert_eq!(ClientPacket::size_of(0x0D), Some(66));
        assert_eq!(ClientPacket::size_of(0x10), Some(67));
        assert_eq!(ClientPacket::size_of(0x11), Some(69));
        assert_eq!(ClientPacket::size_of(0x7F), None);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let err = ClientPacket::decode(0x05, &[0; 4], StringMode::Ascii);
        assert!(matches!(err, Err(CodecError::NotEnoughData { .. })));
    }

    #[test]
    fn test_server_packets_encode_to_declared_size() {
        let packets = vec![
            ServerPacket::ServerIdentification {
                protocol_version: 7,
                name: "server".into(),
                motd: "welcome".into(),
                is_op: false,
            },
            ServerPacket::Ping,
            ServerPacket::LevelInitialize,
            ServerPacket::LevelDataChunk {
                data: vec![1, 2, 3],
                percent: 50,
            },
            ServerPacket::LevelFinalize { x: 64, y: 32, z: 64 },
            ServerPacket::SetBlock {
                x: 1,
                y: 1,
                z: 1,
                block_id: 1,
            },
            ServerPacket::SpawnPlayer {
                player_id: 3,
                name: "alex".into(),
                pos: FixedPos::from_block(4, 5, 6),
            },
            ServerPacket::PlayerPositionUpdate {
                player_id: 3,
                pos: FixedPos::ZERO,
            },
            ServerPacket::DespawnPlayer { player_id: 3 },
            ServerPacket::Message {
                player_id: 0,
                message: "hi".into(),
            },
            ServerPacket::DisconnectPlayer {
                reason: "You are banned.".into(),
            },
            ServerPacket::UpdateUserType { is_op: true },
            ServerPacket::ExtInfo {
                app_name: "chisel".into(),
                ext_count: 5,
            },
            ServerPacket::ExtEntry {
                ext_name: "FullCP437".into(),
                ext_version: 1,
            },
            ServerPacket::BulkBlockUpdate {
                indices: vec![0, 42, 4095],
                block_ids: vec![1, 2, 3],
            },
        ];
        for packet in packets {
            let encoded = packet.encode(StringMode::Ascii);
            assert_eq!(encoded.len(), packet.wire_size(), "{:?}", packet);
            assert_eq!(encoded[0], packet.id());
        }
    }

    #[test]
    fn test_level_chunk_zero_padded() {
        let packet = ServerPacket::LevelDataChunk {
            data: vec![0xAB; 10],
            percent: 25,
        };
        let encoded = packet.encode(StringMode::Ascii);
        assert_eq!(&encoded[1..3], &10i16.to_be_bytes());
        assert_eq!(&encoded[3..13], &[0xAB; 10]);
        assert!(encoded[13..1027].iter().all(|&b| b == 0));
        assert_eq!(encoded[1027], 25);
    }

    #[test]
    fn test_bulk_update_layout() {
        let packet = ServerPacket::BulkBlockUpdate {
            indices: vec![7, 9],
            block_ids: vec![1, 20],
        };
        let encoded = packet.encode(StringMode::Ascii);
        assert_eq!(encoded[0], 0x26);
        assert_eq!(encoded[1], 1); // count - 1
        assert_eq!(&encoded[2..6], &7i32.to_be_bytes());
        assert_eq!(&encoded[6..10], &9i32.to_be_bytes());
        // Remaining index slots are zero-padded.
        assert!(encoded[10..2 + 4 * 256].iter().all(|&b| b == 0));
        assert_eq!(encoded[2 + 4 * 256], 1);
        assert_eq!(encoded[2 + 4 * 256 + 1], 20);
    }

    #[test]
    fn test_user_type_byte() {
        let op = ServerPacket::UpdateUserType { is_op: true }.encode(StringMode::Ascii);
        let normal = ServerPacket::UpdateUserType { is_op: false }.encode(StringMode::Ascii);
        assert_eq!(op[1], 0x64);
        assert_eq!(normal[1], 0x00);
    }
}
