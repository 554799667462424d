pub mod codec;
pub mod connection;
pub mod packets;

pub use codec::*;
pub use connection::{Connection, PacketReader, PacketWriter, NET_TIMEOUT, SEND_TIMEOUT};
pub use packets::*;
