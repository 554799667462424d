use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::codec::{CodecError, StringMode};
use crate::packets::{ClientPacket, ServerPacket};

/// Close a connection after this much silence from the client.
pub const NET_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a single outbound packet write; a writer blocked this
/// long is treated as dead.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A classic-protocol connection. Packets are fixed-size, so framing is
/// a one-byte id lookup followed by an exact-length body read.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split into read and write halves for concurrent I/O. The server
    /// runs one receive loop and one writer task per connection.
    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            PacketReader { stream: read_half },
            PacketWriter { stream: write_half },
        )
    }
}

/// Read half of a split connection.
pub struct PacketReader {
    stream: OwnedReadHalf,
}

impl PacketReader {
    /// Wait for the next packet id byte. The deadline bounds client
    /// silence; hitting it closes the connection.
    pub async fn read_id(&mut self, deadline: Duration) -> anyhow::Result<u8> {
        Ok(timeout(deadline, self.stream.read_u8()).await??)
    }

    /// Read an exact packet body. Once a packet has started arriving it
    /// gets a short fixed deadline, so a stalled client cannot wedge
    /// the loop with a partial packet.
    pub async fn read_body(&mut self, len: usize) -> anyhow::Result<BytesMut> {
        let mut body = BytesMut::zeroed(len);
        timeout(SEND_TIMEOUT, self.stream.read_exact(&mut body)).await??;
        Ok(body)
    }

    /// Read one raw packet: id byte plus the exact body length declared
    /// for that id. Returns the id and the body (id byte stripped).
    pub async fn read_raw(&mut self, deadline: Duration) -> anyhow::Result<(u8, BytesMut)> {
        let id = self.read_id(deadline).await?;
        let size = ClientPacket::size_of(id).ok_or(CodecError::UnknownPacket(id))?;
        let body = self.read_body(size - 1).await?;
        trace!("read packet id=0x{:02X} len={}", id, size);
        Ok((id, body))
    }

    /// Read and decode the next packet, requiring it to match `expected_id`.
    /// Used during the handshake where exactly one packet type is legal.
    pub async fn read_expected(
        &mut self,
        expected_id: u8,
        mode: StringMode,
        deadline: Duration,
    ) -> anyhow::Result<ClientPacket> {
        let (id, body) = self.read_raw(deadline).await?;
        if id != expected_id {
            anyhow::bail!(
                "expected packet 0x{:02X}, got 0x{:02X}",
                expected_id,
                id
            );
        }
        Ok(ClientPacket::decode(id, &body, mode)?)
    }
}

/// Write half of a split connection. One writer per connection keeps
/// outbound packets serialized in emit order.
pub struct PacketWriter {
    stream: OwnedWriteHalf,
}

impl PacketWriter {
    pub async fn write_packet(
        &mut self,
        packet: &ServerPacket,
        mode: StringMode,
    ) -> anyhow::Result<()> {
        let frame = packet.encode(mode);
        trace!(
            "write packet id=0x{:02X} len={}",
            packet.id(),
            frame.len()
        );
        timeout(SEND_TIMEOUT, self.stream.write_all(&frame)).await??;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_read_raw_frames_by_declared_size() {
        let (mut client, server) = pair().await;
        let (mut reader, _writer) = Connection::new(server).into_split();

        let packet = ClientPacket::UpdateBlock {
            x: 1,
            y: 2,
            z: 3,
            mode: 1,
            block_id: 4,
        };
        client
            .write_all(&packet.encode(StringMode::Ascii))
            .await
            .unwrap();

        let (id, body) = reader.read_raw(NET_TIMEOUT).await.unwrap();
        assert_eq!(id, 0x05);
        assert_eq!(body.len(), 8);
        let decoded = ClientPacket::decode(id, &body, StringMode::Ascii).unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_read_raw_rejects_unknown_id() {
        let (mut client, server) = pair().await;
        let (mut reader, _writer) = Connection::new(server).into_split();

        client.write_all(&[0x7E]).await.unwrap();
        assert!(reader.read_raw(NET_TIMEOUT).await.is_err());
    }

    #[tokio::test]
    async fn test_write_packet_round_trips() {
        let (client, server) = pair().await;
        let (_reader, mut writer) = Connection::new(server).into_split();
        let (mut client_read, _) = client.into_split();

        let packet = ServerPacket::SetBlock {
            x: 5,
            y: 6,
            z: 7,
            block_id: 20,
        };
        writer
            .write_packet(&packet, StringMode::Ascii)
            .await
            .unwrap();

        let mut frame = vec![0u8; packet.wire_size()];
        client_read.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, packet.encode(StringMode::Ascii).to_vec());
    }
}
