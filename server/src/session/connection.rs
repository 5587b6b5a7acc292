//! Individual drone connection handling

use anyhow::Result;
use bytes::Bytes;
use dronesim_shared::{codec::{self, FrameDecoder}, Response};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Framed connection to one pilot
pub struct DroneConnection {
    session_id: String,
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl DroneConnection {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr, session_id: String) -> Self {
        let (reader, writer) = stream.into_split();

        Self {
            session_id,
            addr,
            reader,
            writer,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next frame from this connection
    /// Returns None if the connection is closed
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            // First try to decode from existing buffer
            if let Some(frame) = self.decoder.decode_next()? {
                return Ok(Some(frame));
            }

            // Read more data
            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None); // Connection closed
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Send one response frame
    pub async fn send(&mut self, response: &Response) -> Result<()> {
        let encoded = codec::encode(response)?;
        self.writer.write_all(&encoded).await?;
        Ok(())
    }

    /// Close the write side
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the remote address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
