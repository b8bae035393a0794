// Feed connection handler
// Line-delimited JSON frames over a single TCP stream

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::TrackerError;
use crate::net::frames::ClientFrame;

/// A single framed connection to the real-time feed endpoint.
pub struct Connection {
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Create a new connection from an already established TCP stream.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Connection {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer_addr,
        }
    }

    /// Dial the feed endpoint, failing if "open" does not arrive in time.
    pub async fn dial(endpoint: &str, connect_timeout: Duration) -> Result<Self, TrackerError> {
        let stream = time::timeout(connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TrackerError::ConnectTimeout(connect_timeout))??;
        let peer_addr = stream.peer_addr()?;
        Ok(Connection::new(stream, peer_addr))
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame line. An empty string means the peer closed the stream.
    pub async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;

        // Remove trailing newline
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(line)
    }

    /// Write a JSON value to the connection
    pub async fn write_json(&mut self, value: &serde_json::Value) -> io::Result<()> {
        let json_str = serde_json::to_string(value)?;
        self.writer.write_all(json_str.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Serialize and write an outgoing client frame.
    pub async fn write_frame(&mut self, frame: &ClientFrame) -> io::Result<()> {
        let json = serde_json::to_value(frame)?;
        self.write_json(&json).await
    }
}
