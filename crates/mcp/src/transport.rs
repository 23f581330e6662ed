//! MCP transport layer.
//!
//! `McpTransport` moves whole JSON-RPC messages; [`LineTransport`] frames
//! them as newline-delimited JSON over any async byte pipe (our own stdio in
//! the fixture server, in-memory duplex pipes in tests).

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::McpError;

/// Trait for MCP message transport.
#[async_trait]
pub trait McpTransport: Send {
    /// Read the next JSON-RPC message line from the transport.
    /// Returns `None` when the transport is closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Write a JSON-RPC message line to the transport.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// Newline-delimited JSON over an async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

/// Transport over this process's stdin/stdout.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// In-memory transport for testing, backed by channel pairs.
pub struct ChannelTransport {
    rx: tokio::sync::mpsc::Receiver<String>,
    tx: tokio::sync::mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Create a pair of connected transports. Messages sent on one are
    /// received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(32);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(32);
        (Self { rx: rx_a, tx: tx_a }, Self { rx: rx_b, tx: tx_b })
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.tx.send(message.to_string()).await.map_err(|e| {
            McpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_line_transport_skips_blank_lines() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(ours);
        let mut transport = LineTransport::new(read_half, write_half);

        theirs.write_all(b"\n  \n{\"id\":1}\r\n").await.unwrap();
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"id\":1}"));

        transport.send("{\"id\":2}").await.unwrap();
        let mut buf = [0u8; 9];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{\"id\":2}\n");

        drop(theirs);
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_transport_closed_peer() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert_eq!(a.receive().await.unwrap(), None);
        assert!(a.send("lost").await.is_err());
    }
}
