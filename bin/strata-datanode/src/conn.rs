//! Packet connections

use async_trait::async_trait;
use strata_common::{BufferPool, Error, Result};
use strata_proto::Packet;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// The connection a request arrived on. Handlers that stream their reply
/// write frames through it.
#[async_trait]
pub trait PacketConn: Send {
    fn peer_addr(&self) -> &str;

    async fn send(&mut self, pkt: &Packet) -> Result<()>;

    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// A byte stream carrying packet frames
pub struct FramedConn<S> {
    stream: S,
    peer: String,
    closed: bool,
}

impl<S> FramedConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            closed: false,
        }
    }

    /// Read the next request; `None` once the peer has hung up
    pub async fn recv(&mut self, pool: &BufferPool) -> Result<Option<Packet>> {
        if self.closed {
            return Ok(None);
        }
        Packet::read_from(&mut self.stream, pool).await
    }
}

#[async_trait]
impl<S> PacketConn for FramedConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn peer_addr(&self) -> &str {
        &self.peer
    }

    async fn send(&mut self, pkt: &Packet) -> Result<()> {
        if self.closed {
            return Err(Error::Transport(format!("connection to {} closed", self.peer)));
        }
        pkt.write_to(&mut self.stream).await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
