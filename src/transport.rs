//! Datagram transport the signaling core sends/receives through. Only a
//! `Transport` trait is owned by the core; `UdpTransport` is the one
//! concrete implementation this crate ships.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::{SipError, SipResult};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, dest: SocketAddr, bytes: &[u8]) -> SipResult<()>;
    async fn recv(&self) -> SipResult<(SocketAddr, Vec<u8>)>;
}

/// A `Transport` backed by a single bound UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(host: &str, port: u16) -> SipResult<Self> {
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| SipError::transport(format!("failed to bind {host}:{port}: {e}")))?;
        Ok(UdpTransport { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, dest: SocketAddr, bytes: &[u8]) -> SipResult<()> {
        self.socket
            .send_to(bytes, dest)
            .await
            .map_err(|e| SipError::transport(format!("send to {dest} failed: {e}")))?;
        Ok(())
    }

    async fn recv(&self) -> SipResult<(SocketAddr, Vec<u8>)> {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, peer) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| SipError::transport(format!("recv failed: {e}")))?;
        buf.truncate(len);
        Ok((peer, buf))
    }
}

/// An in-process `Transport` double backed by channels, for tests and for
/// scenarios that exercise the dispatcher without a real socket.
pub struct ChannelTransport {
    outbound: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    inbound: Mutex<tokio::sync::mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
    inbound_sender: tokio::sync::mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        ChannelTransport {
            outbound: Mutex::new(Vec::new()),
            inbound: Mutex::new(rx),
            inbound_sender: tx,
        }
    }

    /// Queues a datagram as if it had just arrived from `peer`.
    pub fn deliver(&self, peer: SocketAddr, bytes: Vec<u8>) {
        let _ = self.inbound_sender.send((peer, bytes));
    }

    /// Drains everything sent through this transport so far.
    pub async fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.outbound.lock().await)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        ChannelTransport::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, dest: SocketAddr, bytes: &[u8]) -> SipResult<()> {
        self.outbound.lock().await.push((dest, bytes.to_vec()));
        Ok(())
    }

    async fn recv(&self) -> SipResult<(SocketAddr, Vec<u8>)> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| SipError::transport("channel transport closed"))
    }
}
