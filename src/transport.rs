//! Frame and datagram transports consumed by the forwarding loops
//!
//! Both roles share one [`VirtualInterface`] and one [`RawTransport`]. The egress role only reads
//! the interface and sends on the transport, the ingress role only receives on the transport and
//! writes the interface, so the methods take `&self` and no locking is involved.

use std::io;

use async_trait::async_trait;

/// Frame-granular access to the tap device.
#[async_trait]
pub trait VirtualInterface: Send + Sync + 'static {
    /// Wait for and read exactly one ethernet frame.
    async fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write exactly one ethernet frame.
    async fn write_frame(&self, frame: &[u8]) -> io::Result<usize>;
}

/// Datagram-granular access to the raw ip socket, connected to a fixed remote.
#[async_trait]
pub trait RawTransport: Send + Sync + 'static {
    /// Wait for and receive one datagram.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one datagram to the tunnel remote.
    async fn send(&self, datagram: &[u8]) -> io::Result<usize>;
}
