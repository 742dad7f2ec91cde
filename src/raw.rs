//! Raw IP socket carrying tunnel datagrams
//!
//! The socket is bound to the local address and the tunnel's IP protocol number (GRE for EoIP,
//! EtherIP for EoIPv6). IPv4 raw sockets deliver datagrams with their IP header, IPv6 raw sockets
//! deliver the payload only.

use std::io;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::config::{AddressFamily, TunnelConfig};
use crate::transport::RawTransport;

pub struct RawSocket {
    socket: AsyncFd<Socket>,
    remote: SockAddr,
}

impl RawSocket {
    /// Open and bind the raw socket. Needs `CAP_NET_RAW` and a tokio runtime.
    pub fn bind(family: AddressFamily, local: IpAddr, remote: IpAddr) -> io::Result<Self> {
        let protocol = family.protocol().0;
        let domain = match family {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        };

        let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(protocol as i32)))?;
        socket.set_nonblocking(true)?;
        // raw sockets take the protocol number in the port field
        socket.bind(&SocketAddr::new(local, protocol as u16).into())?;

        Ok(RawSocket {
            socket: AsyncFd::new(socket)?,
            remote: SocketAddr::new(remote, protocol as u16).into(),
        })
    }

    pub fn from_config(config: &TunnelConfig) -> io::Result<Self> {
        Self::bind(config.family(), config.local(), config.remote())
    }
}

#[async_trait]
impl RawTransport for RawSocket {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.socket.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(datagram, &self.remote)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
