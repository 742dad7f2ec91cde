//! Error types shared by the tunnel setup code and the forwarding loops
//!

use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Catch-all error for setup glue (device/socket creation, runtime start).
pub type Error = Box<dyn std::error::Error + Sync + Send>;

/// Invalid tunnel parameters, detected before any descriptor is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{which} address {addr} does not match the {family} address family")]
    FamilyMismatch {
        which: &'static str,
        addr: IpAddr,
        family: &'static str,
    },

    #[error("mtu {0} out of range ({min}..={max})", min = crate::config::MIN_MTU, max = crate::config::MAX_MTU)]
    InvalidMtu(u32),

    #[error("invalid interface name {0:?}")]
    InvalidInterfaceName(String),
}

/// Frame too long for the EoIP length field.
#[derive(Debug, Error)]
#[error("{0} byte frame exceeds the {max} byte tunnel limit", max = crate::codec::MAX_FRAME_LEN)]
pub struct FrameTooLong(pub usize);

/// I/O failure that terminates a forwarding role.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("tap read failed: {0}")]
    DeviceRead(#[source] io::Error),

    #[error("tap write failed: {0}")]
    DeviceWrite(#[source] io::Error),

    #[error("tap device closed")]
    DeviceClosed,

    #[error("raw socket receive failed: {0}")]
    TransportRecv(#[source] io::Error),

    #[error("raw socket send failed: {0}")]
    TransportSend(#[source] io::Error),
}
