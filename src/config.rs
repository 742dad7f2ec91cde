//! Immutable tunnel parameters
//!
//! A [`TunnelConfig`] is built once at startup, validated, and then shared read-only (behind an
//! `Arc`) by the supervisor and both forwarding roles for the lifetime of the process.

use std::fmt;
use std::net::IpAddr;

use eui48::MacAddress;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};

use crate::codec::{EOIPV6_VERSION, EOIP_HEADER_LEN};
use crate::error::ConfigError;

pub const DEFAULT_MTU: u32 = 1500;
pub const MIN_MTU: u32 = 68;
/// Largest MTU whose frames still fit a 64k datagram after the tunnel header.
pub const MAX_MTU: u32 = 65535 - EOIP_HEADER_LEN as u32 - ETHERNET_OVERHEAD as u32;

/// Ethernet header plus one 802.1Q tag, on top of the interface MTU.
pub const ETHERNET_OVERHEAD: usize = 18;

/// Maximum linux interface name length, including the trailing NUL.
pub const IFNAMSIZ: usize = 16;

/// EtherIP (RFC 3378) protocol number, carrier of EoIPv6.
pub const ETHERIP: IpNextHeaderProtocol = IpNextHeaderProtocol(97);

/// Tunnel ids above this value spill into the EtherIP version nibble.
pub const EOIPV6_MAX_TID: u16 = 0x0fff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    /// EoIP over IPv4, carried as GRE.
    V4,
    /// EoIPv6, carried as EtherIP.
    V6,
}

impl AddressFamily {
    /// IP protocol number the raw socket is bound to.
    pub fn protocol(&self) -> IpNextHeaderProtocol {
        match self {
            AddressFamily::V4 => IpNextHeaderProtocols::Gre,
            AddressFamily::V6 => ETHERIP,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "EoIP",
            AddressFamily::V6 => "EoIPv6",
        }
    }

    fn matches(&self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (AddressFamily::V4, IpAddr::V4(_)) | (AddressFamily::V6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

/// Lowest other tunnel id sharing the EoIPv6 header of `tid`, if `tid` spills into the version
/// nibble.
fn eoipv6_collision(tid: u16) -> Option<u16> {
    if tid <= EOIPV6_MAX_TID {
        return None;
    }
    let base = tid & !EOIPV6_VERSION;
    Some(if base != tid { base } else { base | 0x1000 })
}

#[derive(Clone, Debug)]
pub struct TunnelConfig {
    family: AddressFamily,
    local: IpAddr,
    remote: IpAddr,
    tid: u16,
    mtu: u32,
    interface: String,
    mac: Option<MacAddress>,
    up: bool,
    uid: Option<u32>,
    gid: Option<u32>,
}

impl TunnelConfig {
    /// Build a validated configuration with the default MTU and no optional interface settings.
    ///
    /// # Example
    /// ```
    /// use eoip::config::{AddressFamily, TunnelConfig};
    ///
    /// let config = TunnelConfig::new(
    ///     AddressFamily::V4,
    ///     "10.0.0.1".parse().unwrap(),
    ///     "10.0.0.2".parse().unwrap(),
    ///     5,
    ///     "eoip5",
    /// ).unwrap();
    ///
    /// assert_eq!(config.mtu(), 1500);
    /// assert!(TunnelConfig::new(
    ///     AddressFamily::V6,
    ///     "10.0.0.1".parse().unwrap(),
    ///     "10.0.0.2".parse().unwrap(),
    ///     5,
    ///     "eoip5",
    /// ).is_err());
    /// ```
    pub fn new(
        family: AddressFamily,
        local: IpAddr,
        remote: IpAddr,
        tid: u16,
        interface: &str,
    ) -> Result<Self, ConfigError> {
        for (which, addr) in [("local", local), ("remote", remote)] {
            if !family.matches(&addr) {
                return Err(ConfigError::FamilyMismatch {
                    which,
                    addr,
                    family: family.mode(),
                });
            }
        }

        if interface.is_empty() || interface.len() >= IFNAMSIZ || interface.contains('\0') {
            return Err(ConfigError::InvalidInterfaceName(interface.to_string()));
        }

        if family == AddressFamily::V6 {
            if let Some(other) = eoipv6_collision(tid) {
                warn!(
                    "tid {} does not fit the 12-bit EoIPv6 field, it collides with tid {} on the wire",
                    tid, other
                );
            }
        }

        Ok(TunnelConfig {
            family,
            local,
            remote,
            tid,
            mtu: DEFAULT_MTU,
            interface: interface.to_string(),
            mac: None,
            up: false,
            uid: None,
            gid: None,
        })
    }

    pub fn with_mtu(mut self, mtu: u32) -> Result<Self, ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(ConfigError::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        Ok(self)
    }

    /// Program this hardware address on the tap interface (nil keeps the kernel's random one).
    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = if mac.is_nil() { None } else { Some(mac) };
        self
    }

    pub fn with_up(mut self, up: bool) -> Self {
        self.up = up;
        self
    }

    /// Drop to these ids once the tap and the raw socket are open.
    pub fn with_owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.uid = uid.filter(|id| *id > 0);
        self.gid = gid.filter(|id| *id > 0);
        self
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn local(&self) -> IpAddr {
        self.local
    }

    pub fn remote(&self) -> IpAddr {
        self.remote
    }

    pub fn tid(&self) -> u16 {
        self.tid
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn mac(&self) -> Option<MacAddress> {
        self.mac
    }

    pub fn up(&self) -> bool {
        self.up
    }

    pub fn uid(&self) -> Option<u32> {
        self.uid
    }

    pub fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// Largest frame the egress loop will read from the tap in one go.
    pub fn max_frame_len(&self) -> usize {
        self.mtu as usize + ETHERNET_OVERHEAD
    }
}

impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, mode {}, remote {}, local {}, tid {}, mtu {}",
            self.interface,
            self.family.mode(),
            self.remote,
            self.local,
            self.tid,
            self.mtu
        )
    }
}
