//! EoIP / EoIPv6 header construction and validation
//!
//! EoIP (IPv4, GRE protocol number) prefixes each ethernet frame with an 8 byte header:
//!
//! ```text
//! offset 0: magic      20 01 64 00
//! offset 4: length     u16 big-endian, payload length
//! offset 6: tunnel id  u16 little-endian
//! offset 8: payload    ethernet frame
//! ```
//!
//! EoIPv6 (IPv6, EtherIP protocol number) uses a 2 byte header, `0x3000 | tid` in network order
//! with the nibbles of the first byte swapped.
//!
//! Datagrams failing validation are rejected silently: [`decapsulate`] returns `None` and nothing
//! else happens. Frames of other tunnels sharing the same peer are expected traffic.

use bytes::{BufMut, BytesMut};
use nom::bytes::complete::tag;
use nom::number::complete::{be_u16, le_u16};
use nom::IResult;
use pnet::packet::ipv4::Ipv4Packet;

use crate::config::{AddressFamily, TunnelConfig};
use crate::error::FrameTooLong;

pub const EOIP_MAGIC: [u8; 4] = [0x20, 0x01, 0x64, 0x00];
pub const EOIP_HEADER_LEN: usize = 8;
pub const EOIPV6_HEADER_LEN: usize = 2;

/// Longest frame the 16 bit EoIP length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// EtherIP version 3, or-ed into the EoIPv6 tunnel id.
pub const EOIPV6_VERSION: u16 = 0x3000;

/// Exchange the high and low nibble of a byte.
pub fn swap_nibbles(byte: u8) -> u8 {
    byte.rotate_left(4)
}

/// Wire bytes of the EoIPv6 header for a tunnel id.
pub fn eoipv6_header(tid: u16) -> [u8; EOIPV6_HEADER_LEN] {
    let mut header = (EOIPV6_VERSION | tid).to_be_bytes();
    header[0] = swap_nibbles(header[0]);
    header
}

/// Fixed part of an EoIP packet, the payload is kept as a separate slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EoipHeader {
    pub length: u16,
    pub tid: u16,
}

impl EoipHeader {
    /// Parse magic, length and tunnel id, returning the bytes that follow.
    pub fn parse(input: &[u8]) -> IResult<&[u8], EoipHeader> {
        let (input, _) = tag(&EOIP_MAGIC[..])(input)?;
        let (input, length) = be_u16(input)?;
        let (input, tid) = le_u16(input)?;

        Ok((input, EoipHeader { length, tid }))
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&EOIP_MAGIC);
        buf.put_u16(self.length);
        buf.put_u16_le(self.tid);
    }
}

/// Per tunnel header bytes, computed once at startup and reused for every packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderTemplate {
    Eoip { tid: u16 },
    Eoipv6 { header: [u8; EOIPV6_HEADER_LEN] },
}

impl HeaderTemplate {
    pub fn new(family: AddressFamily, tid: u16) -> Self {
        match family {
            AddressFamily::V4 => HeaderTemplate::Eoip { tid },
            AddressFamily::V6 => HeaderTemplate::Eoipv6 { header: eoipv6_header(tid) },
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(config.family(), config.tid())
    }

    pub fn len(&self) -> usize {
        match self {
            HeaderTemplate::Eoip { .. } => EOIP_HEADER_LEN,
            HeaderTemplate::Eoipv6 { .. } => EOIPV6_HEADER_LEN,
        }
    }

    /// Append header and frame to `buf`.
    ///
    /// Frames longer than [`MAX_FRAME_LEN`] are refused for both variants and leave `buf` untouched.
    pub fn encapsulate_into(&self, frame: &[u8], buf: &mut BytesMut) -> Result<(), FrameTooLong> {
        let length = u16::try_from(frame.len()).map_err(|_| FrameTooLong(frame.len()))?;

        buf.reserve(self.len() + frame.len());
        match self {
            HeaderTemplate::Eoip { tid } => EoipHeader { length, tid: *tid }.put(buf),
            HeaderTemplate::Eoipv6 { header } => buf.put_slice(header),
        }
        buf.put_slice(frame);
        Ok(())
    }
}

/// Build the tunnel packet carrying `frame`.
///
/// # Example
/// ```
/// use eoip::codec::{encapsulate, HeaderTemplate};
/// use eoip::config::AddressFamily;
///
/// let template = HeaderTemplate::new(AddressFamily::V4, 5);
/// let packet = encapsulate(&[0u8; 46], &template).unwrap();
///
/// assert_eq!(packet.len(), 54);
/// assert_eq!(&packet[..8], &[0x20, 0x01, 0x64, 0x00, 0x00, 0x2e, 0x05, 0x00]);
///
/// assert!(encapsulate(&vec![0u8; 65536], &template).is_err());
/// ```
pub fn encapsulate(frame: &[u8], template: &HeaderTemplate) -> Result<BytesMut, FrameTooLong> {
    let mut buf = BytesMut::with_capacity(template.len() + frame.len());
    template.encapsulate_into(frame, &mut buf)?;
    Ok(buf)
}

/// Validate a received datagram and return the ethernet frame it carries.
///
/// IPv4 datagrams come from a raw socket and still carry their IP header; IPv6 raw sockets only
/// hand over the payload.
pub fn decapsulate<'a>(datagram: &'a [u8], template: &HeaderTemplate) -> Option<&'a [u8]> {
    let frame = match template {
        HeaderTemplate::Eoip { tid } => {
            let ip = Ipv4Packet::new(datagram)?;
            let offset = ip.get_header_length() as usize * 4;
            let (payload, header) = EoipHeader::parse(datagram.get(offset..)?).ok()?;

            if header.length as usize != payload.len() || header.tid != *tid {
                return None;
            }
            payload
        }
        HeaderTemplate::Eoipv6 { header } => datagram.strip_prefix(&header[..])?,
    };

    if frame.is_empty() {
        return None;
    }
    Some(frame)
}
