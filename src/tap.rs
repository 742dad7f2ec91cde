//! Linux TAP interface creation and programming API module
//!
//! The tap is opened non-blocking and registered with the tokio reactor, so a frame read waits on
//! descriptor readiness only. MAC address, operational status (UP) and MTU are programmed through
//! ioctls on a separate control socket.
//!

use std::cmp::min;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use crate::transport::VirtualInterface;

const TUN_DEVICE: &str = "/dev/net/tun";

const IFF_TAP: u16 = 0x0002;
const IFF_NO_PI: u16 = 0x1000;

const IFF_UP: u16 = 0x0001;
const IFF_RUNNING: u16 = 0x0040;

const ARPHRD_ETHER: u16 = 1;

const TUNSETIFF: u32 = 0x400454ca;

const SIOCGIFFLAGS: u32 = 0x8913;
const SIOCSIFFLAGS: u32 = 0x8914;
const SIOCSIFMTU: u32 = 0x8922;
const SIOCSIFHWADDR: u32 = 0x8924;

const MAX_NAME_LENGTH: usize = 16;
const MAX_FIELD_LENGTH: usize = 24;
const MAX_DATA_LENGTH: usize = MAX_NAME_LENGTH + MAX_FIELD_LENGTH;

/// Raw `struct ifreq`: interface name followed by the request specific union.
type IfReq = [u8; MAX_DATA_LENGTH];

fn ioctl(fd: i32, request: u32, data: &mut IfReq) -> io::Result<()> {
    let result = unsafe { libc::ioctl(fd, request as libc::c_ulong, data.as_mut_ptr()) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Tap device plus the control socket used to configure it.
///
/// Frames are read and written through `&self`; the egress role only reads and the ingress role
/// only writes, both on the same descriptor.
#[derive(Debug)]
pub struct TapInterface {
    file: AsyncFd<File>,
    socket: i32,
    name: [u8; MAX_NAME_LENGTH],
}

/// Close the control socket with the interface; the tap file closes itself.
impl Drop for TapInterface {
    fn drop(&mut self) {
        unsafe { libc::close(self.socket) };
    }
}

impl TapInterface {
    /// Create (or attach to) the tap interface `name`, without packet information header.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(name: &str) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(TUN_DEVICE)?;

        let mut requested = [0u8; MAX_NAME_LENGTH];
        let length = min(name.len(), MAX_NAME_LENGTH - 1);
        requested[..length].copy_from_slice(name[..length].as_bytes());

        let mut data: IfReq = [0u8; MAX_DATA_LENGTH];
        data[..MAX_NAME_LENGTH].copy_from_slice(&requested);
        data[MAX_NAME_LENGTH..MAX_NAME_LENGTH + 2].copy_from_slice(&(IFF_TAP | IFF_NO_PI).to_ne_bytes());
        ioctl(file.as_raw_fd(), TUNSETIFF, &mut data)?;

        let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if socket < 0 {
            return Err(io::Error::last_os_error());
        }

        // the kernel writes back the name it actually assigned
        let mut name = [0u8; MAX_NAME_LENGTH];
        name.copy_from_slice(&data[..MAX_NAME_LENGTH]);

        Ok(TapInterface {
            file: AsyncFd::new(file)?,
            socket,
            name,
        })
    }

    pub fn name(&self) -> String {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_LENGTH);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    fn request(&self) -> IfReq {
        let mut data: IfReq = [0u8; MAX_DATA_LENGTH];
        data[..MAX_NAME_LENGTH].copy_from_slice(&self.name);
        data
    }

    /// Set the hardware address.
    pub fn set_mac_address(&self, mac: &[u8; 6]) -> io::Result<()> {
        let sa_family_start_index = MAX_NAME_LENGTH;
        let sa_data_start_index = sa_family_start_index + 2;

        let mut data = self.request();
        data[sa_family_start_index..sa_data_start_index].copy_from_slice(&ARPHRD_ETHER.to_ne_bytes());
        data[sa_data_start_index..sa_data_start_index + 6].copy_from_slice(mac);

        ioctl(self.socket, SIOCSIFHWADDR, &mut data)
    }

    /// Bring the interface up, keeping the other flags as they are.
    pub fn set_up(&self) -> io::Result<()> {
        let mut data = self.request();
        ioctl(self.socket, SIOCGIFFLAGS, &mut data)?;

        let mut flags = [0u8; 2];
        flags.copy_from_slice(&data[MAX_NAME_LENGTH..MAX_NAME_LENGTH + 2]);
        let flags = u16::from_ne_bytes(flags) | IFF_UP | IFF_RUNNING;
        data[MAX_NAME_LENGTH..MAX_NAME_LENGTH + 2].copy_from_slice(&flags.to_ne_bytes());

        ioctl(self.socket, SIOCSIFFLAGS, &mut data)
    }

    pub fn set_mtu(&self, mtu: u32) -> io::Result<()> {
        let mut data = self.request();
        data[MAX_NAME_LENGTH..MAX_NAME_LENGTH + 4].copy_from_slice(&(mtu as i32).to_ne_bytes());

        ioctl(self.socket, SIOCSIFMTU, &mut data)
    }
}

#[async_trait]
impl VirtualInterface for TapInterface {
    async fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.file.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_frame(&self, frame: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.file.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(frame)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::net::Ipv4Addr;

    use tokio::runtime::Runtime;

    use eui48::MacAddress;

    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    #[ignore = "needs CAP_NET_ADMIN and /dev/net/tun"]
    fn test_tap_rx_tx() {
        let rt = Runtime::new().unwrap();

        rt.block_on(async move {
            let tap_name = "eoiptap0";

            let local_mac = MacAddress::parse_str("00:01:02:03:04:05").expect("Parse error {}");
            let remote_mac = MacAddress::parse_str("00:0a:0b:0c:0d:0e").expect("Parse error {}");

            let remote_address = Ipv4Addr::from_str("192.168.255.2").unwrap().octets();
            let local_address = Ipv4Addr::from_str("192.168.255.1").unwrap().octets();

            let mut arp_request = BytesMut::new();
            {
                arp_request.put_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
                arp_request.put_slice(remote_mac.as_bytes());
                arp_request.put_slice(&[0x08, 0x06]);
                arp_request.put_slice(&[0x00, 0x01]);
                arp_request.put_slice(&[0x08, 0x00]);
                arp_request.put_slice(&[0x06]);
                arp_request.put_slice(&[0x04]);
                arp_request.put_slice(&[0x00, 0x01]); // arp request
                arp_request.put_slice(remote_mac.as_bytes());
                arp_request.put_slice(&remote_address as &[u8]);
                arp_request.put_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
                arp_request.put_slice(&local_address as &[u8]);
            }

            let tap = TapInterface::new(tap_name).unwrap();
            assert_eq!(tap.name(), tap_name);

            let mut mac = [0u8; 6];
            mac.copy_from_slice(local_mac.as_bytes());
            tap.set_mac_address(&mac).unwrap();
            tap.set_mtu(1400).unwrap();
            tap.set_up().unwrap();

            // the interface has no address, so the kernel drops the request silently
            let n = tap.write_frame(&arp_request[..]).await.unwrap();
            assert_eq!(n, arp_request.len());
        });
    }
}
