//! Direction specific forwarding loops
//!
//! [`egress`] moves frames from the tap device to the remote peer, [`ingress`] moves datagrams
//! from the peer to the tap device. Each loop runs until an I/O error ends it; the supervisor owns
//! what happens next.

use std::io;

use bytes::BytesMut;

use crate::codec::{decapsulate, HeaderTemplate};
use crate::error::ForwardError;
use crate::transport::{RawTransport, VirtualInterface};

/// Largest datagram a raw socket can hand over.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Errors that only cost the datagram being sent, not the role sending it.
///
/// `EIO` is what a tap returns on write while its link is down.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(
            libc::ENOBUFS
                | libc::EMSGSIZE
                | libc::EHOSTUNREACH
                | libc::ENETUNREACH
                | libc::ENETDOWN
                | libc::ECONNREFUSED
                | libc::EIO
        )
    )
}

/// Device to network: one tap read, one encapsulated datagram sent.
///
/// `max_frame_len` bounds a single tap read.
pub async fn egress<D, T>(
    device: &D,
    transport: &T,
    template: &HeaderTemplate,
    max_frame_len: usize,
) -> Result<(), ForwardError>
where
    D: VirtualInterface + ?Sized,
    T: RawTransport + ?Sized,
{
    let mut frame = vec![0u8; max_frame_len];
    let mut packet = BytesMut::with_capacity(template.len() + max_frame_len);

    loop {
        let n = device.read_frame(&mut frame).await.map_err(ForwardError::DeviceRead)?;
        if n == 0 {
            return Err(ForwardError::DeviceClosed);
        }

        packet.clear();
        if let Err(e) = template.encapsulate_into(&frame[..n], &mut packet) {
            trace!("drop frame: {}", e);
            continue;
        }

        match transport.send(&packet).await {
            Ok(_) => {}
            Err(e) if is_transient(&e) => trace!("drop {} byte frame: {}", n, e),
            Err(e) => return Err(ForwardError::TransportSend(e)),
        }
    }
}

/// Network to device: one datagram received, at most one frame written.
///
/// Datagrams that fail validation are dropped without a trace.
pub async fn ingress<D, T>(device: &D, transport: &T, template: &HeaderTemplate) -> Result<(), ForwardError>
where
    D: VirtualInterface + ?Sized,
    T: RawTransport + ?Sized,
{
    let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let n = transport.recv(&mut datagram).await.map_err(ForwardError::TransportRecv)?;

        let frame = match decapsulate(&datagram[..n], template) {
            Some(frame) => frame,
            None => continue,
        };

        match device.write_frame(frame).await {
            Ok(_) => {}
            Err(e) if is_transient(&e) => trace!("drop {} byte frame: {}", frame.len(), e),
            Err(e) => return Err(ForwardError::DeviceWrite(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::codec::encapsulate;
    use crate::config::AddressFamily;
    use crate::transport::testing::pipe;

    fn ipv4(packet: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0x45];
        datagram.resize(20, 0);
        datagram.extend_from_slice(packet);
        datagram
    }

    #[test]
    fn test_egress_one_read_one_send() {
        tokio_test::block_on(async {
            let (device, device_handle) = pipe();
            let (transport, mut transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V4, 5);

            device_handle.push(&[0u8; 46]);
            device_handle.push(b"second");
            device_handle.fail(io::ErrorKind::BrokenPipe);

            let result = egress(&device, &transport, &template, 1518).await;
            assert!(matches!(result, Err(ForwardError::DeviceRead(_))));

            let first = transport_handle.output.recv().await.unwrap();
            assert_eq!(first.len(), 54);
            assert_eq!(&first[..8], &[0x20, 0x01, 0x64, 0x00, 0x00, 0x2e, 0x05, 0x00]);

            let second = transport_handle.output.recv().await.unwrap();
            assert_eq!(second, encapsulate(b"second", &template).unwrap().to_vec());

            assert!(transport_handle.output.try_recv().is_err());
        });
    }

    #[test]
    fn test_egress_stops_on_closed_device() {
        tokio_test::block_on(async {
            let (device, device_handle) = pipe();
            let (transport, _transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V6, 5);

            device_handle.push(&[]);
            let result = egress(&device, &transport, &template, 1518).await;
            assert!(matches!(result, Err(ForwardError::DeviceClosed)));
        });
    }

    #[test]
    fn test_egress_survives_transient_send_errors() {
        tokio_test::block_on(async {
            let (device, device_handle) = pipe();
            let (transport, mut transport_handle) = pipe();
            let transport = transport.failing_writes(libc::EMSGSIZE);
            let template = HeaderTemplate::new(AddressFamily::V4, 5);

            device_handle.push(&[0xee; 9000]);
            device_handle.push(b"frame");
            device_handle.fail(io::ErrorKind::BrokenPipe);

            let result = egress(&device, &transport, &template, 9018).await;
            assert!(matches!(result, Err(ForwardError::DeviceRead(_))));
            assert!(transport_handle.output.try_recv().is_err());
        });
    }

    #[test]
    fn test_egress_stops_on_fatal_send_error() {
        tokio_test::block_on(async {
            let (device, device_handle) = pipe();
            let (transport, _transport_handle) = pipe();
            let transport = transport.failing_writes(libc::EBADF);
            let template = HeaderTemplate::new(AddressFamily::V4, 5);

            device_handle.push(b"frame");
            let result = egress(&device, &transport, &template, 1518).await;
            assert!(matches!(result, Err(ForwardError::TransportSend(_))));
        });
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMSGSIZE)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EHOSTUNREACH)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EIO)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::Other)));
    }

    #[test]
    fn test_ingress_filters_foreign_traffic() {
        tokio_test::block_on(async {
            let (device, mut device_handle) = pipe();
            let (transport, transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V4, 5);
            let foreign = HeaderTemplate::new(AddressFamily::V4, 6);

            transport_handle.push(&ipv4(&encapsulate(b"other tunnel", &foreign).unwrap()));
            transport_handle.push(&ipv4(b"garbage"));
            transport_handle.push(&ipv4(&encapsulate(b"ours", &template).unwrap()));
            transport_handle.fail(io::ErrorKind::ConnectionReset);

            let result = ingress(&device, &transport, &template).await;
            assert!(matches!(result, Err(ForwardError::TransportRecv(_))));

            assert_eq!(device_handle.output.recv().await.unwrap(), b"ours".to_vec());
            assert!(device_handle.output.try_recv().is_err());
        });
    }

    #[test]
    fn test_ingress_survives_transient_write_errors() {
        tokio_test::block_on(async {
            let (device, _device_handle) = pipe();
            let device = device.failing_writes(libc::EIO);
            let (transport, transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V4, 5);

            transport_handle.push(&ipv4(&encapsulate(b"link down", &template).unwrap()));
            transport_handle.push(&ipv4(&encapsulate(b"still down", &template).unwrap()));
            transport_handle.fail(io::ErrorKind::ConnectionReset);

            // both frames dropped, the loop only ends on the recv failure
            let result = ingress(&device, &transport, &template).await;
            assert!(matches!(result, Err(ForwardError::TransportRecv(_))));
        });
    }

    #[test]
    fn test_ingress_stops_on_fatal_write_error() {
        tokio_test::block_on(async {
            let (device, _device_handle) = pipe();
            let device = device.failing_writes(libc::EBADF);
            let (transport, transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V6, 5);

            transport_handle.push(&encapsulate(b"frame", &template).unwrap());
            transport_handle.push(&encapsulate(b"never read", &template).unwrap());

            match ingress(&device, &transport, &template).await {
                Err(ForwardError::DeviceWrite(e)) => assert_eq!(e.raw_os_error(), Some(libc::EBADF)),
                other => panic!("unexpected: {:?}", other),
            }
        });
    }

    #[test]
    fn test_ingress_keeps_order() {
        let rt = tokio::runtime::Runtime::new().unwrap();

        rt.block_on(async move {
            let (device, mut device_handle) = pipe();
            let (transport, transport_handle) = pipe();
            let template = HeaderTemplate::new(AddressFamily::V6, 9);

            let task = tokio::spawn(async move { ingress(&device, &transport, &template).await });

            for i in 0..32u8 {
                transport_handle.push(&encapsulate(&[i; 60], &template).unwrap());
            }
            for i in 0..32u8 {
                let frame = timeout(Duration::from_secs(3), device_handle.output.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(frame, vec![i; 60]);
            }

            task.abort();
        });
    }
}
