//! Egress UDP socket.

use std::net::{Ipv4Addr, UdpSocket};

use crate::datagram::Datagram;
use crate::error::{NetError, Result};

/// Blocking UDP send socket shared by all streams of a muxer.
pub struct UdpSender {
    socket: UdpSocket,
}

impl UdpSender {
    /// Binds an unconnected IPv4 socket on an ephemeral port.
    pub fn new() -> Result<Self> {
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(NetError::SocketInit)?;

        Ok(Self { socket })
    }

    /// Sends one datagram to its target endpoint.
    pub fn send(&self, datagram: &Datagram) -> Result<usize> {
        self.socket
            .send_to(&datagram.payload, datagram.target)
            .map_err(NetError::SocketSend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_send_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();

        let sender = UdpSender::new().unwrap();
        let mut datagram = Datagram::new(Bytes::from_static(b"payload"), 0);
        datagram.target = receiver.local_addr().unwrap();

        assert_eq!(sender.send(&datagram).unwrap(), 7);

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }
}
