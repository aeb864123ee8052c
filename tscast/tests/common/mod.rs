//! Shared fixtures for the send/receive integration tests.

use std::io::Write;
use std::net::UdpSocket;
use std::time::Duration;

use tempfile::NamedTempFile;
use tscast_ts::{TsPacketViewMut, NULL_PACKET_188, PACKET_SIZE_188, PCR_CLOCK_HZ, SYNC_BYTE};

/// Writes a CBR transport stream of `num_packets` 188-byte packets paced at
/// `bitrate` bits per second, with a PCR on PID 0x100 every ten packets.
/// Every packet carries its index in the payload so receive order can be
/// checked.
pub fn write_cbr_file(num_packets: u64, bitrate: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();

    for i in 0..num_packets {
        let mut pkt = if i % 10 == 0 {
            pcr_packet(i * PACKET_SIZE_188 as u64 * 8 * PCR_CLOCK_HZ / bitrate)
        } else {
            NULL_PACKET_188
        };

        // Tag for ordering checks; bytes well past the adaptation field.
        pkt[184..188].copy_from_slice(&(i as u32).to_be_bytes());
        file.write_all(&pkt).unwrap();
    }

    file.flush().unwrap();
    file
}

fn pcr_packet(ticks: u64) -> [u8; PACKET_SIZE_188] {
    let mut pkt = [0xFFu8; PACKET_SIZE_188];
    pkt[0] = SYNC_BYTE;
    pkt[1] = 0;
    pkt[2] = 0;
    pkt[3] = 0x30;
    pkt[4] = 7;
    pkt[5] = 0x10;

    let base = ticks / 300;
    let ext = ticks % 300;
    pkt[6] = (base >> 25) as u8;
    pkt[7] = (base >> 17) as u8;
    pkt[8] = (base >> 9) as u8;
    pkt[9] = (base >> 1) as u8;
    pkt[10] = (((base & 0x1) << 7) as u8) | 0x7E | ((ext >> 8) as u8 & 0x1);
    pkt[11] = (ext & 0xFF) as u8;

    TsPacketViewMut::new(&mut pkt).set_pid(0x100);
    pkt
}

/// Binds a receiver socket on an ephemeral loopback port.
pub fn bind_receiver(silence: Duration) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(silence)).unwrap();
    socket
}

/// Concatenates received payloads until the socket stays silent for its
/// read timeout.
pub fn receive_until_silent(socket: &UdpSocket) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 2048];

    while let Ok((n, _)) = socket.recv_from(&mut buf) {
        out.extend_from_slice(&buf[..n]);
    }

    out
}
