//! Timed datagram record.

use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;

use tscast_ts::PCR_CLOCK_HZ;

/// Monotonic timestamp in nanoseconds.
///
/// Datagrams enter the muxer on the stream's own timeline (nanoseconds from
/// stream origin 0, converted from 27 MHz ticks); the muxer rewrites the
/// deadline onto its clock epoch when the datagram becomes eligible.
pub type Nanos = u64;

/// Converts 27 MHz PCR ticks to nanoseconds.
#[inline]
pub(crate) fn ticks_to_nanos(ticks: u64) -> Nanos {
    (u128::from(ticks) * 1_000_000_000 / u128::from(PCR_CLOCK_HZ)) as Nanos
}

/// A UDP datagram scheduled for a deadline-based send.
///
/// Holds a strong reference to its payload region, so the backing packet
/// buffer stays alive until the datagram has left the socket.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Destination endpoint, stamped by the owning stream on push.
    pub target: SocketAddr,
    /// Payload bytes (normally seven TS packets).
    pub payload: Bytes,
    /// Send deadline in nanoseconds.
    pub send_at: Nanos,
}

impl Datagram {
    /// Creates a datagram with an unset target; the stream it is pushed to
    /// stamps the real endpoint.
    pub fn new(payload: Bytes, send_at: Nanos) -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            payload,
            send_at,
        }
    }
}
