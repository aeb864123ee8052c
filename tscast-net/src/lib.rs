//! # tscast-net
//!
//! The wire-side half of the tscast sender pipeline:
//!
//! - [`Encapsulator`]: SMPTE 2022-2 framing, seven TS packets per UDP
//!   payload, each datagram stamped with the send deadline of its first
//!   packet.
//! - [`DatagramMuxer`]: the multi-stream timed scheduler. Each stream's
//!   datagrams are buffered in a per-stream queue, re-anchored from their
//!   file-derived timeline onto the muxer's monotonic clock, and released
//!   in deadline order by a preparer/sender thread pair at a fixed burst
//!   cadence.
//! - [`UdpSender`]: the shared egress socket.

mod datagram;
mod encap;
mod error;
mod muxer;
mod sender;

pub use datagram::{Datagram, Nanos};
pub use encap::{DatagramSink, Encapsulator, TS_PACKETS_PER_DATAGRAM};
pub use error::{NetError, Result};
pub use muxer::{DatagramMuxer, MuxStream, MuxerConfig};
pub use sender::UdpSender;
