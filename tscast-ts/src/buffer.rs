//! Reference-counted transport stream packet buffers.
//!
//! A [`TsBuffer`] couples a shared byte region holding whole TS packets
//! with a parallel array of per-packet timestamps in 27 MHz ticks. Child
//! views ([`TsBuffer::view`]) borrow a packet range without copying; both
//! the bytes and the timestamp slice stay alive for as long as any view
//! exists, so views can travel across threads ahead of their parent.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::packet::TsPacketView;

/// Immutable buffer of consecutive TS packets with per-packet timestamps.
#[derive(Debug, Clone)]
pub struct TsBuffer {
    data: Bytes,
    timestamps: Arc<[u64]>,
    /// Index of this view's first packet within `timestamps`.
    ts_offset: usize,
    packet_size: usize,
}

impl TsBuffer {
    /// Number of valid packets in the buffer.
    pub fn num_packets(&self) -> usize {
        self.data.len() / self.packet_size
    }

    /// The TS packet size (188 or 204).
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Total byte size of the valid packets.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer holds no packets.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes of packet `index`.
    pub fn packet(&self, index: usize) -> &[u8] {
        let start = index * self.packet_size;
        &self.data[start..start + self.packet_size]
    }

    /// Parsed view of packet `index`.
    pub fn packet_view(&self, index: usize) -> TsPacketView<'_> {
        TsPacketView::new(self.packet(index))
    }

    /// Timestamp of packet `index` in 27 MHz ticks.
    pub fn timestamp(&self, index: usize) -> u64 {
        self.timestamps[self.ts_offset + index]
    }

    /// Timestamps of all valid packets.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps[self.ts_offset..self.ts_offset + self.num_packets()]
    }

    /// The raw byte region of the buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the buffer into its byte region. The region keeps the
    /// backing allocation (and therefore any parent buffer) alive.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Zero-copy child view of `count` packets starting at `first_packet`.
    ///
    /// The child shares the byte region and the timestamp slice with its
    /// parent and extends their lifetime.
    pub fn view(&self, first_packet: usize, count: usize) -> TsBuffer {
        let start = first_packet * self.packet_size;
        let end = start + count * self.packet_size;

        TsBuffer {
            data: self.data.slice(start..end),
            timestamps: Arc::clone(&self.timestamps),
            ts_offset: self.ts_offset + first_packet,
            packet_size: self.packet_size,
        }
    }
}

/// Mutable assembly buffer, frozen into a [`TsBuffer`] once filled.
#[derive(Debug)]
pub struct TsBufferMut {
    data: BytesMut,
    timestamps: Vec<u64>,
    packet_size: usize,
}

impl TsBufferMut {
    /// Allocates space for `num_packets_capacity` packets.
    pub fn with_capacity(num_packets_capacity: usize, packet_size: usize) -> Self {
        debug_assert!(packet_size == 188 || packet_size == 204);

        Self {
            data: BytesMut::with_capacity(num_packets_capacity * packet_size),
            timestamps: Vec::with_capacity(num_packets_capacity),
            packet_size,
        }
    }

    /// Appends one packet and its timestamp.
    pub fn push_packet(&mut self, packet: &[u8], timestamp: u64) {
        debug_assert_eq!(packet.len(), self.packet_size);
        self.data.extend_from_slice(packet);
        self.timestamps.push(timestamp);
    }

    /// Grows the byte region to hold `num_packets` packets and returns it
    /// zero-filled for a bulk read. Timestamps for the packets must be
    /// supplied with [`TsBufferMut::set_timestamps`].
    pub fn resize_packets(&mut self, num_packets: usize) -> &mut [u8] {
        self.data.resize(num_packets * self.packet_size, 0);
        &mut self.data[..]
    }

    /// Truncates to `num_packets` whole packets.
    pub fn truncate_packets(&mut self, num_packets: usize) {
        self.data.truncate(num_packets * self.packet_size);
        self.timestamps.truncate(num_packets);
    }

    /// Replaces the timestamp array.
    pub fn set_timestamps(&mut self, timestamps: Vec<u64>) {
        self.timestamps = timestamps;
    }

    /// Number of whole packets currently held.
    pub fn num_packets(&self) -> usize {
        self.data.len() / self.packet_size
    }

    /// Freezes into an immutable shareable buffer.
    pub fn freeze(self) -> TsBuffer {
        debug_assert_eq!(self.timestamps.len(), self.data.len() / self.packet_size);

        TsBuffer {
            data: self.data.freeze(),
            timestamps: self.timestamps.into(),
            ts_offset: 0,
            packet_size: self.packet_size,
        }
    }
}
