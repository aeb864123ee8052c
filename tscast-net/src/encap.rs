//! SMPTE 2022-2 encapsulation.
//!
//! Groups seven consecutive TS packets into one UDP payload. Whole groups
//! are zero-copy child views of the incoming packet buffer; a trailing
//! group of fewer than seven packets is copied into a carry buffer and
//! completed by the next push, so datagram payloads concatenate back to the
//! exact input byte stream.

use bytes::BytesMut;

use tscast_ts::TsBuffer;

use crate::datagram::{ticks_to_nanos, Datagram};

/// TS packets per SMPTE 2022-2 datagram.
pub const TS_PACKETS_PER_DATAGRAM: usize = 7;

/// Consumer of encapsulated datagrams.
pub trait DatagramSink {
    /// Accepts one datagram.
    fn push(&mut self, datagram: Datagram);

    /// Signals that any buffered data should be released downstream.
    fn flush(&mut self);

    /// Signals that no more datagrams will be pushed.
    fn close(&mut self);
}

/// Incomplete datagram carried between pushes.
struct Carry {
    payload: BytesMut,
    /// Deadline of the carry's first packet, already in nanoseconds.
    send_at: u64,
    packet_size: usize,
}

impl Carry {
    fn num_packets(&self) -> usize {
        self.payload.len() / self.packet_size
    }
}

/// SMPTE 2022-2 part 2 encapsulator (no RTP header).
pub struct Encapsulator<C: DatagramSink> {
    consumer: C,
    carry: Option<Carry>,
}

impl<C: DatagramSink> Encapsulator<C> {
    /// Creates an encapsulator pushing into `consumer`.
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            carry: None,
        }
    }

    /// Encapsulates `buffer` into datagrams of seven packets each.
    ///
    /// The send deadline of every datagram is the timestamp of its first TS
    /// packet. A remainder of fewer than seven packets is held back (by
    /// copy, so the parent buffer is not pinned) until the next push.
    pub fn push(&mut self, buffer: &TsBuffer) {
        let num_packets = buffer.num_packets();
        let mut index = 0;

        if self.carry.is_some() {
            index = self.fill_carry(buffer, num_packets);
        }

        while index + TS_PACKETS_PER_DATAGRAM <= num_packets {
            let payload = buffer.view(index, TS_PACKETS_PER_DATAGRAM).into_bytes();
            self.consumer.push(Datagram::new(
                payload,
                ticks_to_nanos(buffer.timestamp(index)),
            ));
            index += TS_PACKETS_PER_DATAGRAM;
        }

        if index < num_packets {
            self.store_carry(buffer, index, num_packets);
        }
    }

    /// Emits any outstanding carry immediately, even if short, and forwards
    /// the flush. Idempotent once the carry is drained.
    pub fn flush(&mut self) {
        if let Some(carry) = self.carry.take() {
            self.consumer
                .push(Datagram::new(carry.payload.freeze(), carry.send_at));
        }

        self.consumer.flush();
    }

    /// Forwards the close to the consumer.
    pub fn close(&mut self) {
        self.consumer.close();
    }

    /// Adds leading packets of `buffer` to the pending carry; pushes the
    /// carry once complete. Returns the number of packets consumed.
    fn fill_carry(&mut self, buffer: &TsBuffer, num_packets: usize) -> usize {
        let Some(carry) = self.carry.as_mut() else {
            return 0;
        };

        let missing = TS_PACKETS_PER_DATAGRAM - carry.num_packets();
        let take = missing.min(num_packets);

        for i in 0..take {
            carry.payload.extend_from_slice(buffer.packet(i));
        }

        if carry.num_packets() == TS_PACKETS_PER_DATAGRAM {
            if let Some(carry) = self.carry.take() {
                self.consumer
                    .push(Datagram::new(carry.payload.freeze(), carry.send_at));
            }
        }

        take
    }

    /// Copies the trailing short group into a fresh carry buffer.
    fn store_carry(&mut self, buffer: &TsBuffer, index: usize, num_packets: usize) {
        let packet_size = buffer.packet_size();
        let mut payload = BytesMut::with_capacity(TS_PACKETS_PER_DATAGRAM * packet_size);

        for i in index..num_packets {
            payload.extend_from_slice(buffer.packet(i));
        }

        self.carry = Some(Carry {
            payload,
            send_at: ticks_to_nanos(buffer.timestamp(index)),
            packet_size,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tscast_ts::{TsBufferMut, NULL_PACKET_188, PACKET_SIZE_188};

    #[derive(Default)]
    struct CollectSink {
        datagrams: Vec<Datagram>,
        flushes: usize,
        closes: usize,
    }

    impl DatagramSink for CollectSink {
        fn push(&mut self, datagram: Datagram) {
            self.datagrams.push(datagram);
        }
        fn flush(&mut self) {
            self.flushes += 1;
        }
        fn close(&mut self) {
            self.closes += 1;
        }
    }

    /// Buffer of `n` packets; packet `i` is tagged with `base + i` in its
    /// payload and stamped `(base + i) * 1000` ticks.
    fn buffer_of(base: u64, n: usize) -> TsBuffer {
        let mut buf = TsBufferMut::with_capacity(n, PACKET_SIZE_188);
        for i in 0..n {
            let mut pkt = NULL_PACKET_188;
            pkt[4] = (base + i as u64) as u8;
            buf.push_packet(&pkt, (base + i as u64) * 1000);
        }
        buf.freeze()
    }

    fn payload_tags(datagram: &Datagram) -> Vec<u8> {
        datagram
            .payload
            .chunks(PACKET_SIZE_188)
            .map(|p| p[4])
            .collect()
    }

    #[test]
    fn test_whole_groups() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 21));

        let sink = &encap.consumer;
        assert_eq!(sink.datagrams.len(), 3);
        for (g, datagram) in sink.datagrams.iter().enumerate() {
            assert_eq!(datagram.payload.len(), 7 * PACKET_SIZE_188);
            assert_eq!(
                payload_tags(datagram),
                (g as u8 * 7..g as u8 * 7 + 7).collect::<Vec<_>>()
            );
            // Deadline is the first packet's timestamp in nanoseconds.
            assert_eq!(datagram.send_at, ticks_to_nanos(g as u64 * 7 * 1000));
        }
    }

    #[test]
    fn test_exact_boundary_leaves_no_carry() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 14));
        assert_eq!(encap.consumer.datagrams.len(), 2);
        assert!(encap.carry.is_none());
    }

    #[test]
    fn test_carry_across_pushes() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 10)); // 1 whole group + 3 carried
        assert_eq!(encap.consumer.datagrams.len(), 1);

        encap.push(&buffer_of(10, 11)); // completes carry, then 1 group, 3 carried
        assert_eq!(encap.consumer.datagrams.len(), 3);

        // The carry datagram keeps the deadline of its first packet.
        assert_eq!(
            encap.consumer.datagrams[1].send_at,
            ticks_to_nanos(7 * 1000)
        );
        assert_eq!(payload_tags(&encap.consumer.datagrams[1]), vec![7, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn test_carry_spanning_multiple_short_pushes() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 3));
        encap.push(&buffer_of(3, 2));
        assert!(encap.consumer.datagrams.is_empty());

        encap.push(&buffer_of(5, 2));
        assert_eq!(encap.consumer.datagrams.len(), 1);
        assert_eq!(payload_tags(&encap.consumer.datagrams[0]), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_flush_emits_short_datagram() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 9));
        encap.flush();

        let sink = &encap.consumer;
        assert_eq!(sink.datagrams.len(), 2);
        assert_eq!(sink.datagrams[1].payload.len(), 2 * PACKET_SIZE_188);
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn test_flush_idempotent() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.push(&buffer_of(0, 9));
        encap.flush();
        encap.flush();

        assert_eq!(encap.consumer.datagrams.len(), 2);
        assert_eq!(encap.consumer.flushes, 2);
    }

    #[test]
    fn test_close_forwards() {
        let mut encap = Encapsulator::new(CollectSink::default());
        encap.close();
        assert_eq!(encap.consumer.closes, 1);
    }

    #[test]
    fn test_payloads_concatenate_to_input() {
        let mut encap = Encapsulator::new(CollectSink::default());
        // Push in awkward chunk sizes.
        let mut expected = Vec::new();
        let mut base = 0u64;
        for &n in &[5usize, 9, 1, 13, 6] {
            let buffer = buffer_of(base, n);
            expected.extend_from_slice(buffer.bytes());
            encap.push(&buffer);
            base += n as u64;
        }
        encap.flush();

        let mut actual = Vec::new();
        for datagram in &encap.consumer.datagrams {
            actual.extend_from_slice(&datagram.payload);
        }
        assert_eq!(actual, expected);
    }
}
