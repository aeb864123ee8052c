//! PCR sample accumulation for bitrate derivation.

use std::collections::HashMap;

use crate::buffer::TsBuffer;
use crate::packet::pcr_sub;

/// One PCR observation: counter value and the byte position of its packet
/// within the whole stream.
#[derive(Debug, Clone, Copy)]
struct PcrSample {
    pcr: u64,
    position: u64,
}

/// The PCR span accumulated by one PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrSpan {
    /// PID carrying the PCRs.
    pub pid: u16,
    /// Ticks between the first and last sample (27 MHz, wrap-corrected).
    pub ticks: u64,
    /// Bytes between the first and last sample's packets.
    pub bytes: u64,
}

/// Accumulates PCR samples per PID across pushed buffers.
///
/// CBR streams place PCRs at a constant byte cadence, so the widest span of
/// any single PID gives the most precise `bits / tick` ratio.
#[derive(Debug, Default)]
pub struct PcrFilter {
    samples: HashMap<u16, Vec<PcrSample>>,
}

impl PcrFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `buffer` for PCR-bearing packets and records their samples.
    ///
    /// `stream_position` is the byte offset of the buffer's first packet
    /// within the whole stream.
    pub fn push(&mut self, buffer: &TsBuffer, stream_position: u64) {
        let packet_size = buffer.packet_size() as u64;

        for index in 0..buffer.num_packets() {
            let packet = buffer.packet_view(index);
            if packet.has_pcr() {
                self.samples.entry(packet.pid()).or_default().push(PcrSample {
                    pcr: packet.pcr(),
                    position: stream_position + index as u64 * packet_size,
                });
            }
        }
    }

    /// Returns the PID with the widest PCR span, or `None` if no PID has
    /// accumulated two samples with a nonzero span yet.
    pub fn widest_span(&self) -> Option<PcrSpan> {
        let mut widest: Option<PcrSpan> = None;

        for (&pid, samples) in &self.samples {
            if samples.len() < 2 {
                continue;
            }

            let first = samples[0];
            let last = samples[samples.len() - 1];
            let ticks = pcr_sub(first.pcr, last.pcr);

            if ticks == 0 {
                continue;
            }

            if widest.map_or(true, |w| ticks > w.ticks) {
                widest = Some(PcrSpan {
                    pid,
                    ticks,
                    bytes: last.position - first.position,
                });
            }
        }

        widest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TsBufferMut;
    use crate::packet::{NULL_PACKET_188, PACKET_SIZE_188, PCR_MAX, SYNC_BYTE};

    fn pcr_packet(pid: u16, pcr: u64) -> [u8; PACKET_SIZE_188] {
        let mut pkt = [0xFF; PACKET_SIZE_188];
        pkt[0] = SYNC_BYTE;
        pkt[1] = ((pid >> 8) & 0x1F) as u8;
        pkt[2] = (pid & 0xFF) as u8;
        pkt[3] = 0x30;
        pkt[4] = 7;
        pkt[5] = 0x10;

        let base = pcr / 300;
        let ext = pcr % 300;
        pkt[6] = (base >> 25) as u8;
        pkt[7] = (base >> 17) as u8;
        pkt[8] = (base >> 9) as u8;
        pkt[9] = (base >> 1) as u8;
        pkt[10] = (((base & 0x1) << 7) as u8) | 0x7E | ((ext >> 8) as u8 & 0x1);
        pkt[11] = (ext & 0xFF) as u8;
        pkt
    }

    fn buffer_from(packets: &[[u8; PACKET_SIZE_188]]) -> TsBuffer {
        let mut buf = TsBufferMut::with_capacity(packets.len(), PACKET_SIZE_188);
        for pkt in packets {
            buf.push_packet(pkt, 0);
        }
        buf.freeze()
    }

    #[test]
    fn test_no_pcrs() {
        let mut filter = PcrFilter::new();
        filter.push(&buffer_from(&[NULL_PACKET_188; 4]), 0);
        assert_eq!(filter.widest_span(), None);
    }

    #[test]
    fn test_single_sample_not_enough() {
        let mut filter = PcrFilter::new();
        filter.push(&buffer_from(&[pcr_packet(0x100, 1000)]), 0);
        assert_eq!(filter.widest_span(), None);
    }

    #[test]
    fn test_span_across_buffers() {
        let mut filter = PcrFilter::new();
        filter.push(&buffer_from(&[pcr_packet(0x100, 1000), NULL_PACKET_188]), 0);
        filter.push(
            &buffer_from(&[NULL_PACKET_188, pcr_packet(0x100, 28_001_000)]),
            2 * PACKET_SIZE_188 as u64,
        );

        let span = filter.widest_span().unwrap();
        assert_eq!(span.pid, 0x100);
        assert_eq!(span.ticks, 28_000_000);
        assert_eq!(span.bytes, 3 * PACKET_SIZE_188 as u64);
    }

    #[test]
    fn test_widest_pid_wins() {
        let mut filter = PcrFilter::new();
        filter.push(
            &buffer_from(&[
                pcr_packet(0x100, 0),
                pcr_packet(0x200, 0),
                pcr_packet(0x100, 1_000),
                pcr_packet(0x200, 90_000),
            ]),
            0,
        );

        assert_eq!(filter.widest_span().unwrap().pid, 0x200);
    }

    #[test]
    fn test_wrapping_span() {
        let mut filter = PcrFilter::new();
        filter.push(
            &buffer_from(&[pcr_packet(0x50, PCR_MAX - 100), pcr_packet(0x50, 99)]),
            0,
        );

        assert_eq!(filter.widest_span().unwrap().ticks, 200);
    }
}
