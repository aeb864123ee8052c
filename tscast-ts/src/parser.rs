//! MPEG-2 TS file parser.
//!
//! Opens a CBR transport stream file, locates the packet sync, derives the
//! stream bitrate from PCR spacing and then serves fixed-size packet
//! buffers whose per-packet timestamps follow the computed constant rate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::buffer::{TsBuffer, TsBufferMut};
use crate::error::{Result, TsError};
use crate::filter::PcrFilter;
use crate::packet::{PACKET_SIZE_188, PACKET_SIZE_204, PCR_CLOCK_HZ, SYNC_BYTE};

/// Target byte size of one read, rounded down to a whole number of packets.
pub const APPROX_READ_SIZE: usize = 128 * 1024;

/// Size of the sync scan buffer: LCM of three 188-byte and three 204-byte
/// packets, so a full run of either stride always fits.
const SYNC_SCAN_SIZE: usize = 9588;

/// Number of trailing bytes re-scanned when a scan buffer ends without a
/// match, so a sync run straddling the buffer boundary is not missed.
const SYNC_REWIND: usize = 3 * PACKET_SIZE_204;

/// PCR span (27 MHz ticks) targeted before the bitrate is computed.
const BITRATE_PCR_SPAN: u64 = 3 * PCR_CLOCK_HZ;

/// Transport stream file parser.
///
/// The timestamps attached to the emitted packets are synthetic: packet `i`
/// (counted from the sync position) is stamped
/// `i * packet_size * 8 * 27_000_000 / bitrate` ticks. A source whose PCR
/// clock deviates from a true constant rate will drift against these
/// timestamps; only CBR files are supported.
pub struct TsFileParser {
    file: File,
    path: PathBuf,
    /// 188 or 204, fixed at sync discovery.
    packet_size: usize,
    /// Byte offset of the first synced packet.
    initial_sync_pos: u64,
    /// Packets carried by one full read.
    per_buffer_packets: usize,
    /// Packets emitted so far, counted from the sync position.
    packets_read: u64,
    /// Bitrate in bits per second derived from PCR spacing.
    bitrate: u64,
    estimated_buffers_per_second: u32,
}

impl TsFileParser {
    /// Opens `path`, discovers the packet sync and computes the bitrate.
    ///
    /// Fails with [`TsError::FileOpen`] if the file cannot be opened,
    /// [`TsError::NoSync`] if no packet sync exists, and
    /// [`TsError::InsufficientPcrs`] if the file carries fewer than two
    /// usable PCRs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "opening TS file");

        let file = File::open(&path).map_err(|source| TsError::FileOpen {
            path: path.clone(),
            source,
        })?;

        let mut parser = Self {
            file,
            path,
            packet_size: 0,
            initial_sync_pos: 0,
            per_buffer_packets: 0,
            packets_read: 0,
            bitrate: 0,
            estimated_buffers_per_second: 0,
        };

        parser.sync()?;
        parser.compute_bitrate()?;

        Ok(parser)
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Packet size discovered at sync (188 or 204).
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Stream bitrate in bits per second.
    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    /// Estimated number of buffers emitted per second of stream time.
    pub fn estimated_buffers_per_second(&self) -> u32 {
        self.estimated_buffers_per_second
    }

    /// Reads the next buffer of packets, or `None` at end of file.
    pub fn read(&mut self) -> Result<Option<TsBuffer>> {
        let mut buffer = TsBufferMut::with_capacity(self.per_buffer_packets, self.packet_size);
        let region = buffer.resize_packets(self.per_buffer_packets);
        let bytes = read_fully(&mut self.file, region)?;

        let num_packets = bytes / self.packet_size;
        if num_packets == 0 {
            return Ok(None);
        }

        buffer.truncate_packets(num_packets);
        buffer.set_timestamps(
            (0..num_packets as u64)
                .map(|i| self.timestamp_of(self.packets_read + i))
                .collect(),
        );
        self.packets_read += num_packets as u64;

        Ok(Some(buffer.freeze()))
    }

    /// Looks for three consecutive packets with a valid sync byte, first at
    /// the 188-byte stride, then at 204, and leaves the file positioned at
    /// the first synced packet.
    fn sync(&mut self) -> Result<()> {
        let mut scan = vec![0u8; SYNC_SCAN_SIZE];
        let mut scan_base: u64 = 0;

        loop {
            let read_size = read_fully(&mut self.file, &mut scan)?;

            if read_size > SYNC_REWIND {
                let limit = read_size - SYNC_REWIND;
                for pos in 0..limit {
                    if scan[pos] != SYNC_BYTE {
                        continue;
                    }
                    if scan[pos + PACKET_SIZE_188] == SYNC_BYTE
                        && scan[pos + PACKET_SIZE_188 * 2] == SYNC_BYTE
                    {
                        self.packet_size = PACKET_SIZE_188;
                    } else if scan[pos + PACKET_SIZE_204] == SYNC_BYTE
                        && scan[pos + PACKET_SIZE_204 * 2] == SYNC_BYTE
                    {
                        self.packet_size = PACKET_SIZE_204;
                    } else {
                        continue;
                    }

                    self.initial_sync_pos = scan_base + pos as u64;
                    self.per_buffer_packets = APPROX_READ_SIZE / self.packet_size;
                    self.file.seek(SeekFrom::Start(self.initial_sync_pos))?;

                    debug!(
                        pos = self.initial_sync_pos,
                        packet_size = self.packet_size,
                        "TS sync found"
                    );
                    return Ok(());
                }
            }

            if read_size < scan.len() {
                // EOF without a match.
                return Err(TsError::NoSync);
            }

            // Rewind the last three packets' worth so a run straddling the
            // buffer boundary is caught on the next pass.
            self.file.seek(SeekFrom::Current(-(SYNC_REWIND as i64)))?;
            scan_base += (read_size - SYNC_REWIND) as u64;
        }
    }

    /// Feeds packets through a PCR filter until one PID spans three seconds
    /// (or EOF), then derives the bitrate and rewinds to the sync position.
    fn compute_bitrate(&mut self) -> Result<()> {
        let mut filter = PcrFilter::new();

        loop {
            let position = self.packets_read * self.packet_size as u64;
            let Some(buffer) = self.read()? else {
                break;
            };

            filter.push(&buffer, position);

            if filter.widest_span().is_some_and(|s| s.ticks >= BITRATE_PCR_SPAN) {
                break;
            }
        }

        let span = filter.widest_span().ok_or(TsError::InsufficientPcrs)?;
        if span.bytes == 0 {
            return Err(TsError::InsufficientPcrs);
        }

        self.bitrate =
            (u128::from(span.bytes) * 8 * u128::from(PCR_CLOCK_HZ) / u128::from(span.ticks)) as u64;

        let bytes_per_buffer = (self.per_buffer_packets * self.packet_size) as u64;
        self.estimated_buffers_per_second =
            ((self.bitrate / (bytes_per_buffer * 8)).max(1)) as u32;

        debug!(
            bitrate = self.bitrate,
            pcr_pid = span.pid,
            "TS bitrate computed"
        );

        self.file.seek(SeekFrom::Start(self.initial_sync_pos))?;
        self.packets_read = 0;

        Ok(())
    }

    /// Synthetic CBR timestamp of the packet at cumulative `index`, in
    /// 27 MHz ticks.
    fn timestamp_of(&self, index: u64) -> u64 {
        if self.bitrate == 0 {
            // Bitrate probing phase; timestamps are discarded.
            return 0;
        }

        (u128::from(index) * self.packet_size as u128 * 8 * u128::from(PCR_CLOCK_HZ)
            / u128::from(self.bitrate)) as u64
    }
}

/// Reads until `buf` is full or EOF, returning the number of bytes read.
fn read_fully(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;

    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(total)
}
