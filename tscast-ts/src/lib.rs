//! # tscast-ts
//!
//! MPEG-2 Transport Stream support for the tscast streaming engine.
//!
//! This crate covers the file-side half of the sender pipeline:
//!
//! - **Packet views**: zero-copy accessors over raw 188/204-byte TS packets
//!   (PID, continuity counter, adaptation field, PCR).
//! - **Packet buffers**: reference-counted regions of consecutive TS packets
//!   carrying one 27 MHz timestamp per packet, with zero-copy child views.
//! - **PCR filtering**: per-PID accumulation of PCR samples to derive the
//!   intrinsic bitrate of a CBR stream.
//! - **File parsing**: sync discovery (188 and 204-byte strides), bitrate
//!   computation, and fixed-size buffered reads with synthetic CBR
//!   timestamps.
//!
//! Only CBR files carrying PCRs are supported; the timestamps attached to
//! the parsed packets are derived from the computed bitrate, not from the
//! individual PCR values, which keeps the downstream schedule strictly
//! constant-rate.

mod buffer;
mod error;
mod filter;
mod packet;
mod parser;

pub use buffer::{TsBuffer, TsBufferMut};
pub use error::{Result, TsError};
pub use filter::{PcrFilter, PcrSpan};
pub use packet::{
    pcr_sub, TsPacketView, TsPacketViewMut, NULL_PACKET_188, PACKET_SIZE_188, PACKET_SIZE_204,
    PCR_CLOCK_HZ, PCR_MAX, SYNC_BYTE,
};
pub use parser::{TsFileParser, APPROX_READ_SIZE};
