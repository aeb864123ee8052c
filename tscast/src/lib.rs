//! # tscast
//!
//! Real-time MPEG-2 transport stream sender.
//!
//! tscast reads CBR transport stream files and replays them to UDP
//! endpoints at their intrinsic bitrate (derived from the embedded PCRs),
//! framed per SMPTE 2022-2: seven TS packets per datagram, no RTP header.
//! A downstream decoder can render the stream in real time without
//! rebuffering.
//!
//! # Architecture
//!
//! ```text
//!  file ──▶ parser ──▶ fifo ──▶ encapsulator ──▶ stream queue ─┐
//!  file ──▶ parser ──▶ fifo ──▶ encapsulator ──▶ stream queue ─┤
//!                                                              ▼
//!                                              preparer ──▶ sender ──▶ UDP
//! ```
//!
//! Each stream runs a producer/consumer thread pair ([`FileSource`]); the
//! shared [`tscast_net::DatagramMuxer`] interleaves all streams onto one
//! socket in deadline order. The [`Caster`] façade owns stream lifecycle:
//! creation, deletion, listing, and end-of-stream cleanup.
//!
//! # Example
//!
//! ```no_run
//! use tscast::Caster;
//!
//! fn main() -> tscast::Result<()> {
//!     let caster = Caster::new(Default::default())?;
//!     caster.create_stream("movie.ts", "127.0.0.1".parse().unwrap(), 50000)?;
//!     caster.run_play();
//!     Ok(())
//! }
//! ```

mod caster;
mod error;
mod source;
mod stream;

pub use caster::Caster;
pub use error::{Error, Result};
pub use source::{FileSource, SourceObserver};
pub use stream::{Endpoint, StreamInfo};

pub use tscast_net::MuxerConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
