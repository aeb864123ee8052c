//! # tscast-core
//!
//! Core primitives shared by the tscast streaming engine:
//!
//! - [`Fifo`]: a bounded single-producer/single-consumer queue with a
//!   lock-free fast path, blocking push/wait and explicit unblocking for
//!   shutdown.
//! - [`TickTimer`]: a fixed-period waitable timer driving the send cadence.

mod fifo;
mod timer;

pub use fifo::Fifo;
pub use timer::TickTimer;
