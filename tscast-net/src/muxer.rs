//! Multi-stream timed datagram scheduler.
//!
//! The muxer owns one egress socket and two threads. The **preparer** walks
//! every stream record round-robin, popping the datagrams whose re-anchored
//! deadline falls inside the look-ahead horizon into a shared prepared
//! list, kept sorted by deadline. The **sender** wakes on a fixed-period
//! timer, splits the prepared list at the current instant and writes the
//! expired datagrams to the socket. Because every datagram carries an
//! absolute deadline, throughput converges on the source bitrate even when
//! individual ticks jitter.
//!
//! Each stream is re-anchored onto the muxer clock with two marks: the
//! `sync_point` (deadline of its very first datagram, the stream's time
//! zero) and the `start_point` (muxer time when releasing began). A
//! datagram with deadline `d` becomes eligible at muxer time `t` when
//! `d - sync_point + start_point <= t`. Releasing does not begin until a
//! preroll's worth of stream time is buffered, so a slow-starting producer
//! does not cause an immediate underrun.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use tscast_core::{Fifo, TickTimer};

use crate::datagram::{Datagram, Nanos};
use crate::error::Result;
use crate::sender::UdpSender;

/// Sentinel for unset atomic time marks.
const UNSET: u64 = u64::MAX;

/// Muxer configuration.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Period of the send timer; bounds the minimum burst spacing.
    pub burst_period: Duration,
    /// Stream time that must be buffered before a stream starts releasing,
    /// and the preparer's look-ahead horizon.
    pub preroll: Duration,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            burst_period: Duration::from_millis(4),
            preroll: Duration::from_millis(40),
        }
    }
}

/// One stream inside the muxer: a datagram queue plus the marks anchoring
/// the stream's timeline to the muxer clock.
pub struct MuxStream {
    target: SocketAddr,
    fifo: Fifo<Datagram>,
    /// Deadline of the first datagram pushed; the stream's time zero.
    sync_point: AtomicU64,
    /// Muxer time at which the stream began releasing.
    start_point: AtomicU64,
    /// Deadline of the newest datagram in the queue.
    tail_deadline: AtomicU64,
    /// Original deadline of the last popped datagram.
    last_popped: AtomicU64,
    preroll: Nanos,
}

impl MuxStream {
    fn new(target: SocketAddr, fifo_capacity: usize, preroll: Nanos) -> Self {
        Self {
            target,
            fifo: Fifo::new(fifo_capacity),
            sync_point: AtomicU64::new(UNSET),
            start_point: AtomicU64::new(UNSET),
            tail_deadline: AtomicU64::new(0),
            last_popped: AtomicU64::new(UNSET),
            preroll,
        }
    }

    /// Destination endpoint of this stream.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Enqueues a datagram, blocking while the queue is full.
    ///
    /// The first datagram anchors the stream's time base. Producer side of
    /// the queue; one thread only.
    pub fn push(&self, mut datagram: Datagram) {
        if self.sync_point.load(Ordering::Relaxed) == UNSET {
            self.sync_point.store(datagram.send_at, Ordering::Release);
        }

        datagram.target = self.target;
        let deadline = datagram.send_at;

        if self.fifo.push(datagram).is_ok() {
            self.tail_deadline.store(deadline, Ordering::Release);
        }
    }

    /// Pops the front datagram if its re-anchored deadline has expired.
    ///
    /// Until the stream has banked `preroll` of buffered stream time the
    /// queue is held back and `None` is returned. The returned datagram's
    /// deadline is rewritten to the muxer clock. Consumer side of the
    /// queue; the preparer thread only.
    pub fn pop_front_if_eligible(&self, now: Nanos) -> Option<Datagram> {
        let front_deadline = self.fifo.front()?.send_at;
        let sync_point = self.sync_point.load(Ordering::Acquire);

        let mut start_point = self.start_point.load(Ordering::Relaxed);
        if start_point == UNSET {
            let tail = self.tail_deadline.load(Ordering::Acquire);
            if tail - front_deadline < self.preroll {
                return None;
            }
            self.start_point.store(now, Ordering::Relaxed);
            start_point = now;
        }

        let normalized = front_deadline - sync_point + start_point;
        if normalized >= now {
            return None;
        }

        let mut datagram = self.fifo.pop()?;
        self.last_popped.store(front_deadline, Ordering::Relaxed);
        datagram.send_at = normalized;
        Some(datagram)
    }

    /// Stream time of the last released datagram, i.e. how far into the
    /// source the stream has played.
    pub fn current_time(&self) -> Duration {
        let last = self.last_popped.load(Ordering::Relaxed);
        let sync = self.sync_point.load(Ordering::Relaxed);

        if last == UNSET || sync == UNSET {
            Duration::ZERO
        } else {
            Duration::from_nanos(last - sync)
        }
    }

    /// Stream time currently buffered in the queue. Consumer side; the
    /// preroll gate is this quantity measured by the preparer.
    pub fn buffered_time(&self) -> Duration {
        match self.fifo.front() {
            Some(front) => Duration::from_nanos(
                self.tail_deadline.load(Ordering::Acquire) - front.send_at,
            ),
            None => Duration::ZERO,
        }
    }

    /// Blocks until the queue has drained. Polls at a coarse interval; this
    /// is an end-of-stream convenience, not a hot path.
    pub fn flush(&self) {
        while self.fifo.read_available() > 0 {
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Releases a producer blocked on a full queue; pushes after this are
    /// discarded. Used when the stream is being torn down.
    pub fn unblock(&self) {
        self.fifo.unblock_producer();
    }
}

/// Min/max send-path timings plus burst and drop counters, all updated by
/// the sender thread and read from the stats accessors.
struct SendStats {
    min_timer: AtomicU64,
    max_timer: AtomicU64,
    min_prepare: AtomicU64,
    max_prepare: AtomicU64,
    min_send: AtomicU64,
    max_send: AtomicU64,
    high_burst_count: AtomicU32,
    drops: AtomicU64,
}

impl SendStats {
    fn new() -> Self {
        Self {
            min_timer: AtomicU64::new(UNSET),
            max_timer: AtomicU64::new(0),
            min_prepare: AtomicU64::new(UNSET),
            max_prepare: AtomicU64::new(0),
            min_send: AtomicU64::new(UNSET),
            max_send: AtomicU64::new(0),
            high_burst_count: AtomicU32::new(0),
            drops: AtomicU64::new(0),
        }
    }

    fn record(min: &AtomicU64, max: &AtomicU64, nanos: u64) {
        min.fetch_min(nanos, Ordering::Relaxed);
        max.fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Shared state between the muxer handle and its two threads.
struct Shared {
    epoch: Instant,
    period: Duration,
    preroll: Nanos,
    exit: AtomicBool,
    streams: Mutex<Vec<Arc<MuxStream>>>,
    /// Datagrams ready for the sender, sorted by deadline. The lock is held
    /// only for the split/append, never across a socket write.
    prepared: Mutex<Vec<Datagram>>,
    /// Set by the sender after each tick to release the preparer.
    burst_done: Mutex<bool>,
    burst_cond: Condvar,
    socket: UdpSender,
    stats: SendStats,
    /// Rolling window of (burst instant, byte count) spanning about one
    /// second, for bandwidth estimation.
    bursts: Mutex<VecDeque<(Nanos, usize)>>,
}

impl Shared {
    fn now(&self) -> Nanos {
        self.epoch.elapsed().as_nanos() as Nanos
    }
}

/// Multi-stream timed datagram scheduler over a single UDP socket.
pub struct DatagramMuxer {
    shared: Arc<Shared>,
    preparer: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

impl DatagramMuxer {
    /// Creates the muxer, binds the egress socket and launches the
    /// preparer and sender threads.
    pub fn new(config: MuxerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            period: config.burst_period,
            preroll: config.preroll.as_nanos() as Nanos,
            exit: AtomicBool::new(false),
            streams: Mutex::new(Vec::new()),
            prepared: Mutex::new(Vec::new()),
            burst_done: Mutex::new(false),
            burst_cond: Condvar::new(),
            socket: UdpSender::new()?,
            stats: SendStats::new(),
            bursts: Mutex::new(VecDeque::new()),
        });

        let preparer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("tscast-preparer".into())
                .spawn(move || preparer_loop(&shared))
                .map_err(crate::error::NetError::ThreadSpawn)?
        };

        let sender = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("tscast-sender".into())
                .spawn(move || sender_loop(&shared))
                .map_err(crate::error::NetError::ThreadSpawn)?
        };

        Ok(Self {
            shared,
            preparer: Some(preparer),
            sender: Some(sender),
        })
    }

    /// Adds a stream sending to `target`, with room for `fifo_capacity`
    /// queued datagrams.
    pub fn create_stream(&self, target: SocketAddr, fifo_capacity: usize) -> Arc<MuxStream> {
        let stream = Arc::new(MuxStream::new(target, fifo_capacity, self.shared.preroll));
        self.shared.streams.lock().push(Arc::clone(&stream));
        stream
    }

    /// Removes a stream record. Datagrams already in the prepared list are
    /// still sent; their payloads hold the backing buffers alive.
    pub fn close_stream(&self, stream: &Arc<MuxStream>) {
        stream.unblock();
        self.shared
            .streams
            .lock()
            .retain(|s| !Arc::ptr_eq(s, stream));
    }

    /// Snapshot of the current stream records.
    pub fn streams(&self) -> Vec<Arc<MuxStream>> {
        self.shared.streams.lock().clone()
    }

    /// Current output bandwidth in bits per second and the longest gap
    /// between recent bursts, measured over a rolling one-second window.
    pub fn output_bandwidth(&self) -> (u64, Duration) {
        let bursts: Vec<(Nanos, usize)> = {
            let window = self.shared.bursts.lock();
            window.iter().copied().collect()
        };

        if bursts.len() < 2 {
            return (0, Duration::ZERO);
        }

        let mut bytes = 0usize;
        let mut max_gap: Nanos = 0;
        let mut prev: Option<Nanos> = None;

        for &(t, size) in &bursts {
            if let Some(prev) = prev {
                max_gap = max_gap.max(t - prev);
            }
            bytes += size;
            prev = Some(t);
        }

        let span = bursts[bursts.len() - 1].0 - bursts[0].0;
        if span == 0 {
            return (0, Duration::ZERO);
        }

        let bitrate = (bytes as u128 * 8 * 1_000_000_000 / u128::from(span)) as u64;
        (bitrate, Duration::from_nanos(max_gap))
    }

    /// Formats the send-path timing statistics, or an empty string before
    /// the first burst.
    pub fn stats(&self) -> String {
        let stats = &self.shared.stats;

        if stats.max_timer.load(Ordering::Relaxed) == 0 {
            return String::new();
        }

        let ms = |nanos: u64| {
            if nanos == UNSET {
                0.0
            } else {
                nanos as f64 / 1_000_000.0
            }
        };

        format!(
            "timer(ms) [{:.3},{:.3}] prepare [{:.3},{:.3}] send [{:.3},{:.3}] highburst {} drops {}",
            ms(stats.min_timer.load(Ordering::Relaxed)),
            ms(stats.max_timer.load(Ordering::Relaxed)),
            ms(stats.min_prepare.load(Ordering::Relaxed)),
            ms(stats.max_prepare.load(Ordering::Relaxed)),
            ms(stats.min_send.load(Ordering::Relaxed)),
            ms(stats.max_send.load(Ordering::Relaxed)),
            stats.high_burst_count.load(Ordering::Relaxed),
            stats.drops.load(Ordering::Relaxed),
        )
    }
}

impl Drop for DatagramMuxer {
    fn drop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);

        {
            let mut done = self.shared.burst_done.lock();
            *done = true;
            self.shared.burst_cond.notify_one();
        }

        if let Some(preparer) = self.preparer.take() {
            let _ = preparer.join();
        }
        if let Some(sender) = self.sender.take() {
            let _ = sender.join();
        }
    }
}

/// Preparer loop: move eligible datagrams from every stream into the
/// prepared list, then sleep until the sender has emitted a burst.
fn preparer_loop(shared: &Shared) {
    while !shared.exit.load(Ordering::Acquire) {
        let horizon = shared.now() + shared.preroll;

        let mut batch = Vec::new();
        {
            let streams = shared.streams.lock();
            loop {
                let mut added = false;
                for stream in streams.iter() {
                    if let Some(datagram) = stream.pop_front_if_eligible(horizon) {
                        batch.push(datagram);
                        added = true;
                    }
                }
                if !added {
                    break;
                }
            }
        }

        if !batch.is_empty() {
            let mut prepared = shared.prepared.lock();
            prepared.extend(batch);
            // Stable sort keeps per-stream order for equal deadlines.
            prepared.sort_by_key(|d| d.send_at);
        }

        let mut done = shared.burst_done.lock();
        if !*done {
            let _ = shared
                .burst_cond
                .wait_for(&mut done, shared.period.max(Duration::from_millis(1)));
        }
        *done = false;
    }
}

/// Sender loop: on each tick, send every prepared datagram whose deadline
/// has passed and record the timing statistics.
fn sender_loop(shared: &Shared) {
    let timer = TickTimer::new(shared.period);
    let mut last_burst: Option<Instant> = None;

    loop {
        let tick = timer.wait();
        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        let now = (tick - shared.epoch).as_nanos() as Nanos;

        let ready: Vec<Datagram> = {
            let mut prepared = shared.prepared.lock();
            let split = prepared.partition_point(|d| d.send_at < now);
            prepared.drain(..split).collect()
        };
        let after_split = Instant::now();

        let mut burst_bytes = 0usize;
        for datagram in &ready {
            match shared.socket.send(datagram) {
                Ok(sent) => burst_bytes += sent,
                Err(e) => {
                    shared.stats.drops.fetch_add(1, Ordering::Relaxed);
                    warn!(target = %datagram.target, error = %e, "datagram dropped");
                }
            }
        }
        let after_send = Instant::now();

        if !ready.is_empty() {
            record_burst_stats(
                shared,
                tick,
                last_burst,
                after_split,
                after_send,
                now,
                burst_bytes,
            );
        }
        last_burst = Some(tick);

        let mut done = shared.burst_done.lock();
        *done = true;
        shared.burst_cond.notify_one();
    }
}

fn record_burst_stats(
    shared: &Shared,
    tick: Instant,
    last_burst: Option<Instant>,
    after_split: Instant,
    after_send: Instant,
    now: Nanos,
    burst_bytes: usize,
) {
    let stats = &shared.stats;

    if let Some(last) = last_burst {
        let timer_delta = tick - last;
        SendStats::record(
            &stats.min_timer,
            &stats.max_timer,
            timer_delta.as_nanos() as u64,
        );

        if timer_delta >= shared.period + Duration::from_millis(2) {
            stats.high_burst_count.fetch_add(1, Ordering::Relaxed);
            debug!(
                timer_ms = timer_delta.as_secs_f64() * 1000.0,
                "high burst period"
            );
        }
    }

    SendStats::record(
        &stats.min_prepare,
        &stats.max_prepare,
        (after_split - tick).as_nanos() as u64,
    );
    SendStats::record(
        &stats.min_send,
        &stats.max_send,
        (after_send - after_split).as_nanos() as u64,
    );

    let mut bursts = shared.bursts.lock();
    if bursts.len() > 1 {
        let span = bursts[bursts.len() - 1].0 - bursts[0].0;
        if span >= 1_000_000_000 {
            bursts.pop_front();
        }
    }
    bursts.push_back((now, burst_bytes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::net::UdpSocket;

    const MS: Nanos = 1_000_000;

    fn datagram(send_at: Nanos) -> Datagram {
        Datagram::new(Bytes::from_static(&[0x47; 188]), send_at)
    }

    fn test_stream(preroll_ms: u64) -> MuxStream {
        MuxStream::new(
            SocketAddr::from(([127, 0, 0, 1], 50000)),
            64,
            preroll_ms * MS,
        )
    }

    #[test]
    fn test_push_sets_sync_point_and_target() {
        let stream = test_stream(40);
        stream.push(datagram(5 * MS));
        stream.push(datagram(10 * MS));

        assert_eq!(stream.sync_point.load(Ordering::Relaxed), 5 * MS);
        assert_eq!(stream.tail_deadline.load(Ordering::Relaxed), 10 * MS);
        assert_eq!(stream.fifo.front().unwrap().target.port(), 50000);
    }

    #[test]
    fn test_preroll_holds_back_release() {
        let stream = test_stream(40);
        stream.push(datagram(0));
        stream.push(datagram(30 * MS));

        // Only 30 ms banked; the 40 ms preroll is not met.
        assert!(stream.pop_front_if_eligible(1000 * MS).is_none());

        stream.push(datagram(45 * MS));
        assert!(stream.pop_front_if_eligible(1000 * MS).is_some());
    }

    #[test]
    fn test_pop_normalizes_deadline() {
        let stream = test_stream(10);
        stream.push(datagram(100 * MS)); // sync point
        stream.push(datagram(115 * MS));

        // First eligible pop sets start_point = now and re-anchors.
        let now = 500 * MS;
        assert!(stream.pop_front_if_eligible(now).is_none()); // normalized == now

        let later = 506 * MS;
        let first = stream.pop_front_if_eligible(later).unwrap();
        assert_eq!(first.send_at, 500 * MS);

        // Second datagram keeps its 15 ms offset from the first.
        let second = stream.pop_front_if_eligible(520 * MS).unwrap();
        assert_eq!(second.send_at, 515 * MS);
    }

    #[test]
    fn test_pop_respects_deadline_order() {
        let stream = test_stream(1);
        for i in 0..10u64 {
            stream.push(datagram(i * 10 * MS));
        }

        let mut deadlines = Vec::new();
        let mut now = 100 * MS;
        loop {
            match stream.pop_front_if_eligible(now) {
                Some(d) => deadlines.push(d.send_at),
                None => {
                    now += 10 * MS;
                    if now > 100_000 * MS {
                        break;
                    }
                    if deadlines.len() == 10 {
                        break;
                    }
                }
            }
        }

        assert_eq!(deadlines.len(), 10);
        let mut sorted = deadlines.clone();
        sorted.sort_unstable();
        assert_eq!(deadlines, sorted);
    }

    #[test]
    fn test_current_time_tracks_popped() {
        let stream = test_stream(1);
        stream.push(datagram(1000 * MS));
        stream.push(datagram(1005 * MS));
        assert_eq!(stream.current_time(), Duration::ZERO);

        // Pop both (bank met once tail - front >= 1 ms).
        let mut now = 10_000 * MS;
        while stream.fifo.read_available() > 0 {
            stream.pop_front_if_eligible(now);
            now += MS;
        }

        assert_eq!(stream.current_time(), Duration::from_millis(5));
    }

    #[test]
    fn test_muxer_create_and_close_stream() {
        let muxer = DatagramMuxer::new(MuxerConfig::default()).unwrap();
        let stream = muxer.create_stream(SocketAddr::from(([127, 0, 0, 1], 50001)), 16);
        assert_eq!(muxer.streams().len(), 1);

        muxer.close_stream(&stream);
        assert!(muxer.streams().is_empty());

        // Pushes after close are discarded, not blocked.
        for i in 0..64u64 {
            stream.push(datagram(i));
        }
    }

    #[test]
    fn test_muxer_sends_in_deadline_order() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();

        let muxer = DatagramMuxer::new(MuxerConfig {
            burst_period: Duration::from_millis(2),
            preroll: Duration::from_millis(5),
        })
        .unwrap();
        let stream = muxer.create_stream(receiver.local_addr().unwrap(), 256);

        // 20 datagrams, 5 ms apart: 100 ms of stream time, tagged in order.
        for i in 0..20u8 {
            let mut payload = vec![0x47u8; 188];
            payload[1] = i;
            stream.push(Datagram::new(Bytes::from(payload), u64::from(i) * 5 * MS));
        }

        let mut received = Vec::new();
        let mut buf = [0u8; 512];
        while received.len() < 20 {
            match receiver.recv_from(&mut buf) {
                Ok((n, _)) => {
                    assert_eq!(n, 188);
                    received.push(buf[1]);
                }
                Err(_) => break,
            }
        }

        assert_eq!(received, (0..20).collect::<Vec<_>>());

        let (bitrate, _) = muxer.output_bandwidth();
        assert!(bitrate > 0);
        assert!(!muxer.stats().is_empty());
    }

    #[test]
    fn test_stats_empty_before_first_burst() {
        let muxer = DatagramMuxer::new(MuxerConfig::default()).unwrap();
        assert!(muxer.stats().is_empty());
        assert_eq!(muxer.output_bandwidth().0, 0);
    }
}
