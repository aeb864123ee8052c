//! Stream lifecycle façade.
//!
//! The [`Caster`] owns the datagram muxer and the list of active streams.
//! End-of-stream and error events are posted by the source worker threads
//! onto a control channel and consumed by the maintenance loop, so removal
//! never contends for the streams mutex from inside an observer callback.

use std::io::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, Level};

use tscast_net::{DatagramMuxer, MuxerConfig};

use crate::error::{Error, Result};
use crate::source::{FileSource, SourceObserver};
use crate::stream::{Endpoint, MuxSink, StreamHandle, StreamInfo};

/// Capacity of each stream's datagram queue: more than one second at
/// 270 Mbps with one TS packet per datagram.
pub const MAX_DATAGRAMS_PER_STREAM: usize = 180_000;

/// Maintenance messages posted by stream observers.
enum CtrlMsg {
    /// The stream delivered its last datagram.
    Ended(u32),
    /// The stream failed; the message is the rendered error.
    Failed(u32, String),
}

/// Observer bridging one source's events onto the control channel.
struct StreamEventListener {
    id: u32,
    ctrl: Sender<CtrlMsg>,
}

impl SourceObserver for StreamEventListener {
    fn on_source_eof(&self) {
        let _ = self.ctrl.send(CtrlMsg::Ended(self.id));
    }

    fn on_source_error(&self, error: &Error) {
        let _ = self.ctrl.send(CtrlMsg::Failed(self.id, error.to_string()));
    }
}

/// The tscast engine: stream creation, deletion, listing and maintenance.
pub struct Caster {
    muxer: DatagramMuxer,
    streams: Mutex<Vec<StreamHandle>>,
    next_id: AtomicU32,
    ctrl_tx: Sender<CtrlMsg>,
    ctrl_rx: Mutex<Receiver<CtrlMsg>>,
}

impl Caster {
    /// Creates the engine and its muxer. Fails if the egress socket cannot
    /// be created.
    pub fn new(config: MuxerConfig) -> Result<Self> {
        let (ctrl_tx, ctrl_rx) = mpsc::channel();

        Ok(Self {
            muxer: DatagramMuxer::new(config)?,
            streams: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(0),
            ctrl_tx,
            ctrl_rx: Mutex::new(ctrl_rx),
        })
    }

    /// Creates a stream from `source` to `ip:port` and starts it.
    ///
    /// Returns the stream record with the newly assigned id. Ids grow
    /// monotonically and are never reused within the process.
    pub fn create_stream(
        &self,
        source: impl AsRef<Path>,
        ip: IpAddr,
        port: u16,
    ) -> Result<StreamInfo> {
        let mut streams = self.streams.lock();

        let target = SocketAddr::new(ip, port);
        let mux_stream = self.muxer.create_stream(target, MAX_DATAGRAMS_PER_STREAM);

        let mut file_source =
            match FileSource::new(source.as_ref(), MuxSink(Arc::clone(&mux_stream))) {
                Ok(file_source) => file_source,
                Err(e) => {
                    self.muxer.close_stream(&mux_stream);
                    return Err(e);
                }
            };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Arc<dyn SourceObserver> = Arc::new(StreamEventListener {
            id,
            ctrl: self.ctrl_tx.clone(),
        });
        file_source.attach_observer(&listener);

        if let Err(e) = file_source.start() {
            self.muxer.close_stream(&mux_stream);
            return Err(e);
        }

        let info = StreamInfo {
            id,
            source: source.as_ref().display().to_string(),
            endpoint: Endpoint {
                ip: ip.to_string(),
                port,
            },
        };

        info!(
            stream_id = id,
            source = %info.source,
            target = %target,
            "stream created"
        );

        streams.push(StreamHandle {
            id,
            info: info.clone(),
            source: file_source,
            mux_stream,
            _listener: listener,
        });

        Ok(info)
    }

    /// Stops and removes a stream.
    ///
    /// Queued datagrams that have not yet been released are discarded;
    /// datagrams already prepared for sending still go out.
    pub fn delete_stream(&self, id: u32) -> Result<()> {
        let handle = self.take_stream(id)?;

        // Unblock the encapsulator before joining its thread.
        self.muxer.close_stream(&handle.mux_stream);
        let mut source = handle.source;
        source.stop(false)?;

        info!(stream_id = id, "stream deleted");
        Ok(())
    }

    /// Removes a stream that has reached end of file, draining everything
    /// it has left in flight first.
    fn delete_finished_stream(&self, id: u32) -> Result<()> {
        let handle = self.take_stream(id)?;

        let mut source = handle.source;
        source.stop(true)?;
        handle.mux_stream.flush();
        self.muxer.close_stream(&handle.mux_stream);

        info!(stream_id = id, "stream ended");
        Ok(())
    }

    /// Snapshot of the active stream records.
    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.streams.lock().iter().map(|s| s.info.clone()).collect()
    }

    /// Number of active streams.
    pub fn num_streams(&self) -> usize {
        self.streams.lock().len()
    }

    /// Current egress bandwidth in bits per second and the longest recent
    /// burst gap.
    pub fn output_bandwidth(&self) -> (u64, Duration) {
        self.muxer.output_bandwidth()
    }

    /// Send-path timing statistics.
    pub fn stats(&self) -> String {
        self.muxer.stats()
    }

    /// Drains pending end-of-stream and error events, removing the affected
    /// streams. Called periodically by the maintenance loops.
    pub fn collect(&self) {
        loop {
            let msg = {
                let rx = self.ctrl_rx.lock();
                rx.try_recv()
            };

            match msg {
                Ok(CtrlMsg::Ended(id)) => {
                    // Already-removed streams are fine to observe here.
                    let _ = self.delete_finished_stream(id);
                }
                Ok(CtrlMsg::Failed(id, message)) => {
                    error!(stream_id = id, error = %message, "stream failed");
                    let _ = self.delete_stream(id);
                }
                Err(_) => break,
            }
        }
    }

    /// One-shot mode main loop: runs maintenance until every stream has
    /// completed, refreshing a status line along the way.
    pub fn run_play(&self) {
        loop {
            thread::sleep(Duration::from_millis(100));
            self.collect();
            self.print_status();

            if self.num_streams() == 0 {
                break;
            }
        }
        println!();
    }

    /// Service mode main loop: runs maintenance forever at a relaxed pace.
    pub fn run_service(&self) -> ! {
        loop {
            thread::sleep(Duration::from_secs(1));
            self.collect();
        }
    }

    fn take_stream(&self, id: u32) -> Result<StreamHandle> {
        let mut streams = self.streams.lock();
        let index = streams
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::StreamNotFound(id))?;
        Ok(streams.remove(index))
    }

    /// Refreshes the play-mode status line: stream count, play position,
    /// bandwidth and burst spacing.
    fn print_status(&self) {
        if !tracing::enabled!(Level::INFO) {
            return;
        }

        let streams = self.muxer.streams();
        let Some(first) = streams.first() else {
            return;
        };

        let position = first.current_time();
        let (bandwidth, max_burst) = self.muxer.output_bandwidth();

        let total_secs = position.as_secs();
        print!(
            "\rcasting {} streams. Time {:02}:{:02}:{:02}.{} Bandwidth {:.3}Mbps Burst {:.1}(ms)      ",
            streams.len(),
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60,
            position.subsec_millis() / 100,
            bandwidth as f64 / 1_000_000.0,
            max_burst.as_secs_f64() * 1000.0,
        );
        let _ = std::io::stdout().flush();
    }
}

impl Drop for Caster {
    fn drop(&mut self) {
        let handles: Vec<StreamHandle> = self.streams.lock().drain(..).collect();

        for mut handle in handles {
            self.muxer.close_stream(&handle.mux_stream);
            let _ = handle.source.stop(false);
        }
    }
}
