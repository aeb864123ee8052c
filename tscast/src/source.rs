//! File stream source.
//!
//! A [`FileSource`] ties a [`TsFileParser`] to an [`Encapsulator`] with a
//! buffered queue and a pair of worker threads: the producer reads packet
//! buffers from the file, the consumer encapsulates them into datagrams.
//! End-of-file and read errors are reported through weakly-held observers;
//! an observer that has been dropped is silently skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::debug;

use tscast_core::Fifo;
use tscast_net::{DatagramSink, Encapsulator};
use tscast_ts::{TsBuffer, TsFileParser};

use crate::error::{Error, Result};

/// Observer of source lifecycle events.
///
/// Callbacks run on the source's worker threads; implementations must not
/// call back into an API that joins those threads.
pub trait SourceObserver: Send + Sync {
    /// The source has delivered its last buffer.
    fn on_source_eof(&self);

    /// The source failed while reading.
    fn on_source_error(&self, error: &Error);
}

/// State shared between the source handle and its worker threads.
struct SourceShared {
    fifo: Fifo<TsBuffer>,
    exit: AtomicBool,
    eof: AtomicBool,
    failed: AtomicBool,
    observers: Mutex<Vec<Weak<dyn SourceObserver>>>,
}

impl SourceShared {
    fn notify_eof(&self) {
        for observer in self.observers.lock().iter() {
            if let Some(observer) = observer.upgrade() {
                observer.on_source_eof();
            }
        }
    }

    fn notify_error(&self, error: &Error) {
        for observer in self.observers.lock().iter() {
            if let Some(observer) = observer.upgrade() {
                observer.on_source_error(error);
            }
        }
    }
}

/// Streams a TS file into a datagram sink with a producer/consumer thread
/// pair.
pub struct FileSource<S: DatagramSink + Send + 'static> {
    shared: Arc<SourceShared>,
    source_name: PathBuf,
    /// Moved into the producer thread on start.
    parser: Option<TsFileParser>,
    /// Moved into the consumer thread on start, recovered on stop.
    encap: Option<Encapsulator<S>>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<Encapsulator<S>>>,
    started: bool,
}

impl<S: DatagramSink + Send + 'static> FileSource<S> {
    /// Opens `path` and prepares the pipeline into `sink`.
    ///
    /// The file is parsed eagerly: sync discovery and bitrate computation
    /// happen here, so an unusable source fails before any thread starts.
    /// The queue is sized to hold roughly one second of stream data.
    pub fn new(path: impl AsRef<Path>, sink: S) -> Result<Self> {
        let parser = TsFileParser::open(path.as_ref())?;
        let fifo_capacity = parser.estimated_buffers_per_second().max(1) as usize;

        Ok(Self {
            shared: Arc::new(SourceShared {
                fifo: Fifo::new(fifo_capacity),
                exit: AtomicBool::new(false),
                eof: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
            }),
            source_name: path.as_ref().to_path_buf(),
            parser: Some(parser),
            encap: Some(Encapsulator::new(sink)),
            producer: None,
            consumer: None,
            started: false,
        })
    }

    /// Source file path.
    pub fn source_name(&self) -> &Path {
        &self.source_name
    }

    /// Stream bitrate in bits per second, from the parser.
    pub fn bitrate(&self) -> Option<u64> {
        self.parser.as_ref().map(|p| p.bitrate())
    }

    /// Registers an observer. Only a weak reference is kept.
    pub fn attach_observer(&self, observer: &Arc<dyn SourceObserver>) {
        self.shared.observers.lock().push(Arc::downgrade(observer));
    }

    /// Launches the producer and consumer threads.
    ///
    /// May be called exactly once; a second call fails with
    /// [`Error::AlreadyStarted`].
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let (Some(parser), Some(encap)) = (self.parser.take(), self.encap.take()) else {
            return Err(Error::AlreadyStarted);
        };
        self.started = true;

        let producer = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("tscast-producer".into())
                .spawn(move || producer_loop(&shared, parser))
                .map_err(|e| Error::Ts(tscast_ts::TsError::Io(e)))?
        };

        let consumer = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("tscast-consumer".into())
                .spawn(move || consumer_loop(&shared, encap))
                .map_err(|e| Error::Ts(tscast_ts::TsError::Io(e)))?
        };

        self.producer = Some(producer);
        self.consumer = Some(consumer);

        debug!(source = %self.source_name.display(), "source started");
        Ok(())
    }

    /// Stops both threads and joins them.
    ///
    /// With `flush` set, any partial datagram held by the encapsulator is
    /// released downstream after the threads have stopped. Fails with
    /// [`Error::NotStarted`] if [`FileSource::start`] was never called.
    pub fn stop(&mut self, flush: bool) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }

        self.shared.exit.store(true, Ordering::Release);
        self.shared.fifo.unblock_producer();
        self.shared.fifo.unblock_consumer();

        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        if let Some(consumer) = self.consumer.take() {
            if let Ok(encap) = consumer.join() {
                self.encap = Some(encap);
            }
        }

        if flush {
            if let Some(encap) = self.encap.as_mut() {
                encap.flush();
            }
        }

        debug!(source = %self.source_name.display(), "source stopped");
        Ok(())
    }
}

impl<S: DatagramSink + Send + 'static> Drop for FileSource<S> {
    fn drop(&mut self) {
        if self.producer.is_some() || self.consumer.is_some() {
            let _ = self.stop(false);
        }
    }
}

/// Producer loop: read buffers from the parser and queue them until EOF,
/// error, or shutdown.
fn producer_loop(shared: &SourceShared, mut parser: TsFileParser) {
    loop {
        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        match parser.read() {
            Ok(Some(buffer)) => {
                if shared.fifo.push(buffer).is_err() {
                    // Unblocked by stop().
                    break;
                }
            }
            Ok(None) => {
                shared.eof.store(true, Ordering::Release);
                shared.fifo.unblock_consumer();
                break;
            }
            Err(e) => {
                shared.failed.store(true, Ordering::Release);
                shared.notify_error(&Error::Ts(e));
                shared.eof.store(true, Ordering::Release);
                shared.fifo.unblock_consumer();
                break;
            }
        }
    }
}

/// Consumer loop: drain the queue into the encapsulator; raise EOF once the
/// producer has finished and the queue is empty.
fn consumer_loop<S: DatagramSink + Send + 'static>(
    shared: &SourceShared,
    mut encap: Encapsulator<S>,
) -> Encapsulator<S> {
    loop {
        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        if shared.fifo.wait_read_available() > 0 {
            if let Some(buffer) = shared.fifo.pop() {
                encap.push(&buffer);
            }
        } else if shared.eof.load(Ordering::Acquire) {
            if !shared.failed.load(Ordering::Acquire) {
                shared.notify_eof();
            }
            break;
        }
        // Woken with an empty queue and no EOF: stop() is in progress, the
        // next iteration observes the exit flag.
    }

    encap
}
