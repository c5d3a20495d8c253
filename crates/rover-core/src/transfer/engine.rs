//! FIFO transfer queue with a single active slot.
//!
//! # Queueing rules
//!
//! - Jobs start in the order they were submitted.
//! - At most one job runs at a time per engine.  Both directions share the
//!   slot, because both use the same fixed transfer port.
//! - A job's data stream and local file are closed before its final status is
//!   written, and before the next job is taken off the queue.
//!
//! # Threads
//!
//! Submitting to an idle engine spawns one worker thread.  That worker keeps
//! taking jobs off the queue until it is empty, then marks the engine idle
//! and exits.  The queue and the busy flag live under one mutex, so "queue
//! is empty" and "engine is idle" always change together.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::transfer::TransferHandle;
use crate::transfer::pump::pump;
use crate::transfer::{DataChannel, LocalFile, TransferTicket};

/// Name given to worker threads.
const WORKER_THREAD_NAME: &str = "rover-transfer";

struct TransferJob {
    handle: TransferHandle,
    ticket: TransferTicket,
    file: Box<dyn LocalFile>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TransferJob>,
    busy: bool,
}

struct Inner<C> {
    channel: C,
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Runs queued transfers one at a time on a background thread.
///
/// Cloning the engine shares the same queue.
pub struct TransferEngine<C: DataChannel> {
    inner: Arc<Inner<C>>,
}

impl<C: DataChannel> Clone for TransferEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DataChannel> TransferEngine<C> {
    /// Creates an idle engine that opens data connections through `channel`.
    pub fn new(channel: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// The data channel this engine opens connections with.
    pub fn channel(&self) -> &C {
        &self.inner.channel
    }

    /// Queues a negotiated transfer and returns a handle for polling it.
    ///
    /// Never fails: a job that cannot run is reported as failed through its
    /// status.
    pub fn submit<F>(&self, ticket: TransferTicket, file: F) -> TransferHandle
    where
        F: LocalFile + 'static,
    {
        let handle = TransferHandle::new(ticket.filename.clone(), ticket.direction, ticket.size);
        let job = TransferJob {
            handle: handle.clone(),
            ticket,
            file: Box::new(file),
        };

        let mut state = self.inner.lock();
        state.pending.push_back(job);
        if state.busy {
            info!(
                "{} of {} queued behind the active transfer ({} waiting)",
                handle.direction(),
                handle.filename(),
                state.pending.len()
            );
            return handle;
        }
        state.busy = true;
        drop(state);

        self.spawn_worker();
        handle
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || inner.drain());
        if let Err(e) = spawned {
            error!("failed to spawn transfer worker: {e}");
            self.inner.abandon_queue();
        }
    }

    /// Blocks until the queue is empty and no job is running, or `timeout`
    /// elapses.  Returns `true` if the engine went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.inner.lock();
        let (guard, _) = self
            .inner
            .idle
            .wait_timeout_while(guard, timeout, |s| s.busy)
            .unwrap_or_else(PoisonError::into_inner);
        !guard.busy
    }

    /// Number of jobs waiting behind the active one.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether a job currently holds the active slot.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().busy
    }
}

impl<C: DataChannel> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker body: runs jobs until the queue is empty, then releases the slot.
    fn drain(&self) {
        loop {
            let job = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.busy = false;
                        self.idle.notify_all();
                        debug!("transfer queue drained");
                        return;
                    }
                }
            };
            self.execute(job);
        }
    }

    fn execute(&self, job: TransferJob) {
        let TransferJob {
            handle,
            ticket,
            mut file,
        } = job;
        let sending = self.channel.peer().sends(ticket.direction);

        handle.mark_started();
        info!(
            "{} of {} started ({} bytes, {})",
            ticket.direction,
            ticket.filename,
            ticket.size,
            if sending { "sending" } else { "receiving" }
        );

        let outcome = self.channel.open(&ticket).and_then(|mut stream| {
            handle.mark_running();
            let progress = |n| handle.add_bytes(n);
            if sending {
                pump(&mut *file, &mut stream, ticket.size, progress)
            } else {
                pump(&mut stream, &mut *file, ticket.size, progress)
            }
            // `stream` is dropped here, closing the data connection.
        });
        let flushed = file.flush();
        drop(file);

        match outcome.and(flushed) {
            Ok(()) => {
                handle.mark_complete();
                info!("{} of {} complete", ticket.direction, ticket.filename);
            }
            Err(e) => {
                handle.mark_failed();
                warn!("{} of {} failed: {e}", ticket.direction, ticket.filename);
            }
        }
    }

    /// Fails every queued job and releases the slot.  Used when no worker
    /// thread can be started.
    fn abandon_queue(&self) {
        let mut state = self.lock();
        for job in state.pending.drain(..) {
            job.handle.mark_failed();
        }
        state.busy = false;
        self.idle.notify_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer::{Direction, Peer};
    use std::io::{self, Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// A local file backed by shared memory so tests can inspect it after the
    /// engine drops its end.
    #[derive(Clone, Default)]
    struct SharedFile {
        data: Arc<Mutex<Cursor<Vec<u8>>>>,
    }

    impl SharedFile {
        fn with(contents: &[u8]) -> Self {
            Self {
                data: Arc::new(Mutex::new(Cursor::new(contents.to_vec()))),
            }
        }

        fn contents(&self) -> Vec<u8> {
            self.data.lock().unwrap().get_ref().clone()
        }
    }

    impl Read for SharedFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.lock().unwrap().read(buf)
        }
    }

    impl Write for SharedFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Data stream that serves `incoming`, swallows writes, and decrements
    /// the active counter when closed.
    struct TestStream {
        incoming: Cursor<Vec<u8>>,
        active: Arc<AtomicUsize>,
    }

    impl Read for TestStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for TestStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for TestStream {
        fn drop(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Client-side channel that records the order jobs open their streams
    /// and the highest number of simultaneously open streams.
    #[derive(Default)]
    struct RecordingChannel {
        opened: Mutex<Vec<String>>,
        active: Arc<AtomicUsize>,
        max_active: AtomicUsize,
        /// Bytes served to a receiving job; `None` serves the declared size.
        short_by: Option<u64>,
        refuse: Option<String>,
        gate: Option<Mutex<mpsc::Receiver<()>>>,
    }

    impl DataChannel for RecordingChannel {
        type Stream = TestStream;

        fn peer(&self) -> Peer {
            Peer::Client
        }

        fn open(&self, ticket: &TransferTicket) -> io::Result<TestStream> {
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            self.opened.lock().unwrap().push(ticket.filename.clone());
            if self.refuse.as_deref() == Some(ticket.filename.as_str()) {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            let served = ticket.size - self.short_by.unwrap_or(0).min(ticket.size);
            Ok(TestStream {
                incoming: Cursor::new(vec![b'x'; served as usize]),
                active: Arc::clone(&self.active),
            })
        }
    }

    fn download(name: &str, size: u64) -> TransferTicket {
        TransferTicket {
            direction: Direction::Download,
            filename: name.to_string(),
            size,
            peer: None,
        }
    }

    #[test]
    fn test_jobs_run_in_submission_order_one_at_a_time() {
        // Arrange
        let engine = TransferEngine::new(RecordingChannel::default());
        let files: Vec<SharedFile> = (0..4).map(|_| SharedFile::default()).collect();

        // Act
        let handles: Vec<TransferHandle> = ["a", "b", "c", "d"]
            .iter()
            .zip(&files)
            .map(|(name, file)| engine.submit(download(name, 10_000), file.clone()))
            .collect();
        assert!(engine.wait_idle(Duration::from_secs(10)));

        // Assert
        let channel = engine.channel();
        assert_eq!(*channel.opened.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(channel.max_active.load(Ordering::SeqCst), 1);
        for (handle, file) in handles.iter().zip(&files) {
            let status = handle.status();
            assert!(status.complete && !status.failed && !status.running);
            assert_eq!(status.bytes_transferred, status.total_size);
            assert_eq!(file.contents().len(), 10_000);
        }
    }

    #[test]
    fn test_upload_reads_local_file_and_completes() {
        let engine = TransferEngine::new(RecordingChannel::default());
        let file = SharedFile::with(&[9u8; 2500]);
        let ticket = TransferTicket {
            direction: Direction::Upload,
            filename: "up.bin".to_string(),
            size: 2500,
            peer: None,
        };

        let handle = engine.submit(ticket, file);
        assert!(engine.wait_idle(Duration::from_secs(5)));

        let status = handle.status();
        assert!(status.complete);
        assert_eq!(status.bytes_transferred, 2500);
    }

    #[test]
    fn test_short_stream_fails_job_without_exceeding_size() {
        // Arrange
        let channel = RecordingChannel {
            short_by: Some(100),
            ..RecordingChannel::default()
        };
        let engine = TransferEngine::new(channel);

        // Act
        let handle = engine.submit(download("short.bin", 1000), SharedFile::default());
        assert!(engine.wait_idle(Duration::from_secs(5)));

        // Assert
        let status = handle.status();
        assert!(status.failed);
        assert!(!status.complete);
        assert!(!status.running);
        assert_eq!(status.bytes_transferred, 900);
    }

    #[test]
    fn test_failed_open_does_not_block_next_job() {
        let channel = RecordingChannel {
            refuse: Some("first".to_string()),
            ..RecordingChannel::default()
        };
        let engine = TransferEngine::new(channel);

        let first = engine.submit(download("first", 10), SharedFile::default());
        let second = engine.submit(download("second", 10), SharedFile::default());
        assert!(engine.wait_idle(Duration::from_secs(5)));

        assert!(first.status().failed);
        assert_eq!(first.status().bytes_transferred, 0);
        assert!(second.status().complete);
    }

    #[test]
    fn test_second_job_waits_in_queue_while_first_is_active() {
        // Arrange
        let (release, gate) = mpsc::channel();
        let channel = RecordingChannel {
            gate: Some(Mutex::new(gate)),
            ..RecordingChannel::default()
        };
        let engine = TransferEngine::new(channel);

        // Act
        let first = engine.submit(download("first", 10), SharedFile::default());
        let second = engine.submit(download("second", 10), SharedFile::default());

        // Assert: the worker takes `first` off the queue and parks opening it.
        assert!(engine.is_busy());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while (engine.pending_len() != 1 || !first.status().started)
            && std::time::Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(engine.pending_len(), 1);
        let opening = first.status();
        assert!(opening.started && !opening.running);
        assert!(second.status().is_queued());
        assert!(!engine.wait_idle(Duration::from_millis(20)));

        release.send(()).unwrap();
        release.send(()).unwrap();
        assert!(engine.wait_idle(Duration::from_secs(5)));
        assert!(first.status().complete);
        assert!(second.status().complete);
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn test_engine_restarts_after_going_idle() {
        let engine = TransferEngine::new(RecordingChannel::default());

        let a = engine.submit(download("a", 5), SharedFile::default());
        assert!(engine.wait_idle(Duration::from_secs(5)));
        let b = engine.submit(download("b", 5), SharedFile::default());
        assert!(engine.wait_idle(Duration::from_secs(5)));

        assert!(a.status().complete);
        assert!(b.status().complete);
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_wait_idle_on_fresh_engine_returns_immediately() {
        let engine = TransferEngine::new(RecordingChannel::default());
        assert!(engine.wait_idle(Duration::from_millis(1)));
    }
}
