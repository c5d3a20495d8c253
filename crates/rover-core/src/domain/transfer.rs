//! Transfer jobs and their pollable status.
//!
//! A transfer is created by a successful `DOWN`/`UP` negotiation and then
//! lives in the engine queue until a worker thread runs it.  The caller that
//! queued it keeps a [`TransferHandle`] and reads a [`TransferStatus`]
//! snapshot whenever it wants progress.  Nothing is pushed.
//!
//! Only the worker running the job writes to the status.  The update methods
//! are crate-private and enforce the status invariants:
//!
//! - `bytes_transferred <= total_size`
//! - `running` is cleared before `complete` or `failed` is set
//! - `complete` and `failed` are mutually exclusive and final

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

/// Protocol direction of a transfer, named from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Server to client.
    Download,
    /// Client to server.
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

/// Which end of the connection a process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    Client,
    Server,
}

impl Peer {
    /// Whether this peer reads the local file and writes the socket for a
    /// transfer in `direction`.
    pub fn sends(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Peer::Client, Direction::Upload) | (Peer::Server, Direction::Download)
        )
    }
}

/// A point-in-time copy of a transfer's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    pub bytes_transferred: u64,
    pub total_size: u64,
    /// The worker has picked the job up.  Never cleared.
    pub started: bool,
    /// The data connection is open and bytes are moving.
    pub running: bool,
    pub complete: bool,
    pub failed: bool,
}

impl TransferStatus {
    /// Whether the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.complete || self.failed
    }

    /// Whether the job is still waiting in the queue.
    pub fn is_queued(&self) -> bool {
        !self.started && !self.is_finished()
    }

    /// Progress as a fraction in `0.0..=1.0`.  An empty file counts as done
    /// once complete.
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            return if self.complete { 1.0 } else { 0.0 };
        }
        self.bytes_transferred as f64 / self.total_size as f64
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.failed {
            "failed"
        } else if self.complete {
            "complete"
        } else if self.running {
            "running"
        } else if self.started {
            "starting"
        } else {
            "queued"
        };
        write!(f, "{}/{} bytes, {state}", self.bytes_transferred, self.total_size)
    }
}

/// A caller's handle on one queued transfer.
///
/// Cloning the handle shares the same status.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    id: Uuid,
    filename: String,
    direction: Direction,
    status: Arc<Mutex<TransferStatus>>,
}

impl TransferHandle {
    pub(crate) fn new(filename: impl Into<String>, direction: Direction, total_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            direction,
            status: Arc::new(Mutex::new(TransferStatus {
                total_size,
                ..TransferStatus::default()
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns a snapshot of the current progress.
    pub fn status(&self) -> TransferStatus {
        *self.lock()
    }

    // A worker that panicked mid-update leaves a status that is still a
    // plain value, so a poisoned lock is read through.
    fn lock(&self) -> MutexGuard<'_, TransferStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Worker-side updates ───────────────────────────────────────────────────

    /// The worker took the job off the queue and is opening its connection.
    pub(crate) fn mark_started(&self) {
        let mut s = self.lock();
        if !s.is_finished() {
            s.started = true;
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut s = self.lock();
        if !s.is_finished() {
            s.started = true;
            s.running = true;
        }
    }

    /// Records `n` more bytes, never going past the declared size.
    pub(crate) fn add_bytes(&self, n: u64) {
        let mut s = self.lock();
        s.bytes_transferred = s.bytes_transferred.saturating_add(n).min(s.total_size);
    }

    pub(crate) fn mark_complete(&self) {
        let mut s = self.lock();
        s.running = false;
        if !s.is_finished() {
            s.complete = true;
        }
    }

    pub(crate) fn mark_failed(&self) {
        let mut s = self.lock();
        s.running = false;
        if !s.is_finished() {
            s.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_queued_with_declared_size() {
        let handle = TransferHandle::new("a.bin", Direction::Download, 100);
        let status = handle.status();
        assert!(status.is_queued());
        assert_eq!(status.total_size, 100);
        assert_eq!(status.bytes_transferred, 0);
    }

    #[test]
    fn test_add_bytes_never_exceeds_total() {
        // Arrange
        let handle = TransferHandle::new("a.bin", Direction::Upload, 10);
        handle.mark_running();

        // Act
        handle.add_bytes(8);
        handle.add_bytes(8);

        // Assert
        assert_eq!(handle.status().bytes_transferred, 10);
    }

    #[test]
    fn test_complete_clears_running_and_is_final() {
        let handle = TransferHandle::new("a.bin", Direction::Upload, 0);
        handle.mark_running();
        handle.mark_complete();
        handle.mark_failed();

        let status = handle.status();
        assert!(status.complete);
        assert!(!status.failed);
        assert!(!status.running);
        assert!(status.started);
    }

    #[test]
    fn test_failed_is_final() {
        let handle = TransferHandle::new("a.bin", Direction::Download, 5);
        handle.mark_failed();
        handle.mark_complete();
        handle.mark_running();

        let status = handle.status();
        assert!(status.failed);
        assert!(!status.complete);
        assert!(!status.running);
    }

    #[test]
    fn test_started_job_is_not_running_until_connected() {
        // Arrange
        let handle = TransferHandle::new("a.bin", Direction::Download, 5);

        // Act
        handle.mark_started();
        let opening = handle.status();
        handle.mark_running();

        // Assert
        assert!(opening.started && !opening.running);
        assert_eq!(opening.to_string(), "0/5 bytes, starting");
        assert!(handle.status().running);
    }

    #[test]
    fn test_clones_share_status() {
        let handle = TransferHandle::new("a.bin", Direction::Download, 5);
        let clone = handle.clone();
        handle.add_bytes(3);
        assert_eq!(clone.status().bytes_transferred, 3);
        assert_eq!(clone.id(), handle.id());
    }

    #[test]
    fn test_sender_role_per_peer_and_direction() {
        assert!(Peer::Client.sends(Direction::Upload));
        assert!(Peer::Server.sends(Direction::Download));
        assert!(!Peer::Client.sends(Direction::Download));
        assert!(!Peer::Server.sends(Direction::Upload));
    }

    #[test]
    fn test_fraction_of_empty_complete_file_is_one() {
        let status = TransferStatus {
            complete: true,
            ..TransferStatus::default()
        };
        assert_eq!(status.fraction(), 1.0);
    }

    #[test]
    fn test_display_names_state() {
        let status = TransferStatus {
            bytes_transferred: 4,
            total_size: 8,
            started: true,
            running: true,
            ..TransferStatus::default()
        };
        assert_eq!(status.to_string(), "4/8 bytes, running");
    }
}
