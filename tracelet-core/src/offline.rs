//! Buffering of envelopes that could not be delivered.
//!
//! An [`OfflineQueue`] is a bounded FIFO of envelopes.  Transports park
//! envelopes here when the network is unavailable and drain the queue,
//! oldest first, once sending succeeds again.
//!
//! The queue either lives in memory or in a directory on disk.  The disk
//! backend stores one serialized envelope per file, named
//! `<nanos>-<seq>.envelope` so that lexical order is insertion order.  A
//! queue opened on a directory left behind by an earlier process resumes
//! with the envelopes it finds there.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::protocol::EnvelopeError;
use crate::{ClientOptions, Envelope};

const FILE_EXTENSION: &str = "envelope";
const TEMP_EXTENSION: &str = "tmp";

/// An error raised by the disk backend of the [`OfflineQueue`].
#[derive(Debug, Error)]
pub enum OfflineQueueError {
    /// Reading or writing the queue directory failed.
    #[error("offline queue I/O failed")]
    Io(#[from] io::Error),
    /// A queued envelope could not be encoded.
    #[error("invalid envelope in offline queue")]
    Envelope(#[from] EnvelopeError),
}

#[derive(Debug)]
enum Backend {
    Memory(VecDeque<Envelope>),
    Disk {
        dir: PathBuf,
        files: VecDeque<PathBuf>,
        seq: u64,
    },
}

/// A bounded FIFO buffer of envelopes waiting for the network.
///
/// Pushing beyond the capacity evicts the oldest entry.
///
/// # Examples
///
/// ```
/// use tracelet_core::{Envelope, OfflineQueue};
///
/// let mut queue = OfflineQueue::in_memory(2);
/// queue.push(&Envelope::new()).unwrap();
/// assert_eq!(queue.len(), 1);
/// assert!(queue.peek().is_some());
/// queue.remove().unwrap();
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct OfflineQueue {
    backend: Backend,
    capacity: usize,
}

impl OfflineQueue {
    /// Creates a queue that keeps up to `capacity` envelopes in memory.
    pub fn in_memory(capacity: usize) -> OfflineQueue {
        OfflineQueue {
            backend: Backend::Memory(VecDeque::new()),
            capacity,
        }
    }

    /// Opens a queue that stores up to `capacity` envelopes in `dir`.
    ///
    /// The directory is created if needed.  Envelopes already stored there
    /// are kept, oldest first, and leftovers from interrupted writes are
    /// removed.  If the directory holds more than `capacity` envelopes the
    /// oldest ones are evicted.
    pub fn on_disk<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<OfflineQueue, OfflineQueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(FILE_EXTENSION) => files.push(path),
                Some(TEMP_EXTENSION) => remove_file(&path)?,
                _ => {}
            }
        }
        files.sort();

        let mut queue = OfflineQueue {
            backend: Backend::Disk {
                dir,
                seq: files.len() as u64,
                files: files.into(),
            },
            capacity,
        };
        queue.evict_to(capacity)?;
        if !queue.is_empty() {
            tracelet_debug!("[OfflineQueue] resuming with {} stored envelopes", queue.len());
        }
        Ok(queue)
    }

    /// Creates the queue configured by `offline_cache_dir` and
    /// `max_offline_envelopes`.
    ///
    /// Without a cache directory, or if it cannot be opened, the queue is
    /// kept in memory.
    pub fn from_options(options: &ClientOptions) -> OfflineQueue {
        let capacity = options.max_offline_envelopes;
        let Some(dir) = options.offline_cache_dir.as_ref() else {
            return OfflineQueue::in_memory(capacity);
        };
        match OfflineQueue::on_disk(dir, capacity) {
            Ok(queue) => queue,
            Err(err) => {
                tracelet_debug!(
                    "[OfflineQueue] cannot use {}, falling back to memory: {}",
                    dir.display(),
                    err
                );
                OfflineQueue::in_memory(capacity)
            }
        }
    }

    /// The maximum number of envelopes this queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the envelopes are stored on disk.
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Disk { .. })
    }

    /// The number of queued envelopes.
    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Memory(items) => items.len(),
            Backend::Disk { files, .. } => files.len(),
        }
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an envelope at the back of the queue.
    ///
    /// If the queue is full the oldest envelope is evicted first.  A queue
    /// with a capacity of zero stores nothing.  When the disk backend fails
    /// to store a file, the queue moves what it holds into memory and keeps
    /// going there.
    pub fn push(&mut self, envelope: &Envelope) -> Result<(), OfflineQueueError> {
        if self.capacity == 0 {
            return Ok(());
        }
        self.evict_to(self.capacity - 1)?;

        let stored = match &mut self.backend {
            Backend::Memory(items) => {
                items.push_back(envelope.clone());
                return Ok(());
            }
            Backend::Disk { dir, files, seq } => {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                let name = format!("{nanos:020}-{seq:010}");
                let temp = dir.join(format!("{name}.{TEMP_EXTENSION}"));
                let path = dir.join(format!("{name}.{FILE_EXTENSION}"));
                write_atomically(&temp, &path, envelope).map(|()| {
                    *seq += 1;
                    files.push_back(path);
                })
            }
        };

        if let Err(err) = stored {
            tracelet_debug!("[OfflineQueue] disk write failed, continuing in memory: {}", err);
            self.move_to_memory();
            if let Backend::Memory(items) = &mut self.backend {
                items.push_back(envelope.clone());
            }
        }
        Ok(())
    }

    fn move_to_memory(&mut self) {
        let Backend::Disk { files, .. } = &mut self.backend else {
            return;
        };
        let mut items = VecDeque::with_capacity(files.len());
        for path in files.drain(..) {
            match read_envelope(&path) {
                Ok(envelope) => items.push_back(envelope),
                Err(err) => tracelet_debug!("[OfflineQueue] lost {}: {}", path.display(), err),
            }
            remove_file(&path).ok();
        }
        self.backend = Backend::Memory(items);
    }

    /// Returns the oldest envelope without removing it.
    ///
    /// Stored files that cannot be read or decoded are deleted and skipped.
    pub fn peek(&mut self) -> Option<Envelope> {
        match &mut self.backend {
            Backend::Memory(items) => items.front().cloned(),
            Backend::Disk { files, .. } => {
                while let Some(path) = files.front().cloned() {
                    match read_envelope(&path) {
                        Ok(envelope) => return Some(envelope),
                        Err(err) => {
                            tracelet_debug!(
                                "[OfflineQueue] discarding unreadable {}: {}",
                                path.display(),
                                err
                            );
                            if let Err(err) = remove_file(&path) {
                                tracelet_debug!("[OfflineQueue] failed to delete: {}", err);
                            }
                            files.pop_front();
                        }
                    }
                }
                None
            }
        }
    }

    /// Removes the oldest envelope.
    pub fn remove(&mut self) -> Result<(), OfflineQueueError> {
        match &mut self.backend {
            Backend::Memory(items) => {
                items.pop_front();
            }
            Backend::Disk { files, .. } => {
                if let Some(path) = files.pop_front() {
                    remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Removes all queued envelopes.
    pub fn clear(&mut self) -> Result<(), OfflineQueueError> {
        self.evict_to(0)
    }

    fn evict_to(&mut self, len: usize) -> Result<(), OfflineQueueError> {
        let excess = self.len().saturating_sub(len);
        if excess > 0 && len > 0 {
            tracelet_debug!("[OfflineQueue] queue full, evicting {} envelopes", excess);
        }
        for _ in 0..excess {
            self.remove()?;
        }
        Ok(())
    }
}

// A failed write leaves neither the temp file nor a partial envelope.
fn write_atomically(temp: &Path, path: &Path, envelope: &Envelope) -> io::Result<()> {
    let written = envelope
        .to_vec()
        .and_then(|bytes| fs::write(temp, bytes))
        .and_then(|()| fs::rename(temp, path));
    if written.is_err() {
        remove_file(temp).ok();
    }
    written
}

fn read_envelope(path: &Path) -> Result<Envelope, OfflineQueueError> {
    let bytes = fs::read(path)?;
    Ok(Envelope::from_slice(&bytes)?)
}

fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;

    fn envelope(message: &str) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.add_item(Event {
            message: Some(message.into()),
            ..Default::default()
        });
        envelope
    }

    fn message(envelope: &Envelope) -> Option<String> {
        envelope.event().and_then(|event| event.message.clone())
    }

    fn drain(queue: &mut OfflineQueue) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(envelope) = queue.peek() {
            messages.extend(message(&envelope));
            queue.remove().unwrap();
        }
        messages
    }

    #[test]
    fn memory_queue_is_fifo_and_bounded() {
        let mut queue = OfflineQueue::in_memory(2);
        for msg in ["a", "b", "c"] {
            queue.push(&envelope(msg)).unwrap();
        }
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_persistent());
        assert_eq!(drain(&mut queue), ["b", "c"]);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut queue = OfflineQueue::in_memory(0);
        queue.push(&envelope("a")).unwrap();
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn disk_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = OfflineQueue::on_disk(dir.path(), 10).unwrap();
            assert!(queue.is_persistent());
            for msg in ["first", "second", "third"] {
                queue.push(&envelope(msg)).unwrap();
            }
        }

        let mut queue = OfflineQueue::on_disk(dir.path(), 10).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue), ["first", "second", "third"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn disk_queue_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = OfflineQueue::on_disk(dir.path(), 2).unwrap();
        for msg in ["a", "b", "c"] {
            queue.push(&envelope(msg)).unwrap();
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_eq!(drain(&mut queue), ["b", "c"]);
    }

    #[test]
    fn reopen_with_smaller_capacity_evicts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = OfflineQueue::on_disk(dir.path(), 5).unwrap();
            for msg in ["a", "b", "c", "d"] {
                queue.push(&envelope(msg)).unwrap();
            }
        }
        let mut queue = OfflineQueue::on_disk(dir.path(), 2).unwrap();
        assert_eq!(drain(&mut queue), ["c", "d"]);
    }

    #[test]
    fn corrupt_files_are_skipped_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut queue = OfflineQueue::on_disk(dir.path(), 10).unwrap();
            queue.push(&envelope("good")).unwrap();
        }
        let bogus = dir.path().join("00000000000000000000-0000000000.envelope");
        fs::write(&bogus, b"not an envelope").unwrap();
        let oversized = dir.path().join("00000000000000000000-0000000001.envelope");
        fs::write(
            &oversized,
            b"{}\n{\"type\":\"event\",\"length\":18446744073709551615}\n{}\n",
        )
        .unwrap();
        fs::write(dir.path().join("leftover.tmp"), b"partial").unwrap();

        let mut queue = OfflineQueue::on_disk(dir.path(), 10).unwrap();
        assert_eq!(queue.len(), 3);
        assert!(!dir.path().join("leftover.tmp").exists());

        let envelope = queue.peek().unwrap();
        assert_eq!(message(&envelope).as_deref(), Some("good"));
        assert!(!bogus.exists());
        assert!(!oversized.exists());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("pending.tmp");
        let target = dir.path().join("taken.envelope");
        fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(write_atomically(&temp, &target, &envelope("a")).is_err());
        assert!(!temp.exists());
    }

    #[test]
    fn unwritable_directory_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue");
        let mut queue = OfflineQueue::on_disk(&path, 10).unwrap();
        queue.push(&envelope("stored")).unwrap();
        fs::remove_dir_all(&path).unwrap();

        queue.push(&envelope("kept")).unwrap();
        assert!(!queue.is_persistent());
        assert_eq!(drain(&mut queue), ["kept"]);
    }

    #[test]
    fn clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = OfflineQueue::on_disk(dir.path(), 10).unwrap();
        queue.push(&envelope("a")).unwrap();
        queue.push(&envelope("b")).unwrap();
        queue.clear().unwrap();
        assert!(queue.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn from_options_picks_backend() {
        let memory = OfflineQueue::from_options(&ClientOptions::default());
        assert!(!memory.is_persistent());
        assert_eq!(memory.capacity(), 30);

        let dir = tempfile::tempdir().unwrap();
        let mut options = ClientOptions::default();
        options.set_offline_cache_dir(dir.path().join("queue"));
        let disk = OfflineQueue::from_options(&options);
        assert!(disk.is_persistent());
    }
}
