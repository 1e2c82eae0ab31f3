// SPDX-License-Identifier: Apache-2.0

//! Traits and types shared by the event source backends.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flume::RecvTimeoutError;

use crate::tailer::error::{Error, Result};

/// A normalized file system event.
///
/// Path-carrying variants name either an entry of a watched directory or the
/// watched directory itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Modified(PathBuf),
    Created(PathBuf),
    Deleted(PathBuf),
    RenamedFrom(PathBuf),
    RenamedTo(PathBuf),
    /// Re-list everything. Emitted by the polling backend, and by the native
    /// backend when the OS dropped events.
    PollTick,
}

impl Event {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Event::Modified(p)
            | Event::Created(p)
            | Event::Deleted(p)
            | Event::RenamedFrom(p)
            | Event::RenamedTo(p) => Some(p),
            Event::PollTick => None,
        }
    }
}

/// What an event path refers to, relative to a [`WatchedDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    Directory,
    /// An entry of the directory, expressed under the configured path.
    Entry(PathBuf),
}

/// A directory being watched for changes.
///
/// Native backends may report paths with symlinks resolved, so the canonical
/// path is kept alongside the configured one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedDirectory {
    path: PathBuf,
    canonical: PathBuf,
}

impl WatchedDirectory {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        let not_found = |source: io::Error| Error::DirectoryNotFound {
            path: path.to_path_buf(),
            source,
        };

        let canonical = path.canonicalize().map_err(not_found)?;
        if !canonical.is_dir() {
            return Err(not_found(io::Error::new(
                io::ErrorKind::NotADirectory,
                "not a directory",
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            canonical,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// Maps a path reported by an event source onto this directory.
    pub fn resolve(&self, event_path: &Path) -> Option<EventTarget> {
        if event_path == self.path || event_path == self.canonical {
            return Some(EventTarget::Directory);
        }

        let parent = event_path.parent()?;
        if parent != self.path && parent != self.canonical {
            return None;
        }
        event_path
            .file_name()
            .map(|name| EventTarget::Entry(self.path.join(name)))
    }
}

/// Outcome of waiting on an [`EventStream`].
#[derive(Debug)]
pub enum Received {
    Event(Event),
    Timeout,
    /// The backend stopped and will not produce further events.
    Closed,
}

/// Normalized stream of events produced by a running event source.
#[derive(Debug)]
pub struct EventStream {
    rx: flume::Receiver<Result<Event>>,
}

impl EventStream {
    pub(crate) fn new(rx: flume::Receiver<Result<Event>>) -> Self {
        Self { rx }
    }

    /// Waits up to `timeout` for the next event. Errors raised by the backend's
    /// event loop are returned as `Err`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Received> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(Received::Event(event)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(Received::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(Received::Closed),
        }
    }
}

/// A source of file system events.
///
/// Implementations either use native OS notifications or fixed-interval
/// polling; the tailer treats both the same way.
pub trait EventSource: Send {
    /// Starts watching the entries of the directory at `path`.
    fn watch_directory(&mut self, path: &Path) -> Result<WatchedDirectory>;

    fn unwatch_directory(&mut self, dir: &WatchedDirectory) -> Result<()>;

    /// Registers per-file interest. A no-op where directory notifications
    /// already cover modifications of the files inside.
    fn watch_file(&mut self, path: &Path) -> Result<()>;

    fn unwatch_file(&mut self, path: &Path);

    /// Starts event delivery. Can only be called once.
    fn run_event_loop(&mut self) -> Result<EventStream>;

    /// Stops the backend and releases its OS resources. Idempotent.
    fn close(&mut self);

    /// Returns true for inotify/kqueue/FSEvents/ReadDirectoryChangesW backends.
    fn is_native(&self) -> bool;

    /// Name of the backend for logging.
    fn backend_name(&self) -> &'static str;
}
