// SPDX-License-Identifier: Apache-2.0

//! Native file system event source using the `notify` crate.
//!
//! Uses OS-level notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW
//! - BSDs: kqueue, which needs a watch on every tailed file as well
//!
//! notify runs the blocking native wait on its own thread. Dropping the
//! watcher wakes that thread through the backend's dedicated wake-up object
//! (a mio waker for inotify and kqueue, a run loop stop for FSEvents, a
//! completion port message for Windows), so [`EventSource::close`] never
//! leaves a blocked call behind.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::debug;

use super::traits::{Event, EventSource, EventStream, WatchedDirectory};
use crate::tailer::error::{Error, Result};

pub struct NativeEventSource {
    watcher: Option<RecommendedWatcher>,
    events: Option<flume::Receiver<Result<Event>>>,
    closed: Arc<AtomicBool>,
}

impl NativeEventSource {
    pub fn new() -> Result<Self> {
        let (tx, rx) = flume::unbounded();
        let closed = Arc::new(AtomicBool::new(false));

        let handler_closed = closed.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for event in convert_event(event) {
                        if tx.send(Ok(event)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Errors raised while shutting down are expected.
                    if handler_closed.load(Ordering::Acquire) {
                        debug!(error = %e, "Ignoring file watcher error during shutdown");
                        return;
                    }
                    let _ = tx.send(Err(Error::watch("file system watcher failed", e)));
                }
            },
            Config::default(),
        )
        .map_err(|e| Error::watch("failed to initialize file system watcher", e))?;

        Ok(Self {
            watcher: Some(watcher),
            events: Some(rx),
            closed,
        })
    }

    fn watcher(&mut self) -> Result<&mut RecommendedWatcher> {
        self.watcher.as_mut().ok_or_else(|| {
            Error::io(
                "file system watcher is closed",
                io::Error::from(io::ErrorKind::BrokenPipe),
            )
        })
    }
}

/// Converts a notify event into zero or more normalized events.
fn convert_event(event: notify::Event) -> Vec<Event> {
    if event.need_rescan() {
        return vec![Event::PollTick];
    }

    let notify::Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(Event::Created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(Event::RenamedFrom).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => paths
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                if i == 0 {
                    Event::RenamedFrom(p)
                } else {
                    Event::RenamedTo(p)
                }
            })
            .collect(),
        // The direction of the rename is unknown on some platforms, the
        // reconciliation that follows works it out from the listing.
        EventKind::Modify(ModifyKind::Name(_)) => paths.into_iter().map(Event::RenamedTo).collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            paths.into_iter().map(Event::Modified).collect()
        }
        EventKind::Remove(_) => paths.into_iter().map(Event::Deleted).collect(),
        EventKind::Access(_) => Vec::new(),
    }
}

fn map_watch_error(path: &Path, e: notify::Error) -> Error {
    let not_found = match &e.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io_err) => io_err.kind() == io::ErrorKind::NotFound,
        _ => false,
    };
    if not_found {
        return Error::DirectoryNotFound {
            path: path.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
    }
    Error::watch(format!("failed to watch {}", path.display()), e)
}

impl EventSource for NativeEventSource {
    fn watch_directory(&mut self, path: &Path) -> Result<WatchedDirectory> {
        let dir = WatchedDirectory::new(path)?;
        self.watcher()?
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| map_watch_error(path, e))?;
        Ok(dir)
    }

    fn unwatch_directory(&mut self, dir: &WatchedDirectory) -> Result<()> {
        self.watcher()?
            .unwatch(dir.path())
            .map_err(|e| Error::watch(format!("failed to unwatch {}", dir.path().display()), e))
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    fn watch_file(&mut self, path: &Path) -> Result<()> {
        self.watcher()?
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| Error::watch(format!("failed to watch {}", path.display()), e))
    }

    #[cfg(not(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )))]
    fn watch_file(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    fn unwatch_file(&mut self, path: &Path) {
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(path) {
                debug!(path = %path.display(), error = %e, "Failed to unwatch file");
            }
        }
    }

    #[cfg(not(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )))]
    fn unwatch_file(&mut self, _path: &Path) {}

    fn run_event_loop(&mut self) -> Result<EventStream> {
        self.events
            .take()
            .map(EventStream::new)
            .ok_or_else(|| Error::Config("event loop can only be started once".to_string()))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        if self.watcher.take().is_some() {
            debug!(backend = self.backend_name(), "Closed file system watcher");
        }
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(any(
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))]
        {
            "kqueue"
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "windows",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )))]
        {
            "native"
        }
    }
}

impl Drop for NativeEventSource {
    fn drop(&mut self) {
        self.close();
    }
}
