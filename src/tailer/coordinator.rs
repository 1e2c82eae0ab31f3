// SPDX-License-Identifier: Apache-2.0

//! The tailer loop.
//!
//! A `Coordinator` runs on a dedicated OS thread and is the only owner of the
//! watched directories and files. It waits on the event source, reconciles
//! directory listings against the watched set (keyed by file identity, so
//! renames are followed), rewinds truncated files and pushes complete lines
//! to the line channel.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bounded_channel::{BoundedSender, SendError};
use crate::tailer::error::Error;
use crate::tailer::file_id::FileId;
use crate::tailer::glob::Glob;
use crate::tailer::line::Line;
use crate::tailer::watched_file::{ReadOutcome, WatchedFile};
use crate::tailer::watcher::{Event, EventSource, EventTarget, Received, WatchedDirectory};

/// Upper bound on how long the loop waits before re-checking for shutdown.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Why the loop stopped.
#[derive(Debug)]
enum Stop {
    Shutdown,
    Fatal(Error),
}

impl From<Error> for Stop {
    fn from(e: Error) -> Self {
        Stop::Fatal(e)
    }
}

type Flow = std::result::Result<(), Stop>;

pub(crate) struct Coordinator {
    globs: Vec<Glob>,
    readall: bool,
    fail_on_missing_file: bool,
    source: Box<dyn EventSource>,
    dirs: Vec<WatchedDirectory>,
    files: HashMap<FileId, WatchedFile>,
    lines: BoundedSender<Line>,
    errors: BoundedSender<Error>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Registers a watch on the directory of every glob. Fails when one of
    /// them does not exist.
    pub(crate) fn new(
        globs: Vec<Glob>,
        readall: bool,
        fail_on_missing_file: bool,
        mut source: Box<dyn EventSource>,
        lines: BoundedSender<Line>,
        errors: BoundedSender<Error>,
        cancel: CancellationToken,
    ) -> crate::tailer::error::Result<Self> {
        let mut dirs: Vec<WatchedDirectory> = Vec::new();
        for glob in &globs {
            if dirs.iter().any(|d| d.path() == glob.dir()) {
                continue;
            }
            let dir = source.watch_directory(glob.dir())?;
            debug!(dir = %dir.path().display(), backend = source.backend_name(), "Watching directory");
            dirs.push(dir);
        }

        Ok(Self {
            globs,
            readall,
            fail_on_missing_file,
            source,
            dirs,
            files: HashMap::new(),
            lines,
            errors,
            cancel,
        })
    }

    /// Runs until shutdown or a fatal error, then releases every handle and
    /// closes the error channel followed by the line channel.
    pub(crate) fn run(mut self) {
        if let Err(Stop::Fatal(e)) = self.run_loop() {
            if self.cancel.is_cancelled() {
                debug!(error = %e, "Dropping error raised during shutdown");
            } else {
                error!(error = %e, "Tailer stopped on a fatal error");
                // Capacity one and a single sender, so this never blocks.
                let _ = self.errors.try_send(e);
            }
        }
        self.shutdown();
    }

    fn run_loop(&mut self) -> Flow {
        let events = self.source.run_event_loop()?;

        let readall = self.readall;
        for i in 0..self.dirs.len() {
            self.sync_directory(i, readall)?;
        }
        if self.fail_on_missing_file {
            self.check_missing_files()?;
        }

        info!(
            directories = self.dirs.len(),
            files = self.files.len(),
            backend = self.source.backend_name(),
            "Tailer started"
        );

        loop {
            if self.cancel.is_cancelled() {
                debug!("Cancellation received, stopping tailer");
                return Err(Stop::Shutdown);
            }

            match events.recv_timeout(CANCEL_CHECK_INTERVAL)? {
                Received::Event(event) => self.process_event(event)?,
                Received::Timeout => {}
                Received::Closed => {
                    if self.cancel.is_cancelled() {
                        return Err(Stop::Shutdown);
                    }
                    return Err(Error::io(
                        "file system event loop stopped unexpectedly",
                        io::Error::from(io::ErrorKind::BrokenPipe),
                    )
                    .into());
                }
            }
        }
    }

    fn process_event(&mut self, event: Event) -> Flow {
        match event {
            Event::PollTick => {
                for i in 0..self.dirs.len() {
                    self.sync_directory(i, true)?;
                }
                let ids: Vec<FileId> = self.files.keys().copied().collect();
                for id in ids {
                    self.read_file(id)?;
                }
            }
            Event::Modified(path) => match self.locate(&path) {
                Some((i, EventTarget::Directory)) => self.sync_directory(i, true)?,
                Some((i, EventTarget::Entry(entry))) => match self.find_by_path(&entry) {
                    Some(id) => self.read_file(id)?,
                    // Written before we saw it being created.
                    None if self.matches_any(&entry) => self.sync_directory(i, true)?,
                    None => {}
                },
                None => {}
            },
            Event::Created(path)
            | Event::Deleted(path)
            | Event::RenamedFrom(path)
            | Event::RenamedTo(path) => match self.locate(&path) {
                Some((i, EventTarget::Directory)) => self.check_directory(i)?,
                Some((i, EventTarget::Entry(_))) => self.sync_directory(i, true)?,
                None => {}
            },
        }
        Ok(())
    }

    fn locate(&self, path: &Path) -> Option<(usize, EventTarget)> {
        self.dirs
            .iter()
            .enumerate()
            .find_map(|(i, dir)| dir.resolve(path).map(|target| (i, target)))
    }

    fn find_by_path(&self, path: &Path) -> Option<FileId> {
        self.files
            .values()
            .find(|f| f.path() == path)
            .map(WatchedFile::id)
    }

    fn matches_any(&self, path: &Path) -> bool {
        self.globs.iter().any(|g| g.matches(path))
    }

    /// The directory itself changed. Losing it is fatal since no further
    /// events can arrive for it.
    fn check_directory(&mut self, i: usize) -> Flow {
        let path = self.dirs[i].path();
        if !path.is_dir() {
            return Err(Error::DirectoryRemoved {
                path: path.to_path_buf(),
            }
            .into());
        }
        self.sync_directory(i, true)
    }

    fn check_missing_files(&self) -> Flow {
        for glob in &self.globs {
            if self.files.values().any(|f| glob.matches(f.path())) {
                continue;
            }
            let err = match glob.literal_path() {
                Some(path) => Error::FileNotFound { path },
                None => Error::NoMatchingFile {
                    glob: glob.to_string(),
                },
            };
            return Err(err.into());
        }
        Ok(())
    }

    /// Reconciles the watched files of directory `i` against its listing.
    ///
    /// Files already watched are recognized by identity and only renamed.
    /// New files are opened (at the end unless `readall`) and read. Watched
    /// files that no longer appear are drained and closed.
    fn sync_directory(&mut self, i: usize, readall: bool) -> Flow {
        let dir = self.dirs[i].clone();
        let entries = match fs::read_dir(dir.path()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::DirectoryRemoved {
                    path: dir.path().to_path_buf(),
                }
                .into());
            }
            Err(e) => {
                return Err(Error::io(format!("{}: failed to list directory", dir.path().display()), e).into());
            }
        };

        let mut present = HashSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %dir.path().display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            let path = dir.path().join(entry.file_name());
            if !self.matches_any(&path) {
                continue;
            }

            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File vanished during listing");
                    continue;
                }
                Err(e) => {
                    return Err(Error::io(format!("{}: failed to stat file", path.display()), e).into());
                }
            }

            let id = match FileId::from_path(&path) {
                Ok(id) => id,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::io(format!("{}: failed to identify file", path.display()), e).into());
                }
            };

            if self.follow_rename(id, &path, dir.path()) {
                present.insert(id);
                continue;
            }

            let mut file = match WatchedFile::open(&path, dir.path(), readall) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File vanished before it could be opened");
                    continue;
                }
                Err(e) => {
                    return Err(Error::io(format!("{}: failed to open file", path.display()), e).into());
                }
            };

            // The name may have been replaced between the stat and the open.
            let id = file.id();
            present.insert(id);
            if self.follow_rename(id, &path, dir.path()) {
                continue;
            }

            self.source.watch_file(&path)?;
            info!(file = %path.display(), offset = file.offset(), "Watching new file");

            emit_lines(&mut file, &self.lines, &self.cancel)?;
            self.files.insert(id, file);
        }

        let removed: Vec<FileId> = self
            .files
            .iter()
            .filter(|(id, f)| f.dir() == dir.path() && !present.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        for id in removed {
            if let Some(mut file) = self.files.remove(&id) {
                // Pick up lines appended before the file went away.
                emit_lines(&mut file, &self.lines, &self.cancel)?;
                self.source.unwatch_file(file.path());
                info!(file = %file.path().display(), file_id = %id, "File was removed, closing");
            }
        }

        Ok(())
    }

    /// If `id` is already watched, records `path` as its current name and
    /// returns true.
    fn follow_rename(&mut self, id: FileId, path: &Path, dir: &Path) -> bool {
        let Some(file) = self.files.get_mut(&id) else {
            return false;
        };
        if file.path() != path {
            info!(
                file = %path.display(),
                from = %file.path().display(),
                file_id = %id,
                "File was moved"
            );
            file.set_path(path, dir);
        }
        true
    }

    fn read_file(&mut self, id: FileId) -> Flow {
        let Some(file) = self.files.get_mut(&id) else {
            return Ok(());
        };

        match file.rewind_if_truncated() {
            Ok(true) => info!(file = %file.path().display(), "File was truncated, reading from the start"),
            Ok(false) => {}
            Err(e) => {
                return Err(Error::io(format!("{}: failed to check size", file.path().display()), e).into());
            }
        }

        emit_lines(file, &self.lines, &self.cancel)
    }

    fn shutdown(self) {
        let Coordinator {
            mut source,
            dirs,
            files,
            lines,
            errors,
            ..
        } = self;

        for dir in &dirs {
            if let Err(e) = source.unwatch_directory(dir) {
                debug!(dir = %dir.path().display(), error = %e, "Failed to unwatch directory");
            }
        }
        source.close();

        let file_count = files.len();
        drop(files);
        drop(errors);
        drop(lines);
        info!(files = file_count, "Tailer stopped");
    }
}

/// Reads `file` to its end and sends every complete line, racing shutdown.
fn emit_lines(file: &mut WatchedFile, lines: &BoundedSender<Line>, cancel: &CancellationToken) -> Flow {
    let path = file.path().to_path_buf();
    let mut send_error = None;
    let outcome = file.read_lines(|content| match lines.send_blocking(Line::new(content, path.clone()), cancel) {
        Ok(()) => true,
        Err(e) => {
            send_error = Some(e);
            false
        }
    });

    match outcome {
        Ok(ReadOutcome::Eof) => Ok(()),
        Ok(ReadOutcome::Stopped) => {
            if send_error == Some(SendError::Disconnected) {
                debug!("Line receiver closed, stopping tailer");
            }
            Err(Stop::Shutdown)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(file = %path.display(), error = %e, "File vanished while reading");
            Ok(())
        }
        Err(e) => Err(Error::io(format!("{}: failed to read file", path.display()), e).into()),
    }
}
