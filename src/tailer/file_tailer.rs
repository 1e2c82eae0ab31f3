// SPDX-License-Identifier: Apache-2.0

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::bounded_channel::{BoundedReceiver, bounded};
use crate::tailer::config::TailerConfig;
use crate::tailer::coordinator::Coordinator;
use crate::tailer::error::{Error, Result};
use crate::tailer::glob::Glob;
use crate::tailer::line::Line;
use crate::tailer::watcher::{WatchMode, create_event_source};

/// Lines waiting between the tailer thread and the consumer.
const LINE_CHANNEL_SIZE: usize = 64;

/// A running tailer.
///
/// `lines` and `errors` hand out clones of the same receivers, so every
/// caller observes one shared stream. The error stream carries at most one
/// fatal error. After a fatal error or [`close`](FileTailer::close) both
/// streams end, the error stream first.
pub trait FileTailer: Send {
    fn lines(&self) -> BoundedReceiver<Line>;

    fn errors(&self) -> BoundedReceiver<Error>;

    /// Stops the tailer and waits for its thread to exit. Idempotent.
    fn close(&mut self);
}

/// Tailer backed directly by file system events.
pub struct FsTailer {
    lines: BoundedReceiver<Line>,
    errors: BoundedReceiver<Error>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FileTailer for FsTailer {
    fn lines(&self) -> BoundedReceiver<Line> {
        self.lines.clone()
    }

    fn errors(&self) -> BoundedReceiver<Error> {
        self.errors.clone()
    }

    fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Tailer thread panicked");
            }
        }
    }
}

impl Drop for FsTailer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Starts tailing every file matched by `globs`.
///
/// Files present at startup are read from the start when `readall` is set,
/// otherwise only lines appended later are delivered. A nonzero
/// `poll_interval` selects polling instead of native notifications.
///
/// Returns [`Error::DirectoryNotFound`] right away when the directory of a
/// glob is missing. A glob matching no file at startup is reported on the
/// error stream when `fail_on_missing_file` is set.
pub fn start_tailer(
    globs: &[Glob],
    readall: bool,
    fail_on_missing_file: bool,
    poll_interval: Option<Duration>,
) -> Result<FsTailer> {
    spawn(
        globs.to_vec(),
        readall,
        fail_on_missing_file,
        poll_interval.unwrap_or_default(),
        WatchMode::Auto,
    )
}

/// Starts a tailer from a validated [`TailerConfig`]. The buffer limit is
/// ignored here, see [`crate::tailer::start`].
pub fn start_tailer_with_config(config: &TailerConfig) -> Result<FsTailer> {
    config.validate()?;
    spawn(
        config.paths.globs()?,
        config.readall,
        config.fail_on_missing_logfile,
        config.poll_interval,
        config.watch_mode,
    )
}

fn spawn(
    globs: Vec<Glob>,
    readall: bool,
    fail_on_missing_file: bool,
    poll_interval: Duration,
    watch_mode: WatchMode,
) -> Result<FsTailer> {
    if globs.is_empty() {
        return Err(Error::Config("at least one path is required".to_string()));
    }

    let source = create_event_source(watch_mode, poll_interval)?;
    let (lines_tx, lines_rx) = bounded(LINE_CHANNEL_SIZE);
    let (errors_tx, errors_rx) = bounded(1);
    let cancel = CancellationToken::new();

    let coordinator = Coordinator::new(
        globs,
        readall,
        fail_on_missing_file,
        source,
        lines_tx,
        errors_tx,
        cancel.clone(),
    )?;

    let handle = thread::Builder::new()
        .name("fstail-tailer".to_string())
        .spawn(move || coordinator.run())
        .map_err(|e| Error::io("failed to start tailer thread", e))?;

    Ok(FsTailer {
        lines: lines_rx,
        errors: errors_rx,
        cancel,
        handle: Some(handle),
    })
}
