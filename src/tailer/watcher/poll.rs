// SPDX-License-Identifier: Apache-2.0

//! Polling event source for systems where native file system notifications
//! are unavailable or unreliable (e.g., NFS).
//!
//! A ticker thread emits [`Event::PollTick`] on a fixed interval and the
//! tailer re-lists every watched directory on each tick. Ticks coalesce
//! while the tailer is busy.

use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{RecvTimeoutError, TrySendError};
use tracing::{debug, error};

use super::traits::{Event, EventSource, EventStream, WatchedDirectory};
use crate::tailer::error::{Error, Result};

pub struct PollEventSource {
    interval: Duration,
    stop: Option<flume::Sender<()>>,
    ticker: Option<JoinHandle<()>>,
    started: bool,
}

impl PollEventSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: None,
            ticker: None,
            started: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// Capacity of the tick channel, a pending tick absorbs later ones.
const TICK_CHANNEL_SIZE: usize = 1;

fn run_ticker(interval: Duration, stop: flume::Receiver<()>, tx: flume::Sender<Result<Event>>) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if !send_tick(&tx) {
                    break;
                }
            }
            // Stop sender dropped
            _ => break,
        }
    }
    debug!("Poll ticker stopped");
}

/// Queues a tick unless one is already pending. Returns false once the
/// receiving side is gone.
fn send_tick(tx: &flume::Sender<Result<Event>>) -> bool {
    match tx.try_send(Ok(Event::PollTick)) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Disconnected(_)) => false,
    }
}

impl EventSource for PollEventSource {
    fn watch_directory(&mut self, path: &Path) -> Result<WatchedDirectory> {
        WatchedDirectory::new(path)
    }

    fn unwatch_directory(&mut self, _dir: &WatchedDirectory) -> Result<()> {
        Ok(())
    }

    fn watch_file(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn unwatch_file(&mut self, _path: &Path) {}

    fn run_event_loop(&mut self) -> Result<EventStream> {
        if self.started {
            return Err(Error::Config(
                "event loop can only be started once".to_string(),
            ));
        }
        self.started = true;

        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let (tx, rx) = flume::bounded(TICK_CHANNEL_SIZE);
        let interval = self.interval;

        let ticker = thread::Builder::new()
            .name("fstail-poll".to_string())
            .spawn(move || run_ticker(interval, stop_rx, tx))
            .map_err(|e| Error::io("failed to start poll ticker", e))?;

        self.stop = Some(stop_tx);
        self.ticker = Some(ticker);
        Ok(EventStream::new(rx))
    }

    fn close(&mut self) {
        drop(self.stop.take());
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                error!("Poll ticker thread panicked");
            }
        }
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

impl Drop for PollEventSource {
    fn drop(&mut self) {
        self.close();
    }
}
