// SPDX-License-Identifier: Apache-2.0

//! Min/max buffer depth over the last minute.
//!
//! The minute is covered by four staggered windows, ending 15, 30, 45 and 60
//! seconds from now. Each tick publishes the oldest window and shifts the
//! others by one, opening a fresh window at the current depth.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::RecvTimeoutError;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Gauge;
use tracing::{error, warn};

use crate::telemetry::BufferLoadMetric;

pub const WINDOW_INTERVAL: Duration = Duration::from_secs(15);

const WINDOWS: usize = 4;

/// Sustained depth above which a warning is logged when no line limit is set.
const SUSTAINED_LOAD_WARNING: i64 = 1000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct LoadWindows {
    current: i64,
    /// Index 0 is the youngest window.
    min: [i64; WINDOWS],
    max: [i64; WINDOWS],
}

impl LoadWindows {
    fn update(&mut self, current: i64) {
        self.current = current;
        for m in self.min.iter_mut() {
            *m = (*m).min(current);
        }
        for m in self.max.iter_mut() {
            *m = (*m).max(current);
        }
    }

    /// Returns the oldest min/max and shifts the windows.
    fn rotate(&mut self) -> (i64, i64) {
        let oldest = (self.min[WINDOWS - 1], self.max[WINDOWS - 1]);
        self.min.rotate_right(1);
        self.max.rotate_right(1);
        self.min[0] = self.current;
        self.max[0] = self.current;
        oldest
    }
}

struct Ticker {
    stop: flume::Sender<()>,
    handle: JoinHandle<()>,
}

/// [`BufferLoadMetric`] publishing `fstail_line_buffer_load` through the
/// global OpenTelemetry meter.
pub struct BufferLoadGauge {
    windows: Arc<Mutex<LoadWindows>>,
    line_limit_set: bool,
    tick: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl BufferLoadGauge {
    pub fn new(line_limit_set: bool) -> Self {
        Self::with_tick(line_limit_set, WINDOW_INTERVAL)
    }

    pub fn with_tick(line_limit_set: bool, tick: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(LoadWindows::default())),
            line_limit_set,
            tick,
            ticker: Mutex::new(None),
        }
    }

    fn windows(&self) -> MutexGuard<'_, LoadWindows> {
        lock(&self.windows)
    }
}

fn lock(windows: &Mutex<LoadWindows>) -> MutexGuard<'_, LoadWindows> {
    windows.lock().unwrap_or_else(PoisonError::into_inner)
}

fn load_gauge() -> Gauge<i64> {
    global::meter("fstail")
        .i64_gauge("fstail_line_buffer_load")
        .with_description(
            "Number of lines that are read from the logfile and waiting to be processed.",
        )
        .with_unit("{line}")
        .build()
}

fn attributes(value: &'static str) -> [KeyValue; 2] {
    [KeyValue::new("value", value), KeyValue::new("interval", "1m")]
}

/// Rotates the windows and records the minute that just completed. The
/// warning fires once per full minute.
fn record_tick(
    windows: &Mutex<LoadWindows>,
    gauge: &Gauge<i64>,
    ticks: &mut usize,
    line_limit_set: bool,
) {
    let (min, max) = {
        let mut windows = lock(windows);
        *ticks += 1;
        if *ticks >= WINDOWS {
            let sustained = windows.min[WINDOWS - 1];
            if sustained > SUSTAINED_LOAD_WARNING && !line_limit_set {
                warn!(
                    min_lines = sustained,
                    "Log lines are written faster than they are processed. In the last minute \
                     the line buffer never held fewer than this many lines."
                );
            }
            *ticks = 0;
        }
        windows.rotate()
    };

    gauge.record(min, &attributes("min"));
    gauge.record(max, &attributes("max"));
}

impl BufferLoadMetric for BufferLoadGauge {
    fn start(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return;
        }

        let gauge = load_gauge();
        gauge.record(0, &attributes("min"));
        gauge.record(0, &attributes("max"));

        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let windows = self.windows.clone();
        let line_limit_set = self.line_limit_set;
        let tick = self.tick;

        let spawned = thread::Builder::new()
            .name("fstail-buffer-load".to_string())
            .spawn(move || {
                let mut ticks = 0;
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(tick) {
                    record_tick(&windows, &gauge, &mut ticks, line_limit_set);
                }
            });

        match spawned {
            Ok(handle) => {
                *ticker = Some(Ticker {
                    stop: stop_tx,
                    handle,
                })
            }
            Err(e) => error!(error = %e, "Failed to start buffer load ticker"),
        }
    }

    fn stop(&self) {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Ticker { stop, handle }) = ticker {
            drop(stop);
            if handle.join().is_err() {
                error!("Buffer load ticker panicked");
            }
        }
    }

    fn inc(&self) {
        let mut windows = self.windows();
        let current = windows.current + 1;
        windows.update(current);
    }

    fn dec(&self) {
        let mut windows = self.windows();
        let current = windows.current - 1;
        windows.update(current);
    }

    fn set(&self, value: i64) {
        self.windows().update(value);
    }
}

impl Drop for BufferLoadGauge {
    fn drop(&mut self) {
        self.stop();
    }
}
