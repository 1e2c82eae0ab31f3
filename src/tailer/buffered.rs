// SPDX-License-Identifier: Apache-2.0

//! Decouples a tailer from a slow consumer.
//!
//! A producer thread drains the inner tailer into a [`LineQueue`] as fast as
//! lines arrive, so file system events keep being handled promptly. A consumer
//! thread forwards queued lines to the visible line stream.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::tailer::error::{Error, Result};
use crate::tailer::file_tailer::FileTailer;
use crate::tailer::line::Line;
use crate::tailer::line_queue::LineQueue;
use crate::telemetry::BufferLoadMetric;

/// Upper bound on how long the producer waits before re-checking for shutdown.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub struct BufferedTailer<T: FileTailer> {
    inner: T,
    lines: BoundedReceiver<Line>,
    queue: Arc<LineQueue>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl<T: FileTailer> BufferedTailer<T> {
    /// Wraps `inner`. When `max_lines_in_buffer` is nonzero and the backlog
    /// grows past it, the whole backlog is dropped.
    pub fn new(
        inner: T,
        max_lines_in_buffer: usize,
        metric: Arc<dyn BufferLoadMetric>,
    ) -> Result<Self> {
        let queue = Arc::new(LineQueue::new());
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = bounded(1);

        let producer = {
            let lines = inner.lines();
            let queue = queue.clone();
            let metric = metric.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("fstail-buffer-producer".to_string())
                .spawn(move || {
                    run_producer(lines, &queue, max_lines_in_buffer, metric.as_ref(), &cancel)
                })
                .map_err(|e| Error::io("failed to start buffer producer", e))?
        };

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("fstail-buffer-consumer".to_string())
                .spawn(move || run_consumer(&queue, out_tx, metric.as_ref(), &cancel))
        };
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                queue.close();
                let _ = producer.join();
                return Err(Error::io("failed to start buffer consumer", e));
            }
        };

        Ok(Self {
            inner,
            lines: out_rx,
            queue,
            cancel,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    /// Lines waiting for the consumer.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }
}

fn run_producer(
    lines: BoundedReceiver<Line>,
    queue: &LineQueue,
    max_lines_in_buffer: usize,
    metric: &dyn BufferLoadMetric,
    cancel: &CancellationToken,
) {
    metric.start();
    while !cancel.is_cancelled() {
        let Some(line) = lines.recv_timeout(CANCEL_CHECK_INTERVAL) else {
            if lines.is_disconnected() && lines.is_empty() {
                break;
            }
            continue;
        };
        let Some(len) = queue.push(line) else {
            break;
        };
        metric.inc();
        if max_lines_in_buffer > 0 && len > max_lines_in_buffer {
            drop_backlog(queue, max_lines_in_buffer, metric);
        }
    }
    debug!("Line buffer producer stopped");
    queue.close();
    metric.stop();
}

fn drop_backlog(queue: &LineQueue, max_lines_in_buffer: usize, metric: &dyn BufferLoadMetric) {
    let dropped = queue.clear();
    warn!(
        max_lines_in_buffer,
        dropped, "Line buffer is full, dropping buffered lines. The consumer cannot keep up with the log files."
    );
    metric.set(0);
}

fn run_consumer(
    queue: &LineQueue,
    out: BoundedSender<Line>,
    metric: &dyn BufferLoadMetric,
    cancel: &CancellationToken,
) {
    while let Some(line) = queue.blocking_pop() {
        metric.dec();
        if out.send_blocking(line, cancel).is_err() {
            break;
        }
    }
    // Nobody will drain the queue anymore
    queue.close();
    debug!("Line buffer consumer stopped");
}

impl<T: FileTailer> FileTailer for BufferedTailer<T> {
    fn lines(&self) -> BoundedReceiver<Line> {
        self.lines.clone()
    }

    fn errors(&self) -> BoundedReceiver<Error> {
        self.inner.errors()
    }

    fn close(&mut self) {
        self.cancel.cancel();
        self.inner.close();
        self.queue.close();
        for handle in [self.producer.take(), self.consumer.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("Line buffer thread panicked");
            }
        }
    }
}

impl<T: FileTailer> Drop for BufferedTailer<T> {
    fn drop(&mut self) {
        self.close();
    }
}
