// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::tailer::line::Line;

#[derive(Default)]
struct QueueState {
    lines: VecDeque<Line>,
    closed: bool,
}

/// Unbounded FIFO of lines shared between one producer and one consumer.
///
/// [`blocking_pop`](LineQueue::blocking_pop) waits until a line arrives or the
/// queue is closed. Closing wakes every waiter and makes further pushes
/// no-ops. Lines still queued at close time are abandoned.
#[derive(Default)]
pub struct LineQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `line` and wakes one waiter. Returns the new length, or `None`
    /// if the queue is closed.
    pub fn push(&self, line: Line) -> Option<usize> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.lines.push_back(line);
        let len = state.lines.len();
        drop(state);
        self.available.notify_one();
        Some(len)
    }

    /// Removes the oldest line, waiting while the queue is empty. Returns
    /// `None` once the queue is closed.
    pub fn blocking_pop(&self) -> Option<Line> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(line) = state.lines.pop_front() {
                return Some(line);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drops every queued line, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.lines.len();
        state.lines.clear();
        dropped
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
