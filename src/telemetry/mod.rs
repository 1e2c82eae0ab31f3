// SPDX-License-Identifier: Apache-2.0

pub mod buffer_load;

pub use buffer_load::BufferLoadGauge;

/// Hook notified of the depth of the line buffer between the tailer and a
/// slow consumer.
pub trait BufferLoadMetric: Send + Sync {
    fn start(&self);

    fn stop(&self);

    /// A line was buffered.
    fn inc(&self);

    /// A line left the buffer.
    fn dec(&self);

    /// The buffer depth was reset, e.g. after an overflow.
    fn set(&self, value: i64);
}

#[derive(Clone, Debug, Default)]
pub struct NoopBufferLoad {}

impl BufferLoadMetric for NoopBufferLoad {
    fn start(&self) {}
    fn stop(&self) {}
    fn inc(&self) {}
    fn dec(&self) {}
    fn set(&self, _value: i64) {}
}
