// SPDX-License-Identifier: Apache-2.0

//! Follows a set of log files described by globs.
//!
//! Each glob names a directory and a file name pattern. The tailer watches
//! the directories, picks up files that start matching, follows renames by
//! file identity, rewinds on truncation and delivers every complete line
//! with the path of the file it came from.
//!
//! ```no_run
//! use std::time::Duration;
//! use fstail::tailer::{FileTailer, Glob, start_tailer};
//!
//! let glob = Glob::parse("/var/log/*.log")?;
//! let mut tailer = start_tailer(&[glob], false, true, None)?;
//! while let Some(line) = tailer.lines().recv_timeout(Duration::from_secs(1)) {
//!     println!("{}: {}", line.source_file().display(), line.content());
//! }
//! tailer.close();
//! # Ok::<(), fstail::tailer::Error>(())
//! ```

mod buffered;
mod config;
mod coordinator;
mod error;
mod file_id;
mod file_tailer;
mod glob;
mod line;
mod line_queue;
mod line_splitter;
mod watched_file;
pub mod watcher;

use std::sync::Arc;

pub use buffered::BufferedTailer;
pub use config::{PathSpec, TailerConfig};
pub use error::{Error, ErrorKind, Result};
pub use file_id::FileId;
pub use file_tailer::{FileTailer, FsTailer, start_tailer, start_tailer_with_config};
pub use glob::Glob;
pub use line::Line;
pub use line_queue::LineQueue;
pub use line_splitter::LineSplitter;
pub use watcher::WatchMode;

use crate::telemetry::BufferLoadMetric;

/// Starts a tailer for `config` behind a [`BufferedTailer`], so a slow
/// consumer never stalls event handling.
pub fn start(
    config: &TailerConfig,
    metric: Arc<dyn BufferLoadMetric>,
) -> Result<Box<dyn FileTailer>> {
    let tailer = start_tailer_with_config(config)?;
    let buffered = BufferedTailer::new(tailer, config.max_lines_in_buffer, metric)?;
    Ok(Box::new(buffered))
}
