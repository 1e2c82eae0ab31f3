// SPDX-License-Identifier: Apache-2.0

//! File system event sources for the tailer.
//!
//! Two strategies are provided:
//! - **Native**: OS-level notifications (inotify on Linux, FSEvents on macOS,
//!   ReadDirectoryChangesW on Windows, kqueue on the BSDs).
//! - **Poll**: periodic re-listing, for environments where native watching
//!   isn't available or reliable (e.g., NFS, network shares).
//!
//! A nonzero poll interval always selects polling. Otherwise the watch mode
//! decides, and `auto` falls back to polling if native watching fails to
//! initialize.

mod native;
mod poll;
mod traits;

pub use native::NativeEventSource;
pub use poll::PollEventSource;
pub use traits::{Event, EventSource, EventStream, EventTarget, Received, WatchedDirectory};

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::tailer::error::{Error, Result};

/// Poll interval used when `auto` mode falls back to polling.
pub const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Native watching, falling back to polling when it cannot be initialized.
    #[default]
    Auto,
    /// Native watching only.
    Native,
    /// Polling only, requires a nonzero poll interval.
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

/// Creates the event source for `mode` and `poll_interval`.
pub fn create_event_source(
    mode: WatchMode,
    poll_interval: Duration,
) -> Result<Box<dyn EventSource>> {
    let source: Box<dyn EventSource> = if !poll_interval.is_zero() {
        Box::new(PollEventSource::new(poll_interval))
    } else {
        match mode {
            WatchMode::Native => Box::new(NativeEventSource::new()?),
            WatchMode::Poll => {
                return Err(Error::Config(
                    "poll watch mode requires a non-zero poll interval".to_string(),
                ));
            }
            WatchMode::Auto => match NativeEventSource::new() {
                Ok(source) => Box::new(source),
                Err(e) => {
                    warn!(
                        error = %e,
                        interval = ?FALLBACK_POLL_INTERVAL,
                        "Native file watching unavailable, falling back to polling"
                    );
                    Box::new(PollEventSource::new(FALLBACK_POLL_INTERVAL))
                }
            },
        }
    };

    info!(
        backend = source.backend_name(),
        native = source.is_native(),
        "Using file system event source"
    );
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_mode_from_str() {
        assert_eq!("auto".parse::<WatchMode>().unwrap(), WatchMode::Auto);
        assert_eq!("native".parse::<WatchMode>().unwrap(), WatchMode::Native);
        assert_eq!("poll".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert_eq!("polling".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert_eq!("AUTO".parse::<WatchMode>().unwrap(), WatchMode::Auto);
        assert!("invalid".parse::<WatchMode>().is_err());
    }

    #[test]
    fn test_create_event_source() {
        let source = create_event_source(WatchMode::Auto, Duration::from_millis(100)).unwrap();
        assert!(!source.is_native());
        assert_eq!(source.backend_name(), "poll");

        let source = create_event_source(WatchMode::Native, Duration::ZERO).unwrap();
        assert!(source.is_native());

        assert!(create_event_source(WatchMode::Poll, Duration::ZERO).is_err());
    }
}
