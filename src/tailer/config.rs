// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tailer.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::tailer::error::{Error, Result};
use crate::tailer::glob::Glob;
use crate::tailer::watcher::WatchMode;

/// The files to tail, given either as a single `path` or as a list of
/// `paths`. Each entry is a glob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathSpec {
    pub path: Option<String>,
    pub paths: Vec<String>,
}

impl PathSpec {
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            paths: Vec::new(),
        }
    }

    pub fn many<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: None,
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// The configured patterns, in order.
    pub fn patterns(&self) -> Vec<&str> {
        match &self.path {
            Some(path) => vec![path.as_str()],
            None => self.paths.iter().map(String::as_str).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.path, self.paths.is_empty()) {
            (Some(_), false) => Err(Error::Config(
                "use either 'path' or 'paths', not both".to_string(),
            )),
            (None, true) => Err(Error::Config("'path' or 'paths' is required".to_string())),
            (Some(path), true) if path.is_empty() => {
                Err(Error::Config("'path' must not be empty".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Validates the paths and parses every pattern.
    pub fn globs(&self) -> Result<Vec<Glob>> {
        self.validate()?;
        self.patterns().into_iter().map(Glob::parse).collect()
    }
}

/// Configuration for a tailer.
///
/// Deserializes from a flat map where `path`/`paths` sit next to the other
/// fields and the poll interval is given as `poll_interval_ms`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    #[serde(flatten)]
    pub paths: PathSpec,
    /// Read files present at startup from the beginning instead of the end.
    pub readall: bool,
    /// Stop with an error if a pattern matches no file at startup.
    pub fail_on_missing_logfile: bool,
    /// Nonzero selects the polling event source.
    #[serde(rename = "poll_interval_ms", deserialize_with = "duration_from_ms")]
    pub poll_interval: Duration,
    /// Maximum lines held for a slow consumer, 0 means unlimited.
    pub max_lines_in_buffer: usize,
    pub watch_mode: WatchMode,
}

fn duration_from_ms<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            paths: PathSpec::default(),
            readall: false,
            fail_on_missing_logfile: true,
            poll_interval: Duration::ZERO,
            max_lines_in_buffer: 0,
            watch_mode: WatchMode::Auto,
        }
    }
}

impl TailerConfig {
    pub fn new(paths: PathSpec) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }

    pub fn with_readall(mut self, readall: bool) -> Self {
        self.readall = readall;
        self
    }

    pub fn with_fail_on_missing_logfile(mut self, fail: bool) -> Self {
        self.fail_on_missing_logfile = fail;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_lines_in_buffer(mut self, max: usize) -> Self {
        self.max_lines_in_buffer = max;
        self
    }

    pub fn with_watch_mode(mut self, mode: WatchMode) -> Self {
        self.watch_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.paths.globs()?;
        if self.watch_mode == WatchMode::Poll && self.poll_interval.is_zero() {
            return Err(Error::Config(
                "poll watch mode requires a non-zero poll interval".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TailerConfig::default();
        assert!(!config.readall);
        assert!(config.fail_on_missing_logfile);
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.max_lines_in_buffer, 0);
        assert_eq!(config.watch_mode, WatchMode::Auto);
        // No paths configured
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_spec_validation() {
        assert!(PathSpec::single("/var/log/*.log").validate().is_ok());
        assert!(PathSpec::many(["/var/log/a.log", "/var/log/b.log"]).validate().is_ok());
        assert!(PathSpec::default().validate().is_err());
        assert!(PathSpec::single("").validate().is_err());

        let both = PathSpec {
            path: Some("/var/log/a.log".to_string()),
            paths: vec!["/var/log/b.log".to_string()],
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_path_spec_globs() {
        let globs = PathSpec::many(["/var/log/*.log", "/tmp/app.log"]).globs().unwrap();
        assert_eq!(globs.len(), 2);

        let err = PathSpec::single("/var/*/app.log").globs().unwrap_err();
        assert!(matches!(err, Error::InvalidGlob { .. }));
    }

    #[test]
    fn test_path_spec_deserialize() {
        let paths: PathSpec = serde_json::from_str(r#"{"path": "/var/log/syslog"}"#).unwrap();
        assert_eq!(paths.patterns(), vec!["/var/log/syslog"]);

        let paths: PathSpec =
            serde_json::from_str(r#"{"paths": ["/var/log/a.log", "/var/log/b.log"]}"#).unwrap();
        assert_eq!(paths.patterns(), vec!["/var/log/a.log", "/var/log/b.log"]);
    }

    #[test]
    fn test_poll_mode_needs_interval() {
        let config = TailerConfig::new(PathSpec::single("/var/log/*.log"))
            .with_watch_mode(WatchMode::Poll);
        assert!(config.validate().is_err());

        let config = config.with_poll_interval(Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize() {
        let config: TailerConfig = serde_json::from_str(
            r#"{
                "paths": ["/var/log/a.log", "/var/log/*.txt"],
                "readall": true,
                "poll_interval_ms": 250,
                "max_lines_in_buffer": 1000,
                "watch_mode": "poll"
            }"#,
        )
        .unwrap();
        assert_eq!(config.paths.patterns(), vec!["/var/log/a.log", "/var/log/*.txt"]);
        assert!(config.readall);
        assert!(config.fail_on_missing_logfile);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_lines_in_buffer, 1000);
        assert_eq!(config.watch_mode, WatchMode::Poll);
        assert!(config.validate().is_ok());

        let config: TailerConfig = serde_json::from_str(
            r#"{"path": "/var/log/syslog", "fail_on_missing_logfile": false}"#,
        )
        .unwrap();
        assert_eq!(config.paths, PathSpec::single("/var/log/syslog"));
        assert!(!config.fail_on_missing_logfile);
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.watch_mode, WatchMode::Auto);
    }
}
