// SPDX-License-Identifier: Apache-2.0

use clap::{ArgAction, Args, ValueEnum};
use serde::Deserialize;
use std::time::Duration;

use crate::tailer::{Error, PathSpec, TailerConfig, WatchMode};

/// Watch mode for file system monitoring
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchModeArg {
    /// Native watching, falling back to polling when it cannot be initialized
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents/ReadDirectoryChangesW)
    Native,
    /// Force polling, requires --poll-interval-ms (use for NFS)
    Poll,
}

impl From<WatchModeArg> for WatchMode {
    fn from(w: WatchModeArg) -> Self {
        match w {
            WatchModeArg::Auto => WatchMode::Auto,
            WatchModeArg::Native => WatchMode::Native,
            WatchModeArg::Poll => WatchMode::Poll,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailArgs {
    /// Glob for the files to tail (e.g., "/var/log/*.log")
    #[arg(long, env = "FSTAIL_PATH", conflicts_with = "paths")]
    pub path: Option<String>,

    /// Comma-separated globs for the files to tail
    #[arg(long, env = "FSTAIL_PATHS", value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Read files present at startup from the beginning instead of the end
    #[arg(long, env = "FSTAIL_READALL", default_value = "false")]
    pub readall: bool,

    /// Exit with an error if a glob matches no file at startup
    #[arg(
        long,
        env = "FSTAIL_FAIL_ON_MISSING_LOGFILE",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub fail_on_missing_logfile: bool,

    /// Poll interval in milliseconds, nonzero selects polling over native notifications
    #[arg(long, env = "FSTAIL_POLL_INTERVAL_MS", default_value = "0")]
    pub poll_interval_ms: u64,

    /// Maximum lines held for a slow consumer before the backlog is dropped, 0 is unlimited
    #[arg(long, env = "FSTAIL_MAX_LINES_IN_BUFFER", default_value = "0")]
    pub max_lines_in_buffer: usize,

    /// Watch mode: auto (default), native, poll
    #[arg(value_enum, long, env = "FSTAIL_WATCH_MODE", default_value = "auto")]
    pub watch_mode: WatchModeArg,

    /// Print only the line content, without the source file
    #[arg(long, env = "FSTAIL_NO_PREFIX", default_value = "false")]
    pub no_prefix: bool,
}

impl Default for TailArgs {
    fn default() -> Self {
        Self {
            path: None,
            paths: Vec::new(),
            readall: false,
            fail_on_missing_logfile: true,
            poll_interval_ms: 0,
            max_lines_in_buffer: 0,
            watch_mode: WatchModeArg::Auto,
            no_prefix: false,
        }
    }
}

impl TailArgs {
    /// Builds and validates the tailer configuration.
    pub fn build_config(&self) -> Result<TailerConfig, Error> {
        let paths = PathSpec {
            path: self.path.clone(),
            paths: self.paths.clone(),
        };
        let config = TailerConfig::new(paths)
            .with_readall(self.readall)
            .with_fail_on_missing_logfile(self.fail_on_missing_logfile)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_max_lines_in_buffer(self.max_lines_in_buffer)
            .with_watch_mode(self.watch_mode.into());
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        tail: TailArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["fstail", "--path", "/var/log/*.log"]).unwrap();
        let config = cli.tail.build_config().unwrap();
        assert_eq!(config.paths, PathSpec::single("/var/log/*.log"));
        assert!(!config.readall);
        assert!(config.fail_on_missing_logfile);
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.max_lines_in_buffer, 0);
        assert_eq!(config.watch_mode, WatchMode::Auto);
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::try_parse_from([
            "fstail",
            "--paths",
            "/var/log/a.log,/var/log/b.log",
            "--readall",
            "--fail-on-missing-logfile",
            "false",
            "--poll-interval-ms",
            "500",
            "--max-lines-in-buffer",
            "1000",
            "--watch-mode",
            "poll",
        ])
        .unwrap();
        let config = cli.tail.build_config().unwrap();
        assert_eq!(
            config.paths,
            PathSpec::many(["/var/log/a.log", "/var/log/b.log"])
        );
        assert!(config.readall);
        assert!(!config.fail_on_missing_logfile);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_lines_in_buffer, 1000);
        assert_eq!(config.watch_mode, WatchMode::Poll);
    }

    #[test]
    fn test_path_and_paths_conflict() {
        assert!(
            Cli::try_parse_from(["fstail", "--path", "/a.log", "--paths", "/b.log"]).is_err()
        );
    }

    #[test]
    fn test_invalid_config() {
        let args = TailArgs::default();
        assert!(matches!(args.build_config(), Err(Error::Config(_))));

        let args = TailArgs {
            path: Some("/var/log/*.log".to_string()),
            watch_mode: WatchModeArg::Poll,
            ..Default::default()
        };
        assert!(matches!(args.build_config(), Err(Error::Config(_))));
    }

    #[test]
    fn test_deserialize() {
        let args: TailArgs = serde_json::from_str(
            r#"{"paths": ["/var/log/*.log"], "readall": true, "watch_mode": "native"}"#,
        )
        .unwrap();
        assert!(args.readall);
        assert!(args.fail_on_missing_logfile);
        assert_eq!(args.watch_mode, WatchModeArg::Native);
        assert!(args.build_config().is_ok());
    }
}
