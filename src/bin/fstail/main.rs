// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use fstail::bounded_channel::BoundedReceiver;
use fstail::init::args::TailArgs;
use fstail::init::wait::{self, TaskResult};
use fstail::tailer::{self, Error as TailerError, FileTailer, Line};
use fstail::telemetry::{BufferLoadGauge, BufferLoadMetric};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail files and print their lines
    Tail(Box<TailArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "fstail")]
#[command(bin_name = "fstail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "FSTAIL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Tail(args)) => {
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_tail(args) {
                error!(error = e, "Failed to tail files.");
                return ExitCode::from(1);
            }
        }
        None => {
            // Unreachable since a subcommand is required
            eprintln!("ERROR: must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_tail(args: Box<TailArgs>) -> TaskResult {
    let config = args.build_config()?;
    let metric: Arc<dyn BufferLoadMetric> =
        Arc::new(BufferLoadGauge::new(config.max_lines_in_buffer > 0));
    let mut tailer = tailer::start(&config, metric)?;

    let cancel_token = CancellationToken::new();
    let mut join_set = JoinSet::new();
    join_set.spawn(print_lines(
        tailer.lines(),
        tailer.errors(),
        !args.no_prefix,
        cancel_token.clone(),
    ));

    let result = select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            cancel_token.cancel();
            Ok(())
        },
        e = wait::wait_for_any_task(&mut join_set) => e,
    };

    // Joins the tailer threads
    tokio::task::spawn_blocking(move || tailer.close()).await?;
    wait::wait_for_tasks_with_timeout(&mut join_set, SHUTDOWN_TIMEOUT).await?;

    result
}

/// Prints every line to stdout until the tailer stops or `cancel` fires.
/// Returns the tailer's fatal error, if any.
async fn print_lines(
    mut lines: BoundedReceiver<Line>,
    mut errors: BoundedReceiver<TailerError>,
    prefix: bool,
    cancel: CancellationToken,
) -> TaskResult {
    let mut errors_open = true;
    loop {
        select! {
            _ = cancel.cancelled() => return Ok(()),
            e = errors.next(), if errors_open => match e {
                Some(e) => return Err(e.into()),
                None => errors_open = false,
            },
            line = lines.next() => match line {
                Some(line) => write_line(&line, prefix)?,
                None => {
                    // The error stream closes first, but may still hold the cause
                    return match errors.try_recv() {
                        Some(e) => Err(e.into()),
                        None => Ok(()),
                    };
                }
            },
        }
    }
}

fn write_line(line: &Line, prefix: bool) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    if prefix {
        writeln!(stdout, "{}: {}", line.source_file().display(), line.content())
    } else {
        writeln!(stdout, "{}", line.content())
    }
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // Lines go to stdout, so logs go to stderr
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("opentelemetry=warn".parse()?)
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sig_term, mut sig_int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install signal handler");
        std::future::pending::<()>().await;
    }
}
