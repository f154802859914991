//! timebox - run a command under a timeout
//!
//! Spawns the command in its own process group, waits for it up to the
//! timeout, then escalates through the configured signals. Exits with the
//! child's own code, `128 + signal` if it was killed by something else, 124
//! if it was terminated after timing out and 125 if it could not be
//! terminated at all.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use timebox_core::error::ConfigError;
use timebox_core::report::EXIT_CONFIG;
use timebox_core::{
    Invocation, Report, Signal, StdioMode, SuperviseError, Supervisor, TimeboxConfig,
    UnkillablePolicy,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod shutdown;

use shutdown::ShutdownSignals;

/// timebox - run a command with a timeout and signal escalation
#[derive(Parser, Debug)]
#[command(name = "timebox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total time the command may run (e.g. 500ms, 2s, 1m)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Wait after each escalation signal before sending the next
    #[arg(short, long, value_parser = humantime::parse_duration)]
    grace: Option<Duration>,

    /// Escalation signal, repeatable and sent in order (default: TERM, KILL)
    #[arg(short = 's', long = "signal", value_parser = parse_signal)]
    signals: Vec<Signal>,

    /// Working directory for the command
    #[arg(short = 'C', long)]
    cwd: Option<PathBuf>,

    /// Environment override, repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// What to do if the command survives every signal. With `watch`,
    /// timebox reports at once but only exits when the command does (or on
    /// a second termination signal)
    #[arg(long, value_enum)]
    on_unkillable: Option<UnkillableArg>,

    /// Discard the command's stdout and stderr
    #[arg(long)]
    quiet_child: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Command to run, followed by its arguments
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnkillableArg {
    /// Return immediately and leave the process behind
    Abandon,
    /// Keep waiting for the process before exiting
    Watch,
}

impl From<UnkillableArg> for UnkillablePolicy {
    fn from(arg: UnkillableArg) -> Self {
        match arg {
            UnkillableArg::Abandon => Self::Abandon,
            UnkillableArg::Watch => Self::Watch,
        }
    }
}

fn parse_signal(s: &str) -> Result<Signal, ConfigError> {
    timebox_core::signal::parse_signal(s)
}

fn parse_env(s: &str) -> Result<(String, String), ConfigError> {
    timebox_core::invocation::parse_env_pair(s)
}

fn main() {
    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("timebox: {err:#}");
            failure_exit_status(&err)
        },
    };

    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => TimeboxConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TimeboxConfig::default(),
    };

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log.level))?;

    let (program, args) = cli
        .command
        .split_first()
        .context("no command given")?;

    let mut builder = config.supervision.invocation(program).args(args.iter().cloned());
    if let Some(timeout) = cli.timeout {
        builder = builder.timeout(timeout);
    }
    if !cli.signals.is_empty() {
        builder = builder.signals(cli.signals.iter().copied());
    }
    if let Some(grace) = cli.grace {
        builder = builder.grace(grace);
    }
    if let Some(cwd) = &cli.cwd {
        builder = builder.cwd(cwd);
    }
    for (key, value) in &cli.env {
        builder = builder.env(key, value);
    }
    if let Some(policy) = cli.on_unkillable {
        builder = builder.on_unkillable(policy.into());
    }
    if cli.quiet_child {
        builder = builder.stdio(StdioMode::Null);
    }
    let invocation = builder.build().map_err(SuperviseError::from)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;

    let report = runtime.block_on(supervise(invocation, cli.json))?;
    Ok(report.exit_status())
}

/// Runs `invocation` to completion and emits its report.
async fn supervise(invocation: Invocation, json: bool) -> Result<Report> {
    let signals = ShutdownSignals::register().context("failed to install signal handlers")?;
    let cancel = CancellationToken::new();
    let stop_watching = CancellationToken::new();
    let signal_task = tokio::spawn(signals.cancel_on_signal(cancel.clone(), stop_watching.clone()));
    let watchers = TaskTracker::new();

    let result = run_supervisor(invocation, cancel, &watchers).await;
    if let Ok(report) = &result {
        emit_report(report, json)?;
        wait_for_watchers(&watchers, &stop_watching).await;
    }

    signal_task.abort();
    result
}

async fn run_supervisor(
    invocation: Invocation,
    cancel: CancellationToken,
    watchers: &TaskTracker,
) -> Result<Report> {
    let report = Supervisor::spawn(invocation)?
        .track_watchers(watchers.clone())
        .run_until(cancel)
        .await?;
    Ok(report)
}

/// Blocks until an unkillable child being watched exits, or until a second
/// termination signal arrives.
async fn wait_for_watchers(watchers: &TaskTracker, stop: &CancellationToken) {
    watchers.close();
    if watchers.is_empty() {
        return;
    }

    info!("waiting for the unkillable child to exit");
    tokio::select! {
        () = watchers.wait() => {},
        () = stop.cancelled() => warn!("stopped waiting for the unkillable child"),
    }
}

/// Builds the log filter for `level`: a plain level (`warn`, `debug`, ...)
/// or `target=level` directives.
fn log_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidLogLevel {
        level: level.to_string(),
        reason,
    };

    // A bare word parses as a target name, so only accept it as a level.
    if level.parse::<LevelFilter>().is_err() && !level.contains('=') {
        return Err(invalid(
            "expected trace, debug, info, warn, error, off or target=level".to_string(),
        ));
    }
    EnvFilter::try_new(level).map_err(|e| invalid(e.to_string()))
}

fn init_logging(level: &str) -> Result<(), ConfigError> {
    let filter = log_filter(level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

fn emit_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json().context("failed to serialize report")?);
    } else if report.disposition.is_timeout() {
        eprintln!("timebox: {report}");
    }
    Ok(())
}

fn failure_exit_status(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<SuperviseError>() {
        return err.exit_status();
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG;
    }
    1
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_full_command_line() {
        let cli = Cli::try_parse_from([
            "timebox",
            "-t",
            "250ms",
            "-g",
            "1s",
            "-s",
            "INT",
            "-s",
            "9",
            "-e",
            "A=1",
            "--on-unkillable",
            "watch",
            "--json",
            "--",
            "sh",
            "-c",
            "exit 3",
        ])
        .unwrap();

        assert_eq!(cli.timeout, Some(Duration::from_millis(250)));
        assert_eq!(cli.grace, Some(Duration::from_secs(1)));
        assert_eq!(cli.signals, vec![Signal::SIGINT, Signal::SIGKILL]);
        assert_eq!(cli.env, vec![("A".to_string(), "1".to_string())]);
        assert!(matches!(cli.on_unkillable, Some(UnkillableArg::Watch)));
        assert!(cli.json);
        assert_eq!(cli.command, ["sh", "-c", "exit 3"]);
    }

    #[test]
    fn test_command_hyphen_args_without_separator() {
        let cli = Cli::try_parse_from(["timebox", "-t", "1s", "ls", "-la"]).unwrap();
        assert_eq!(cli.command, ["ls", "-la"]);
    }

    #[test]
    fn test_rejects_bad_signal() {
        assert!(Cli::try_parse_from(["timebox", "-s", "BOGUS", "true"]).is_err());
    }

    #[test]
    fn test_requires_command() {
        assert!(Cli::try_parse_from(["timebox", "-t", "1s"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        assert!(log_filter("debug").is_ok());
        assert!(log_filter("OFF").is_ok());
        assert!(log_filter("warn,timebox_core=trace").is_ok());

        let err = log_filter("verbose").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel { .. }));
        assert!(err.to_string().contains("verbose"));

        assert!(log_filter("timebox_core=loud").is_err());
    }

    #[test]
    fn test_failure_exit_status() {
        let config: anyhow::Error = SuperviseError::from(ConfigError::NonPositiveTimeout).into();
        assert_eq!(failure_exit_status(&config), 2);

        let raw_config: anyhow::Error = ConfigError::EmptyProgram.into();
        assert_eq!(failure_exit_status(&raw_config), 2);

        let log_level: anyhow::Error = log_filter("verbose").unwrap_err().into();
        assert_eq!(failure_exit_status(&log_level), 2);

        let other = anyhow::anyhow!("something else");
        assert_eq!(failure_exit_status(&other), 1);
    }
}
