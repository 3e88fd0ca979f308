use clap::{Args, Parser};
use std::path::PathBuf;

use crate::stream::StreamOptions;
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::terminal::config::{LaunchRole, ResizeFailure};

/// Pipe a program's log output into `logctrl` and drive it interactively in
/// the same terminal.
#[derive(Parser, Debug)]
#[command(
    name = "logctrl",
    about = "Watch piped log output live while driving an interactive program",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub stream: StreamArgs,

    #[arg(
        long = "resize-failure",
        value_enum,
        env = "LOGCTRL_RESIZE_FAILURE",
        default_value_t = ResizeFailure::Warn,
        help = "What to do when the pseudo-terminal cannot be resized (warn, fatal)"
    )]
    pub resize_failure: ResizeFailure,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "LOGCTRL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "LOGCTRL_LOG_FILE",
        help = "Write diagnostics to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    /// The child renders a full-screen view, so it only logs to a file.
    pub fn to_config(&self, role: LaunchRole) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
            console: !role.is_child(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    #[arg(
        long = "log-dir",
        value_name = "DIR",
        env = "LOGCTRL_LOG_DIR",
        help = "Directory for the durable copy of the feed (defaults to the temp dir)"
    )]
    pub log_dir: Option<PathBuf>,

    #[arg(
        long = "buffer-lines",
        value_name = "LINES",
        env = "LOGCTRL_BUFFER_LINES",
        default_value_t = 1,
        help = "Initial number of lines kept in the live view"
    )]
    pub buffer_lines: usize,
}

impl StreamArgs {
    pub fn to_options(&self) -> StreamOptions {
        StreamOptions {
            log_dir: self.log_dir.clone(),
            buffer_lines: self.buffer_lines,
            // the viewer renders snapshots and never pulls lines
            line_cursor: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["logctrl"]).unwrap();
        assert_eq!(cli.stream.buffer_lines, 1);
        assert!(cli.stream.log_dir.is_none());
        assert_eq!(cli.resize_failure, ResizeFailure::Warn);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "logctrl",
            "--log-level",
            "trace",
            "--log-file",
            "/tmp/logctrl-debug.log",
            "--log-dir",
            "/var/tmp",
            "--buffer-lines",
            "40",
            "--resize-failure",
            "fatal",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Trace);
        assert_eq!(cli.resize_failure, ResizeFailure::Fatal);
        let options = cli.stream.to_options();
        assert_eq!(options.buffer_lines, 40);
        assert!(!options.line_cursor);
        assert_eq!(options.log_dir, Some(PathBuf::from("/var/tmp")));
    }

    #[test]
    fn child_without_file_logs_nowhere() {
        let cli = Cli::try_parse_from(["logctrl"]).unwrap();
        let child = cli.logging.to_config(LaunchRole::Child { feed_fd: 3 });
        assert!(!child.console);
        let parent = cli.logging.to_config(LaunchRole::Parent);
        assert!(parent.console);
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["logctrl", "--resize-failure", "ignore"]).is_err());
    }
}
