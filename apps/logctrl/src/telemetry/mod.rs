pub mod logging {
    use clap::ValueEnum;
    use parking_lot::Mutex;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "LOGCTRL_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    /// Where and how much to log.
    ///
    /// Without a file, events go to stderr when `console` is set and are
    /// discarded otherwise (the wrapped viewer owns its terminal).
    #[derive(Clone, Debug)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
        pub console: bool,
    }

    impl Default for LogConfig {
        fn default() -> Self {
            Self {
                level: LogLevel::default(),
                file: None,
                console: true,
            }
        }
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }

        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    /// Flushes buffered events. Call before `process::exit`.
    pub fn shutdown() {
        GUARD.lock().take();
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let env_filter = match std::env::var(FILTER_ENV) {
            Ok(directives) => EnvFilter::new(directives),
            Err(_) => EnvFilter::new(directives_for(config.level)),
        };

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None if config.console => tracing_appender::non_blocking(std::io::stderr()),
            None => tracing_appender::non_blocking(std::io::sink()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        *GUARD.lock() = Some(guard);
        Ok(())
    }

    /// Debug and trace only open up logctrl's own targets.
    fn directives_for(level: LogLevel) -> &'static str {
        match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "info,logctrl=debug",
            LogLevel::Trace => "info,logctrl=trace",
        }
    }

    pub fn hexdump(bytes: &[u8]) -> String {
        const WIDTH: usize = 16;
        let mut out = String::new();
        for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
            use std::fmt::Write as _;
            let _ = write!(out, "{:08x}  ", i * WIDTH);
            for byte in chunk {
                let _ = write!(out, "{byte:02x} ");
            }
            for _ in chunk.len()..WIDTH {
                out.push_str("   ");
            }
            out.extend(chunk.iter().map(|&byte| {
                if (0x20..=0x7e).contains(&byte) {
                    byte as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }

}
