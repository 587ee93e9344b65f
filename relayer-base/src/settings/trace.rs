use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;

/// Logging level
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off,
    /// Error
    Error,
    /// Warn
    Warn,
    /// Debug
    Debug,
    /// Trace
    Trace,
    /// Info
    #[serde(other)]
    Info,
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

impl Level {
    /// Map the numeric `--loglevel` flag (0 = trace .. 5 = off)
    pub fn from_verbosity(level: u8) -> Self {
        match level {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// The logging level
    pub level: Level,
    /// Mirror logs into `relayer.log` under this directory
    pub log_dir: Option<String>,
}

impl TracingConfig {
    /// Attempt to instantiate and register a tracing subscriber setup from
    /// settings.
    pub fn try_init_tracing(&self) -> eyre::Result<()> {
        let builder = tracing_subscriber::fmt().with_max_level(LevelFilter::from(self.level));

        match &self.log_dir {
            None => builder.try_init().map_err(|e| eyre::eyre!(e))?,
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(Path::new(dir).join("relayer.log"))?;
                builder
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .try_init()
                    .map_err(|e| eyre::eyre!(e))?
            }
        }
        Ok(())
    }
}
