//! Server configuration module.
//!
//! Configuration is read from environment variables, then overridden by
//! command-line flags.
//!
//! # Environment Variables
//!
//! - `SAMPLEDB_LISTEN_PORT`: Port to listen on (default: `40053`)
//! - `SAMPLEDB_GC_PERIOD_SECS`: Seconds between session sweeps (default: `30`)
//! - `SAMPLEDB_DATA_DIRECTORY`: Directory for structure files (default: `./data`)
//! - `SAMPLEDB_CACHE_PAGES`: Node cache bound per structure, `0` = unlimited (default: `4096`)
//! - `SAMPLEDB_RESTORE`: `1` to restore the registry checkpoint at startup
//! - `SAMPLEDB_AUTOSAVE`: `1` to write the checkpoint after every change
//!
//! # Flags
//!
//! `-p/--port`, `-g/--garbage-freq`, `--data-dir`, `--cache-pages`,
//! `--restore`, `--autosave`. Valued flags accept `--flag value` or
//! `--flag=value`.
//!
//! # Invariants
//!
//! - `gc_period_secs` is always at least 1

use std::path::PathBuf;

use crate::query::SessionConfig;
use crate::structure::RegistryConfig;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port to listen on for WebSocket connections.
    pub listen_port: u16,
    /// Seconds between sweeps of expired query sessions.
    pub gc_period_secs: u64,
    /// Directory where structure files and the checkpoint are stored.
    pub data_directory: PathBuf,
    /// Node cache bound per structure (0 = unlimited).
    pub cache_pages: usize,
    pub restore: bool,
    pub autosave: bool,
    pub sessions: SessionConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable or flag has an invalid value.
    InvalidValue { name: String, message: String },
    UnknownFlag(String),
    /// A flag that takes a value was given none.
    MissingValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::UnknownFlag(flag) => write!(f, "unknown flag: {flag}"),
            Self::MissingValue(flag) => write!(f, "missing value for {flag}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: Self::DEFAULT_PORT,
            gc_period_secs: Self::DEFAULT_GC_PERIOD_SECS,
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
            cache_pages: Self::DEFAULT_CACHE_PAGES,
            restore: false,
            autosave: false,
            sessions: SessionConfig::default(),
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{value}' is not {expected}"),
    })
}

fn parse_gc_period(name: &str, value: &str) -> Result<u64, ConfigError> {
    let secs: u64 = parse(name, value, "a number of seconds")?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(secs)
}

fn parse_switch(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes")
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 40053;
    pub const DEFAULT_GC_PERIOD_SECS: u64 = 30;
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    pub const DEFAULT_CACHE_PAGES: usize = 4096;

    /// Load configuration from the process environment and arguments.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.apply_args(std::env::args().skip(1))?;
        Ok(config)
    }

    /// Build a configuration from variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup("SAMPLEDB_LISTEN_PORT") {
            config.listen_port = parse(
                "SAMPLEDB_LISTEN_PORT",
                &value,
                "a valid port number (must be 1-65535)",
            )?;
        }
        if let Some(value) = lookup("SAMPLEDB_GC_PERIOD_SECS") {
            config.gc_period_secs = parse_gc_period("SAMPLEDB_GC_PERIOD_SECS", &value)?;
        }
        if let Some(value) = lookup("SAMPLEDB_DATA_DIRECTORY") {
            config.data_directory = PathBuf::from(value);
        }
        if let Some(value) = lookup("SAMPLEDB_CACHE_PAGES") {
            config.cache_pages = parse("SAMPLEDB_CACHE_PAGES", &value, "a page count")?;
        }
        if let Some(value) = lookup("SAMPLEDB_RESTORE") {
            config.restore = parse_switch(&value);
        }
        if let Some(value) = lookup("SAMPLEDB_AUTOSAVE") {
            config.autosave = parse_switch(&value);
        }
        Ok(config)
    }

    /// Apply command-line flags on top of the current values.
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            match flag.as_str() {
                "--restore" => self.restore = true,
                "--autosave" => self.autosave = true,
                "-p" | "--port" | "-g" | "--garbage-freq" | "--data-dir" | "--cache-pages" => {
                    let value = inline
                        .or_else(|| args.next())
                        .ok_or_else(|| ConfigError::MissingValue(flag.clone()))?;
                    match flag.as_str() {
                        "-p" | "--port" => {
                            self.listen_port = parse(&flag, &value, "a valid port number")?;
                        }
                        "-g" | "--garbage-freq" => {
                            self.gc_period_secs = parse_gc_period(&flag, &value)?;
                        }
                        "--data-dir" => self.data_directory = PathBuf::from(value),
                        _ => self.cache_pages = parse(&flag, &value, "a page count")?,
                    }
                }
                _ => return Err(ConfigError::UnknownFlag(flag)),
            }
        }
        Ok(())
    }

    /// Registry settings derived from this configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new(self.data_directory.clone());
        config.cache_pages = self.cache_pages;
        config.autosave = self.autosave;
        config
    }
}
