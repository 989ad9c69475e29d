#[macro_use]
extern crate tracing;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::{Context as _, IntoDiagnostic as _};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MANUAL_INHIBIT_TIMEOUT_MS: u64 = 60 * 60 * 1000;

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub heartbeat: Heartbeat,
    #[knuffel(child, default)]
    pub manual_inhibit: ManualInhibit,
    #[knuffel(child, default)]
    pub notifications: Notifications,
    #[knuffel(child, default)]
    pub log: Log,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    #[knuffel(child, unwrap(argument), default = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub interval_ms: u64,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl Heartbeat {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualInhibit {
    /// Zero disables the automatic release.
    #[knuffel(child, unwrap(argument), default = DEFAULT_MANUAL_INHIBIT_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

impl Default for ManualInhibit {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_MANUAL_INHIBIT_TIMEOUT_MS,
        }
    }
}

impl ManualInhibit {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Notifications {
    #[knuffel(child)]
    pub off: bool,
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq, Eq)]
pub struct Log {
    #[knuffel(child)]
    pub verbose: bool,
    #[knuffel(child, unwrap(argument))]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ConfigPath {
    /// Explicitly set config path.
    ///
    /// The file must exist.
    Explicit(PathBuf),

    /// Default config path, usually `$XDG_CONFIG_HOME/inhibridge/config.kdl`.
    ///
    /// A missing file means the built-in defaults.
    Default(PathBuf),
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let contents = fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let config = Self::parse(
            path.file_name()
                .and_then(OsStr::to_str)
                .unwrap_or("config.kdl"),
            &contents,
        )
        .context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        knuffel::parse(filename, text)
    }
}

impl ConfigPath {
    pub fn path(&self) -> &Path {
        match self {
            ConfigPath::Explicit(path) | ConfigPath::Default(path) => path,
        }
    }

    pub fn load(&self) -> miette::Result<Config> {
        match self {
            ConfigPath::Explicit(path) => Config::load(path),
            ConfigPath::Default(path) => {
                if path.exists() {
                    Config::load(path)
                } else {
                    debug!("no config at {path:?}, using defaults");
                    Ok(Config::default())
                }
            }
        }
        .context("error loading config")
    }
}
