use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use inhibridge_config::{Config, ConfigPath};

use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/inhibridge/config.kdl`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// How long to wait between checks that lock owners are still on the bus, in milliseconds.
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,
    /// How long a manual inhibit may last, in milliseconds. 0 keeps it until toggled off.
    #[arg(long)]
    pub manual_inhibit_timeout_ms: Option<u64>,
    /// Don't send desktop notifications on manual inhibit changes.
    #[arg(long)]
    pub no_notify: bool,
    /// Log status updates, not only problems.
    #[arg(short, long)]
    pub verbose: bool,
    /// Log to this file instead of stderr.
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Validate the config file.
    Validate,
}

impl Cli {
    pub fn config_path(&self) -> anyhow::Result<ConfigPath> {
        if let Some(path) = &self.config {
            return Ok(ConfigPath::Explicit(path.clone()));
        }

        let dirs = ProjectDirs::from("", "", "inhibridge")
            .context("error retrieving home directory")?;
        Ok(ConfigPath::Default(dirs.config_dir().join("config.kdl")))
    }

    /// Overrides config values with the ones given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(interval_ms) = self.heartbeat_interval_ms {
            config.heartbeat.interval_ms = interval_ms;
        }
        if let Some(timeout_ms) = self.manual_inhibit_timeout_ms {
            config.manual_inhibit.timeout_ms = timeout_ms;
        }
        if self.no_notify {
            config.notifications.off = true;
        }
        if self.verbose {
            config.log.verbose = true;
        }
        if let Some(path) = &self.logfile {
            config.log.file = Some(path.clone());
        }
    }
}
