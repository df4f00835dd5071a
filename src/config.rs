//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::grammar::{CommandGrammar, Intent};
use crate::session::DriverOptions;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// JSON file holding the Notes and Reminders lists
    pub lists_path: PathBuf,

    /// Recording is finalized automatically after this long
    pub session_timeout: Duration,

    /// Characters allowed before a command phrase
    pub match_slack: usize,

    /// List used when no command phrase is spoken
    pub default_intent: Intent,

    /// Start a new recording right after an entry is saved
    pub chain_recording: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("NOTE_REMIND_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("note-remind")
            }
        };

        let session_timeout = env_parse::<u64>("NOTE_REMIND_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));
        let match_slack =
            env_parse::<usize>("NOTE_REMIND_MATCH_SLACK")?.unwrap_or(CommandGrammar::DEFAULT_SLACK);
        let default_intent = match std::env::var("NOTE_REMIND_DEFAULT_INTENT") {
            Ok(raw) => raw
                .parse::<Intent>()
                .map_err(|e| anyhow::anyhow!("NOTE_REMIND_DEFAULT_INTENT: {e}"))?,
            Err(_) => Intent::default(),
        };
        let chain_recording = env_parse::<bool>("NOTE_REMIND_CHAIN")?.unwrap_or(false);

        if session_timeout.is_zero() {
            anyhow::bail!("NOTE_REMIND_TIMEOUT_MS must be greater than zero");
        }

        Ok(Self {
            socket_path: data_dir.join("daemon.sock"),
            lists_path: data_dir.join("lists.json"),
            data_dir,
            session_timeout,
            match_slack,
            default_intent,
            chain_recording,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Session driver settings derived from this config
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            timeout: self.session_timeout,
            chain_recording: self.chain_recording,
        }
    }
}

/// Parse an optional environment variable
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name}={raw:?}: {e}")),
        Err(_) => Ok(None),
    }
}
