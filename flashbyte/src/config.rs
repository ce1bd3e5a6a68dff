// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte - Configuration
//!
//! Read from a JSON file, then overridden from the command line.

use log::LevelFilter;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use flashbyte_core::Board;
use flashbyte_prog::ProgramGuard;

use crate::error::{ErrorKind, FlashbyteError};

/// Console session configuration.  Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Board to exercise
    pub board: Board,

    /// Guard used by the byte test's coalescer
    pub guard: ProgramGuard,

    /// Whether command bytes are echoed back
    pub echo: bool,

    /// Log level, for example `debug`.  `RUST_LOG` is used if not set.
    pub log_level: Option<String>,

    /// Status register reads for which the simulated flash reports busy
    /// after starting an operation.
    pub busy_reads: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            board: Board::default(),
            guard: ProgramGuard::default(),
            echo: true,
            log_level: None,
            busy_reads: 1,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, FlashbyteError> {
        let json = fs::read_to_string(path).map_err(|e| {
            error!("Failed to read {}: {e}", path.display());
            ErrorKind::Config
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, FlashbyteError> {
        serde_json::from_str(json).map_err(|e| {
            error!("Invalid configuration: {e}");
            FlashbyteError::from(ErrorKind::Config)
        })
    }

    pub fn to_json(&self) -> Result<String, FlashbyteError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            error!("Failed to serialize configuration: {e}");
            FlashbyteError::from(ErrorKind::Config)
        })
    }

    /// The configured log level, if set and valid.
    pub fn level_filter(&self) -> Option<LevelFilter> {
        let level = self.log_level.as_deref()?;
        match LevelFilter::from_str(level) {
            Ok(filter) => Some(filter),
            Err(_) => {
                eprintln!("Ignoring unknown log level {level}");
                None
            }
        }
    }
}
