// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use optiwatt_types::config::SystemConfig;

/// Default config file locations, checked in order
const CONFIG_CANDIDATES: &[&str] = &["./optiwatt.json", "/data/options.json", "/config/optiwatt.json"];

/// Resolve the config file path from OPTIWATT_CONFIG or the candidates
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("OPTIWATT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    CONFIG_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Load and validate the system configuration
///
/// A missing config file yields the built-in defaults (useful for first
/// runs); a present but unparseable file is a hard error so a typo cannot
/// silently drop the operator's settings.
pub fn load_config() -> Result<SystemConfig> {
    let mut config = match config_path() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            parse_config_file(&path)?
        }
        None => {
            warn!("No configuration file found, running with built-in defaults");
            SystemConfig::default()
        }
    };

    for warning in config.validate() {
        warn!("Config: {}", warning);
    }
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<SystemConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
}
