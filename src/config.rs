//! Locations on disk and the optional configuration file.
//!
//! `<config_dir>/config.json` holds default [`PlayOptions`]; every field is
//! optional and command-line flags override what the file says.

use directories::ProjectDirs;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use bagplay_core::PlayOptions;

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "bagplay", "bagplay")
}

/// Per-user data directory, or the working directory when none exists.
pub fn data_dir() -> PathBuf {
    get_project_dirs()
        .map(|dirs| dirs.data_dir().to_owned())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Load play options from `explicit`, or from the default location.
///
/// A missing default file yields the built-in defaults; a missing explicit
/// file is an error.
pub fn load_play_options(explicit: Option<&Path>) -> Result<PlayOptions, ConfigFileError> {
    let path = match explicit {
        Some(path) => path.to_owned(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No configuration file, using defaults");
                return Ok(PlayOptions::default());
            }
        },
    };

    let text = fs::read_to_string(&path).map_err(|source| ConfigFileError::Read {
        path: path.clone(),
        source,
    })?;
    let options =
        serde_json::from_str(&text).map_err(|source| ConfigFileError::Parse {
            path: path.clone(),
            source,
        })?;
    info!("Loaded configuration from {}", path.display());
    Ok(options)
}
