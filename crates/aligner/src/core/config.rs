//! Configuration options shared by every alignment call.
//!
//! The [`Config`] struct captures run-time knobs (which directions to run,
//! whether to decode a hard path) that callers can tune without swapping
//! implementations. It can be loaded from TOML/JSON and patched from the
//! environment.

use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{AlignmentError, DirectionSet};

const ENV_DIRECTIONS: &str = "ALIGNER_DIRECTIONS";
const ENV_HARD_ALIGNMENT: &str = "ALIGNER_HARD_ALIGNMENT";
const ENV_PARALLEL_DIRECTIONS: &str = "ALIGNER_PARALLEL_DIRECTIONS";

/// Configuration driving alignment behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directions whose boundary distributions are computed and averaged.
    pub directions: DirectionSet,
    /// Decode a deterministic monotonic path on top of the soft alignment.
    pub hard_alignment: bool,
    /// Run the forward and backward passes on separate rayon tasks.
    pub parallel_directions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directions: DirectionSet::BOTH,
            hard_alignment: false,
            parallel_directions: true,
        }
    }
}

impl Config {
    /// Reads a configuration file, choosing the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AlignmentError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .map_err(|err| AlignmentError::Config(format!("{}: {err}", path.display()))),
            Some("toml") | None => toml::from_str(&contents)
                .map_err(|err| AlignmentError::Config(format!("{}: {err}", path.display()))),
            Some(other) => Err(AlignmentError::Config(format!(
                "unsupported configuration extension '{other}'"
            ))),
        }
    }

    /// Applies `ALIGNER_*` environment variables on top of the current values.
    ///
    /// Malformed values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(ENV_DIRECTIONS) {
            match DirectionSet::parse_list(&value) {
                Ok(directions) => self.directions = directions,
                Err(err) => log::warn!("ignoring {ENV_DIRECTIONS}={value:?}: {err}"),
            }
        }
        if let Ok(value) = env::var(ENV_HARD_ALIGNMENT) {
            match parse_flag(&value) {
                Some(flag) => self.hard_alignment = flag,
                None => log::warn!("ignoring {ENV_HARD_ALIGNMENT}={value:?}: expected a boolean"),
            }
        }
        if let Ok(value) = env::var(ENV_PARALLEL_DIRECTIONS) {
            match parse_flag(&value) {
                Some(flag) => self.parallel_directions = flag,
                None => {
                    log::warn!("ignoring {ENV_PARALLEL_DIRECTIONS}={value:?}: expected a boolean")
                }
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
