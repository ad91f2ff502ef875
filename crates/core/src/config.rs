//! TOML configuration loading.
//!
//! Configuration structs derive `serde::Deserialize` and mark themselves
//! `#[serde(default)]`, so a file only has to name the values it changes.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Loads `T` from the TOML file at `path`.
///
/// A missing file yields `T::default()`. A file that exists but fails to
/// parse is an error rather than a silent fallback.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file exists but cannot be read, and
/// [`Error::Config`] if its contents are not valid for `T`.
pub fn load_or_default<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => {
            let value = parse(&text).map_err(|message| Error::Config {
                path: path.display().to_string(),
                message,
            })?;
            info!("Loaded configuration from {}", path.display());
            Ok(value)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parses `T` from a TOML string.
pub fn parse<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    toml::from_str(text).map_err(|e| e.to_string())
}
