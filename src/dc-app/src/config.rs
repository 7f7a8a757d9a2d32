// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name shared by every dc-rs binary.
pub const CONFIG_FILE_NAME: &str = "dc-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Default search paths for `dc-rs.toml`: working directory, then the user
/// config directory, then `/etc`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("dc-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/dc-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Deserialize one top-level table of a TOML document.
///
/// `Ok(None)` means the section is absent.
fn parse_section<T: DeserializeOwned>(
    content: &str,
    key: &str,
    origin: &Path,
) -> Result<Option<T>, ConfigError> {
    let parse_err =
        |e: &dyn std::fmt::Display| ConfigError::ParseError(origin.to_path_buf(), e.to_string());

    let mut table: toml::Table = toml::from_str(content).map_err(|e| parse_err(&e))?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    section.try_into::<T>().map(Some).map_err(|e| parse_err(&e))
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key, path)
}

/// A configuration stored as one section of `dc-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key, e.g. `"dc-server"`.
    fn section_key() -> &'static str;

    /// Load the section from a specific file. A missing section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Parse the section out of an in-memory document.
    fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let origin = PathBuf::from("<inline>");
        parse_section::<Self>(content, Self::section_key(), &origin)?.ok_or_else(|| {
            ConfigError::ParseError(origin, format!("missing [{}] section", Self::section_key()))
        })
    }

    /// Load the first file on the search path that has the section.
    ///
    /// Returns `(config, path_where_found)`, or the defaults and `None` when
    /// no file matched.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        Self::load_from_paths(&config_search_paths())
    }

    fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in paths {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(path, Self::section_key())? {
                    return Ok((cfg, Some(path.clone())));
                }
            }
        }
        Ok((Self::default(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Sample {
        name: String,
        retries: u32,
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }
    }

    fn scratch_file(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dc-app-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_section_defaults_apply() {
        let cfg = Sample::load_from_str("[sample]\nname = \"bench\"\n").unwrap();
        assert_eq!(
            cfg,
            Sample {
                name: "bench".into(),
                retries: 0
            }
        );
    }

    #[test]
    fn test_missing_section_is_error() {
        let err = Sample::load_from_str("[other]\nname = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("missing [sample] section"));
    }

    #[test]
    fn test_search_skips_files_without_section() {
        let without = scratch_file("[other]\nx = 1\n");
        let with = scratch_file("[sample]\nretries = 3\n");
        let missing = PathBuf::from("/nonexistent/dc-rs.toml");

        let (cfg, found) =
            Sample::load_from_paths(&[missing, without.clone(), with.clone()]).unwrap();
        assert_eq!(cfg.retries, 3);
        assert_eq!(found, Some(with.clone()));

        let _ = std::fs::remove_file(without);
        let _ = std::fs::remove_file(with);
    }

    #[test]
    fn test_nothing_found_yields_defaults() {
        let (cfg, found) = Sample::load_from_paths(&[]).unwrap();
        assert_eq!(cfg, Sample::default());
        assert!(found.is_none());
    }

    #[test]
    fn test_parse_error_names_file() {
        let path = scratch_file("[sample\n");
        let err = Sample::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(ref p, _) if p == &path));
        let _ = std::fs::remove_file(path);
    }
}
