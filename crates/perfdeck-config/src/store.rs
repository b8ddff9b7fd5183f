//! The profile store.
//!
//! A grouped key-value config file: one `[profile.<name>]` table per named
//! profile plus a top-level `last_used` key. The store is an explicitly
//! passed handle with a documented lifecycle: opened once at startup,
//! flushed on every mutation. Flushes are atomic (write to a sibling temp
//! file, then rename).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::profile::RecordProfile;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no profile named '{0}'")]
    UnknownProfile(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used: Option<String>,
    #[serde(default)]
    profile: BTreeMap<String, RecordProfile>,
}

pub struct ProfileStore {
    path: PathBuf,
    document: StoreDocument,
}

impl ProfileStore {
    /// Opens the store at `path`. A missing file is an empty store; it is
    /// created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> Vec<String> {
        self.document.profile.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&RecordProfile> {
        self.document.profile.get(name)
    }

    pub fn save(&mut self, name: &str, profile: RecordProfile) -> Result<(), ConfigError> {
        self.document.profile.insert(name.to_string(), profile);
        self.flush()
    }

    /// Removes a profile. Also clears `last_used` when it pointed at the
    /// removed profile.
    pub fn remove(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.document.profile.remove(name).is_none() {
            return Err(ConfigError::UnknownProfile(name.to_string()));
        }
        if self.document.last_used.as_deref() == Some(name) {
            self.document.last_used = None;
        }
        self.flush()
    }

    /// Renames a profile by dropping the old group and saving its contents
    /// under the new name.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), ConfigError> {
        let Some(profile) = self.document.profile.remove(old) else {
            return Err(ConfigError::UnknownProfile(old.to_string()));
        };
        self.document.profile.insert(new.to_string(), profile);
        if self.document.last_used.as_deref() == Some(old) {
            self.document.last_used = Some(new.to_string());
        }
        self.flush()
    }

    pub fn last_used(&self) -> Option<&str> {
        self.document.last_used.as_deref()
    }

    pub fn set_last_used(&mut self, name: &str) -> Result<(), ConfigError> {
        if !self.document.profile.contains_key(name) {
            return Err(ConfigError::UnknownProfile(name.to_string()));
        }
        self.document.last_used = Some(name.to_string());
        self.flush()
    }

    fn flush(&self) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(&self.document)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        let mut file =
            tempfile::NamedTempFile::new_in(&parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(contents.as_bytes())
            .map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        file.persist(&self.path).map_err(|err| ConfigError::Write {
            path: self.path.clone(),
            source: err.error,
        })?;
        Ok(())
    }
}
