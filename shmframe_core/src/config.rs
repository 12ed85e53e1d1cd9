//! Channel tunables and where they are loaded from
//!
//! Everything has a working default; a TOML or YAML file only needs the keys
//! it changes.

use crate::error::{FrameError, FrameResult};
use crate::memory::platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seqlock read attempts before giving up with `Contention`
pub const DEFAULT_MAX_READ_ATTEMPTS: u32 = 10;

/// How long an opener waits for a creator to finish stamping the header
pub const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 1000;

/// Tunables shared by every `FrameChannel`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Directory holding the named region objects (platform default if unset)
    pub shm_dir: Option<PathBuf>,

    /// Session id used for the local notification namespace
    pub session_id: Option<String>,

    /// Seqlock read retry budget
    pub max_read_attempts: u32,

    /// Opener wait for a half-initialized region, in milliseconds
    pub attach_timeout_ms: u64,

    /// Set to false to force polling mode
    pub notifications: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shm_dir: None,
            session_id: None,
            max_read_attempts: DEFAULT_MAX_READ_ATTEMPTS,
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
            notifications: true,
        }
    }
}

impl ChannelConfig {
    /// Config rooted at an explicit shared memory directory
    pub fn with_shm_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            shm_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Directory where region objects are created
    pub fn region_dir(&self) -> PathBuf {
        self.shm_dir.clone().unwrap_or_else(platform::shm_base_dir)
    }

    /// Session id for the local notification namespace
    pub fn session(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(platform::default_session_id)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Reject values that would make every read or attach fail
    pub fn validate(&self) -> FrameResult<()> {
        if self.max_read_attempts == 0 {
            return Err(FrameError::config("max_read_attempts must be at least 1"));
        }
        if let Some(ref session) = self.session_id {
            if session.is_empty() || session.contains(['/', '\\', '\0']) {
                return Err(FrameError::config(format!(
                    "Invalid session id '{}'",
                    session
                )));
            }
        }
        Ok(())
    }

    /// Read `path`; an unknown extension is tried as TOML, then YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> FrameResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FrameError::config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config = match Syntax::of(path) {
            Some(Syntax::Toml) => Self::from_toml(&contents)?,
            Some(Syntax::Yaml) => Self::from_yaml(&contents)?,
            None => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> FrameResult<Self> {
        toml::from_str(contents).map_err(|e| FrameError::config(format!("TOML: {}", e)))
    }

    pub fn from_yaml(contents: &str) -> FrameResult<Self> {
        serde_yaml::from_str(contents).map_err(|e| FrameError::config(format!("YAML: {}", e)))
    }

    /// Load the first existing file among [`ChannelConfig::search_paths`]
    pub fn find_and_load() -> FrameResult<Self> {
        Self::load_first(Self::search_paths())?
            .ok_or_else(|| FrameError::config("no shmframe config file found"))
    }

    /// Load the first of `candidates` that is a file; `Ok(None)` if none is
    pub fn load_first<I>(candidates: I) -> FrameResult<Option<Self>>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        candidates
            .into_iter()
            .find(|path| path.is_file())
            .map(Self::from_file)
            .transpose()
    }

    pub fn load_or_default() -> Self {
        Self::find_and_load().unwrap_or_else(|e| {
            log::debug!("Using default channel config: {}", e);
            Self::default()
        })
    }

    /// Working directory first, then `~/.shmframe/`
    pub fn search_paths() -> Vec<PathBuf> {
        let user_dir = dirs::home_dir().map(|home| home.join(".shmframe"));

        ["shmframe.toml", "shmframe.yaml", "shmframe.yml"]
            .map(PathBuf::from)
            .into_iter()
            .chain(user_dir.into_iter().flat_map(|dir| {
                ["config.toml", "config.yaml", "config.yml"].map(|file| dir.join(file))
            }))
            .collect()
    }
}

/// Config file syntax, from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Toml,
    Yaml,
}

impl Syntax {
    fn of(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(Syntax::Toml),
            "yaml" | "yml" => Some(Syntax::Yaml),
            _ => None,
        }
    }
}
