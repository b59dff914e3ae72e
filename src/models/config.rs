//! Configuration for the transcoder facade.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Scheduling priority applied to the child once it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPriority {
    Idle,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    Realtime,
}

impl ProcessPriority {
    /// Unix nice value for this priority class.
    pub fn nice_value(&self) -> i32 {
        match self {
            ProcessPriority::Idle => 19,
            ProcessPriority::BelowNormal => 10,
            ProcessPriority::Normal => 0,
            ProcessPriority::AboveNormal => -5,
            ProcessPriority::High => -10,
            ProcessPriority::Realtime => -20,
        }
    }
}

/// Identity the child process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProcessUser {
    pub uid: u32,
    #[serde(default)]
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg executable. A bare name is looked up on `PATH`.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Value passed to `-loglevel`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Wall-clock budget for one conversion. Unbounded when absent.
    #[serde(default)]
    pub execution_timeout_secs: Option<u64>,

    #[serde(default)]
    pub priority: ProcessPriority,

    #[serde(default)]
    pub user: Option<ProcessUser>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            log_level: default_log_level(),
            execution_timeout_secs: None,
            priority: ProcessPriority::Normal,
            user: None,
        }
    }
}

impl TranscoderConfig {
    pub fn with_ffmpeg_path(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ..Default::default()
        }
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.execution_timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user: ProcessUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }

    /// Resolves `ffmpeg_path`, searching `PATH` for a bare executable name.
    ///
    /// An unresolvable name is returned unchanged so the caller reports it as missing.
    pub fn resolve_executable(&self) -> PathBuf {
        let is_bare_name = self.ffmpeg_path.components().count() == 1;
        if is_bare_name && !self.ffmpeg_path.exists() {
            if let Ok(found) = which::which(&self.ffmpeg_path) {
                return found;
            }
        }
        self.ffmpeg_path.clone()
    }
}
