// SPDX-License-Identifier: MPL-2.0

use crate::config::{
    APP_ID, DEFAULT_NEXUS, DEFAULT_POLL_INTERVAL, DEFAULT_POLLED_ROUTES, MIN_POLL_INTERVAL,
};
use crate::coordinator::ContentPreferences;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub nexus_url: String,
    /// Seconds between background polls of the active stream
    pub poll_interval_secs: u64,
    /// Route patterns (regex) whose streams are polled
    pub polled_routes: Vec<String>,
    /// When false, hidden pages keep polling
    pub respect_visibility: bool,
    pub preferences: ContentPreferences,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            nexus_url: DEFAULT_NEXUS.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            polled_routes: DEFAULT_POLLED_ROUTES.iter().map(|r| r.to_string()).collect(),
            respect_visibility: true,
            preferences: ContentPreferences::default(),
        }
    }
}

impl SyncSettings {
    /// Get the settings file path (~/.config/app.pubky.Franky/sync.json)
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("sync.json");
            p
        })
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path().ok_or("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {e}"))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {e}"))?;

        Ok(())
    }

    /// Poll period, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs).max(MIN_POLL_INTERVAL)
    }
}
