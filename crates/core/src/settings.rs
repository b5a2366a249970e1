use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logger;
use crate::types::Credential;

/// Fixed delays that model UI animation/settle time on the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub tick_ms: u64,
    pub login_settle_ms: u64,
    pub verify_pause_ms: u64,
    pub recovery_settle_ms: u64,
    pub refresh_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tick_ms: 5000,
            login_settle_ms: 2000,
            verify_pause_ms: 1000,
            recovery_settle_ms: 3000,
            refresh_ms: 1000,
        }
    }
}

impl Timings {
    /// All delays zeroed; for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            tick_ms: 0,
            login_settle_ms: 0,
            verify_pause_ms: 0,
            recovery_settle_ms: 0,
            refresh_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub adb_path: PathBuf,
    pub package: String,
    pub activity: String,
    pub assets_dir: PathBuf,
    /// Only serials matching this regex are driven.
    pub device_pattern: String,
    pub threshold: f32,
    pub recovery_after_misses: u32,
    pub timings: Timings,
    pub credentials: Vec<Credential>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            package: "com.higgs.domino".into(),
            activity: "com.pokercity.lobby.lobby".into(),
            assets_dir: PathBuf::from("Assets"),
            device_pattern: r"^127\.0\.0\.1".into(),
            threshold: 0.90,
            recovery_after_misses: 3,
            timings: Timings::default(),
            credentials: vec![
                Credential::new("589631885", "null00", "aaa"),
                Credential::new("7879743667", "null02", "titit"),
                Credential::new("7879786686", "null03", "titit"),
                Credential::new("7879787667", "null04", "titit"),
                Credential::new("7879346667", "null05", "titit"),
            ],
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file
    /// is missing or malformed.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => {
                logger::info(&format!("no settings at {}, using defaults", path.display()));
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                logger::warn(&format!("invalid settings {}: {}, using defaults", path.display(), e));
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let s: Settings = serde_json::from_str(r#"{"package":"com.example","timings":{"tick_ms":10}}"#).unwrap();
        assert_eq!(s.package, "com.example");
        assert_eq!(s.activity, "com.pokercity.lobby.lobby");
        assert_eq!(s.timings.tick_ms, 10);
        assert_eq!(s.timings.login_settle_ms, 2000);
        assert_eq!(s.credentials.len(), 5);
    }

    #[test]
    fn test_saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.device_pattern = r"^emulator-".into();
        s.timings.tick_ms = 250;
        s.save(&path).unwrap();
        let loaded = Settings::load(&path);
        assert_eq!(loaded.device_pattern, r"^emulator-");
        assert_eq!(loaded.timings.tick_ms, 250);
    }

    #[test]
    fn test_malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load(&path).package, "com.higgs.domino");
    }

    #[test]
    fn test_missing_file_is_default() {
        let s = Settings::load(Path::new("/nonexistent/emubot/settings.json"));
        assert_eq!(s.recovery_after_misses, 3);
        assert!((s.threshold - 0.90).abs() < f32::EPSILON);
    }
}
