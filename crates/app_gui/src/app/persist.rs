//! Threshold settings stored between sessions.

use anyhow::{Context, Result};
use directories_next::ProjectDirs;
use marbling_core::HsvThresholds;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "thresholds.json";

/// Platform config location, e.g. `~/.config/marblinginspector/thresholds.json`.
pub(crate) fn settings_path() -> Option<PathBuf> {
    ProjectDirs::from("jp", "marbling", "MarblingInspector")
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}

pub(crate) fn load_thresholds(path: &Path) -> Result<HsvThresholds> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read settings: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid settings: {}", path.display()))
}

pub(crate) fn save_thresholds(path: &Path, thresholds: &HsvThresholds) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(thresholds)?;
    fs::write(path, json).with_context(|| format!("cannot write settings: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn thresholds_survive_save_and_load() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let thresholds = HsvThresholds {
            v_low: 180,
            s_high: 90,
            ..HsvThresholds::default()
        };
        save_thresholds(&path, &thresholds)?;
        assert_eq!(load_thresholds(&path)?, thresholds);
        Ok(())
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{ "v_low": 150 }"#)?;
        let loaded = load_thresholds(&path)?;
        assert_eq!(loaded.v_low, 150);
        assert_eq!(loaded.s_high, HsvThresholds::default().s_high);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_thresholds(&dir.path().join("absent.json")).is_err());
    }
}
