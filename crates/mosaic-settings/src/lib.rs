use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SCHEMA_VERSION: u32 = 1;
pub const BACKEND_URL_ENV: &str = "MOSAIC_BACKEND_URL";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_BACKDROP_FILE_NAME: &str = "downloaded_image.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PanelSettings {
    #[serde(alias = "schema_version")]
    pub schema_version: u32,
    pub backend_url: String,
    pub default_tolerance: i64,
    pub default_opacity: f64,
    pub backdrop_file_name: String,
    pub download_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            default_tolerance: 10,
            default_opacity: 0.6,
            backdrop_file_name: DEFAULT_BACKDROP_FILE_NAME.to_string(),
            download_dir: None,
            request_timeout_secs: 120,
        }
    }
}

impl PanelSettings {
    /// Where a downloaded backdrop lands when the caller gives no path.
    pub fn backdrop_destination(&self) -> PathBuf {
        let dir = self
            .download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(&self.backdrop_file_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub backend_url: Option<String>,
    pub default_tolerance: Option<i64>,
    pub default_opacity: Option<f64>,
    pub backdrop_file_name: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine a default settings directory")]
    NoDefaultSettingsDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SettingsPaths {
    pub root: PathBuf,
    pub settings_file: PathBuf,
}

pub fn default_settings_dir() -> Result<PathBuf, SettingsError> {
    let home = dirs::home_dir().ok_or(SettingsError::NoDefaultSettingsDir)?;
    Ok(home.join(".mosaic"))
}

pub fn resolve_settings_paths(settings_dir: Option<&Path>) -> Result<SettingsPaths, SettingsError> {
    let root = if let Some(dir) = settings_dir {
        dir.to_path_buf()
    } else {
        default_settings_dir()?
    };

    Ok(SettingsPaths {
        settings_file: root.join(SETTINGS_FILE_NAME),
        root,
    })
}

pub fn read_settings(paths: &SettingsPaths) -> Result<PanelSettings, SettingsError> {
    let data = fs::read(&paths.settings_file)?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn write_settings(paths: &SettingsPaths, settings: &PanelSettings) -> Result<(), SettingsError> {
    fs::create_dir_all(&paths.root)?;
    let data = serde_json::to_vec_pretty(settings)?;
    fs::write(&paths.settings_file, data)?;
    Ok(())
}

/// Reads the settings file (defaults when absent) and applies `MOSAIC_BACKEND_URL`.
pub fn load_settings(paths: &SettingsPaths) -> Result<PanelSettings, SettingsError> {
    let settings = match read_settings(paths) {
        Ok(settings) => settings,
        Err(SettingsError::Io(err)) if err.kind() == ErrorKind::NotFound => PanelSettings::default(),
        Err(err) => return Err(err),
    };
    Ok(apply_backend_url_override(settings, std::env::var(BACKEND_URL_ENV).ok()))
}

pub fn apply_backend_url_override(mut settings: PanelSettings, value: Option<String>) -> PanelSettings {
    if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
        settings.backend_url = url.trim().to_string();
    }
    settings
}

/// Blank strings and `None` keep the base value.
pub fn merge_settings(base: PanelSettings, overrides: SettingsOverrides) -> PanelSettings {
    let mut merged = base;
    if let Some(url) = overrides.backend_url.filter(|v| !v.trim().is_empty()) {
        merged.backend_url = url.trim().to_string();
    }
    if let Some(tolerance) = overrides.default_tolerance {
        merged.default_tolerance = tolerance;
    }
    if let Some(opacity) = overrides.default_opacity {
        merged.default_opacity = opacity;
    }
    if let Some(name) = overrides.backdrop_file_name.filter(|v| !v.trim().is_empty()) {
        merged.backdrop_file_name = name;
    }
    if let Some(dir) = overrides.download_dir {
        merged.download_dir = Some(dir);
    }
    if let Some(secs) = overrides.request_timeout_secs {
        merged.request_timeout_secs = secs;
    }
    merged.schema_version = SCHEMA_VERSION;
    merged
}
