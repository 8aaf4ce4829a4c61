use serde::{Deserialize, Serialize};
use smsrelay::config::normalize_base_url;
use smsrelay::{RelayError, Result};
use std::path::Path;

const SETTINGS_FILE: &str = "settings.json";

/// Locally stored settings, kept in `{data_dir}/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// API base URL override. Blank or missing means use the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl RemoteSettings {
    /// Load settings from `{data_dir}/settings.json` or return defaults.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<RemoteSettings>(&content) {
                    Ok(settings) => {
                        tracing::info!(
                            "[REMOTE] Loaded settings: api_url override={}",
                            settings.api_url.as_deref().unwrap_or("none")
                        );
                        return settings;
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse settings.json: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read settings.json: {}, using defaults", e);
                }
            }
        }

        RemoteSettings::default()
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        let path = data_dir.join(SETTINGS_FILE);
        std::fs::write(&path, json).map_err(|e| {
            RelayError::Persist(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Set the override. A blank value clears it.
    pub fn set_api_url(&mut self, url: &str) {
        let url = normalize_base_url(url);
        self.api_url = (!url.is_empty()).then_some(url);
    }

    /// The override if set and non-blank, otherwise `default`.
    pub fn resolve_base_url(&self, default: &str) -> String {
        self.api_url
            .as_deref()
            .map(normalize_base_url)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| normalize_base_url(default))
    }
}
