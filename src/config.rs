use crate::error::{Error, IoContext, Result};
use crate::store::write_atomic_text;
use anyhow::Context;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_MODLINKS_URL: &str =
    "https://raw.githubusercontent.com/hk-modding/modlinks/main/ModLinks.xml";
pub const DEFAULT_APILINKS_URL: &str =
    "https://raw.githubusercontent.com/hk-modding/modlinks/main/ApiLinks.xml";
pub const DATA_DIR_ENV: &str = "SOULFORGE_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub game_directory: Option<PathBuf>,
    #[serde(default)]
    pub vanilla_mode: bool,
    #[serde(default = "default_modlinks_url")]
    pub modlinks_url: String,
    #[serde(default = "default_apilinks_url")]
    pub apilinks_url: String,
    #[serde(default = "default_refresh_hours")]
    pub catalog_refresh_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_directory: None,
            vanilla_mode: false,
            modlinks_url: default_modlinks_url(),
            apilinks_url: default_apilinks_url(),
            catalog_refresh_hours: default_refresh_hours(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).at(data_dir)?;
        let path = data_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).at(&path)?;
            let config: AppConfig = match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(%err, "app config corrupt, using defaults");
                    AppConfig::default()
                }
            };
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save(data_dir)?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).map_err(|err| Error::StateWrite {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        write_atomic_text(&path, &raw).map_err(|err| Error::StateWrite {
            path,
            reason: err.to_string(),
        })
    }
}

/// Per-user data directory, or `$SOULFORGE_DATA_DIR` when set.
pub fn base_data_dir() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("soulforge"))
}

fn default_modlinks_url() -> String {
    DEFAULT_MODLINKS_URL.to_string()
}

fn default_apilinks_url() -> String {
    DEFAULT_APILINKS_URL.to_string()
}

fn default_refresh_hours() -> u64 {
    24
}
