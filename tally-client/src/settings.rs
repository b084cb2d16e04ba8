use config::{Config, Environment, File as ConfigFile};
use eyre::{eyre, Context, Result};
use std::path::{Path, PathBuf};

const EXAMPLE_CONFIG: &str = include_str!("../config.toml");

/// Proxy parameters the HTTP stack gets handed when the user enabled
/// one. Stored in the database next to the other user settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// User settings persisted in the store (as opposed to the config
/// file, which holds machine-level paths and URLs).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSettings {
    pub use_proxy: bool,
    pub proxy: Proxy,
    pub use_idle_detection: bool,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct Settings {
    pub db_path: String,
    pub api_url: String,
    pub websocket_url: String,
    pub timeline_upload_url: String,
    pub log_path: String,
    pub log_level: String,
}

impl Settings {
    /// Resolution order: built-in defaults, then config.toml, then
    /// `TALLY_*` environment variables. A missing config file is
    /// seeded with a commented example so users have something to
    /// edit.
    pub fn new() -> Result<Self> {
        let data_dir = tally_common::utils::data_dir();
        fs_err::create_dir_all(&data_dir)
            .wrap_err_with(|| format!("Failed to create dir {data_dir:?}"))?;
        let config_path = Self::ensure_config_file(&Self::config_dir())?;

        let db_path = data_dir.join("tally.db");
        let log_path = data_dir.join("tally.log");

        let mut settings: Settings = Config::builder()
            .set_default("db_path", db_path.to_string_lossy().as_ref())?
            .set_default("api_url", "https://www.toggl.com")?
            .set_default("websocket_url", "https://stream.toggl.com")?
            .set_default("timeline_upload_url", "https://timeline.toggl.com")?
            .set_default("log_path", log_path.to_string_lossy().as_ref())?
            .set_default("log_level", "info")?
            .add_source(ConfigFile::from(config_path))
            .add_source(
                Environment::with_prefix("tally")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
            .map_err(|e| eyre!("Invalid configuration: {e}"))?;

        settings.db_path = expand_shell(&settings.db_path)?;
        settings.log_path = expand_shell(&settings.log_path)?;

        Ok(settings)
    }

    /// Where config.toml lives. `TALLY_CONFIG_DIR` overrides the
    /// platform default, which tests and side-by-side installs rely
    /// on.
    fn config_dir() -> PathBuf {
        std::env::var("TALLY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| tally_common::utils::config_dir())
    }

    fn ensure_config_file(dir: &Path) -> Result<PathBuf> {
        fs_err::create_dir_all(dir).wrap_err_with(|| format!("Failed to create dir {dir:?}"))?;
        let path = dir.join("config.toml");
        if !path.exists() {
            fs_err::write(&path, EXAMPLE_CONFIG).wrap_err("Failed to write default config file")?;
        }
        Ok(path)
    }
}

fn expand_shell(value: &str) -> Result<String> {
    Ok(shellexpand::full(value)?.to_string())
}
