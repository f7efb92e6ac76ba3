//! Application-level configuration loading: device pool, leaderboard and default game settings.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{
    game::{GameSettings, Question},
    ids::DeviceId,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_BACK_CONFIG_PATH";
/// Leaderboard used when the configuration does not name one.
const DEFAULT_LEADERBOARD: &str = "trivia";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    devices: Vec<DeviceId>,
    leaderboard_name: String,
    leaderboard_overwrite: bool,
    auto_host: bool,
    settings: GameSettings,
    questions_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        devices = app_config.devices.len(),
                        leaderboard = %app_config.leaderboard_name,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document. Invalid game settings are replaced by defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Ok(raw.into())
    }

    /// Devices registered at startup.
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Name of the persistent leaderboard mirrored by the session.
    pub fn leaderboard_name(&self) -> &str {
        &self.leaderboard_name
    }

    /// Whether mirrored scores replace stored ones instead of keeping the best.
    pub fn leaderboard_overwrite(&self) -> bool {
        self.leaderboard_overwrite
    }

    /// Whether the first present player is promoted to host automatically.
    pub fn auto_host(&self) -> bool {
        self.auto_host
    }

    /// Settings a fresh session starts with.
    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// Read the question catalog named by `questions_path`, if any.
    ///
    /// Unreadable or malformed catalogs are logged and yield an empty catalog.
    pub fn initial_questions(&self) -> Vec<Question> {
        let Some(path) = self.questions_path.as_deref() else {
            return Vec::new();
        };
        match read_questions(path) {
            Ok(questions) => {
                info!(path = %path.display(), count = questions.len(), "loaded question catalog");
                questions
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load question catalog");
                Vec::new()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            leaderboard_name: DEFAULT_LEADERBOARD.into(),
            leaderboard_overwrite: false,
            auto_host: true,
            settings: GameSettings::default(),
            questions_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    devices: Vec<String>,
    leaderboard_name: Option<String>,
    leaderboard_overwrite: bool,
    auto_host: bool,
    settings: GameSettings,
    questions_path: Option<PathBuf>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            leaderboard_name: None,
            leaderboard_overwrite: false,
            auto_host: true,
            settings: GameSettings::default(),
            questions_path: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let settings = match value.settings.check() {
            Ok(()) => value.settings,
            Err(reason) => {
                warn!(reason = %reason, "invalid default game settings; using built-in ones");
                GameSettings::default()
            }
        };

        let leaderboard_name = value
            .leaderboard_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_LEADERBOARD.into());

        Self {
            devices: value
                .devices
                .into_iter()
                .filter(|id| !id.trim().is_empty())
                .map(DeviceId::from)
                .collect(),
            leaderboard_name,
            leaderboard_overwrite: value.leaderboard_overwrite,
            auto_host: value.auto_host,
            settings,
            questions_path: value.questions_path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CatalogError {
    #[error("failed to read catalog")]
    Read(#[from] std::io::Error),
    #[error("failed to parse catalog")]
    Parse(#[from] serde_json::Error),
}

fn read_questions(path: &Path) -> Result<Vec<Question>, CatalogError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
