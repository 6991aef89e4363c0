use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::engine::EngineParams;
use crate::stabilizer;
use crate::trend;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of recent scores feeding the trend statistics.
    pub rolling_window: usize,
    /// Sub-window for the regression slope (capped at rolling_window).
    pub slope_window: usize,
    /// EMA weight of the incoming quantized score, in (0, 1].
    pub smoothing_alpha: f64,
    /// Upper bound on any single store read/write, in milliseconds.
    pub store_timeout_ms: u64,
    /// Optional REST persistence backend (Supabase-compatible).
    pub rest: Option<RestConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: None,
            rolling_window: trend::ROLLING_WINDOW,
            slope_window: trend::SLOPE_WINDOW,
            smoothing_alpha: stabilizer::SMOOTHING_ALPHA,
            store_timeout_ms: 3000,
            rest: None,
        }
    }
}

/// REST persistence configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    pub url: String,
    pub api_key: String,
}

impl AppConfig {
    /// Load config from `~/.config/quossi/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        let mut config = match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        if config.rest.is_none() {
            config.rest = RestConfig::from_env();
        }
        config.sanitize();
        config
    }

    /// Clamp out-of-range tunables back to safe values.
    fn sanitize(&mut self) {
        if self.rolling_window == 0 {
            log::warn!("rolling_window must be at least 1, using default");
            self.rolling_window = trend::ROLLING_WINDOW;
        }
        if self.slope_window == 0 || self.slope_window > self.rolling_window {
            log::warn!(
                "slope_window must be in 1..={}, clamping",
                self.rolling_window
            );
            self.slope_window = trend::SLOPE_WINDOW.min(self.rolling_window);
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            log::warn!("smoothing_alpha must be in (0, 1], using default");
            self.smoothing_alpha = stabilizer::SMOOTHING_ALPHA;
        }
    }

    /// Engine tunables derived from this config.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            rolling_window: self.rolling_window,
            slope_window: self.slope_window,
            smoothing_alpha: self.smoothing_alpha,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

impl RestConfig {
    /// Environment fallback so deployments can configure the REST backend
    /// without a config file.
    fn from_env() -> Option<Self> {
        let url = std::env::var("QUOSSI_REST_URL").ok()?;
        let api_key = std::env::var("QUOSSI_REST_KEY").ok()?;
        Some(RestConfig { url, api_key })
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("quossi.db")
    } else {
        // Fallback: current directory
        PathBuf::from("quossi.db")
    }
}
