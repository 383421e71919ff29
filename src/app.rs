use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::models::UserProfile;
use crate::error::{FeedError, FeedResult};
use crate::feed::FeedOptions;
use crate::feed::links::VideoIdStrategy;
use crate::feed::scroll::{DEFAULT_NEAR_BOTTOM_PX, ScrollAnchorController};
use crate::feed::store::DEFAULT_PAGE_SIZE;

const CONFIG_ENV: &str = "CHATFEED_CONFIG";

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_undo_grace_ms() -> u64 {
    3000
}

fn default_near_bottom_px() -> f64 {
    DEFAULT_NEAR_BOTTOM_PX
}

fn default_cache() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub user: UserProfile,
    #[serde(default)]
    pub contacts: Vec<UserProfile>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_undo_grace_ms")]
    pub undo_grace_ms: u64,
    #[serde(default = "default_near_bottom_px")]
    pub near_bottom_px: f64,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default)]
    pub video_id_strategy: VideoIdStrategy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            password: None,
            token: None,
            ws_url: None,
            user: UserProfile::default(),
            contacts: Vec::new(),
            page_size: default_page_size(),
            undo_grace_ms: default_undo_grace_ms(),
            near_bottom_px: default_near_bottom_px(),
            cache: default_cache(),
            video_id_strategy: VideoIdStrategy::default(),
        }
    }
}

impl FeedConfig {
    // TOML is the primary format; a legacy JSON file is converted on first load
    fn toml_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("chatfeed.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "ChatFeed")?;
        Some(proj.config_dir().join("state.json"))
    }

    pub fn from_toml_str(text: &str) -> FeedResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from disk, falling back to defaults when nothing usable exists.
    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            if let Ok(text) = fs::read_to_string(&path) {
                match Self::from_toml_str(&text) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("ignoring {}: {e}", path.display()),
                }
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(bytes) = fs::read(&legacy) {
                if let Ok(config) = serde_json::from_slice::<FeedConfig>(&bytes) {
                    if let Err(e) = config.save() {
                        log::warn!("could not migrate {}: {e}", legacy.display());
                    }
                    return config;
                }
            }
        }

        Self::default()
    }

    pub fn save(&self) -> FeedResult<()> {
        let path = Self::toml_path().ok_or_else(|| FeedError::Config("no config dir".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FeedError::Config(e.to_string()))?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(&path, text).map_err(|e| FeedError::Config(e.to_string()))
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.user.id.is_empty()
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            local_user: self.user.id.clone(),
            language: self.user.primary_language.clone(),
            page_size: self.page_size.max(1),
            undo_grace: Duration::from_millis(self.undo_grace_ms),
        }
    }

    pub fn scroll_controller(&self) -> ScrollAnchorController {
        ScrollAnchorController::new(self.near_bottom_px)
    }
}
