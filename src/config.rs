//! Client configuration: backend location, HTTP timeouts, token storage and
//! upload limits. Loaded from TOML (path in MATHMISSION_CONFIG) with
//! environment overrides on top.
//!
//! ```toml
//! base_url = "https://math.example.org"
//! request_timeout_secs = 30
//! token_path = "/home/student/.mathmission/token"
//!
//! [uploads]
//! max_images = 5
//! max_image_bytes = 5242880
//! allowed_types = ["image/jpeg", "image/png", "image/jpg"]
//! ```

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  pub base_url: String,
  pub request_timeout_secs: u64,
  pub user_agent: String,
  /// Where the bearer token is persisted. `None` keeps it in memory only.
  pub token_path: Option<PathBuf>,
  pub uploads: UploadLimits,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.into(),
      request_timeout_secs: 30,
      user_agent: concat!("mathmission/", env!("CARGO_PKG_VERSION")).into(),
      token_path: None,
      uploads: UploadLimits::default(),
    }
  }
}

/// Limits the backend enforces on answer images, checked before upload.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadLimits {
  pub max_images: usize,
  pub max_image_bytes: usize,
  pub allowed_types: Vec<String>,
}

impl Default for UploadLimits {
  fn default() -> Self {
    Self {
      max_images: 5,
      max_image_bytes: 5 * 1024 * 1024,
      allowed_types: vec!["image/jpeg".into(), "image/png".into(), "image/jpg".into()],
    }
  }
}

impl ClientConfig {
  /// File config (if any) + env overrides. Never fails: bad input is logged and skipped.
  pub fn from_env() -> Self {
    let mut cfg = load_client_config_from_env().unwrap_or_default();
    cfg.apply_env_overrides(|k| std::env::var(k).ok());
    cfg
  }

  pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<ClientConfig>(s)
  }

  pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("MATHMISSION_BASE_URL").filter(|s| !s.trim().is_empty()) {
      self.base_url = url;
    }
    if let Some(p) = var("MATHMISSION_TOKEN_PATH").filter(|s| !s.trim().is_empty()) {
      self.token_path = Some(PathBuf::from(p));
    }
    if let Some(raw) = var("MATHMISSION_TIMEOUT_SECS") {
      match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
        _ => error!(target: "mathmission", value = %raw, "Ignoring invalid MATHMISSION_TIMEOUT_SECS"),
      }
    }
    self.base_url = self.base_url.trim_end_matches('/').to_string();
  }
}

/// Attempt to load `ClientConfig` from MATHMISSION_CONFIG. On any parsing/IO error, returns None.
pub fn load_client_config_from_env() -> Option<ClientConfig> {
  let path = std::env::var("MATHMISSION_CONFIG").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match ClientConfig::from_toml_str(&s) {
      Ok(cfg) => {
        info!(target: "mathmission", %path, "Loaded client config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "mathmission", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "mathmission", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
