use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::query::QueryOptions;
use crate::paginated::DEFAULT_PAGE_SIZE;
use crate::session::{IdlePolicy, Role, WARNING_WINDOW};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Role of the signed-in account; unknown until set here or on the command line
  pub role: Option<Role>,
  /// ISO currency code used when rendering amounts
  #[serde(default = "default_currency")]
  pub currency: String,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub pagination: PaginationSettings,
  #[serde(default)]
  pub session: SessionSettings,
  #[serde(default)]
  pub connectivity: ConnectivitySettings,
}

fn default_currency() -> String {
  "KES".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
  /// Path of the table endpoints below `url`
  #[serde(default = "default_schema_path")]
  pub schema_path: String,
}

fn default_schema_path() -> String {
  "rest/v1".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
  pub cache_time_secs: u64,
  pub stale_time_secs: u64,
  pub sweep_interval_secs: u64,
  pub refetch_on_focus: bool,
  pub refetch_on_reconnect: bool,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      cache_time_secs: 5 * 60,
      stale_time_secs: 30,
      sweep_interval_secs: 60,
      refetch_on_focus: true,
      refetch_on_reconnect: true,
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(self) -> CacheConfig {
    CacheConfig {
      cache_time: Duration::from_secs(self.cache_time_secs),
      stale_time: Duration::from_secs(self.stale_time_secs),
      sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
    }
  }

  /// Options every list view's query starts from.
  pub fn to_query_options(self) -> QueryOptions {
    QueryOptions {
      refetch_on_focus: self.refetch_on_focus,
      refetch_on_reconnect: self.refetch_on_reconnect,
      ..QueryOptions::default()
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PaginationSettings {
  pub page_size: u32,
}

impl Default for PaginationSettings {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
  pub elevated_timeout_secs: u64,
  pub standard_timeout_secs: u64,
}

impl Default for SessionSettings {
  fn default() -> Self {
    Self {
      elevated_timeout_secs: 15 * 60,
      standard_timeout_secs: 30 * 60,
    }
  }
}

impl SessionSettings {
  pub fn to_idle_policy(self) -> IdlePolicy {
    IdlePolicy {
      elevated_timeout: Duration::from_secs(self.elevated_timeout_secs),
      standard_timeout: Duration::from_secs(self.standard_timeout_secs),
      warning_window: WARNING_WINDOW,
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectivitySettings {
  pub probe_interval_secs: u64,
}

impl Default for ConnectivitySettings {
  fn default() -> Self {
    Self {
      probe_interval_secs: 15,
    }
  }
}

impl ConnectivitySettings {
  pub fn probe_interval(self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rentdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rentdesk/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/rentdesk/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("rentdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rentdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.pagination.page_size == 0 {
      return Err(eyre!("pagination.page_size must be at least 1"));
    }
    Ok(config)
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks RENTDESK_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("RENTDESK_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set RENTDESK_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Get the signed-in user's access token, if any.
  ///
  /// Checks RENTDESK_ACCESS_TOKEN. Without it requests run with the API key alone.
  pub fn get_access_token() -> Option<String> {
    std::env::var("RENTDESK_ACCESS_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
