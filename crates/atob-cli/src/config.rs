//! Runtime configuration for the `atob` binary.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use serde::Deserialize;
use tracing::warn;

/// Relays used when fewer than [`MIN_RELAYS`] are configured.
pub const DEFAULT_RELAYS: &[&str] = &[
  "wss://relay.damus.io",
  "wss://nos.lol",
  "wss://relay.snort.social",
  "wss://nostr.wine",
  "wss://relay.nostr.band",
  "wss://relay.current.fyi",
  "wss://nostr-pub.wellorder.net",
  "wss://relay.nostr.bg",
  "wss://nostr.bitcoiner.social",
  "wss://relay.nostr.info",
];

pub const MIN_RELAYS: usize = 3;

/// Deserialised from `atob.toml` and `ATOB_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub relays:                Vec<String>,
  pub cache_path:            PathBuf,
  /// Hex secret key. Loaded from the cache, or generated, when absent.
  pub secret_key:            Option<String>,
  pub host:                  String,
  pub port:                  u16,
  pub fallback_after_ms:     u64,
  pub refresh_interval_secs: u64,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      relays:                DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
      cache_path:            PathBuf::from("~/.local/share/atob/cache.db"),
      secret_key:            None,
      host:                  "127.0.0.1".to_string(),
      port:                  8420,
      fallback_after_ms:     3000,
      refresh_interval_secs: 300,
    }
  }
}

impl AppConfig {
  /// Read `path` (optional) and the environment, then normalise.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ATOB")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("relays"),
      )
      .build()
      .context("failed to read config")?;

    let mut cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.normalise();
    Ok(cfg)
  }

  fn normalise(&mut self) {
    self.relays.retain(|r| !r.trim().is_empty());
    self.relays.dedup();
    if self.relays.len() < MIN_RELAYS {
      warn!(
        configured = self.relays.len(),
        "fewer than {MIN_RELAYS} relays configured; using the default relay list"
      );
      self.relays = DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect();
    }
    self.cache_path = expand_tilde(&self.cache_path);
  }

  pub fn fallback_after(&self) -> Duration { Duration::from_millis(self.fallback_after_ms) }

  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs.max(1))
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn too_few_relays_fall_back_to_defaults() {
    let mut cfg = AppConfig {
      relays: vec!["wss://one.example".into(), "".into()],
      ..Default::default()
    };
    cfg.normalise();
    assert_eq!(cfg.relays.len(), DEFAULT_RELAYS.len());
  }

  #[test]
  fn enough_relays_are_kept() {
    let relays: Vec<String> =
      ["wss://a.example", "wss://b.example", "wss://c.example"].map(String::from).to_vec();
    let mut cfg = AppConfig { relays: relays.clone(), ..Default::default() };
    cfg.normalise();
    assert_eq!(cfg.relays, relays);
  }

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = AppConfig::load(Path::new("/nonexistent/atob.toml")).unwrap();
    assert_eq!(cfg.port, 8420);
    assert_eq!(cfg.fallback_after(), Duration::from_secs(3));
    assert!(cfg.relays.len() >= MIN_RELAYS);
  }
}
