//! Public identity profile: kind-0 metadata plus delivery reputation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAME: &str = "atob_user";
pub const DEFAULT_DISPLAY_NAME: &str = "A to B User";

/// Rating shown for any identity with at least one completed delivery.
pub const BASE_RATING: f32 = 4.5;

/// NIP-01 metadata content. Unknown keys are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name:         Option<String>,
  #[serde(
    default,
    alias = "displayName",
    skip_serializing_if = "Option::is_none"
  )]
  pub display_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub picture:      Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub about:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub website:      Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nip05:        Option<String>,
}

/// A resolved profile, as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub pubkey:       String,
  pub name:         String,
  pub display_name: String,
  pub picture:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub about:        Option<String>,
  /// Distinct packages this identity has delivered.
  pub deliveries:   usize,
  pub rating:       f32,
}

impl Profile {
  /// Fill gaps in `meta` with defaults.
  pub fn resolve(pubkey: &str, meta: Option<ProfileMetadata>, deliveries: usize) -> Self {
    let meta = meta.unwrap_or_default();
    let name = meta
      .name
      .filter(|n| !n.is_empty())
      .unwrap_or_else(|| DEFAULT_NAME.to_owned());
    let display_name = meta
      .display_name
      .filter(|n| !n.is_empty())
      .unwrap_or_else(|| {
        if name == DEFAULT_NAME { DEFAULT_DISPLAY_NAME.to_owned() } else { name.clone() }
      });
    let picture = meta
      .picture
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| default_avatar(pubkey));

    Self {
      pubkey: pubkey.to_owned(),
      name,
      display_name,
      picture,
      about: meta.about,
      deliveries,
      rating: if deliveries > 0 { BASE_RATING } else { 0.0 },
    }
  }
}

pub fn default_avatar(pubkey: &str) -> String {
  format!("https://api.dicebear.com/7.x/avataaars/svg?seed={pubkey}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_metadata_resolves_to_defaults() {
    let p = Profile::resolve("abc", None, 0);
    assert_eq!(p.name, DEFAULT_NAME);
    assert_eq!(p.display_name, DEFAULT_DISPLAY_NAME);
    assert!(p.picture.ends_with("seed=abc"));
    assert_eq!(p.rating, 0.0);
  }

  #[test]
  fn display_name_falls_back_to_name() {
    let meta = ProfileMetadata { name: Some("sam".into()), ..Default::default() };
    let p = Profile::resolve("abc", Some(meta), 3);
    assert_eq!(p.display_name, "sam");
    assert_eq!(p.deliveries, 3);
    assert_eq!(p.rating, BASE_RATING);
  }

  #[test]
  fn camel_case_display_name_is_accepted() {
    let meta: ProfileMetadata =
      serde_json::from_str(r#"{"displayName":"Sam","extra":1}"#).unwrap();
    assert_eq!(meta.display_name.as_deref(), Some("Sam"));
  }
}
