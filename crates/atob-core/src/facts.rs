//! Builders for the events the marketplace publishes.
//!
//! Each builder returns an unsigned [`EventDraft`]; a
//! [`Signer`](crate::signer::Signer) turns it into an [`Event`](crate::event::Event).

use crate::{
  Result,
  event::{EventDraft, kinds},
  package::{DeliveryContent, Package},
  profile::ProfileMetadata,
};

/// Creation event for `pkg`. The content carries the full record minus its
/// id, which the event log assigns.
///
/// `d` carries a fresh identifier so relays treating kind 30001 as
/// parameterised-replaceable never collapse two packages by one author.
pub fn creation_draft(pkg: &Package) -> Result<EventDraft> {
  let mut content = serde_json::to_value(pkg)?;
  if let Some(obj) = content.as_object_mut() {
    obj.remove("id");
  }

  Ok(
    EventDraft::new(kinds::PACKAGE, pkg.created_at, content.to_string())
      .tag("d", uuid::Uuid::new_v4().to_string())
      .tag("t", "package")
      .tag("t", "delivery")
      .tag("t", pkg.status.as_ref())
      .tag("status", pkg.status.as_ref())
      .tag("title", pkg.title.clone())
      .tag("pickup", pkg.pickup_location.clone())
      .tag("destination", pkg.destination.clone())
      .tag("created_at", pkg.created_at.to_string())
      .tag("expires_at", pkg.expires_at().to_string()),
  )
}

/// Delivery-update event asserting `content` at `created_at`.
///
/// No `d` tag: every update stays on the log, and readers pick the latest.
pub fn delivery_draft(content: &DeliveryContent, created_at: i64) -> Result<EventDraft> {
  let body = serde_json::to_string(content)?;
  Ok(
    EventDraft::new(kinds::DELIVERY, created_at, body)
      .tag("t", "delivery")
      .tag("package_id", content.package_id.clone())
      .tag("status", content.status.as_ref()),
  )
}

/// Deletion request for the creation event `event_id`.
pub fn deletion_draft(event_id: &str, created_at: i64) -> EventDraft {
  EventDraft::new(kinds::DELETION, created_at, "").tag("e", event_id)
}

/// Profile metadata event.
pub fn metadata_draft(meta: &ProfileMetadata, created_at: i64) -> Result<EventDraft> {
  Ok(EventDraft::new(kinds::METADATA, created_at, serde_json::to_string(meta)?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::package::EXPIRY_SECS;
  use crate::package::{NewPackage, PackageStatus};

  fn books() -> Package {
    Package::new(
      "ignored".into(),
      NewPackage {
        title:           "Books".into(),
        pickup_location: "A St".into(),
        destination:     "B Ave".into(),
        cost:            "5000".into(),
        description:     Some("two boxes".into()),
      },
      "creator".into(),
      1_700_000_000,
    )
  }

  fn has_tag(draft: &EventDraft, name: &str, value: &str) -> bool {
    draft.tags.iter().any(|t| t.len() >= 2 && t[0] == name && t[1] == value)
  }

  #[test]
  fn creation_draft_omits_id_and_tags_metadata() {
    let draft = creation_draft(&books()).unwrap();
    assert_eq!(draft.kind, kinds::PACKAGE);

    let content: serde_json::Value = serde_json::from_str(&draft.content).unwrap();
    assert!(content.get("id").is_none());
    assert_eq!(content["title"], "Books");
    assert_eq!(content["pickupLocation"], "A St");

    assert!(has_tag(&draft, "t", "package"));
    assert!(has_tag(&draft, "status", "available"));
    assert!(has_tag(&draft, "expires_at", &(1_700_000_000 + EXPIRY_SECS).to_string()));
    assert!(draft.tags.iter().any(|t| t[0] == "d"));
  }

  #[test]
  fn two_creations_get_distinct_d_tags() {
    let a = creation_draft(&books()).unwrap();
    let b = creation_draft(&books()).unwrap();
    let d = |e: &EventDraft| e.tags.iter().find(|t| t[0] == "d").cloned();
    assert_ne!(d(&a), d(&b));
  }

  #[test]
  fn delivery_draft_references_package() {
    let content = DeliveryContent {
      package_id:     "p1".into(),
      status:         PackageStatus::InTransit,
      courier_pubkey: Some("k2".into()),
      pickup_time:    Some(10),
      delivery_time:  None,
      update_id:      None,
    };
    let draft = delivery_draft(&content, 10).unwrap();
    assert!(has_tag(&draft, "package_id", "p1"));
    assert!(has_tag(&draft, "status", "in_transit"));
    assert!(has_tag(&draft, "t", "delivery"));
    assert!(!draft.tags.iter().any(|t| t[0] == "d"));
    assert!(!draft.content.contains("delivery_time"));
  }

  #[test]
  fn deletion_draft_points_at_event() {
    let draft = deletion_draft("abc", 5);
    assert_eq!(draft.kind, kinds::DELETION);
    assert_eq!(draft.tags, vec![vec!["e".to_string(), "abc".to_string()]]);
  }
}
