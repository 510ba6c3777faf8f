//! Human-readable rendering of marketplace results.

use chrono::{DateTime, Utc};

use atob_core::{package::Package, profile::Profile};
use atob_market::Transition;
use atob_relay::{PublishOutcome, RelayStatus, accepted};

fn timestamp(secs: i64) -> String {
  DateTime::<Utc>::from_timestamp(secs, 0)
    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_else(|| secs.to_string())
}

/// One line per package.
pub fn package_table(packages: &[Package], now: i64) {
  if packages.is_empty() {
    println!("no packages");
    return;
  }
  for p in packages {
    println!(
      "{:<64}  {:<10}  {}  ({} -> {}, {} sats)",
      p.id,
      p.effective_status(now).as_ref(),
      p.title,
      p.pickup_location,
      p.destination,
      p.cost,
    );
  }
}

pub fn package_detail(p: &Package, now: i64) {
  println!("id:          {}", p.id);
  println!("title:       {}", p.title);
  println!("status:      {}", p.effective_status(now).as_ref());
  println!("pickup:      {}", p.pickup_location);
  println!("destination: {}", p.destination);
  println!("cost:        {} sats", p.cost);
  if let Some(d) = &p.description {
    println!("description: {d}");
  }
  println!("creator:     {}", p.pubkey);
  println!("created:     {}", timestamp(p.created_at));
  println!("expires:     {}", timestamp(p.expires_at()));
  if let Some(c) = &p.courier_pubkey {
    println!("courier:     {c}");
  }
  if let Some(t) = p.pickup_time {
    println!("picked up:   {}", timestamp(t));
  }
  if let Some(t) = p.delivery_time {
    println!("delivered:   {}", timestamp(t));
  }
}

pub fn outcomes(outcomes: &[PublishOutcome]) {
  for o in outcomes {
    println!("  {:<40} {o}", o.relay);
  }
  if !outcomes.is_empty() {
    println!("accepted by {}/{} relays", accepted(outcomes), outcomes.len());
  }
}

pub fn transition(verb: &str, t: &Transition, now: i64) {
  println!("{verb} {} ({})", t.package.id, t.package.effective_status(now).as_ref());
  if t.package.is_local_only() {
    println!("not replicated; kept in the local cache only");
  }
  outcomes(&t.outcomes);
}

pub fn profile(p: &Profile) {
  println!("{} (@{})", p.display_name, p.name);
  println!("pubkey:     {}", p.pubkey);
  println!("picture:    {}", p.picture);
  if let Some(about) = &p.about {
    println!("about:      {about}");
  }
  println!("deliveries: {}", p.deliveries);
  println!("rating:     {:.1}", p.rating);
}

pub fn relays(status: &[RelayStatus]) {
  for s in status {
    println!("{:<40} {}", s.url, if s.reachable { "up" } else { "down" });
  }
  let up = status.iter().filter(|s| s.reachable).count();
  println!("{up}/{} reachable", status.len());
}
