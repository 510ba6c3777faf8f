//! `atob`: command-line client and HTTP server for the A to ₿ marketplace.
//!
//! # Usage
//!
//! ```
//! atob post --title Books --from "12 A St" --to "34 B Ave" --cost 5000
//! atob list
//! atob pickup <id>
//! atob serve --config atob.toml
//! ```

mod config;
mod output;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use atob_core::{
  cache::{KvStore, SECRET_KEY_KEY},
  clock::SystemClock,
  package::NewPackage,
  profile::ProfileMetadata,
  signer::Signer,
};
use atob_market::{MarketConfig, Marketplace, spawn_periodic_refresh};
use atob_relay::{EventLogConfig, KeySigner, WsRelay};
use atob_store_sqlite::SqliteKv;

use config::AppConfig;

type Market = Marketplace<SqliteKv, WsRelay, KeySigner>;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "atob", author, version, about = "A to ₿ delivery marketplace")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "atob.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Serve the JSON API and refresh statuses in the background.
  Serve,
  /// Post a package for delivery.
  Post {
    #[arg(long)]
    title:       String,
    /// Pickup location.
    #[arg(long)]
    from:        String,
    /// Destination.
    #[arg(long)]
    to:          String,
    /// Offered fee in sats.
    #[arg(long)]
    cost:        String,
    #[arg(long)]
    description: Option<String>,
  },
  /// Browse available packages, plus your own.
  List,
  /// Show one package.
  Show { id: String },
  /// Claim a package as courier.
  Pickup { id: String },
  /// Mark a package you carry as delivered.
  Complete { id: String },
  /// Confirm, as recipient, that a package arrived.
  Confirm { id: String },
  /// Withdraw a package you posted.
  Delete { id: String },
  /// Packages you are carrying.
  Deliveries,
  /// Pull the latest statuses from the relays into the cache.
  Refresh,
  /// Heal cached statuses without contacting the relays.
  Verify,
  /// Show a profile (yours by default).
  Profile { pubkey: Option<String> },
  /// Publish profile metadata.
  SetProfile {
    #[arg(long)]
    name:         Option<String>,
    #[arg(long)]
    display_name: Option<String>,
    #[arg(long)]
    picture:      Option<String>,
    #[arg(long)]
    about:        Option<String>,
  },
  /// Check which relays are reachable.
  Relays,
  /// Print this identity's public key.
  Whoami,
  /// Print a fresh key pair without storing it.
  Keygen,
  /// Write the cached packages as JSON to a file, or stdout.
  Export { path: Option<PathBuf> },
  /// Merge packages from an exported JSON file.
  Import { path: PathBuf },
}

// ─── Setup ────────────────────────────────────────────────────────────────────

/// The configured key, else the one stored in the cache, else a new one
/// that is stored for next time.
async fn load_signer(cfg: &AppConfig, kv: &SqliteKv) -> Result<KeySigner> {
  if let Some(secret) = &cfg.secret_key {
    return KeySigner::from_hex(secret).context("invalid secret_key in config");
  }
  let stored = kv
    .get(SECRET_KEY_KEY.to_string())
    .await
    .context("failed to read stored key")?;
  if let Some(secret) = stored {
    return KeySigner::from_hex(&secret).context("stored key is invalid");
  }

  let signer = KeySigner::generate();
  kv.set(SECRET_KEY_KEY.to_string(), signer.secret_hex())
    .await
    .context("failed to persist generated key")?;
  tracing::info!(pubkey = signer.pubkey(), "generated new identity");
  Ok(signer)
}

async fn open_market(cfg: &AppConfig) -> Result<Market> {
  if let Some(parent) = cfg.cache_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let kv = SqliteKv::open(&cfg.cache_path)
    .await
    .with_context(|| format!("failed to open cache at {}", cfg.cache_path.display()))?;
  let signer = load_signer(cfg, &kv).await?;

  let relays = cfg.relays.iter().map(WsRelay::new).collect();
  let market_config = MarketConfig { fallback_after: cfg.fallback_after(), ..Default::default() };
  Marketplace::with_relays(
    kv,
    relays,
    EventLogConfig::default(),
    signer,
    Arc::new(SystemClock),
    market_config,
  )
  .context("failed to build marketplace")
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  match cli.command {
    Command::Keygen => keygen(),
    command => {
      let cfg = AppConfig::load(&cli.config)?;
      let market = open_market(&cfg).await?;
      run(command, market, &cfg).await?;
    }
  }
  Ok(())
}

fn keygen() {
  let signer = KeySigner::generate();
  println!("secret: {}", signer.secret_hex());
  println!("pubkey: {}", signer.pubkey());
}

async fn run(command: Command, market: Market, cfg: &AppConfig) -> Result<()> {
  match command {
    Command::Serve => serve(market, cfg).await?,
    Command::Post { title, from, to, cost, description } => {
      let input = NewPackage {
        title,
        pickup_location: from,
        destination: to,
        cost,
        description,
      };
      let created = market.create_package(input).await?;
      output::transition("posted", &created, market.now());
    }
    Command::List => {
      let packages = market.get_packages().await?;
      output::package_table(&packages, market.now());
    }
    Command::Show { id } => {
      let package = market
        .get_package_by_id(&id)
        .await?
        .with_context(|| format!("package {id} not found"))?;
      output::package_detail(&package, market.now());
    }
    Command::Pickup { id } => {
      let picked = market.pickup_package(&id).await?;
      output::transition("picked up", &picked, market.now());
    }
    Command::Complete { id } => {
      let done = market.complete_delivery(&id).await?;
      output::transition("delivered", &done, market.now());
    }
    Command::Confirm { id } => {
      let done = market.confirm_delivery(&id).await?;
      output::transition("confirmed", &done, market.now());
    }
    Command::Delete { id } => {
      let outcomes = market.delete_package(&id).await?;
      println!("deleted {id}");
      output::outcomes(&outcomes);
    }
    Command::Deliveries => {
      let packages = market.get_my_deliveries().await?;
      output::package_table(&packages, market.now());
    }
    Command::Refresh => {
      let report = market.force_status_refresh().await?;
      println!(
        "checked {}, {} with updates, healed {} records",
        report.checked,
        report.updated,
        report.healed.total()
      );
    }
    Command::Verify => {
      let healed = market.verify_package_statuses().await?;
      println!("healed {} packages, {} deliveries", healed.packages, healed.deliveries);
    }
    Command::Profile { pubkey } => {
      let profile = market.get_profile(pubkey.as_deref()).await?;
      output::profile(&profile);
    }
    Command::SetProfile { name, display_name, picture, about } => {
      let meta = ProfileMetadata { name, display_name, picture, about, ..Default::default() };
      let outcomes = market.update_profile(meta).await?;
      output::outcomes(&outcomes);
    }
    Command::Relays => output::relays(&market.relay_status().await),
    Command::Whoami => println!("{}", market.pubkey()),
    Command::Keygen => keygen(),
    Command::Export { path } => {
      let packages = market.export_packages().await?;
      let json = serde_json::to_string_pretty(&packages)?;
      match path {
        Some(path) => {
          std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
          println!("exported {} packages", packages.len());
        }
        None => println!("{json}"),
      }
    }
    Command::Import { path } => {
      let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
      let packages = serde_json::from_str(&raw).context("not an exported package list")?;
      let added = market.import_packages(packages).await?;
      println!("imported {added} packages");
    }
  }
  Ok(())
}

async fn serve(market: Market, cfg: &AppConfig) -> Result<()> {
  let market = Arc::new(market);
  let mut refresh = spawn_periodic_refresh(market.clone(), cfg.refresh_interval());

  let app = axum::Router::new().nest("/api", atob_api::api_router(market.clone()));
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!(pubkey = market.pubkey(), "Listening on http://{address}/api");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("server error")?;

  refresh.cancel();
  if let Some(report) = refresh.join().await {
    tracing::info!(checked = report.checked, "last refresh before shutdown");
  }
  Ok(())
}
