//! Hookbook - encrypted limit-order position reconciler
//!
//! Usage:
//!   hookbook positions --user 0x… [--pool 0x…] [--all] [--json]
//!   hookbook check-claims --user 0x… [--pool 0x…] [--json]
//!   hookbook pools
//!   hookbook serve [--port 8080]
//!
//! Environment:
//!   HOOKBOOK_RPC_URL - JSON-RPC endpoint (required)
//!   HOOKBOOK_CONFIG - Path to TOML config with pool definitions
//!   HOOKBOOK_UNSEAL_URL - Unseal bridge (optional)
//!   RUST_LOG - Log filter (default: hookbook_backend=info,tower_http=info)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookbook_backend::{
    api::{create_router, AppState},
    cache::TtlCache,
    chain::RpcClient,
    config::AppConfig,
    errors::ErrorReport,
    fhe::HttpUnsealer,
    models::{Pool, PoolPositions, Position},
    pools::{PoolRegistry, TokenMetadataStore},
    positions::{ClaimReport, PositionReconciler},
};

#[derive(Parser, Debug)]
#[command(name = "hookbook")]
#[command(about = "Reconcile encrypted limit-order positions from hook event logs")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "HOOKBOOK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a user's positions
    Positions {
        /// Wallet address
        #[arg(short, long)]
        user: String,
        /// Restrict to one pool id
        #[arg(short, long)]
        pool: Option<String>,
        /// Include inactive positions
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Dump Deposit/BucketFilled/Claim events and claimability
    CheckClaims {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        pool: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show configured pools with token metadata
    Pools,
    /// Serve the read-only HTTP API
    Serve {
        /// Listen port (defaults to config / HOOKBOOK_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let config = AppConfig::load(args.config.as_deref())?;
    let violations = config.validate();
    if !violations.is_empty() {
        for v in &violations {
            warn!("Config violation: {}", v);
        }
        anyhow::bail!("invalid configuration ({} violations)", violations.len());
    }

    let rpc = Arc::new(RpcClient::new(config.rpc_url.clone(), config.request_timeout())?);
    let registry = PoolRegistry::from_pools(config.pools.clone())?;

    info!(
        rpc_url = %rpc.rpc_url(),
        chain_id = config.chain_id,
        pools = registry.len(),
        "Hookbook starting"
    );

    match args.command {
        Command::Positions {
            user,
            pool,
            all,
            json,
        } => {
            let reconciler = build_reconciler(&config, rpc, Some(&user))?;
            let pools = select_pools(&registry, pool.as_deref())?;
            let results = reconciler.fetch_all_positions(&user, &pools).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_positions(&results, all);
            }
        }
        Command::CheckClaims { user, pool, json } => {
            let reconciler = build_reconciler(&config, rpc, Some(&user))?;
            let pools = select_pools(&registry, pool.as_deref())?;
            for pool in &pools {
                match reconciler.claim_report(&user, pool).await {
                    Ok(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
                    Ok(report) => print_claim_report(&report),
                    Err(e) => {
                        let report = ErrorReport::from_error(&e);
                        println!(
                            "Pool {}: {} ({})",
                            pool.pool_id,
                            report.message,
                            report.category.as_str()
                        );
                    }
                }
            }
        }
        Command::Pools => {
            let tokens = TokenMetadataStore::new(rpc, Duration::from_secs(config.pool_cache_ttl_secs));
            for pool in registry.all() {
                let summary = tokens.summarize(pool).await;
                println!(
                    "{}  {}/{}  hook {}",
                    summary.pool.pool_id,
                    summary.token0_meta.symbol,
                    summary.token1_meta.symbol,
                    summary.pool.hook
                );
            }
        }
        Command::Serve { port } => {
            // Unseal permits are per account, so the shared API reports handles only.
            let reconciler = build_reconciler(&config, rpc.clone(), None)?;
            let state = AppState {
                reconciler: Arc::new(reconciler),
                pools: Arc::new(registry),
                tokens: Arc::new(TokenMetadataStore::new(
                    rpc,
                    Duration::from_secs(config.pool_cache_ttl_secs),
                )),
                positions_cache: Arc::new(TtlCache::new(Duration::from_secs(
                    config.positions_cache_ttl_secs,
                ))),
            };

            spawn_cache_janitor(state.positions_cache.clone());

            let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            info!("API listening on http://{}", addr);

            axum::serve(listener, create_router(state)).await?;
        }
    }

    Ok(())
}

/// Initialize tracing; `--log-level` wins over `RUST_LOG`.
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("hookbook_backend={0},hookbook={0},tower_http={0}", level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "hookbook_backend=info,hookbook=info,tower_http=info".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Reconciler, with the unseal bridge wired in when configured and an
/// account is known.
fn build_reconciler(
    config: &AppConfig,
    rpc: Arc<RpcClient>,
    account: Option<&str>,
) -> Result<PositionReconciler> {
    let reconciler = PositionReconciler::new(rpc, config.reconcile.clone());
    match (&config.unseal.url, account) {
        (Some(url), Some(account)) => {
            let unsealer = HttpUnsealer::new(
                url.clone(),
                config.chain_id,
                account.to_lowercase(),
                config.request_timeout(),
            )?;
            info!(url = %url, "Unseal bridge enabled");
            Ok(reconciler.with_unsealer(Arc::new(unsealer), config.unseal.retry.clone()))
        }
        _ => Ok(reconciler),
    }
}

fn select_pools(registry: &PoolRegistry, pool_id: Option<&str>) -> Result<Vec<Pool>> {
    match pool_id {
        Some(id) => registry
            .get(id)
            .cloned()
            .map(|p| vec![p])
            .ok_or_else(|| anyhow::anyhow!("pool {} is not configured", id)),
        None if registry.is_empty() => anyhow::bail!("no pools configured"),
        None => Ok(registry.all().to_vec()),
    }
}

/// Purge expired snapshots so idle users do not accumulate.
fn spawn_cache_janitor(cache: Arc<TtlCache<String, Vec<PoolPositions>>>) {
    let period = cache.ttl().max(Duration::from_secs(1)) * 4;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired position snapshots");
            }
        }
    });
}

fn position_row(p: &Position) -> String {
    format!(
        "  {:>8}  {:<4}  price {:>14.6}  shares {}  proceeds {}  {}{}",
        p.key.tick,
        p.key.side.as_str(),
        p.price,
        p.shares
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("#{}", short_handle(&p.shares_handle.to_string()))),
        p.realized_proceeds
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("#{}", short_handle(&p.realized_proceeds_handle.to_string()))),
        if p.is_claimable { "CLAIMABLE" } else { "" },
        if p.is_active { "" } else { " (inactive)" },
    )
}

fn short_handle(h: &str) -> String {
    if h.len() > 12 {
        format!("{}…", &h[..12])
    } else {
        h.to_string()
    }
}

fn print_positions(results: &[PoolPositions], include_inactive: bool) {
    for pool in results {
        println!(
            "Pool {} (blocks {}..={})",
            pool.pool_id, pool.from_block, pool.to_block
        );
        if let Some(err) = &pool.error {
            println!("  error: {}", err);
            continue;
        }
        let shown: Vec<&Position> = pool
            .positions
            .iter()
            .filter(|p| include_inactive || p.is_active)
            .collect();
        if shown.is_empty() {
            println!("  no positions");
        }
        for p in shown {
            println!("{}", position_row(p));
        }
        if pool.skipped > 0 {
            println!("  {} position(s) skipped after read failures", pool.skipped);
        }
    }
}

fn print_claim_report(report: &ClaimReport) {
    println!(
        "Pool {}  user {}  blocks {}..={}",
        report.pool_id, report.user, report.from_block, report.to_block
    );
    println!("  deposits: {}", report.history.deposits.len());
    for d in &report.history.deposits {
        println!("    block {:>10}  {}", d.ordinal.block_number, d.key);
    }
    println!("  fills: {}", report.history.fills.len());
    for f in &report.history.fills {
        println!("    block {:>10}  {}", f.ordinal.block_number, f.key);
    }
    println!("  claims: {}", report.history.claims.len());
    for c in &report.history.claims {
        println!("    block {:>10}  {}", c.ordinal.block_number, c.key);
    }
    if report.history.malformed > 0 {
        println!("  malformed logs skipped: {}", report.history.malformed);
    }
    println!("  positions:");
    for p in &report.positions {
        println!(
            "{}  filled={} claimed_after_fill={}",
            position_row(p),
            p.bucket_filled,
            p.claimed_after_fill
        );
    }
    for s in &report.skipped {
        println!("    {} skipped: {} ({})", s.key, s.error.message, s.error.category.as_str());
    }
    println!("  claimable: {}", report.claimable().count());
}
