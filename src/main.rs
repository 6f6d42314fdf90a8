use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use wordstats::fetch::{DEFAULT_NORTH_URL, DEFAULT_SOUTH_URL};
use wordstats::{AppState, Fetcher, NextbusUrls, PersistentStore, UserRegistry, router};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_DB_PATH: &str = "WordStats.db";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_RANKING_DISPLAY: usize = 3;
const DEFAULT_FETCH_WORKERS: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config();
    info!("binding to {}:{}", config.host, config.port);
    info!("using word stats file at {}", config.db_path.display());
    info!("flushing every {} s", config.flush_interval.as_secs());
    if config.ignore_queries {
        info!("ignoring messages that are bot commands");
    }

    let start = Instant::now();
    let persistent = Arc::new(PersistentStore::open(&config.db_path)?);
    info!("store loaded in {} ms", start.elapsed().as_millis());

    let state = AppState::new(
        Arc::clone(&persistent),
        Arc::new(UserRegistry::new()),
        Fetcher::new(config.fetch_workers),
        NextbusUrls {
            north: config.north_url.clone(),
            south: config.south_url.clone(),
        },
        config.ranking_display,
        config.ignore_queries,
    );

    let flusher = tokio::spawn(flush_periodically(
        Arc::clone(&persistent),
        config.flush_interval,
    ));

    let app = router(state).layer(TraceLayer::new_for_http());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    flusher.abort();
    tokio::task::spawn_blocking(move || persistent.close()).await??;
    Ok(())
}

async fn flush_periodically(persistent: Arc<PersistentStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let target = Arc::clone(&persistent);
        match tokio::task::spawn_blocking(move || target.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("periodic flush failed: {e}"),
            Err(e) => warn!("periodic flush task failed: {e}"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[derive(Debug, Clone)]
struct Config {
    host: String,
    port: u16,
    db_path: PathBuf,
    flush_interval: Duration,
    ranking_display: usize,
    ignore_queries: bool,
    fetch_workers: usize,
    north_url: String,
    south_url: String,
}

fn load_config() -> Config {
    let mut cli_db: Option<PathBuf> = None;
    let mut cli_ignore_queries = false;
    let mut args = env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ignore-queries" => cli_ignore_queries = true,
            "--db" => {
                if let Some(path) = args.next() {
                    cli_db = Some(PathBuf::from(path));
                }
            }
            _ => {
                if let Some(path) = arg.strip_prefix("--db=") {
                    cli_db = Some(PathBuf::from(path));
                }
            }
        }
    }

    let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let db_path = cli_db
        .or_else(|| env::var("WORDSTATS_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let flush_interval = env::var("FLUSH_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS));
    let ranking_display = env::var("RANKING_DISPLAY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RANKING_DISPLAY);
    let ignore_queries = cli_ignore_queries
        || env::var("IGNORE_QUERIES")
            .ok()
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(false);
    let fetch_workers = env::var("FETCH_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_FETCH_WORKERS);
    let north_url =
        env::var("NEXTBUS_NORTH_URL").unwrap_or_else(|_| DEFAULT_NORTH_URL.to_string());
    let south_url =
        env::var("NEXTBUS_SOUTH_URL").unwrap_or_else(|_| DEFAULT_SOUTH_URL.to_string());

    Config {
        host,
        port,
        db_path,
        flush_interval,
        ranking_display,
        ignore_queries,
        fetch_workers,
        north_url,
        south_url,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let max_level = env_filter
        .max_level_hint()
        .and_then(|hint| hint.into_level())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_max_level(max_level)
        .init();
}
