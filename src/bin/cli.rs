use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing::subscriber as tracing_subscriber_global;
use anyhow::{Result, Context};
use playlist_sync_engine as lib;
use lib::api::{mock::MockPlaylistService, spotify::SpotifyPlaylistService, PlaylistService};
use lib::api::oauth::OAuthClient;
use lib::config::Config;
use lib::credentials::{CredentialManager, SqliteCredentialStore};
use lib::models::{PlaylistEntry, SelectedPlaylist};
use lib::{PlaylistError, PlaylistSynchronizer, SyncOptions};

#[derive(Parser)]
#[command(name = "playlist-sync", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use an in-memory playlist service seeded with a small demo catalog
    /// instead of the remote API
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize against the remote service and store the credential (interactive)
    Auth,
    /// Point the deployment at a playlist
    Select {
        playlist_id: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Show credential and playlist status
    Status,
    /// Search the remote catalog
    Search { query: String },
    /// Add a track (by id) to the selected playlist
    Add { track_id: String },
    /// Remove one or more tracks (by id) from the selected playlist
    Remove {
        #[arg(required = true)]
        track_ids: Vec<String>,
    },
    /// Keep the selected playlist in sync and print every change (long-running)
    Watch,
    /// Delete the stored credential and clear the selected playlist
    Disconnect,
    /// Validate config file and exit
    ConfigValidate,
}

fn resolve_config_path(explicit: &Option<PathBuf>) -> PathBuf {
    if let Some(p) = explicit {
        return p.clone();
    }
    let etc_path = Path::new("/etc/playlist-sync/config.toml");
    if etc_path.exists() {
        return etc_path.to_path_buf();
    }
    if let Some(user) = dirs::config_dir().map(|d| d.join("playlist-sync").join("config.toml")) {
        if user.exists() {
            return user;
        }
    }
    PathBuf::from("config/example-config.toml")
}

fn print_entries(entries: &[PlaylistEntry]) {
    println!("--- {} track(s) ---", entries.len());
    for (i, e) in entries.iter().enumerate() {
        println!(
            "{:>3}. {} - {} [{}]",
            i + 1,
            e.track.artist_line(),
            e.track.name,
            e.track.id
        );
    }
}

fn report(e: &PlaylistError) {
    eprintln!("{}", e.user_message());
    eprintln!("  kind: {}  retryable: {}  action: {:?}", e.kind, e.retryable(), e.action());
    eprintln!("  detail: {}", e.message);
}

struct Runtime {
    credentials: Arc<CredentialManager>,
    service: Arc<dyn PlaylistService>,
    sync: PlaylistSynchronizer,
}

fn build_runtime(cfg: &Config, offline: bool) -> Runtime {
    let store = Arc::new(SqliteCredentialStore::new(cfg.db_path.clone()));
    let credentials = Arc::new(CredentialManager::new(
        store,
        OAuthClient::from_config(cfg),
        cfg.refresh_margin(),
    ));
    let service: Arc<dyn PlaylistService> = if offline {
        Arc::new(MockPlaylistService::demo(cfg.remove_batch_size))
    } else {
        Arc::new(SpotifyPlaylistService::from_config(cfg, credentials.clone()))
    };
    let sync = PlaylistSynchronizer::new(service.clone(), SyncOptions::from_config(cfg));
    Runtime { credentials, service, sync }
}

async fn run_command(cmd: Commands, cfg: &Config, config_path: &Path, rt: &Runtime) -> Result<()> {
    match cmd {
        Commands::Auth => {
            lib::api::authorize::run_interactive_auth(&rt.credentials).await?;
        }
        Commands::Select { playlist_id, name } => {
            let db_path = cfg.db_path.clone();
            let selected = SelectedPlaylist { playlist_id, name };
            let saved = selected.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let conn = lib::db::open_or_create(&db_path)
                    .with_context(|| format!("opening DB at {}", db_path.display()))?;
                lib::db::save_selected_playlist(&conn, &saved)
            })
            .await??;
            println!("Selected playlist {} ({})", selected.playlist_id, selected.name);
        }
        Commands::Status => {
            match rt.credentials.get_valid_credential().await? {
                Some(c) => println!("Credential {} valid until {}", c.id, c.expires_at),
                None => println!("Not authorized (run `auth`)"),
            }
            let selected = rt.sync.load_selected(&cfg.db_path).await?;
            println!(
                "Playlist {} ({}) at snapshot {}",
                selected.playlist_id,
                selected.name,
                rt.sync.snapshot_id().unwrap_or_default()
            );
            print_entries(&rt.sync.tracks());
        }
        Commands::Search { query } => {
            let found = rt.service.search_tracks(&query).await?;
            for t in found {
                println!("{}  {} - {}  ({})", t.id, t.artist_line(), t.name, t.uri);
            }
        }
        Commands::Add { track_id } => {
            rt.sync.load_selected(&cfg.db_path).await?;
            let snapshot = rt.sync.add_by_id(&track_id).await?;
            println!("Added {} (snapshot {})", track_id, snapshot);
        }
        Commands::Remove { track_ids } => {
            rt.sync.load_selected(&cfg.db_path).await?;
            let snapshot = rt.sync.bulk_remove(&track_ids).await?;
            println!("Removed {} track(s) (snapshot {})", track_ids.len(), snapshot);
        }
        Commands::Watch => {
            let selected = rt.sync.load_selected(&cfg.db_path).await?;
            println!("Watching {} ({}); Ctrl-C to stop", selected.name, selected.playlist_id);
            let sub = rt.sync.subscribe(print_entries);
            tokio::signal::ctrl_c().await?;
            sub.unsubscribe();
        }
        Commands::Disconnect => {
            let had = rt.credentials.disconnect().await?;
            let db_path = cfg.db_path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let conn = lib::db::open_or_create(&db_path)?;
                lib::db::clear_selected_playlist(&conn)
            })
            .await??;
            println!("{}", if had { "Disconnected." } else { "No credential was stored." });
        }
        Commands::ConfigValidate => {
            match Config::from_path(config_path) {
                Ok(_) => println!("OK"),
                Err(e) => {
                    eprintln!("Config validation failed: {}", e);
                    std::process::exit(2);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let resolved_config_path = resolve_config_path(&cli.config);

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stderr and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&cfg.log_dir, "playlist-sync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking);
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    // LogTracer is already installed, so set the subscriber directly.
    tracing_subscriber_global::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let rt = build_runtime(&cfg, cli.offline);
    let result = run_command(cli.command, &cfg, &resolved_config_path, &rt).await;
    rt.sync.teardown();

    if let Err(e) = result {
        match e.downcast_ref::<PlaylistError>() {
            Some(pe) => {
                report(pe);
                std::process::exit(1);
            }
            None => return Err(e),
        }
    }
    Ok(())
}
