use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use q2::cast::CastManager;
use q2::cli::{Args, Command};
use q2::config::{self, Config, Layout};
use q2::db::{migrate, migrations, Db};
use q2::ffmpeg::Manager;
use q2::http::{build_router, state::AppState};
use q2::playlist::PlaylistStore;
use q2::refresh::RefreshQueue;
use q2::scanner;
use q2::paths;
use q2::sql_params;

/// Set once the first Ctrl+C is received. A second Ctrl+C force-exits.
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

async fn wait_for_shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    if SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
        eprintln!("\nq2: forced exit");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let file_config = config::find_config_file(args.config.as_deref()).and_then(|path| {
        match config::load_config(&path) {
            Ok(cfg) => {
                tracing::debug!("loaded config from {}", path.display());
                Some(cfg)
            }
            Err(e) => {
                tracing::warn!("failed to parse config file: {e}");
                None
            }
        }
    });

    if let Err(e) = run(args, file_config).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args, file_config: Option<config::FileConfig>) -> anyhow::Result<()> {
    match args.command {
        Command::Addfolder { folder } => {
            let config = Config::resolve(file_config, None, args.base_dir);
            let db = init_db(&config.layout).await?;
            add_folder(&folder, &db).await
        }
        Command::Removefolder { folder } => {
            let config = Config::resolve(file_config, None, args.base_dir);
            let db = init_db(&config.layout).await?;
            remove_folder(&folder, &db).await
        }
        Command::Listfolders => {
            let config = Config::resolve(file_config, None, args.base_dir);
            let db = init_db(&config.layout).await?;
            list_folders(&db).await
        }
        Command::Scan { folder } => {
            let config = Config::resolve(file_config, None, args.base_dir);
            let db = init_db(&config.layout).await?;
            scan_folder(&folder, db, &config.layout).await
        }
        Command::Serve { port } => {
            let config = Config::resolve(file_config, port, args.base_dir);
            serve(config).await
        }
    }
}

/// Open the index database and bring the schema up to date. A migration
/// failure is fatal by design.
async fn init_db(layout: &Layout) -> anyhow::Result<Arc<Db>> {
    std::fs::create_dir_all(layout.base())
        .with_context(|| format!("failed to create {}", layout.base().display()))?;

    let db = Arc::new(Db::open(layout.db_path()).context("failed to open database")?);
    migrate::migrate(&db, &migrations::all())
        .await
        .context("failed to run migrations")?;
    Ok(db)
}

async fn add_folder(folder: &str, db: &Db) -> anyhow::Result<()> {
    let Some(cleaned) = paths::clean(folder) else {
        bail!("folder cannot be empty");
    };
    let meta = std::fs::metadata(&cleaned)
        .with_context(|| format!("folder does not exist: {cleaned}"))?;
    if !meta.is_dir() {
        bail!("path is not a directory: {cleaned}");
    }

    let normalized = paths::normalize(&cleaned);
    let result = db
        .write(
            "INSERT OR IGNORE INTO folders (path) VALUES (?1)",
            sql_params![normalized],
        )
        .await?;

    if result.rows_affected == 0 {
        println!("Folder {cleaned} already exists");
    } else {
        println!("Folder {cleaned} added");
    }
    Ok(())
}

async fn remove_folder(folder: &str, db: &Db) -> anyhow::Result<()> {
    let Some(cleaned) = paths::clean(folder) else {
        bail!("folder cannot be empty");
    };
    let normalized = paths::normalize(&cleaned);
    let result = db
        .write("DELETE FROM folders WHERE path = ?1", sql_params![normalized])
        .await?;
    if result.rows_affected == 0 {
        bail!("folder not found: {cleaned}");
    }
    println!("Folder {cleaned} removed");
    Ok(())
}

async fn list_folders(db: &Db) -> anyhow::Result<()> {
    let folders = scanner::monitored_folders(db).await?;
    if folders.is_empty() {
        println!("No folders stored");
        return Ok(());
    }
    for folder in folders {
        println!("{folder}");
    }
    Ok(())
}

async fn scan_folder(folder: &str, db: Arc<Db>, layout: &Layout) -> anyhow::Result<()> {
    let Some(cleaned) = paths::clean(folder) else {
        bail!("folder cannot be empty");
    };
    let meta = std::fs::metadata(&cleaned)
        .with_context(|| format!("folder does not exist: {cleaned}"))?;
    if !meta.is_dir() {
        bail!("path is not a directory: {cleaned}");
    }

    let base_dir = layout.base().to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let (parent, folder_id) = scanner::find_parent_folder_blocking(&db, &cleaned)?
            .with_context(|| format!("path is not within any monitored folder: {cleaned}"))?;
        println!("Scanning {cleaned} (monitored folder: {parent})...");
        Ok(scanner::scan_folder_blocking(&db, &cleaned, folder_id, &base_dir)?)
    })
    .await??;

    println!(
        "Scan complete: {} added, {} updated, {} removed",
        outcome.added, outcome.updated, outcome.removed
    );
    if !outcome.errors.is_empty() {
        println!("{} errors encountered:", outcome.errors.len());
        for e in &outcome.errors {
            println!("  - {e}");
        }
    }
    Ok(())
}

/// Create the managed playlist directory and register it as a root so its
/// contents are indexable and streamable like any other folder.
async fn ensure_playlists_folder(layout: &Layout, db: &Db) -> anyhow::Result<std::path::PathBuf> {
    let dir = layout.playlists_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let absolute = if dir.is_absolute() {
        dir
    } else {
        std::env::current_dir()?.join(dir)
    };

    db.write(
        "INSERT OR IGNORE INTO folders (path) VALUES (?1)",
        sql_params![paths::normalize(&absolute.to_string_lossy())],
    )
    .await?;

    Ok(absolute)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let db = init_db(&config.layout).await?;

    let playlist_dir = ensure_playlists_folder(&config.layout, &db).await?;

    let ffmpeg = Arc::new(Manager::new(config.layout.bin_dir()));
    let cast = Arc::new(CastManager::new(""));
    let refresh = Arc::new(RefreshQueue::new(
        Arc::clone(&db),
        config.layout.clone(),
        Arc::clone(&ffmpeg),
    ));

    let state = AppState {
        db: Arc::clone(&db),
        layout: config.layout.clone(),
        ffmpeg,
        refresh,
        cast,
        playlists: PlaylistStore::new(playlist_dir),
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("q2 listening on port {}", config.port);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_shutdown().await;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());

    // In-flight requests get five seconds to drain.
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!("server error: {e}"),
        Ok(Err(e)) => tracing::error!("server task failed: {e}"),
        Err(_) => tracing::warn!("graceful shutdown timed out"),
    }

    let db_for_close = Arc::clone(&db);
    let _ = tokio::task::spawn_blocking(move || db_for_close.close()).await;

    tracing::info!("shutdown complete");
    Ok(())
}
