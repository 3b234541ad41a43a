use std::sync::Arc;

use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use userdir::config::{ConfigOverrides, DirectoryConfig, ServerOverrides, StorageOverrides};
use userdir::{server, Backend, Directory};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"userdir_server - user profile directory

USAGE:
    userdir_server [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Path to config file (TOML)
    -l, --listen <ADDR>      Override listen address [default: 127.0.0.1:1001]
    -b, --backend <NAME>     document | document-cache | cache [default: document]
    -d, --data-dir <DIR>     Data directory for the RocksDB backends
        --repair             Repair the RocksDB data directory before opening
    -h, --help               Print help

ENVIRONMENT:
    USERDIR_CONFIG                 Path to config file
    USERDIR_SERVER__LISTEN         Listen address
    USERDIR_STORAGE__BACKEND       Storage backend
    USERDIR_STORAGE__DATA_DIR      Data directory
    RUST_LOG                       Log filter [default: info,userdir=debug]

CONFIG FILE (userdir.toml):
    [server]
    listen = "0.0.0.0:1001"

    [storage]
    backend = "document"
    data_dir = "/var/lib/userdir"
"#
    );
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,userdir=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    init_tracing();

    let mut server_overrides = ServerOverrides::default();
    if let Some(listen) = parse_arg("--listen").or_else(|| parse_arg("-l")) {
        server_overrides.listen = Some(listen.parse()?);
    }

    let mut storage_overrides = StorageOverrides::default();
    if let Some(backend) = parse_arg("--backend").or_else(|| parse_arg("-b")) {
        storage_overrides.backend = Some(backend.parse::<Backend>()?);
    }
    if let Some(data_dir) = parse_arg("--data-dir").or_else(|| parse_arg("-d")) {
        storage_overrides.data_dir = Some(data_dir.into());
    }
    if has_flag("--repair") {
        storage_overrides.repair = Some(true);
    }

    let overrides = ConfigOverrides {
        server: Some(server_overrides),
        storage: Some(storage_overrides),
    };

    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("USERDIR_CONFIG").ok());
    let config = DirectoryConfig::load(config_path.as_deref(), overrides)?;

    let directory = Arc::new(Directory::open(&config)?);
    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!(listen = %listener.local_addr()?, backend = ?config.storage.backend, "userdir listening");

    axum::serve(listener, server::router(Arc::clone(&directory)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    directory.close().await?;
    info!("userdir stopped");
    Ok(())
}
