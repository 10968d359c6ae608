//! `cartd`: serves a cart store over the line protocol until interrupted.

use std::io::IsTerminal;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use cartstore::net::{CartServer, ServerConfig, DEFAULT_BIND_ADDRESS};
use cartstore::{CartStoreFacade, StoreConfig};

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SHARD_MAP_MIB: usize = 64;
const DEFAULT_MAX_CONNECTIONS: usize = 512;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Parser, Debug, Default)]
#[command(name = "cartd", version, about = "Sharded customer/item cart store")]
struct Args {
    /// TOML file with daemon settings; flags given here take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding shards, metadata and the lock file [default: ./data]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address [default: 0.0.0.0:8097]
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Shards per index; defaults to the recorded layout, or 1024 for a new store
    #[arg(long)]
    shards: Option<usize>,

    /// LMDB map size of each shard, in MiB [default: 64]
    #[arg(long)]
    shard_map_mib: Option<usize>,

    /// [default: 512]
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds a client may stay silent before it is disconnected [default: 60]
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Wipe all stored carts before starting
    #[arg(long)]
    flush: bool,
}

/// Contents of the `--config` file. Every key is optional.
///
/// ```toml
/// bind-address = "127.0.0.1"
/// port = 8097
/// data-dir = "/var/lib/cartd"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct FileConfig {
    bind_address: Option<IpAddr>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    shards: Option<usize>,
    shard_map_mib: Option<usize>,
    max_connections: Option<usize>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
enum ConfigFileError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective daemon settings: flag, then config file, then built-in default.
#[derive(Debug, PartialEq)]
struct Settings {
    data_dir: PathBuf,
    bind: SocketAddr,
    shards: Option<usize>,
    shard_map_mib: usize,
    max_connections: usize,
    idle_timeout: Duration,
    flush: bool,
}

impl Settings {
    fn resolve(args: Args, file: FileConfig) -> Result<Self, std::net::AddrParseError> {
        let mut bind: SocketAddr = DEFAULT_BIND_ADDRESS.parse()?;
        if let Some(ip) = file.bind_address {
            bind.set_ip(ip);
        }
        if let Some(port) = file.port {
            bind.set_port(port);
        }

        Ok(Self {
            data_dir: args
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            bind: args.bind.unwrap_or(bind),
            shards: args.shards.or(file.shards),
            shard_map_mib: args
                .shard_map_mib
                .or(file.shard_map_mib)
                .unwrap_or(DEFAULT_SHARD_MAP_MIB),
            max_connections: args
                .max_connections
                .or(file.max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            idle_timeout: Duration::from_secs(
                args.idle_timeout_secs
                    .or(file.idle_timeout_secs)
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
            flush: args.flush,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => {
            tracing::info!(?path, "loading config file");
            FileConfig::load(path)?
        }
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(args, file)?;

    let mut config = StoreConfig::new(&settings.data_dir)
        .with_shard_map_size(settings.shard_map_mib << 20)
        .with_flush(settings.flush);
    if let Some(shards) = settings.shards {
        config = config.with_shards_count(shards);
    }

    let store = tokio::task::spawn_blocking(move || CartStoreFacade::new(config)).await??;

    let server_config = ServerConfig::new(settings.bind)
        .with_max_connections(settings.max_connections)
        .with_idle_timeout(settings.idle_timeout);
    let server = CartServer::new(store.clone(), server_config)?;
    let handle = server.handle();

    server
        .run_until_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(?err, "failed to listen for ctrl-c");
            }
        })
        .await?;

    let served = handle.snapshot();
    let applied = store.metrics().snapshot();
    tracing::info!(
        connections = served.total_connections,
        requests = served.total_requests,
        failed = served.failed_requests,
        adds = applied.adds_applied,
        removes = applied.removes_applied,
        "shutting down"
    );

    tokio::task::spawn_blocking(move || store.close()).await??;
    Ok(())
}
