use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use cartstore::{CartResult, CartStoreFacade, StoreConfig};
use tempfile::{Builder, TempDir};

const POLL_INTERVAL: Duration = Duration::from_micros(200);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn testdata_root() -> PathBuf {
    let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
    fs::create_dir_all(&workspace_tmp).unwrap();
    workspace_tmp
}

pub struct StoreHarness {
    #[allow(unused)]
    tempdir: TempDir,
    data_dir: PathBuf,
    config: StoreConfig,
}

impl StoreHarness {
    pub fn builder(name: &str) -> StoreHarnessBuilder {
        StoreHarnessBuilder::new(name)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> StoreConfig {
        self.config.clone()
    }

    pub fn open(&self) -> CartResult<CartStoreFacade> {
        CartStoreFacade::new(self.config.clone())
    }

    /// Opens again without pinning the shard count.
    pub fn reopen(&self) -> CartResult<CartStoreFacade> {
        let config = StoreConfig::new(&self.data_dir)
            .with_shard_map_size(self.config.shard_map_size)
            .with_metadata_map_size(self.config.metadata_map_size);
        CartStoreFacade::new(config)
    }
}

pub struct StoreHarnessBuilder {
    tempdir: TempDir,
    shards_count: usize,
}

impl StoreHarnessBuilder {
    pub fn new(name: &str) -> Self {
        let base = testdata_root();
        let tempdir = Builder::new()
            .prefix(&format!("e2e-{name}-"))
            .tempdir_in(base)
            .expect("failed to create tempdir");

        Self {
            tempdir,
            shards_count: 16,
        }
    }

    pub fn shards_count(mut self, shards_count: usize) -> Self {
        self.shards_count = shards_count;
        self
    }

    pub fn build(self) -> StoreHarness {
        let data_dir = self.tempdir.path().to_path_buf();
        let config = StoreConfig::new(&data_dir)
            .with_shards_count(self.shards_count)
            .with_shard_map_size(1 << 20)
            .with_metadata_map_size(1 << 20);

        StoreHarness {
            tempdir: self.tempdir,
            data_dir,
            config,
        }
    }
}

/// Repeats `op` while it reports a busy shard. Returns the attempts it took.
pub fn retry_unavailable<F>(mut op: F, timeout: Duration) -> CartResult<usize>
where
    F: FnMut() -> CartResult<()>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op() {
            Ok(()) => return Ok(attempts),
            Err(err) if err.is_retryable() => {
                if Instant::now() >= deadline {
                    panic!("shard still busy after {attempts} attempts");
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }
}
