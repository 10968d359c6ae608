use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::{CartError, CartResult};
use crate::storage::codec;
use crate::storage::fs::sync_directory;
use crate::types::{Count, IndexKind, Key, Multiset};

/// Name of the single database ("bucket") held by every shard environment.
pub(crate) const BUCKET_NAME: &str = "cart";

const DATA_FILE: &str = "data.mdb";

/// One LMDB environment holding the entries of a single shard of one index.
pub struct ShardStore {
    index: IndexKind,
    shard: usize,
    path: PathBuf,
    env: Env,
    bucket: Database<Bytes, Bytes>,
}

impl ShardStore {
    /// Opens the shard environment at `path`, creating it and its bucket when missing.
    pub(crate) fn open(
        index: IndexKind,
        shard: usize,
        path: &Path,
        map_size: usize,
    ) -> CartResult<Self> {
        let created = !path.exists();
        std::fs::create_dir_all(path)?;
        if created {
            if let Some(parent) = path.parent() {
                sync_directory(parent)?;
            }
        }

        let mut options = EnvOpenOptions::new();
        options.map_size(map_size);
        options.max_dbs(1);

        let env = unsafe {
            match options.open(path) {
                Ok(env) => env,
                Err(HeedError::BadOpenOptions { env, .. }) => env,
                Err(err) => {
                    tracing::error!(
                        %index,
                        shard,
                        path = ?path,
                        map_size,
                        ?err,
                        "Failed to open shard environment"
                    );
                    return Err(err.into());
                }
            }
        };

        let existing = {
            let txn = env.read_txn()?;
            let bucket = env.open_database::<Bytes, Bytes>(&txn, Some(BUCKET_NAME))?;
            txn.commit()?;
            bucket
        };

        let bucket = match existing {
            Some(bucket) => bucket,
            None => {
                let mut txn = env.write_txn()?;
                let bucket = env.create_database::<Bytes, Bytes>(&mut txn, Some(BUCKET_NAME))?;
                txn.commit()?;
                bucket
            }
        };

        Ok(Self {
            index,
            shard,
            path: path.to_path_buf(),
            env,
            bucket,
        })
    }

    /// Whether a shard environment was ever created at `path`.
    pub(crate) fn exists(path: &Path) -> bool {
        path.join(DATA_FILE).is_file()
    }

    pub fn index(&self) -> IndexKind {
        self.index
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `visitor` on the decoded entry for `key`; `None` when the key is absent.
    pub fn observe<R, F>(&self, key: Key, visitor: F) -> CartResult<Option<R>>
    where
        F: FnOnce(&Multiset) -> CartResult<R>,
    {
        let txn = self.env.read_txn()?;
        let encoded_key = codec::encode_key(key);
        let Some(bytes) = self.bucket.get(&txn, encoded_key.as_slice())? else {
            return Ok(None);
        };
        let set = codec::decode_multiset(self.index, bytes)?;
        visitor(&set).map(Some)
    }

    /// Count of `peer` inside the entry for `key`, zero when either is absent.
    pub fn count(&self, key: Key, peer: Key) -> CartResult<Count> {
        Ok(self.observe(key, |set| Ok(set.get(peer)))?.unwrap_or(0))
    }

    /// Read-modify-write of the entry for `key` inside one write transaction.
    ///
    /// An absent entry starts empty. When `mutator` fails the transaction is
    /// dropped and nothing is written. An entry left empty is deleted. Returns
    /// the count of `peer` after the mutation.
    pub fn change<F>(&self, key: Key, peer: Key, mutator: F) -> CartResult<Count>
    where
        F: FnOnce(&mut Multiset, Key) -> CartResult<()>,
    {
        let mut txn = self.env.write_txn()?;
        let encoded_key = codec::encode_key(key);

        let mut set = match self.bucket.get(&txn, encoded_key.as_slice())? {
            Some(bytes) => codec::decode_multiset(self.index, bytes)?,
            None => Multiset::new(),
        };

        mutator(&mut set, peer).map_err(|err| match err {
            CartError::NotInCart { peer, .. } => CartError::NotInCart { key, peer },
            CartError::CountOverflow { peer, .. } => CartError::CountOverflow { key, peer },
            other => other,
        })?;

        if set.is_empty() {
            self.bucket.delete(&mut txn, encoded_key.as_slice())?;
        } else {
            let encoded = codec::encode_multiset(&set)?;
            self.bucket
                .put(&mut txn, encoded_key.as_slice(), encoded.as_slice())?;
        }
        txn.commit()?;

        Ok(set.get(peer))
    }

    /// Visits every entry in key order.
    pub fn scan<F>(&self, mut visitor: F) -> CartResult<usize>
    where
        F: FnMut(Key, &Multiset),
    {
        let txn = self.env.read_txn()?;
        let mut visited = 0;
        for result in self.bucket.iter(&txn)? {
            let (raw_key, raw_value) = result?;
            let key = codec::decode_key(self.index, raw_key)?;
            let set = codec::decode_multiset(self.index, raw_value)?;
            visitor(key, &set);
            visited += 1;
        }
        Ok(visited)
    }

    /// Flushes the environment to disk and closes it.
    pub(crate) fn close(self) -> CartResult<()> {
        self.env.force_sync()?;
        self.env.prepare_for_closing().wait();
        tracing::debug!(index = %self.index, shard = self.shard, "closed shard store");
        Ok(())
    }
}
