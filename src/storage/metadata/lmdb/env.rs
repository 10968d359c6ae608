use std::path::Path;

use heed::byteorder::BigEndian;
use heed::types::{Bytes, SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::CartResult;
use crate::storage::metadata::Intent;

pub(super) const DEFAULT_MAP_SIZE: usize = 16 << 20;

pub(super) struct EnvHandles {
    pub(super) env: Env,
    pub(super) config_db: Database<Str, Bytes>,
    pub(super) intents_db: Database<U64<BigEndian>, SerdeBincode<Intent>>,
}

pub(super) fn open_rw(path: &Path, map_size: usize) -> CartResult<EnvHandles> {
    std::fs::create_dir_all(path)?;

    let mut options = EnvOpenOptions::new();
    options.map_size(map_size);
    options.max_dbs(4);

    let env = unsafe {
        match options.open(path) {
            Ok(env) => env,
            Err(HeedError::BadOpenOptions { env, .. }) => env,
            Err(err) => {
                tracing::error!(
                    path = ?path,
                    map_size,
                    ?err,
                    "Failed to open LMDB metadata environment"
                );
                return Err(err.into());
            }
        }
    };

    let existing_dbs = match env.read_txn() {
        Ok(txn) => {
            let config_db = env.open_database::<Str, Bytes>(&txn, Some("config"))?;
            let intents_db = env
                .open_database::<U64<BigEndian>, SerdeBincode<Intent>>(&txn, Some("intents"))?;
            if let (Some(config_db), Some(intents_db)) = (config_db, intents_db) {
                txn.commit()?;
                Some((config_db, intents_db))
            } else {
                None
            }
        }
        Err(err) => {
            tracing::warn!(
                path = ?path,
                ?err,
                "Failed to open read txn when probing metadata databases; will attempt creation"
            );
            None
        }
    };

    let (config_db, intents_db) = if let Some(dbs) = existing_dbs {
        dbs
    } else {
        let mut txn = env.write_txn()?;
        let config_db = env.create_database::<Str, Bytes>(&mut txn, Some("config"))?;
        let intents_db = env
            .create_database::<U64<BigEndian>, SerdeBincode<Intent>>(&mut txn, Some("intents"))?;
        txn.commit()?;
        (config_db, intents_db)
    };

    Ok(EnvHandles {
        env,
        config_db,
        intents_db,
    })
}
