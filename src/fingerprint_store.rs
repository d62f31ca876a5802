use std::{
    collections::HashMap,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering::Relaxed},
};

use log::{info, trace, warn};
use parking_lot::RwLock;
use thiserror::Error;

use crate::fingerprinting::file_entry::FileEntry;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Error accessing fingerprint store {path}: {src}")]
    StoreFileIo { src: std::io::Error, path: PathBuf },

    #[error("Key missing from fingerprint store: {0}")]
    KeyMissing(PathBuf),

    #[error("Failed to serialize fingerprint store {path}: {src}")]
    Serialization { src: String, path: PathBuf },

    #[error("Failed to deserialize fingerprint store {path}: {src}")]
    Deserialization { src: String, path: PathBuf },
}

use StoreError::*;

/// Durable collection of [`FileEntry`] records, keyed by path.
///
/// Saved as MessagePack with named fields. Every `save_threshold` modifications the store
/// saves itself. A store file that cannot be read is logged and replaced by an empty store,
/// so losing it only costs the time to resample.
#[derive(Debug)]
pub struct FingerprintStore {
    save_threshold: u32,
    modified_count: AtomicU32,
    store_path: PathBuf,
    entries: RwLock<HashMap<PathBuf, FileEntry>>,
}

impl FingerprintStore {
    pub fn open(save_threshold: u32, store_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store_path = store_path.as_ref().to_path_buf();
        let entries = load_entries(&store_path)?;

        Ok(Self {
            save_threshold: save_threshold.max(1),
            modified_count: AtomicU32::default(),
            store_path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    /// Save if anything has changed since the last save.
    pub fn save(&self) -> StoreResult<()> {
        if self.modified_count.load(Relaxed) > 0 {
            self.modified_count.store(0, Relaxed);
            self.save_inner()
        } else {
            Ok(())
        }
    }

    fn save_inner(&self) -> StoreResult<()> {
        let io_err = |src| StoreFileIo {
            src,
            path: self.store_path.clone(),
        };

        if let Some(parent) = self.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        //save to a temporary file and rename it over the real one, so that being killed
        //while saving cannot lose the store.
        let temp_path = self.store_path.with_extension("tmp");

        let bytes = {
            let entries = self.entries.read();
            info!(
                target: "fingerprint_store",
                "Saving {} entries to {}",
                entries.len(),
                self.store_path.display()
            );
            let mut ordered = entries.values().collect::<Vec<_>>();
            ordered.sort_by(|a, b| a.path.cmp(&b.path));
            rmp_serde::to_vec_named(&ordered).map_err(|e| Serialization {
                src: format!("{e}"),
                path: self.store_path.clone(),
            })?
        };

        let temp_file = std::fs::File::create(&temp_path).map_err(io_err)?;
        let mut buf = BufWriter::new(temp_file);
        std::io::Write::write_all(&mut buf, &bytes).map_err(io_err)?;
        let temp_file = buf.into_inner().map_err(|e| io_err(e.into_error()))?;
        temp_file.sync_all().map_err(io_err)?;

        std::fs::rename(&temp_path, &self.store_path).map_err(io_err)?;
        Ok(())
    }

    pub fn insert(&self, entry: FileEntry) -> StoreResult<()> {
        trace!(target: "fingerprint_store", "Inserting: {}", entry.path.display());
        self.entries.write().insert(entry.path.clone(), entry);
        self.count_modification_and_save_if_necessary()
    }

    pub fn remove(&self, key: impl AsRef<Path>) -> StoreResult<()> {
        trace!(target: "fingerprint_store", "Removing: {}", key.as_ref().display());
        self.entries.write().remove(key.as_ref());
        self.count_modification_and_save_if_necessary()
    }

    fn count_modification_and_save_if_necessary(&self) -> StoreResult<()> {
        let prev_count = self.modified_count.fetch_add(1, Relaxed);
        if prev_count + 1 >= self.save_threshold {
            self.modified_count.store(0, Relaxed);
            self.save_inner()
        } else {
            Ok(())
        }
    }

    pub fn fetch(&self, key: impl AsRef<Path>) -> StoreResult<FileEntry> {
        let key = key.as_ref();
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| KeyMissing(key.to_path_buf()))
    }

    /// The stored entry, but only if the file on disk still has the size and modification
    /// time recorded in it.
    pub fn fetch_if_fresh(&self, key: impl AsRef<Path>) -> Option<FileEntry> {
        let key = key.as_ref();
        let metadata = std::fs::metadata(key).ok()?;
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.matches_fs(&metadata))
            .cloned()
    }

    pub fn contains_key(&self, key: impl AsRef<Path>) -> bool {
        self.entries.read().contains_key(key.as_ref())
    }

    pub fn keys(&self) -> Vec<PathBuf> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_entries(store_path: &Path) -> StoreResult<HashMap<PathBuf, FileEntry>> {
    if !store_path.exists() {
        info!(
            target: "fingerprint_store",
            "Creating new fingerprint store: {}",
            store_path.display()
        );
        return Ok(HashMap::new());
    }

    let file = std::fs::File::open(store_path).map_err(|src| StoreFileIo {
        src,
        path: store_path.to_path_buf(),
    })?;

    let entries: Vec<FileEntry> = match rmp_serde::from_read(BufReader::new(file)) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                target: "fingerprint_store",
                "Discarding unreadable fingerprint store {}: {e}",
                store_path.display()
            );
            return Ok(HashMap::new());
        }
    };

    trace!(
        target: "fingerprint_store",
        "Loaded {} entries from {}",
        entries.len(),
        store_path.display()
    );

    Ok(entries
        .into_iter()
        .map(|entry| (entry.path.clone(), entry))
        .collect())
}
