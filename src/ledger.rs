//! Delivery ledger: the local record of terminal send outcomes.
//!
//! The ledger is what makes dispatch idempotent. A request id present here
//! is never handed to the native sender again, whatever the backend still
//! reports for it. Every mutation is staged on a copy of the map, written
//! to disk through a temp file + rename, and only then swapped in, so a
//! failed write leaves both the file and the in-memory view untouched.

use crate::error::{RelayError, Result};
use crate::types::{LedgerEntry, RequestId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: Vec<LedgerEntry>,
}

pub struct DeliveryLedger {
    entries: RwLock<IndexMap<RequestId, LedgerEntry>>,
    file_path: Option<PathBuf>,
}

impl DeliveryLedger {
    /// Ledger that lives only in memory. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            file_path: None,
        }
    }

    /// Open (or start) the ledger persisted at `file_path`.
    ///
    /// A file that cannot be parsed is moved aside to `<name>.corrupt` and
    /// the ledger starts empty; a file that cannot be read at all is an error.
    pub fn open(file_path: &Path) -> Result<Self> {
        let mut entries = IndexMap::new();

        if file_path.exists() {
            // Raw bytes: invalid UTF-8 is corruption, not a read failure.
            let contents = std::fs::read(file_path).map_err(|e| {
                RelayError::Persist(format!("Failed to read {}: {}", file_path.display(), e))
            })?;

            match serde_json::from_slice::<LedgerFile>(&contents) {
                Ok(file) => {
                    for entry in file.entries {
                        entries.insert(entry.id.clone(), entry);
                    }
                    tracing::info!(
                        "[LEDGER] Loaded {} entries from {}",
                        entries.len(),
                        file_path.display()
                    );
                }
                Err(e) => {
                    let aside = corrupt_path(file_path);
                    tracing::error!(
                        "[LEDGER] Failed to parse {}: {}, moving it to {} and starting empty",
                        file_path.display(),
                        e,
                        aside.display()
                    );
                    if let Err(e) = std::fs::rename(file_path, &aside) {
                        tracing::warn!("[LEDGER] Could not move corrupt ledger aside: {}", e);
                    }
                }
            }
        } else {
            tracing::info!(
                "[LEDGER] No ledger at {}, starting empty",
                file_path.display()
            );
        }

        Ok(Self {
            entries: RwLock::new(entries),
            file_path: Some(file_path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn has(&self, id: &RequestId) -> bool {
        self.entries.read().unwrap().contains_key(id)
    }

    pub fn get(&self, id: &RequestId) -> Option<LedgerEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }

    /// Snapshot of every entry in insertion order.
    pub fn all(&self) -> Vec<LedgerEntry> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Upsert keyed by `entry.id`, last write wins. A replaced entry keeps
    /// its original position.
    pub fn record(&self, entry: LedgerEntry) -> Result<()> {
        self.commit(|map| {
            map.insert(entry.id.clone(), entry);
        })
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove_by_id(&self, id: &RequestId) -> Result<bool> {
        if !self.has(id) {
            return Ok(false);
        }
        self.commit(|map| {
            map.shift_remove(id);
        })?;
        Ok(true)
    }

    /// Remove every entry addressed to `phone_number`. Returns how many.
    pub fn remove_by_phone_number(&self, phone_number: &str) -> Result<usize> {
        let mut removed = 0;
        self.commit(|map| {
            let before = map.len();
            map.retain(|_, e| e.phone_number != phone_number);
            removed = before - map.len();
        })?;
        Ok(removed)
    }

    fn commit<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut IndexMap<RequestId, LedgerEntry>),
    {
        let mut guard = self.entries.write().unwrap();
        let mut staged = guard.clone();
        mutate(&mut staged);
        self.persist(&staged)?;
        *guard = staged;
        Ok(())
    }

    fn persist(&self, map: &IndexMap<RequestId, LedgerEntry>) -> Result<()> {
        let Some(ref file_path) = self.file_path else {
            return Ok(());
        };

        #[derive(Serialize)]
        struct LedgerFileRef<'a> {
            entries: Vec<&'a LedgerEntry>,
        }

        let json = serde_json::to_string_pretty(&LedgerFileRef {
            entries: map.values().collect(),
        })
        .map_err(|e| RelayError::Persist(format!("Failed to serialize ledger: {}", e)))?;

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RelayError::Persist(format!(
                        "Failed to create ledger directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let tmp_path = tmp_path(file_path);
        write_synced(&tmp_path, json.as_bytes()).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            RelayError::Persist(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        std::fs::rename(&tmp_path, file_path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            RelayError::Persist(format!(
                "Failed to replace {}: {}",
                file_path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// Contents must be on disk before the rename publishes them.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn tmp_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn corrupt_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
