//! Durable selection state: the accepted-set checkpoint and the rejected-id
//! ledger. Only the selection loop writes either file.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::outcome::write_atomically;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRow {
    bvid: String,
}

/// Ids that passed the classifier, in acceptance order.
///
/// Persisted as a full overwrite of a one-column CSV.
#[derive(Debug)]
pub struct AcceptedSet {
    path: PathBuf,
    order: Vec<String>,
    members: HashSet<String>,
}

impl AcceptedSet {
    /// Load the checkpoint at `path`. A missing file is an empty set; an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut set = Self {
            path,
            order: Vec::new(),
            members: HashSet::new(),
        };

        if !set.path.exists() {
            return set;
        }

        match Self::read_ids(&set.path) {
            Ok(ids) => {
                for id in ids {
                    set.insert(id);
                }
                info!("📋 Loaded {} accepted ids from {}", set.len(), set.path.display());
            }
            Err(e) => warn!("Failed to read checkpoint {}, starting empty: {}", set.path.display(), e),
        }
        set
    }

    fn read_ids(path: &Path) -> Result<Vec<String>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut ids = Vec::new();
        for row in reader.deserialize::<CheckpointRow>() {
            let id = row?.bvid.trim().to_string();
            if !id.is_empty() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Returns `false` if the id was already accepted
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push(id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn persist(&self) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for id in &self.order {
            writer.serialize(CheckpointRow { bvid: id.clone() })?;
        }
        if self.order.is_empty() {
            writer.write_record(["bvid"])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| HarvestError::io(&self.path, e.into_error()))?;

        write_atomically(&self.path, &bytes).await?;
        debug!("💾 Checkpoint saved: {} ids to {}", self.len(), self.path.display());
        Ok(())
    }
}

/// Append-only list of rejected ids, one per line
pub struct RejectedLedger {
    path: PathBuf,
    ids: BTreeSet<String>,
    file: File,
}

impl RejectedLedger {
    pub fn read_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| HarvestError::io(path, e))?;

        let ids: BTreeSet<String> = BufReader::new(&mut file)
            .lines()
            .map_while(|line| line.ok())
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        if !ids.is_empty() {
            info!("📋 Loaded {} rejected ids from {}", ids.len(), path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            ids,
            file,
        })
    }

    /// Record a rejection; ids already present are not written twice
    pub fn push(&mut self, id: &str) -> Result<()> {
        if !self.ids.insert(id.to_string()) {
            return Ok(());
        }
        writeln!(self.file, "{}", id)
            .and_then(|_| self.file.flush())
            .map_err(|e| HarvestError::io(&self.path, e))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_checkpoint_round_trip_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("portrait_videos_progress.csv");

        let mut set = AcceptedSet::load(&path);
        assert!(set.is_empty());
        assert!(set.insert("B"));
        assert!(set.insert("A"));
        assert!(!set.insert("B"));
        set.persist().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bvid\nB\nA\n");

        let reloaded = AcceptedSet::load(&path);
        assert_eq!(reloaded.ids(), ["B".to_string(), "A".to_string()]);
        assert!(reloaded.contains("A"));
    }

    #[tokio::test]
    async fn test_empty_checkpoint_has_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("progress.csv");

        AcceptedSet::load(&path).persist().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bvid\n");
        assert!(AcceptedSet::load(&path).is_empty());
    }

    #[test]
    fn test_unreadable_checkpoint_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("progress.csv");
        std::fs::write(&path, "id,other\nA,1\n").unwrap();

        assert!(AcceptedSet::load(&path).is_empty());
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rejected.txt");

        let mut ledger = RejectedLedger::read_or_create(&path).unwrap();
        ledger.push("A").unwrap();
        ledger.push("B").unwrap();
        ledger.push("A").unwrap();
        drop(ledger);

        let ledger = RejectedLedger::read_or_create(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("A"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A\nB\n");
    }
}
