// Snapshots of the in-memory store: gzip-compressed bincode with a sha256 sidecar
use anyhow::{anyhow, bail, Context, Result};
use atomicwrites::{AllowOverwrite, AtomicFile};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use staysearch_core::{IndexedRecord, MemoryStore, Space, SpaceKind, SpaceLayout};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SNAPSHOT_EXT: &str = "snapshot";
const CHECKSUM_EXT: &str = "sha256";

/// Snapshot description for listings and API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDescription {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Fingerprint of one configured space. The full configuration (model
/// identity included) is kept as JSON and compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSignature {
    pub name: String,
    pub kind: SpaceKind,
    pub dimension: usize,
    pub config: String,
}

impl SpaceSignature {
    pub fn of(space: &Space) -> Result<Self> {
        Ok(Self {
            name: space.name().to_string(),
            kind: space.kind(),
            dimension: space.dimension(),
            config: serde_json::to_string(space)?,
        })
    }

    pub fn all(spaces: &[Space]) -> Result<Vec<Self>> {
        spaces.iter().map(Self::of).collect()
    }
}

/// Everything needed to rebuild a memory store without re-encoding
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotData {
    pub index: String,
    pub spaces: Vec<SpaceSignature>,
    /// Reference "now" the recency segments were encoded against
    pub reference_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<IndexedRecord>,
}

impl SnapshotData {
    pub fn dimension(&self) -> usize {
        self.spaces.iter().map(|s| s.dimension).sum()
    }
}

pub struct SnapshotManager {
    snapshot_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_dir: P) -> Result<Self> {
        let snapshot_dir = snapshot_dir.as_ref().to_path_buf();
        fs::create_dir_all(&snapshot_dir)
            .with_context(|| format!("creating snapshot dir {}", snapshot_dir.display()))?;
        Ok(Self { snapshot_dir })
    }

    fn index_dir(&self, index: &str) -> PathBuf {
        self.snapshot_dir.join(index)
    }

    fn snapshot_name(index: &str, at: DateTime<Utc>) -> String {
        format!("{}-{}.{}", index, at.format("%Y-%m-%d-%H-%M-%S-%3f"), SNAPSHOT_EXT)
    }

    /// Write every entry of `store` as a new snapshot of `index`
    pub fn save(
        &self,
        index: &str,
        spaces: &[Space],
        reference_time: DateTime<Utc>,
        store: &MemoryStore,
    ) -> Result<SnapshotDescription> {
        let data = SnapshotData {
            index: index.to_string(),
            spaces: SpaceSignature::all(spaces)?,
            reference_time,
            created_at: Utc::now(),
            entries: store.export(),
        };
        self.write(&data)
    }

    pub fn write(&self, data: &SnapshotData) -> Result<SnapshotDescription> {
        let dir = self.index_dir(&data.index);
        fs::create_dir_all(&dir)?;

        let raw = bincode::serialize(data).map_err(|e| anyhow!("Serialization error: {}", e))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let compressed = encoder.finish()?;
        let checksum = format!("{:x}", Sha256::digest(&compressed));

        let name = Self::snapshot_name(&data.index, data.created_at);
        let path = dir.join(&name);
        write_atomic(&path, &compressed)?;
        write_atomic(&path.with_extension(CHECKSUM_EXT), checksum.as_bytes())?;

        info!(
            "Saved snapshot {} ({} records, {} bytes)",
            name,
            data.entries.len(),
            compressed.len()
        );
        Ok(SnapshotDescription {
            name,
            size: compressed.len() as u64,
            checksum: Some(checksum),
        })
    }

    /// Snapshots of an index, newest first
    pub fn list(&self, index: &str) -> Result<Vec<SnapshotDescription>> {
        let dir = self.index_dir(index);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                snapshots.push(SnapshotDescription {
                    name: name.to_string(),
                    size: fs::metadata(&path)?.len(),
                    checksum: fs::read_to_string(path.with_extension(CHECKSUM_EXT)).ok(),
                });
            }
        }
        snapshots.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(snapshots)
    }

    /// Load and verify one snapshot
    pub fn load(&self, index: &str, name: &str) -> Result<SnapshotData> {
        let path = self.index_dir(index).join(name);
        if !path.exists() {
            bail!("Snapshot '{}' not found for index '{}'", name, index);
        }

        let compressed = fs::read(&path)?;
        match fs::read_to_string(path.with_extension(CHECKSUM_EXT)) {
            Ok(expected) => {
                let actual = format!("{:x}", Sha256::digest(&compressed));
                if actual != expected.trim() {
                    bail!("Snapshot '{}' failed checksum verification", name);
                }
            }
            Err(_) => warn!("Snapshot {} has no checksum file", name),
        }

        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;
        let data: SnapshotData =
            bincode::deserialize(&raw).map_err(|e| anyhow!("Deserialization error: {}", e))?;
        Ok(data)
    }

    /// Most recent snapshot of an index, if any
    pub fn load_latest(&self, index: &str) -> Result<Option<SnapshotData>> {
        match self.list(index)?.first() {
            Some(latest) => self.load(index, &latest.name).map(Some),
            None => Ok(None),
        }
    }

    /// Fill `store` from the newest snapshot written under the same space
    /// configuration. A snapshot from any other configuration (a different
    /// text model, range or layout) is ignored. Recency segments encoded
    /// against another reference time are re-encoded against `now`.
    /// Returns the number of restored records.
    pub fn restore_latest(
        &self,
        index: &str,
        spaces: &[Space],
        now: DateTime<Utc>,
        store: &MemoryStore,
    ) -> Result<usize> {
        let Some(mut data) = self.load_latest(index)? else {
            return Ok(0);
        };
        let live = SpaceSignature::all(spaces)?;
        if data.spaces != live {
            let saved: Vec<&str> = data.spaces.iter().map(|s| s.config.as_str()).collect();
            warn!(
                "Ignoring snapshot of '{}': space configuration differs ({} saved, {} configured): {:?}",
                index,
                data.dimension(),
                live.iter().map(|s| s.dimension).sum::<usize>(),
                saved
            );
            return Ok(0);
        }
        if data.reference_time != now {
            reencode_recency(&mut data.entries, spaces, now);
            info!(
                "Re-encoded recency for {} records ({} -> {})",
                data.entries.len(),
                data.reference_time,
                now
            );
        }
        let count = data.entries.len();
        store.restore(data.entries);
        info!("Restored {} records for index '{}'", count, index);
        Ok(count)
    }

    pub fn delete(&self, index: &str, name: &str) -> Result<bool> {
        let path = self.index_dir(index).join(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        let sidecar = path.with_extension(CHECKSUM_EXT);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
        Ok(true)
    }
}

fn reencode_recency(entries: &mut [IndexedRecord], spaces: &[Space], now: DateTime<Utc>) {
    let layout = SpaceLayout::from_spaces(spaces);
    for space in spaces {
        let Space::Recency(recency) = space else {
            continue;
        };
        let Some(segment) = layout.segment(&recency.name) else {
            continue;
        };
        for entry in entries.iter_mut() {
            let timestamp = entry.record.attribute(&recency.attribute).as_timestamp();
            let encoded = recency.encode_timestamp(timestamp, now);
            entry.vector.as_mut_slice()[segment.range()].copy_from_slice(encoded.as_slice());
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    AtomicFile::new(path, AllowOverwrite)
        .write(|f| f.write_all(bytes))
        .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use staysearch_core::{Record, RecencySpace, TextSpace, Vector};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn spaces(model: &str) -> Vec<Space> {
        vec![
            Space::Text(TextSpace::new("description", "description", model, 2)),
            Space::Recency(RecencySpace::new("recency", "last_scraped", Duration::days(30))),
        ]
    }

    fn store() -> MemoryStore {
        let recency = RecencySpace::new("recency", "last_scraped", Duration::days(30));
        let store = MemoryStore::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let scraped = t0() - Duration::days(10 * i as i64);
            let mut vector = vec![i as f32, 1.0];
            vector.extend_from_slice(recency.encode_timestamp(Some(scraped), t0()).as_slice());
            store.put(IndexedRecord {
                record: Record::new(*id)
                    .with_number("price", 100.0 * (i + 1) as f64)
                    .with_text("room_type", "Private room")
                    .with_timestamp("last_scraped", scraped),
                vector: Vector::new(vector),
                version: i as u64 + 1,
            });
        }
        store
    }

    #[test]
    fn test_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        let desc = manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();
        assert!(desc.checksum.is_some());

        let restored = MemoryStore::new();
        let count = manager
            .restore_latest("listings", &spaces("model-a"), t0(), &restored)
            .unwrap();
        assert_eq!(count, 3);
        let original = store().export();
        let loaded = restored.export();
        for (a, b) in original.iter().zip(loaded.iter()) {
            assert_eq!(a.record, b.record);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[test]
    fn test_restore_skips_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();

        let mut wider = spaces("model-a");
        wider[0] = Space::Text(TextSpace::new("description", "description", "model-a", 8));
        let restored = MemoryStore::new();
        assert_eq!(manager.restore_latest("listings", &wider, t0(), &restored).unwrap(), 0);
        assert!(restored.is_empty());
    }

    #[test]
    fn test_restore_skips_other_text_model_of_same_dimension() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();

        let restored = MemoryStore::new();
        let count = manager
            .restore_latest("listings", &spaces("model-b"), t0(), &restored)
            .unwrap();
        assert_eq!(count, 0);
        assert!(restored.is_empty());
    }

    #[test]
    fn test_restore_reencodes_recency_for_new_reference_time() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();

        let later = t0() + Duration::days(30);
        let restored = MemoryStore::new();
        assert_eq!(
            manager.restore_latest("listings", &spaces("model-a"), later, &restored).unwrap(),
            3
        );

        let recency = RecencySpace::new("recency", "last_scraped", Duration::days(30));
        let original = store().export();
        for (before, after) in original.iter().zip(restored.export().iter()) {
            assert_eq!(before.vector.as_slice()[..2], after.vector.as_slice()[..2]);
            let scraped = after.record.attribute("last_scraped").as_timestamp();
            let expected = recency.encode_timestamp(scraped, later);
            assert_eq!(&after.vector.as_slice()[2..], expected.as_slice());
            assert_ne!(before.vector.as_slice()[2..], after.vector.as_slice()[2..]);
        }
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        let desc = manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();

        let path = dir.path().join("listings").join(&desc.name);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(manager.load("listings", &desc.name).is_err());
    }

    #[test]
    fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        assert!(manager.list("listings").unwrap().is_empty());
        assert!(manager.load_latest("listings").unwrap().is_none());

        let desc = manager.save("listings", &spaces("model-a"), t0(), &store()).unwrap();
        assert_eq!(manager.list("listings").unwrap().len(), 1);
        assert!(manager.delete("listings", &desc.name).unwrap());
        assert!(!manager.delete("listings", &desc.name).unwrap());
        assert!(manager.list("listings").unwrap().is_empty());
    }
}
