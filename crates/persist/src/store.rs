//! File-backed save store.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json              - metadata, schema versions, world identity
//! snapshots/
//!   000001.snapshot.cbor.zst   - CBOR+zstd compressed entity table + grid snapshot
//! events/
//!   000001.log.cbor.zst        - CBOR+zstd compressed world event segments
//! integrity/
//!   manifest.json              - hash chain manifest
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tessera_grid::{Grid, GridContext, GridError, GridSnapshot};
use tessera_kernel::{World, WorldEvent, WorldParams};

const STORE_SCHEMA_VERSION: u32 = 1;
const EVENT_SCHEMA_VERSION: u32 = 1;

const SNAPSHOT_DIR: &str = "snapshots";
const EVENT_DIR: &str = "events";

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("store holds world {stored}, cannot save world {given}")]
    WorldMismatch { stored: String, given: String },
    #[error("no snapshots found")]
    NoSnapshots,
    #[error("grid restore failed: {0}")]
    Grid(#[from] GridError),
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_schema_version: u32,
    pub event_schema_version: u32,
    pub snapshot_count: u32,
    pub event_segment_count: u32,
    /// Set by the first save.
    pub world: Option<WorldParams>,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

impl ManifestEntry {
    fn is_snapshot(&self) -> bool {
        self.filename.contains("snapshot")
    }
}

/// Integrity manifest tracking every file in write order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// What one snapshot file holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub world: World,
    pub grid: GridSnapshot,
}

/// File-backed store for one world's saves.
#[derive(Debug)]
pub struct GridStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl GridStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(SNAPSHOT_DIR))?;
        std::fs::create_dir_all(root.join(EVENT_DIR))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.store_schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.store_schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            if meta.event_schema_version != EVENT_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.event_schema_version,
                    expected_version: EVENT_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                store_schema_version: STORE_SCHEMA_VERSION,
                event_schema_version: EVENT_SCHEMA_VERSION,
                snapshot_count: 0,
                event_segment_count: 0,
                world: None,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::debug!(root = %root.display(), snapshots = meta.snapshot_count, "store opened");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Write the entity table and the grid's per-cell data as a new snapshot.
    pub fn save(&mut self, world: &World, grid: &Grid) -> Result<(), StoreError> {
        self.check_world(world.params())?;
        let state = SaveState {
            world: world.clone(),
            grid: grid.serialize(),
        };
        self.meta.snapshot_count += 1;
        self.meta.world = Some(*world.params());
        let filename = format!("{:06}.snapshot.cbor.zst", self.meta.snapshot_count);
        self.write_file(SNAPSHOT_DIR, filename, &state)?;
        tracing::info!(snapshot = self.meta.snapshot_count, cells = state.grid.cells.len(), "grid saved");
        Ok(())
    }

    /// Append world events recorded since the last save as a new segment.
    pub fn append_events(&mut self, events: &[WorldEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        self.meta.event_segment_count += 1;
        let filename = format!("{:06}.log.cbor.zst", self.meta.event_segment_count);
        self.write_file(EVENT_DIR, filename, events)?;
        tracing::debug!(segment = self.meta.event_segment_count, events = events.len(), "events appended");
        Ok(())
    }

    /// Load the latest snapshot and apply the event segments written after it.
    pub fn load_latest(&self) -> Result<SaveState, StoreError> {
        let Some(latest) = self.manifest.entries.iter().rposition(ManifestEntry::is_snapshot) else {
            return Err(StoreError::NoSnapshots);
        };
        let mut state: SaveState = self.read_file(&self.manifest.entries[latest])?;
        for entry in &self.manifest.entries[latest + 1..] {
            let events: Vec<WorldEvent> = self.read_file(entry)?;
            for event in &events {
                state.world.apply(event);
            }
        }
        Ok(state)
    }

    /// Rebuild the world and its grid from the latest save. Entity membership is
    /// recomputed from the restored entity table.
    pub fn restore(&self, ctx: GridContext) -> Result<(World, Grid), StoreError> {
        let state = self.load_latest()?;
        let params = *state.world.params();
        let mut grid = Grid::deserialize(state.grid, &params, ctx)?;
        grid.sync_world(&state.world);
        Ok((state.world, grid))
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(self.path_of(entry))?;
            check_hash(entry, &data)?;
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn check_world(&self, params: &WorldParams) -> Result<(), StoreError> {
        match self.meta.world {
            Some(stored)
                if (stored.seed, stored.width, stored.height)
                    != (params.seed, params.width, params.height) =>
            {
                Err(StoreError::WorldMismatch {
                    stored: world_name(&stored),
                    given: world_name(params),
                })
            }
            _ => Ok(()),
        }
    }

    fn path_of(&self, entry: &ManifestEntry) -> PathBuf {
        let dir = if entry.is_snapshot() { SNAPSHOT_DIR } else { EVENT_DIR };
        self.root.join(dir).join(&entry.filename)
    }

    fn write_file<T: Serialize + ?Sized>(
        &mut self,
        dir: &str,
        filename: String,
        value: &T,
    ) -> Result<(), StoreError> {
        let compressed = zstd_compress(&cbor_serialize(value)?)?;
        let sha256 = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(self.root.join(dir).join(&filename), &compressed)?;
        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256,
            prev_hash,
        });

        self.save_meta()?;
        self.save_manifest()
    }

    fn read_file<T: DeserializeOwned>(&self, entry: &ManifestEntry) -> Result<T, StoreError> {
        let compressed = std::fs::read(self.path_of(entry))?;
        check_hash(entry, &compressed)?;
        cbor_deserialize(&zstd_decompress(&compressed)?)
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join("store.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn world_name(params: &WorldParams) -> String {
    format!("seed_{}_{}x{}", params.seed, params.width, params.height)
}

fn check_hash(entry: &ManifestEntry, data: &[u8]) -> Result<(), StoreError> {
    let actual = sha256_hex(data);
    if actual != entry.sha256 {
        return Err(StoreError::IntegrityMismatch {
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec2, Vec2};
    use std::sync::Arc;
    use tessera_common::{CameraView, GroupTag, Rect};
    use tessera_grid::{
        CellCoord, CellSize, GridConfig, TerrainSamples, TextureHandle, TextureUploader,
        WorldRegistry,
    };
    use tessera_kernel::EntityData;

    struct NullUploader;

    impl TextureUploader for NullUploader {
        fn upload(&mut self, _coord: CellCoord, _terrain: Option<&TerrainSamples>) -> TextureHandle {
            TextureHandle(0)
        }

        fn release(&mut self, _handle: TextureHandle) {}
    }

    fn ctx() -> GridContext {
        let config = GridConfig {
            max_threads: 1,
            ..GridConfig::default()
        };
        GridContext::new(config, Arc::new(WorldRegistry::new())).unwrap()
    }

    /// A built 400x400 world with one entity and the top-left cell visited.
    fn built_world(seed: u64) -> (World, Grid) {
        let params = WorldParams::new(seed, 400, 400);
        let mut world = World::new(params);
        let groups = [GroupTag::All, GroupTag::Visible].into_iter().collect();
        world.spawn(EntityData::new(Vec2::new(150.0, 250.0), groups));
        world.drain_events();

        let mut grid = Grid::new(&params, CellSize::Explicit(UVec2::new(100, 100)), ctx()).unwrap();
        grid.run_to_completion(&mut NullUploader);
        grid.sync_world(&world);
        grid.background_pass(&CameraView::new(Rect::new(0, 0, 50, 50)));
        (world, grid)
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GridStore::open(tmp.path().join("save")).unwrap();
        assert_eq!(store.meta().snapshot_count, 0);
        assert!(store.meta().world.is_none());
        assert!(store.root().join("snapshots").is_dir());
        assert!(store.root().join("events").is_dir());
        assert!(store.root().join("integrity").is_dir());
    }

    #[test]
    fn empty_store_has_nothing_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GridStore::open(tmp.path().join("save")).unwrap();
        assert!(matches!(store.load_latest(), Err(StoreError::NoSnapshots)));
    }

    #[test]
    fn save_and_restore_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("save");
        let (world, grid) = built_world(42);
        let id = *world.entities().keys().next().unwrap();

        let mut store = GridStore::open(&path).unwrap();
        store.save(&world, &grid).unwrap();

        let reopened = GridStore::open(&path).unwrap();
        let (restored_world, restored) = reopened.restore(ctx()).unwrap();
        assert_eq!(restored_world.entity_count(), 1);
        assert_eq!(restored.cell_width(), 100);
        assert_eq!(restored.cells_visited().len(), grid.cells_visited().len());
        assert_eq!(restored.current_cell(id), Some(CellCoord::new(1, 2)));
        assert_eq!(restored.serialize(), grid.serialize());
    }

    #[test]
    fn events_after_snapshot_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut world, grid) = built_world(42);
        let id = *world.entities().keys().next().unwrap();

        let mut store = GridStore::open(tmp.path().join("save")).unwrap();
        store.save(&world, &grid).unwrap();
        world.set_position(id, Vec2::new(350.0, 50.0));
        store.append_events(&world.drain_events()).unwrap();
        store.verify_integrity().unwrap();

        let (restored_world, restored) = store.restore(ctx()).unwrap();
        assert_eq!(restored_world.get(id).unwrap().position, Vec2::new(350.0, 50.0));
        assert_eq!(restored.current_cell(id), Some(CellCoord::new(3, 0)));
    }

    #[test]
    fn store_integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("save");
        let (world, grid) = built_world(7);
        let mut store = GridStore::open(&path).unwrap();
        store.save(&world, &grid).unwrap();

        let snap_path = path.join("snapshots").join("000001.snapshot.cbor.zst");
        let mut data = std::fs::read(&snap_path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&snap_path, &data).unwrap();

        let reopened = GridStore::open(&path).unwrap();
        assert!(reopened.verify_integrity().is_err());
        assert!(matches!(
            reopened.load_latest(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn store_rejects_a_different_world() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = GridStore::open(tmp.path().join("save")).unwrap();
        let (world, grid) = built_world(1);
        store.save(&world, &grid).unwrap();

        let (other_world, other_grid) = built_world(2);
        let err = store.save(&other_world, &other_grid);
        assert!(matches!(err, Err(StoreError::WorldMismatch { .. })));
        assert_eq!(store.meta().snapshot_count, 1);
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("save");
        let _store = GridStore::open(&path).unwrap();

        let meta_path = path.join("store.meta.json");
        let mut meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.store_schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match GridStore::open(&path) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, STORE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
}
