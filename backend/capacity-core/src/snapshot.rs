// src/snapshot.rs
//! Parsed source tables, cached per file fingerprint.
//!
//! A table is reparsed only when its effective file changes `(path, mtime,
//! length)`. Readers hold an `Arc` to an immutable snapshot, so a reload never
//! changes data under a computation that is already running.
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::aggregation::SourceTables;
use crate::error::{io_context, CapacityError};
use crate::ingest::{self, ColumnAliases, ProductionData, SourceTable};
use crate::models::{AvailabilityRecord, LookupMap};

pub trait RowCount {
    fn row_count(&self) -> usize;
}

impl RowCount for Vec<AvailabilityRecord> {
    fn row_count(&self) -> usize {
        self.len()
    }
}

impl RowCount for ProductionData {
    fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl RowCount for LookupMap {
    fn row_count(&self) -> usize {
        self.len()
    }
}

// --- Snapshot ---

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Result<Self, CapacityError> {
        let meta = fs::metadata(path)
            .map_err(|e| io_context(e, format!("Failed to stat source file: {:?}", path)))?;
        Ok(Self {
            path: path.to_path_buf(),
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Describes where a snapshot came from.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    pub table: SourceTable,
    pub path: PathBuf,
    pub is_override: bool,
    pub modified: Option<DateTime<Utc>>,
    pub bytes: u64,
    pub sha256: String,
    pub rows: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Snapshot<T> {
    pub data: T,
    pub meta: SnapshotMeta,
    fingerprint: Fingerprint,
}

type Parser<T> = Arc<dyn Fn(&[u8]) -> Result<T, CapacityError> + Send + Sync>;

// --- Cache ---

pub struct SnapshotCache<T> {
    table: SourceTable,
    configured: Option<PathBuf>,
    upload_dir: PathBuf,
    parser: Parser<T>,
    current: RwLock<Option<Arc<Snapshot<T>>>>,
    refresh: Mutex<()>,
}

impl<T: RowCount> SnapshotCache<T> {
    pub fn new<F>(
        table: SourceTable,
        configured: Option<PathBuf>,
        upload_dir: PathBuf,
        parser: F,
    ) -> Self
    where
        F: Fn(&[u8]) -> Result<T, CapacityError> + Send + Sync + 'static,
    {
        Self {
            table,
            configured,
            upload_dir,
            parser: Arc::new(parser),
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn table(&self) -> SourceTable {
        self.table
    }

    pub fn override_path(&self) -> PathBuf {
        self.upload_dir.join(self.table.upload_file_name())
    }

    fn poisoned(&self) -> CapacityError {
        CapacityError::LockPoisoned(format!("{} snapshot", self.table))
    }

    /// Uploaded override first, then the configured file.
    fn effective_path(&self) -> Option<(PathBuf, bool)> {
        let override_path = self.override_path();
        if override_path.is_file() {
            return Some((override_path, true));
        }
        self.configured
            .as_ref()
            .filter(|p| p.is_file())
            .map(|p| (p.clone(), false))
    }

    /// Last successfully parsed snapshot, without touching the file system.
    pub fn current(&self) -> Result<Option<Arc<Snapshot<T>>>, CapacityError> {
        Ok(self.current.read().map_err(|_| self.poisoned())?.clone())
    }

    fn current_if_fresh(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Arc<Snapshot<T>>>, CapacityError> {
        Ok(self
            .current()?
            .filter(|snapshot| snapshot.fingerprint == *fingerprint))
    }

    fn install(&self, snapshot: Arc<Snapshot<T>>) -> Result<(), CapacityError> {
        *self.current.write().map_err(|_| self.poisoned())? = Some(snapshot);
        Ok(())
    }

    fn reset(&self) -> Result<(), CapacityError> {
        *self.current.write().map_err(|_| self.poisoned())? = None;
        Ok(())
    }

    fn build(
        &self,
        data: T,
        bytes: &[u8],
        fingerprint: Fingerprint,
        is_override: bool,
    ) -> Arc<Snapshot<T>> {
        let meta = SnapshotMeta {
            table: self.table,
            path: fingerprint.path.clone(),
            is_override,
            modified: fingerprint.modified.map(DateTime::<Utc>::from),
            bytes: fingerprint.len,
            sha256: hex::encode(Sha256::digest(bytes)),
            rows: data.row_count(),
            loaded_at: Utc::now(),
        };
        Arc::new(Snapshot {
            data,
            meta,
            fingerprint,
        })
    }

    /// Fresh snapshot, or `None` when no source file exists.
    pub fn get_optional(&self) -> Result<Option<Arc<Snapshot<T>>>, CapacityError> {
        let Some((path, _)) = self.effective_path() else {
            if self.current()?.is_some() {
                warn!("{} source disappeared; dropping cached snapshot", self.table);
                self.reset()?;
            }
            return Ok(None);
        };
        if let Some(snapshot) = self.current_if_fresh(&Fingerprint::of(&path)?)? {
            return Ok(Some(snapshot));
        }

        let _guard = self.refresh.lock().map_err(|_| self.poisoned())?;
        // Another caller may have finished the refresh while we waited.
        let Some((path, is_override)) = self.effective_path() else {
            return Ok(None);
        };
        let fingerprint = Fingerprint::of(&path)?;
        if let Some(snapshot) = self.current_if_fresh(&fingerprint)? {
            debug!("{} snapshot refreshed by a concurrent caller", self.table);
            return Ok(Some(snapshot));
        }

        let bytes = fs::read(&path)
            .map_err(|e| io_context(e, format!("Failed to read source file: {:?}", path)))?;
        let data = (self.parser)(&bytes).map_err(|e| {
            warn!(
                "Reload of {} from {:?} failed, keeping previous snapshot: {}",
                self.table, path, e
            );
            e
        })?;
        let snapshot = self.build(data, &bytes, fingerprint, is_override);
        info!(
            "Loaded {} snapshot from {:?}: {} row(s), sha256 {}",
            self.table, path, snapshot.meta.rows, snapshot.meta.sha256
        );
        self.install(snapshot.clone())?;
        Ok(Some(snapshot))
    }

    pub fn get(&self) -> Result<Arc<Snapshot<T>>, CapacityError> {
        self.get_optional()?.ok_or_else(|| CapacityError::SourceMissing {
            table: self.table.name().to_string(),
            path: self
                .configured
                .clone()
                .unwrap_or_else(|| self.override_path()),
        })
    }

    /// Parses `bytes` first; only a valid export is written as the override.
    pub fn store_override(&self, bytes: &[u8]) -> Result<Arc<Snapshot<T>>, CapacityError> {
        let data = (self.parser)(bytes)?;

        let _guard = self.refresh.lock().map_err(|_| self.poisoned())?;
        fs::create_dir_all(&self.upload_dir).map_err(|e| {
            io_context(e, format!("Failed to create upload directory: {:?}", self.upload_dir))
        })?;
        let target = self.override_path();
        let staging = target.with_extension("csv.part");
        fs::write(&staging, bytes)
            .map_err(|e| io_context(e, format!("Failed to write upload: {:?}", staging)))?;
        fs::rename(&staging, &target)
            .map_err(|e| io_context(e, format!("Failed to move upload into place: {:?}", target)))?;

        let snapshot = self.build(data, bytes, Fingerprint::of(&target)?, true);
        info!(
            "Stored {} override at {:?}: {} row(s)",
            self.table, target, snapshot.meta.rows
        );
        self.install(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Removes the uploaded override; returns whether one existed.
    pub fn clear_override(&self) -> Result<bool, CapacityError> {
        let _guard = self.refresh.lock().map_err(|_| self.poisoned())?;
        let target = self.override_path();
        if !target.exists() {
            return Ok(false);
        }
        fs::remove_file(&target)
            .map_err(|e| io_context(e, format!("Failed to remove upload: {:?}", target)))?;
        self.reset()?;
        info!("Removed {} override {:?}", self.table, target);
        Ok(true)
    }

    pub fn status(&self) -> TableStatus {
        let (snapshot, error) = match self.get_optional() {
            Ok(snapshot) => (snapshot.map(|s| s.meta.clone()), None),
            Err(e) => {
                let stale = self.current().ok().flatten().map(|s| s.meta.clone());
                (stale, Some(e.to_string()))
            }
        };
        TableStatus {
            table: self.table,
            optional: self.table.is_optional(),
            configured_path: self.configured.clone(),
            override_path: self.override_path(),
            snapshot,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: SourceTable,
    pub optional: bool,
    pub configured_path: Option<PathBuf>,
    pub override_path: PathBuf,
    pub snapshot: Option<SnapshotMeta>,
    pub error: Option<String>,
}

// --- Source Store ---

/// Configured locations of the source exports.
#[derive(Debug, Clone, Default)]
pub struct SourcePaths {
    pub availability: Option<PathBuf>,
    pub production: Option<PathBuf>,
    pub departments: Option<PathBuf>,
    pub display_names: Option<PathBuf>,
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearOutcome {
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

/// The four table caches behind the service.
pub struct SourceStore {
    pub availability: SnapshotCache<Vec<AvailabilityRecord>>,
    pub production: SnapshotCache<ProductionData>,
    pub departments: SnapshotCache<LookupMap>,
    pub display_names: SnapshotCache<LookupMap>,
}

impl SourceStore {
    pub fn new(paths: SourcePaths, aliases: ColumnAliases, delimiter: u8) -> Self {
        let aliases = Arc::new(aliases);
        let upload_dir = paths.upload_dir;

        let a = aliases.clone();
        let availability = SnapshotCache::new(
            SourceTable::Availability,
            paths.availability,
            upload_dir.clone(),
            move |bytes| ingest::parse_availability(bytes, &a.availability, delimiter),
        );
        let a = aliases.clone();
        let production = SnapshotCache::new(
            SourceTable::Production,
            paths.production,
            upload_dir.clone(),
            move |bytes| {
                use chrono::Datelike;
                ingest::parse_production(bytes, &a.production, delimiter, Utc::now().year())
            },
        );
        let a = aliases.clone();
        let departments = SnapshotCache::new(
            SourceTable::Departments,
            paths.departments,
            upload_dir.clone(),
            move |bytes| {
                ingest::parse_lookup(bytes, SourceTable::Departments, &a.departments, delimiter)
            },
        );
        let a = aliases;
        let display_names = SnapshotCache::new(
            SourceTable::DisplayNames,
            paths.display_names,
            upload_dir,
            move |bytes| {
                ingest::parse_lookup(bytes, SourceTable::DisplayNames, &a.display_names, delimiter)
            },
        );

        Self {
            availability,
            production,
            departments,
            display_names,
        }
    }

    fn optional_lookup(cache: &SnapshotCache<LookupMap>) -> Option<Arc<Snapshot<LookupMap>>> {
        match cache.get_optional() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Continuing without {} table: {}", cache.table(), e);
                None
            }
        }
    }

    /// Runs `f` against one consistent set of snapshots.
    pub fn with_tables<R>(
        &self,
        f: impl FnOnce(SourceTables<'_>) -> Result<R, CapacityError>,
    ) -> Result<R, CapacityError> {
        let availability = self.availability.get()?;
        let production = self.production.get()?;
        let departments = Self::optional_lookup(&self.departments);
        let display_names = Self::optional_lookup(&self.display_names);
        let empty = LookupMap::new();

        f(SourceTables {
            availability: &availability.data,
            production: &production.data.table,
            production_rows: &production.data.rows,
            departments: departments.as_ref().map_or(&empty, |s| &s.data),
            display_names: display_names.as_ref().map_or(&empty, |s| &s.data),
        })
    }

    pub fn store_upload(
        &self,
        table: SourceTable,
        bytes: &[u8],
    ) -> Result<SnapshotMeta, CapacityError> {
        Ok(match table {
            SourceTable::Availability => self.availability.store_override(bytes)?.meta.clone(),
            SourceTable::Production => self.production.store_override(bytes)?.meta.clone(),
            SourceTable::Departments => self.departments.store_override(bytes)?.meta.clone(),
            SourceTable::DisplayNames => self.display_names.store_override(bytes)?.meta.clone(),
        })
    }

    pub fn clear_uploads(&self) -> ClearOutcome {
        let results = [
            (SourceTable::Availability, self.availability.clear_override()),
            (SourceTable::Production, self.production.clear_override()),
            (SourceTable::Departments, self.departments.clear_override()),
            (SourceTable::DisplayNames, self.display_names.clear_override()),
        ];
        let mut outcome = ClearOutcome::default();
        for (table, result) in results {
            match result {
                Ok(true) => outcome.removed.push(table.upload_file_name().to_string()),
                Ok(false) => {}
                Err(e) => outcome.errors.push(format!("{}: {}", table, e)),
            }
        }
        outcome
    }

    pub fn status(&self) -> Vec<TableStatus> {
        vec![
            self.availability.status(),
            self.production.status(),
            self.departments.status(),
            self.display_names.status(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::AvailabilityColumns;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "capacity-snapshot-{}-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst),
            name
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const TWO_ROWS: &str = "device,week,year,hours\n10243,36,2025,100\n10243,37,2025,100\n";
    const THREE_ROWS: &str =
        "device,week,year,hours\n10243,36,2025,100\n10243,37,2025,100\n10250,36,2025,40\n";

    fn availability_cache(dir: &Path, parses: Arc<AtomicUsize>) -> SnapshotCache<Vec<AvailabilityRecord>> {
        SnapshotCache::new(
            SourceTable::Availability,
            Some(dir.join("availability-source.csv")),
            dir.join("uploaded"),
            move |bytes| {
                parses.fetch_add(1, Ordering::SeqCst);
                ingest::parse_availability(bytes, &AvailabilityColumns::default(), b',')
            },
        )
    }

    #[test]
    fn unchanged_file_reuses_snapshot() {
        let dir = scratch_dir("reuse");
        fs::write(dir.join("availability-source.csv"), TWO_ROWS).unwrap();
        let parses = Arc::new(AtomicUsize::new(0));
        let cache = availability_cache(&dir, parses.clone());

        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert_eq!(first.meta.rows, 2);
        assert!(!first.meta.is_override);
        assert_eq!(first.meta.sha256.len(), 64);
    }

    #[test]
    fn changed_file_is_reparsed() {
        let dir = scratch_dir("reload");
        let source = dir.join("availability-source.csv");
        fs::write(&source, TWO_ROWS).unwrap();
        let cache = availability_cache(&dir, Arc::new(AtomicUsize::new(0)));

        assert_eq!(cache.get().unwrap().data.len(), 2);
        fs::write(&source, THREE_ROWS).unwrap();
        assert_eq!(cache.get().unwrap().data.len(), 3);
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = scratch_dir("failed");
        let source = dir.join("availability-source.csv");
        fs::write(&source, TWO_ROWS).unwrap();
        let cache = availability_cache(&dir, Arc::new(AtomicUsize::new(0)));
        let good = cache.get().unwrap();

        fs::write(&source, "unrelated,headers\n1,2\n").unwrap();
        assert!(matches!(
            cache.get(),
            Err(CapacityError::MissingColumns { .. })
        ));
        let kept = cache.current().unwrap().unwrap();
        assert!(Arc::ptr_eq(&good, &kept));

        let status = cache.status();
        assert!(status.error.is_some());
        assert_eq!(status.snapshot.map(|m| m.rows), Some(2));
    }

    #[test]
    fn missing_files_are_reported_per_table_kind() {
        let dir = scratch_dir("missing");
        let cache = availability_cache(&dir, Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            cache.get(),
            Err(CapacityError::SourceMissing { .. })
        ));

        let optional: SnapshotCache<LookupMap> = SnapshotCache::new(
            SourceTable::Departments,
            None,
            dir.join("uploaded"),
            |bytes| {
                ingest::parse_lookup(
                    bytes,
                    SourceTable::Departments,
                    &ColumnAliases::default().departments,
                    b',',
                )
            },
        );
        assert!(optional.get_optional().unwrap().is_none());
    }

    #[test]
    fn override_wins_until_cleared() {
        let dir = scratch_dir("override");
        fs::write(dir.join("availability-source.csv"), TWO_ROWS).unwrap();
        let cache = availability_cache(&dir, Arc::new(AtomicUsize::new(0)));
        assert_eq!(cache.get().unwrap().data.len(), 2);

        let stored = cache.store_override(THREE_ROWS.as_bytes()).unwrap();
        assert!(stored.meta.is_override);
        assert!(cache.override_path().is_file());
        let after_upload = cache.get().unwrap();
        assert_eq!(after_upload.data.len(), 3);
        assert!(after_upload.meta.is_override);

        assert!(cache.clear_override().unwrap());
        assert!(!cache.clear_override().unwrap());
        assert_eq!(cache.get().unwrap().data.len(), 2);
    }

    #[test]
    fn invalid_upload_is_not_stored() {
        let dir = scratch_dir("invalid-upload");
        let cache = availability_cache(&dir, Arc::new(AtomicUsize::new(0)));
        assert!(cache.store_override(b"a,b\n1,2\n").is_err());
        assert!(!cache.override_path().exists());
    }

    #[test]
    fn concurrent_readers_share_one_refresh() {
        let dir = scratch_dir("concurrent");
        fs::write(dir.join("availability-source.csv"), THREE_ROWS).unwrap();
        let parses = Arc::new(AtomicUsize::new(0));
        let cache = availability_cache(&dir, parses.clone());

        let snapshots: Vec<Arc<Snapshot<Vec<AvailabilityRecord>>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| cache.get().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[test]
    fn store_runs_computation_over_optional_tables() {
        let dir = scratch_dir("store");
        let availability = dir.join("availability.csv");
        let production = dir.join("production.csv");
        fs::write(&availability, TWO_ROWS).unwrap();
        fs::write(
            &production,
            "grupa zasobow,tydzien realizacji,praca+tpz,rok\n10243,36,20,2025\n",
        )
        .unwrap();
        let store = SourceStore::new(
            SourcePaths {
                availability: Some(availability),
                production: Some(production),
                departments: None,
                display_names: Some(dir.join("absent.csv")),
                upload_dir: dir.join("uploaded"),
            },
            ColumnAliases::default(),
            b',',
        );

        let (devices, load, departments) = store
            .with_tables(|t| {
                Ok((
                    t.availability.len(),
                    crate::matching::match_production("10243", 2025, 36, t.production),
                    t.departments.len(),
                ))
            })
            .unwrap();
        assert_eq!((devices, load, departments), (2, 20.0, 0));

        let status = store.status();
        assert_eq!(status.len(), 4);
        assert!(status[0].snapshot.is_some());
        assert!(status[2].snapshot.is_none() && status[2].error.is_none());

        store
            .store_upload(SourceTable::Departments, b"grupa,dzial\n10243,Toczenie\n")
            .unwrap();
        let outcome = store.clear_uploads();
        assert_eq!(outcome.removed, vec!["departments.csv".to_string()]);
        assert!(outcome.errors.is_empty());
    }
}
