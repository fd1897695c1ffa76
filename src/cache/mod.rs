//! Incremental-build cache for compressed dispatch tables.
//!
//! The cache directory is the only shared mutable resource in the engine.
//! Records are content-addressed by cache key, writes are atomic
//! (exclusive temp file, then rename), and a session that loses a write race
//! simply reads the winner's record. Corrupt records are never fatal: the
//! caller falls back to a fresh build and the record is rewritten at session
//! end.
//!
//! Record layout: `magic (4) | version (2) | key (32) | body_len (4) |
//! body_crc (4) | body`, with the body produced by
//! [`CompressedDispatchTable::to_bytes`].

use crate::error::CacheError;
use crate::table::CompressedDispatchTable;
use crate::types::TypeId;
use crate::util::DetHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Magic bytes of a cache record.
const RECORD_MAGIC: [u8; 4] = *b"PDTC";
/// Record format version.
const RECORD_VERSION: u16 = 1;
/// Extension of table records.
const RECORD_EXT: &str = "pdt";
/// Name of the last-cleanup timestamp file.
const LAST_CLEANUP_FILE: &str = ".last_cleanup";

/// Configuration of the on-disk cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory.
    pub cache_dir: PathBuf,
    /// Evict oldest records beyond this total size.
    pub max_cache_size_bytes: u64,
    /// Evict records older than this.
    pub max_cache_age_seconds: u64,
    /// Whether record bodies are compressed tables (always on today;
    /// reserved for raw-table records).
    pub enable_compression: bool,
    /// Whether dependency validation feeds incremental invalidation.
    pub enable_incremental_updates: bool,
    /// Minimum interval between cleanup passes.
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".polydispatch-cache"),
            max_cache_size_bytes: 256 * 1024 * 1024,
            max_cache_age_seconds: 7 * 24 * 60 * 60,
            enable_compression: true,
            enable_incremental_updates: true,
            cleanup_interval_seconds: 24 * 60 * 60,
        }
    }
}

/// Session and lifetime build metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetrics {
    /// Tables deserialized from the cache.
    pub tables_from_cache: u64,
    /// Tables built from scratch.
    pub tables_built_fresh: u64,
    /// Freshly built tables whose compression beat the raw form.
    pub tables_optimized: u64,
    /// Dependency files checked.
    pub dependencies_validated: u64,
    /// Dependency files found changed (or missing).
    pub dependencies_invalidated: u64,
}

impl BuildMetrics {
    /// Fraction of tables served from the cache.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.tables_from_cache + self.tables_built_fresh;
        if total == 0 {
            0.0
        } else {
            self.tables_from_cache as f64 / total as f64
        }
    }

    /// Estimated end-to-end speedup from cache hits, assuming a cached table
    /// costs about a tenth of a fresh build.
    #[must_use]
    pub fn build_speedup_ratio(&self) -> f64 {
        let total = self.tables_from_cache + self.tables_built_fresh;
        if total == 0 {
            return 1.0;
        }
        let effective = self.tables_built_fresh as f64 + self.tables_from_cache as f64 * 0.1;
        if effective == 0.0 {
            10.0
        } else {
            total as f64 / effective
        }
    }
}

/// Stamp of a dependency file at last validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time, nanoseconds since the epoch.
    pub mtime_nanos: u128,
    /// BLAKE3 of the file contents.
    pub content_hash: [u8; 32],
}

/// Tracks dependency-file stamps across sessions.
#[derive(Clone, Debug, Default)]
pub struct DependencyTracker {
    files: BTreeMap<PathBuf, FileStamp>,
}

impl DependencyTracker {
    fn stamp(path: &Path) -> Option<FileStamp> {
        let metadata = fs::metadata(path).ok()?;
        let mtime_nanos = metadata
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_nanos();
        let contents = fs::read(path).ok()?;
        Some(FileStamp {
            mtime_nanos,
            content_hash: *blake3::hash(&contents).as_bytes(),
        })
    }

    /// Re-stamps `path`; returns whether it changed since the last stamp.
    /// Missing files always count as changed.
    pub fn validate(&mut self, path: &Path) -> bool {
        match Self::stamp(path) {
            None => {
                self.files.remove(path);
                true
            }
            Some(current) => {
                let changed = self.files.get(path) != Some(&current);
                self.files.insert(path.to_owned(), current);
                changed
            }
        }
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    tables: DetHashMap<String, Arc<CompressedDispatchTable>>,
    fresh_keys: Vec<String>,
}

/// Manages cached dispatch tables across compilation sessions.
#[derive(Debug)]
pub struct BuildCacheManager {
    config: CacheConfig,
    metrics: BuildMetrics,
    tracker: DependencyTracker,
    session: Option<SessionState>,
    cleanup_ran_at: Option<u128>,
}

impl BuildCacheManager {
    /// Creates a manager over the configured cache directory.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            metrics: BuildMetrics::default(),
            tracker: DependencyTracker::default(),
            session: None,
            cleanup_ran_at: None,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Metrics accumulated so far.
    #[must_use]
    pub const fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    /// Computes the cache key for a signature name and canonical type
    /// signature.
    #[must_use]
    pub fn cache_key(signature_name: &str, type_signature: &[TypeId]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(signature_name.as_bytes());
        hasher.update(&[0]);
        for ty in type_signature {
            hasher.update(&ty.raw().to_le_bytes());
        }
        hasher
            .finalize()
            .as_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Starts a session: resets per-session state and runs a cleanup pass if
    /// the configured interval has elapsed.
    #[tracing::instrument(skip(self))]
    pub fn start_session(&mut self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.config.cache_dir).map_err(|source| CacheError::Io {
            path: self.config.cache_dir.clone(),
            source,
        })?;
        self.session = Some(SessionState::default());

        let now = now_nanos();
        let interval = u128::from(self.config.cleanup_interval_seconds) * 1_000_000_000;
        let due = match self.read_last_cleanup() {
            Some(last) => now.saturating_sub(last) >= interval,
            None => true,
        };
        if due {
            self.cleanup(now)?;
            self.cleanup_ran_at = Some(now);
        }
        Ok(())
    }

    /// Returns the cached table for `(signature_name, type_signature)`,
    /// building (and compressing) it with `build` on a miss.
    pub fn get_or_build_dispatch_table(
        &mut self,
        signature_name: &str,
        type_signature: &[TypeId],
        build: impl FnOnce() -> CompressedDispatchTable,
    ) -> Result<Arc<CompressedDispatchTable>, CacheError> {
        let key = Self::cache_key(signature_name, type_signature);
        let session = self.session.as_mut().ok_or(CacheError::NoSession)?;

        if let Some(table) = session.tables.get(&key) {
            return Ok(Arc::clone(table));
        }

        let path = self.config.cache_dir.join(format!("{key}.{RECORD_EXT}"));
        match read_record(&path, &key) {
            Ok(body) => match CompressedDispatchTable::from_bytes(&body) {
                Ok(table) => {
                    tracing::debug!(signature = signature_name, key = %&key[..12], "cache hit");
                    self.metrics.tables_from_cache += 1;
                    let table = Arc::new(table);
                    session.tables.insert(key, Arc::clone(&table));
                    return Ok(table);
                }
                Err(err) => {
                    tracing::warn!(signature = signature_name, %err, "corrupt cache body; rebuilding");
                }
            },
            Err(CacheError::Io { .. }) => {
                // Plain miss; silent.
            }
            Err(err) => {
                tracing::warn!(signature = signature_name, %err, "corrupt cache record; rebuilding");
            }
        }

        let table = Arc::new(build());
        self.metrics.tables_built_fresh += 1;
        if table.stats.ratio < 1.0 {
            self.metrics.tables_optimized += 1;
        }
        session.tables.insert(key.clone(), Arc::clone(&table));
        session.fresh_keys.push(key);
        Ok(table)
    }

    /// Validates dependency files of `file`, returning the changed ones.
    ///
    /// Each dependency is re-stamped (mtime plus content hash); missing files
    /// count as changed. The tracker is updated in place.
    #[tracing::instrument(skip(self, dependencies), fields(file = %file.display()))]
    pub fn validate_dependencies(
        &mut self,
        file: &Path,
        dependencies: &[PathBuf],
    ) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for dependency in dependencies {
            self.metrics.dependencies_validated += 1;
            if self.tracker.validate(dependency) {
                self.metrics.dependencies_invalidated += 1;
                changed.push(dependency.clone());
            }
        }
        if !changed.is_empty() {
            tracing::debug!(
                dependent = %file.display(),
                changed = changed.len(),
                "dependencies changed; dependent marked for rebuild"
            );
        }
        changed
    }

    /// Ends the session: writes every freshly built table to the cache,
    /// persists the cleanup timestamp, and returns the metrics snapshot.
    #[tracing::instrument(skip(self))]
    pub fn end_session(&mut self) -> Result<BuildMetrics, CacheError> {
        let session = self.session.take().ok_or(CacheError::NoSession)?;
        for key in &session.fresh_keys {
            let table = &session.tables[key];
            let body = table.to_bytes()?;
            let path = self.config.cache_dir.join(format!("{key}.{RECORD_EXT}"));
            write_record(&path, key, &body)?;
        }
        if let Some(at) = self.cleanup_ran_at.take() {
            self.write_last_cleanup(at)?;
        }
        tracing::debug!(
            fresh = session.fresh_keys.len(),
            hit_ratio = self.metrics.cache_hit_ratio(),
            "session ended"
        );
        Ok(self.metrics)
    }

    /// Evicts oldest records first until both the size and age limits hold.
    fn cleanup(&self, now: u128) -> Result<(), CacheError> {
        let dir = &self.config.cache_dir;
        let entries = fs::read_dir(dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut records: Vec<(u128, u64, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());
            records.push((mtime, metadata.len(), path));
        }
        records.sort();

        let max_age = u128::from(self.config.max_cache_age_seconds) * 1_000_000_000;
        let mut total: u64 = records.iter().map(|(_, size, _)| size).sum();
        let mut evicted = 0_usize;
        for (mtime, size, path) in &records {
            let too_big = total > self.config.max_cache_size_bytes;
            let too_old = now.saturating_sub(*mtime) > max_age;
            if !too_big && !too_old {
                break;
            }
            if fs::remove_file(path).is_ok() {
                total -= size;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining_bytes = total, "cache cleanup evicted records");
        }
        Ok(())
    }

    fn read_last_cleanup(&self) -> Option<u128> {
        let path = self.config.cache_dir.join(LAST_CLEANUP_FILE);
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    fn write_last_cleanup(&self, nanos: u128) -> Result<(), CacheError> {
        let path = self.config.cache_dir.join(LAST_CLEANUP_FILE);
        fs::write(&path, nanos.to_string()).map_err(|source| CacheError::Io { path, source })
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
}

/// Writes a record atomically: exclusive temp file, then rename.
///
/// A concurrent session racing on the same key wins or loses the temp-file
/// creation; the loser skips the write, because records are content-addressed
/// and the winner's bytes are equivalent.
fn write_record(path: &Path, key: &str, body: &[u8]) -> Result<(), CacheError> {
    let temp = path.with_extension("tmp");
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp)
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %path.display(), "lost cache write race; skipping");
            return Ok(());
        }
        Err(source) => {
            return Err(CacheError::Io {
                path: temp,
                source,
            });
        }
    };

    let result = (|| {
        file.write_all(&RECORD_MAGIC)?;
        file.write_all(&RECORD_VERSION.to_le_bytes())?;
        file.write_all(&decode_key(key))?;
        file.write_all(&u32::try_from(body.len()).expect("record body exceeds u32").to_le_bytes())?;
        file.write_all(&crc32fast::hash(body).to_le_bytes())?;
        file.write_all(body)?;
        file.sync_all()
    })();
    if let Err(source) = result {
        let _ = fs::remove_file(&temp);
        return Err(CacheError::Io { path: temp, source });
    }
    drop(file);

    fs::rename(&temp, path).map_err(|source| CacheError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Reads and validates a record, returning the body bytes.
fn read_record(path: &Path, expected_key: &str) -> Result<Vec<u8>, CacheError> {
    let data = fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_owned(),
        source,
    })?;
    let corrupt = |reason: &str| CacheError::Corrupt {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };

    if data.len() < 4 + 2 + 32 + 4 + 4 {
        return Err(corrupt("record shorter than header"));
    }
    if data[..4] != RECORD_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != RECORD_VERSION {
        return Err(corrupt("unsupported version"));
    }
    if data[6..38] != decode_key(expected_key) {
        return Err(corrupt("key mismatch"));
    }
    let body_len = u32::from_le_bytes([data[38], data[39], data[40], data[41]]) as usize;
    let crc = u32::from_le_bytes([data[42], data[43], data[44], data[45]]);
    let body = &data[46..];
    if body.len() != body_len {
        return Err(corrupt("truncated body"));
    }
    if crc32fast::hash(body) != crc {
        return Err(corrupt("checksum mismatch"));
    }
    Ok(body.to_vec())
}

fn decode_key(key: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, chunk) in key.as_bytes().chunks(2).take(32).enumerate() {
        let hex = std::str::from_utf8(chunk).unwrap_or("00");
        out[i] = u8::from_str_radix(hex, 16).unwrap_or(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeKind, TypeRegistry};
    use crate::signature::{EffectSet, SignatureAnalyzer};
    use crate::table::{Compressor, TableBuilder};
    use crate::types::SourceSpan;
    use tempfile::TempDir;

    fn sample_table() -> (TypeRegistry, SignatureAnalyzer, CompressedDispatchTable) {
        let mut registry = TypeRegistry::new();
        for name in ["int", "float"] {
            registry.register(name, TypeKind::Primitive, &[]).unwrap();
        }
        let mut analyzer = SignatureAnalyzer::new();
        for (i, param) in ["int", "float"].iter().enumerate() {
            let ty = registry.lookup(param).unwrap();
            analyzer
                .add_implementation(
                    "neg",
                    "math",
                    &[ty],
                    ty,
                    EffectSet::empty(),
                    SourceSpan::new("math.poly", u32::try_from(i).unwrap(), 0, 1, 1),
                    &registry,
                )
                .unwrap();
        }
        let group = analyzer.group("neg", 1).unwrap();
        let table = TableBuilder::default().build(group, &registry);
        let compressed = Compressor::new().compress(group, &table, &registry);
        (registry, analyzer, compressed)
    }

    fn manager(dir: &TempDir) -> BuildCacheManager {
        BuildCacheManager::new(CacheConfig {
            cache_dir: dir.path().to_owned(),
            ..CacheConfig::default()
        })
    }

    #[test]
    fn fresh_build_then_cache_hit_is_bitwise_equal() {
        let dir = TempDir::new().unwrap();
        let (registry, _, compressed) = sample_table();
        let int = registry.lookup("int").unwrap();
        let sig = vec![int];

        let mut first = manager(&dir);
        first.start_session().unwrap();
        let built = first
            .get_or_build_dispatch_table("neg", &sig, || compressed.clone())
            .unwrap();
        let metrics = first.end_session().unwrap();
        assert_eq!(metrics.tables_built_fresh, 1);
        assert_eq!(metrics.tables_from_cache, 0);

        let mut second = manager(&dir);
        second.start_session().unwrap();
        let cached = second
            .get_or_build_dispatch_table("neg", &sig, || panic!("must hit the cache"))
            .unwrap();
        let metrics = second.end_session().unwrap();
        assert_eq!(metrics.tables_from_cache, 1);
        assert_eq!(
            built.to_bytes().unwrap(),
            cached.to_bytes().unwrap(),
            "cached table must equal the fresh build bitwise"
        );
    }

    #[test]
    fn same_session_reuses_without_recounting() {
        let dir = TempDir::new().unwrap();
        let (registry, _, compressed) = sample_table();
        let sig = vec![registry.lookup("int").unwrap()];

        let mut mgr = manager(&dir);
        mgr.start_session().unwrap();
        mgr.get_or_build_dispatch_table("neg", &sig, || compressed.clone())
            .unwrap();
        mgr.get_or_build_dispatch_table("neg", &sig, || panic!("already built this session"))
            .unwrap();
        let metrics = mgr.end_session().unwrap();
        assert_eq!(metrics.tables_built_fresh, 1);
    }

    #[test]
    fn corrupt_records_fall_back_to_fresh_build() {
        let dir = TempDir::new().unwrap();
        let (registry, _, compressed) = sample_table();
        let sig = vec![registry.lookup("int").unwrap()];

        let mut mgr = manager(&dir);
        mgr.start_session().unwrap();
        mgr.get_or_build_dispatch_table("neg", &sig, || compressed.clone())
            .unwrap();
        mgr.end_session().unwrap();

        // Flip a body byte: checksum validation must reject the record.
        let key = BuildCacheManager::cache_key("neg", &sig);
        let path = dir.path().join(format!("{key}.pdt"));
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let mut mgr = manager(&dir);
        mgr.start_session().unwrap();
        let rebuilt = mgr
            .get_or_build_dispatch_table("neg", &sig, || compressed.clone())
            .unwrap();
        let metrics = mgr.end_session().unwrap();
        assert_eq!(metrics.tables_built_fresh, 1);
        assert_eq!(metrics.tables_from_cache, 0);
        assert_eq!(rebuilt.signature_name, "neg");
    }

    #[test]
    fn dependency_validation_detects_changes_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let dep = dir.path().join("unit_a.poly");
        fs::write(&dep, "impl add(int, int)").unwrap();

        let mut mgr = manager(&dir);
        let file = dir.path().join("unit_b.poly");

        // First sight: everything counts as changed.
        let changed = mgr.validate_dependencies(&file, &[dep.clone()]);
        assert_eq!(changed.len(), 1);

        // Unchanged on the second pass.
        let changed = mgr.validate_dependencies(&file, &[dep.clone()]);
        assert!(changed.is_empty());

        // Content change is detected even with a stable apparent mtime.
        fs::write(&dep, "impl add(float, float)").unwrap();
        let changed = mgr.validate_dependencies(&file, &[dep.clone()]);
        assert_eq!(changed.len(), 1);

        // Missing files count as changed.
        fs::remove_file(&dep).unwrap();
        let changed = mgr.validate_dependencies(&file, &[dep]);
        assert_eq!(changed.len(), 1);
        assert_eq!(mgr.metrics().dependencies_validated, 4);
        assert_eq!(mgr.metrics().dependencies_invalidated, 3);
    }

    #[test]
    fn cleanup_evicts_to_the_size_limit_and_stamps_the_pass() {
        let dir = TempDir::new().unwrap();
        let (registry, _, compressed) = sample_table();
        let sig = vec![registry.lookup("int").unwrap()];

        let mut mgr = manager(&dir);
        mgr.start_session().unwrap();
        mgr.get_or_build_dispatch_table("neg", &sig, || compressed.clone())
            .unwrap();
        mgr.end_session().unwrap();
        assert!(dir.path().join(LAST_CLEANUP_FILE).exists());

        // A zero-size budget evicts every record on the next due pass.
        let mut strict = BuildCacheManager::new(CacheConfig {
            cache_dir: dir.path().to_owned(),
            max_cache_size_bytes: 0,
            cleanup_interval_seconds: 0,
            ..CacheConfig::default()
        });
        strict.start_session().unwrap();
        strict.end_session().unwrap();
        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("pdt"))
            .collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn operations_require_a_session() {
        let dir = TempDir::new().unwrap();
        let (registry, _, compressed) = sample_table();
        let sig = vec![registry.lookup("int").unwrap()];
        let mut mgr = manager(&dir);
        let err = mgr.get_or_build_dispatch_table("neg", &sig, || compressed);
        assert!(matches!(err, Err(CacheError::NoSession)));
    }

    #[test]
    fn cache_keys_are_stable_and_distinct() {
        let a = BuildCacheManager::cache_key("add", &[TypeId::from_index(1)]);
        let b = BuildCacheManager::cache_key("add", &[TypeId::from_index(1)]);
        let c = BuildCacheManager::cache_key("add", &[TypeId::from_index(2)]);
        let d = BuildCacheManager::cache_key("sub", &[TypeId::from_index(1)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }
}
