//! Content fingerprints for incremental ingestion.
//!
//! The store keeps a snapshot of `normalized path -> sha256` for every tracked
//! source file. Each [`FingerprintStore::diff`] compares a fresh scan against
//! the previous snapshot and then replaces the snapshot wholesale, so running
//! it twice on an unchanged directory yields an empty diff the second time.

use crate::error::{IngestError, Result};
use crate::models::FileRecord;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use walkdir::WalkDir;

const HASH_BLOCK_SIZE: usize = 8192;

pub type Snapshot = BTreeMap<String, String>;

/// Durable storage for the fingerprint snapshot.
pub trait FingerprintRepository {
    fn load(&self) -> Result<Snapshot>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
    /// Removes every record. Returns whether anything was stored before.
    fn clear(&self) -> Result<bool>;
}

/// Snapshot stored as a pretty-printed JSON object on disk.
#[derive(Debug, Clone)]
pub struct JsonFingerprintFile {
    path: PathBuf,
}

impl JsonFingerprintFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FingerprintRepository for JsonFingerprintFile {
    fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        let stored: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        Ok(stored
            .into_iter()
            .map(|(path, hash)| (normalize_path_str(&path), hash))
            .collect())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFingerprints {
    snapshot: Mutex<Option<Snapshot>>,
}

impl InMemoryFingerprints {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FingerprintRepository for InMemoryFingerprints {
    fn load(&self) -> Result<Snapshot> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|_| IngestError::InvalidArgument("fingerprint lock poisoned".to_string()))?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| IngestError::InvalidArgument("fingerprint lock poisoned".to_string()))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| IngestError::InvalidArgument("fingerprint lock poisoned".to_string()))?;
        Ok(guard.take().is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDiff {
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    previous: BTreeMap<String, String>,
}

impl FingerprintDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Every path whose index entries must be dropped this run.
    pub fn stale(&self) -> impl Iterator<Item = &String> {
        self.deleted.iter().chain(self.changed.iter())
    }
}

pub struct FingerprintStore<R: FingerprintRepository> {
    repository: R,
    extensions: Vec<String>,
}

impl<R: FingerprintRepository> FingerprintStore<R> {
    pub fn new(repository: R, extensions: &[String]) -> Self {
        Self {
            repository,
            extensions: extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn diff(&self, directory: &Path) -> Result<FingerprintDiff> {
        let previous = self.repository.load()?;
        let mut current = Snapshot::new();
        let mut changed = BTreeSet::new();

        for path in discover_source_files(directory, &self.extensions)? {
            let normalized = normalize_path(&path);
            let hash = calculate_file_hash(&path)?;

            if previous.get(&normalized) != Some(&hash) {
                changed.insert(normalized.clone());
            }
            current.insert(normalized, hash);
        }

        let deleted: BTreeSet<String> = previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        let removed = deleted
            .iter()
            .filter_map(|path| previous.get(path).map(|hash| (path.clone(), hash.clone())))
            .collect();

        self.repository.save(&current)?;

        if changed.is_empty() {
            info!(directory = %directory.display(), "no changed files");
        } else {
            info!(count = changed.len(), "changed files detected");
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "deleted files detected");
        }

        Ok(FingerprintDiff {
            changed,
            deleted,
            previous: removed,
        })
    }

    /// Rewrites the snapshot so that `paths` show up again in the next diff:
    /// changed paths lose their record and deleted paths get their previous
    /// hash back.
    pub fn invalidate<'a, I>(&self, diff: &FingerprintDiff, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut snapshot = self.repository.load()?;
        let mut touched = false;

        for path in paths {
            if let Some(hash) = diff.previous.get(path) {
                snapshot.insert(path.clone(), hash.clone());
                touched = true;
            } else if snapshot.remove(path).is_some() {
                touched = true;
            }
            debug!(path = %path, "fingerprint invalidated");
        }

        if touched {
            self.repository.save(&snapshot)?;
        }
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<FileRecord>> {
        Ok(self
            .repository
            .load()?
            .into_iter()
            .map(|(normalized_path, content_hash)| FileRecord {
                normalized_path,
                content_hash,
            })
            .collect())
    }

    pub fn clear(&self) -> Result<bool> {
        self.repository.clear()
    }
}

/// Lists files under `folder` whose extension is in `extensions`, sorted.
pub fn discover_source_files(folder: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(IngestError::NotFound(format!(
            "source directory {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|error| IngestError::Io(error.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let tracked = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            });

        if tracked {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

/// SHA-256 of the whole file, read in fixed-size blocks.
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => IngestError::NotFound(path.display().to_string()),
        _ => IngestError::Io(error),
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BLOCK_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn normalize_path(path: &Path) -> String {
    normalize_path_str(&path.to_string_lossy())
}

pub fn normalize_path_str(path: &str) -> String {
    path.replace('\\', "/")
}
