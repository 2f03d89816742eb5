//! Durable model volume.
//!
//! The job reads and writes model files on a volume mounted at a fixed path.
//! Writes are not considered durable until [`Volume::commit`] is called; a run
//! that never commits leaves no trace in the commit manifest, even if the tool
//! left a partial file behind.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bookkeeping directory inside the mount; never reported as a model file.
pub const META_DIR: &str = ".quantlite";
pub const COMMIT_MANIFEST: &str = "commits.jsonl";

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Path {0} is outside volume mounted at {1}")]
    OutsideMount(PathBuf, PathBuf),

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to commit volume '{volume}': {source}")]
    Commit {
        volume: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt commit manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
}

/// Handle to the durable store, passed explicitly into the job.
pub trait Volume {
    fn name(&self) -> &str;

    /// Whether a file exists at `path` on the volume.
    fn exists(&self, path: &Path) -> bool;

    /// File size in bytes.
    fn size(&self, path: &Path) -> Result<u64, VolumeError>;

    /// Make this run's writes durable and visible to later runs.
    fn commit(&self) -> Result<CommitRecord, VolumeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedFile {
    /// Path relative to the mount root.
    pub path: String,
    pub bytes: u64,
}

/// One line of the commit manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub volume: String,
    pub committed_at: DateTime<Utc>,
    /// Files added or changed since the previous commit (or since open).
    pub files: Vec<CommittedFile>,
}

type Fingerprint = (u64, Option<SystemTime>);

/// Volume backed by a local directory (the bind mount inside the sandbox).
#[derive(Debug)]
pub struct LocalVolume {
    name: String,
    root: PathBuf,
    /// State of every file as of open / last commit.
    baseline: Mutex<BTreeMap<PathBuf, Fingerprint>>,
}

impl LocalVolume {
    /// Bind an existing directory. Reads only; prior contents are left untouched.
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, VolumeError> {
        let root = root.into();
        let baseline = scan(&root).map_err(|source| VolumeError::Stat {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            root,
            baseline: Mutex::new(baseline),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(META_DIR).join(COMMIT_MANIFEST)
    }

    fn check_inside(&self, path: &Path) -> Result<(), VolumeError> {
        if path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(VolumeError::OutsideMount(
                path.to_path_buf(),
                self.root.clone(),
            ))
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// All commit records, oldest first. Missing manifest → empty.
    pub fn commit_history(&self) -> Result<Vec<CommitRecord>, VolumeError> {
        let path = self.manifest_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(VolumeError::Stat { path, source }),
        };
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| VolumeError::Stat {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: CommitRecord =
                serde_json::from_str(&line).map_err(|e| VolumeError::Manifest {
                    path: path.clone(),
                    message: format!("line {}: {}", idx + 1, e),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn latest_commit(&self) -> Result<Option<CommitRecord>, VolumeError> {
        Ok(self.commit_history()?.pop())
    }

    /// True when the newest commit mentioning `path` recorded its current size.
    pub fn is_committed(&self, path: &Path) -> Result<bool, VolumeError> {
        self.check_inside(path)?;
        if !path.is_file() {
            return Ok(false);
        }
        let rel = self.relative(path);
        let size = self.size(path)?;
        let history = self.commit_history()?;
        let last = history
            .iter()
            .rev()
            .find_map(|r| r.files.iter().find(|f| f.path == rel));
        Ok(last.is_some_and(|f| f.bytes == size))
    }

    fn append_record(&self, record: &CommitRecord) -> std::io::Result<()> {
        let path = self.manifest_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(f, "{}", line)?;
        f.sync_all()
    }
}

impl Volume for LocalVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &Path) -> bool {
        self.check_inside(path).is_ok() && path.is_file()
    }

    fn size(&self, path: &Path) -> Result<u64, VolumeError> {
        self.check_inside(path)?;
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|source| VolumeError::Stat {
                path: path.to_path_buf(),
                source,
            })
    }

    fn commit(&self) -> Result<CommitRecord, VolumeError> {
        let commit_err = |source: std::io::Error| VolumeError::Commit {
            volume: self.name.clone(),
            source,
        };
        let current = scan(&self.root).map_err(commit_err)?;
        let mut baseline = self
            .baseline
            .lock()
            .map_err(|_| commit_err(std::io::Error::other("volume baseline lock poisoned")))?;

        let mut files = Vec::new();
        for (path, fp) in &current {
            if baseline.get(path) == Some(fp) {
                continue;
            }
            File::open(path)
                .and_then(|f| f.sync_all())
                .map_err(commit_err)?;
            files.push(CommittedFile {
                path: self.relative(path),
                bytes: fp.0,
            });
        }
        sync_dir(&self.root).map_err(commit_err)?;

        let record = CommitRecord {
            volume: self.name.clone(),
            committed_at: Utc::now(),
            files,
        };
        self.append_record(&record).map_err(commit_err)?;
        *baseline = current;

        tracing::info!(
            volume = %self.name,
            files = record.files.len(),
            "volume committed"
        );
        Ok(record)
    }
}

/// Regular files under `root`, skipping the bookkeeping directory.
fn scan(root: &Path) -> std::io::Result<BTreeMap<PathBuf, Fingerprint>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let ty = entry.file_type()?;
            if ty.is_dir() {
                if dir == root && entry.file_name() == META_DIR {
                    continue;
                }
                stack.push(path);
            } else if ty.is_file() {
                let meta = entry.metadata()?;
                out.insert(path, (meta.len(), meta.modified().ok()));
            }
        }
    }
    Ok(out)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
