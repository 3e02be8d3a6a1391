//! On-disk persistence of sealed chunks across shutdown.
//!
//! File Naming
//! - `<prefix>_<encoded-params>_<generation>.buf`
//! - params are URL-encoded individually and joined with `#`, so any
//!   byte sequence round-trips through a filename
//! - the generation id is wall-clock millis plus a process-wide counter
//!
//! Contents are the chunk's raw bytes, no framing.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapOptions;
use tracing::{debug, warn};

use kiroku_core::error::{Error, Result};
use kiroku_core::time::now_millis;

const BACKUP_EXTENSION: &str = "buf";
const PARAM_SEPARATOR: &str = "#";

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Directory-backed store of saved chunks.
#[derive(Debug)]
pub struct FileBackup {
    dir: PathBuf,
    prefix: String,
}

impl FileBackup {
    /// Open (and create if needed) the backup directory. The optional
    /// user prefix is appended to the engine's own.
    pub fn new(dir: impl AsRef<Path>, prefix: Option<&str>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::Io {
            message: format!("failed to create backup directory {:?}", dir),
            source: e,
        })?;
        let prefix = match prefix {
            Some(extra) => format!("kiroku_buffer_{}", extra),
            None => "kiroku_buffer".to_string(),
        };
        Ok(Self { dir, prefix })
    }

    fn file_name(&self, params: &[String]) -> String {
        let encoded: Vec<String> = params
            .iter()
            .map(|p| urlencoding::encode(p).into_owned())
            .collect();
        let generation = format!("{}{:04}", now_millis(), GENERATION.fetch_add(1, Ordering::Relaxed) % 10_000);
        format!(
            "{}_{}_{}.{}",
            self.prefix,
            encoded.join(PARAM_SEPARATOR),
            generation,
            BACKUP_EXTENSION
        )
    }

    /// Persist `bytes` under a fresh generation of `params`. Writes to a
    /// temporary sibling first so a crash never leaves a torn `.buf`.
    pub fn save_buffer(&self, params: &[String], bytes: &[u8]) -> Result<()> {
        let path = self.dir.join(self.file_name(params));
        let tmp = path.with_extension("tmp");

        let mut file = File::create(&tmp).map_err(|e| Error::Io {
            message: format!("failed to create backup file {:?}", tmp),
            source: e,
        })?;
        file.write_all(bytes).map_err(|e| Error::Io {
            message: format!("failed to write backup file {:?}", tmp),
            source: e,
        })?;
        file.sync_all().map_err(|e| Error::Io {
            message: format!("failed to sync backup file {:?}", tmp),
            source: e,
        })?;
        fs::rename(&tmp, &path).map_err(|e| Error::Io {
            message: format!("failed to finalize backup file {:?}", path),
            source: e,
        })?;

        debug!(?path, bytes = bytes.len(), "saved chunk to backup file");
        Ok(())
    }

    /// Enumerate saved chunks in the backup directory, oldest generation
    /// first. Files that don't parse are skipped with a warning.
    pub fn saved_files(&self) -> Vec<SavedBuffer> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = ?self.dir, error = %e, "failed to scan backup directory");
                return Vec::new();
            }
        };

        let mut saved = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.parse_file_name(name) {
                Some(params) => saved.push(SavedBuffer { path, params }),
                None => {
                    if name.starts_with(&self.prefix) {
                        warn!(file = name, "skipping unparsable backup file");
                    }
                }
            }
        }
        saved.sort_by(|a, b| a.path.cmp(&b.path));
        saved
    }

    fn parse_file_name(&self, name: &str) -> Option<Vec<String>> {
        let stem = name
            .strip_prefix(&self.prefix)?
            .strip_prefix('_')?
            .strip_suffix(&format!(".{}", BACKUP_EXTENSION))?;
        // The generation is the trailing field; encoded params may
        // themselves contain '_'.
        let (encoded_params, generation) = stem.rsplit_once('_')?;
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        encoded_params
            .split(PARAM_SEPARATOR)
            .map(|p| urlencoding::decode(p).map(|d| d.into_owned()).ok())
            .collect()
    }
}

/// One on-disk chunk, ready for replay.
pub struct SavedBuffer {
    path: PathBuf,
    params: Vec<String>,
}

impl SavedBuffer {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Map the file privately (copy-on-write, read-only) and hand the
    /// parsed params and bytes to `callback`.
    pub fn open<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[String], &[u8]) -> Result<()>,
    {
        let file = File::open(&self.path).map_err(|e| Error::Io {
            message: format!("failed to open backup file {:?}", self.path),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| Error::Io {
                message: format!("failed to stat backup file {:?}", self.path),
                source: e,
            })?
            .len();
        if len == 0 {
            return callback(&self.params, &[]);
        }
        let mmap = unsafe {
            MmapOptions::new()
                .map_copy_read_only(&file)
                .map_err(|e| Error::Io {
                    message: format!("failed to mmap backup file {:?}", self.path),
                    source: e,
                })?
        };
        callback(&self.params, &mmap[..])
    }

    /// Delete the file. Failures are logged, not raised.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to remove backup file");
        } else {
            debug!(path = ?self.path, "removed backup file");
        }
    }
}
