//! ROM folder scanner
//!
//! Walks one ROM folder, identifies each file, and looks its checksum up in
//! the catalog. A file that fails to open is reported and skipped; a catalog
//! failure is logged and the ROM is treated as unmatched.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::archive::{ArchiveInspector, Identified};
use crate::catalog::ReferenceCatalog;
use crate::config::{UnmatchedTitle, DEFAULT_STORE_FILE_NAME};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::store::RomRecord;

/// Progress information during scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub total_files: usize,
    pub scanned_files: usize,
    pub current_file: String,
}

/// Outcome of scanning one folder
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Records for every file that produced a checksum, in folder order
    pub records: Vec<RomRecord>,
    /// Files with a checksum but no catalog entry
    pub unmatched: Vec<String>,
    /// Files without an allowed ROM payload
    pub skipped: Vec<String>,
    /// Files that could not be read
    pub failures: Vec<(PathBuf, Error)>,
}

/// ROM folder scanner
pub struct RomScanner<'a> {
    inspector: ArchiveInspector,
    catalog: &'a dyn ReferenceCatalog,
    unmatched_title: UnmatchedTitle,
    store_file_name: String,
}

impl<'a> RomScanner<'a> {
    pub fn new(inspector: ArchiveInspector, catalog: &'a dyn ReferenceCatalog) -> Self {
        Self {
            inspector,
            catalog,
            unmatched_title: UnmatchedTitle::default(),
            store_file_name: DEFAULT_STORE_FILE_NAME.to_string(),
        }
    }

    /// Name of the metadata file, which is never scanned as a ROM
    pub fn with_store_file_name(mut self, store_file_name: impl Into<String>) -> Self {
        self.store_file_name = store_file_name.into();
        self
    }

    pub fn with_unmatched_title(mut self, unmatched_title: UnmatchedTitle) -> Self {
        self.unmatched_title = unmatched_title;
        self
    }

    /// Scan `folder` for `platform`, leaving out file names in `skip`
    pub fn scan(
        &self,
        folder: &Path,
        platform: &Platform,
        skip: &HashSet<String>,
        progress_callback: Option<&dyn Fn(ScanProgress)>,
    ) -> Result<ScanReport> {
        let allowed = platform.allowed_extensions();
        let mut report = ScanReport::default();
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for path in folder_files(folder)? {
            let Some(name) = path.file_name().and_then(|s| s.to_str()).map(str::to_string) else {
                tracing::warn!("Skipping {}: file name is not valid UTF-8", path.display());
                let source = io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8");
                report.failures.push((path.clone(), Error::io(path, source)));
                continue;
            };
            if name != self.store_file_name && !skip.contains(&name) {
                files.push((path, name));
            }
        }

        let total = files.len();

        for (scanned, (path, file_name)) in files.into_iter().enumerate() {
            if let Some(callback) = progress_callback {
                callback(ScanProgress {
                    total_files: total,
                    scanned_files: scanned + 1,
                    current_file: file_name.clone(),
                });
            }

            let identified = match self.inspector.identify(&path, &allowed) {
                Ok(Some(identified)) => identified,
                Ok(None) => {
                    tracing::debug!("No {} ROM in {}", platform.abbreviation, path.display());
                    report.skipped.push(file_name);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    report.failures.push((path, e));
                    continue;
                }
            };

            let record = match self.resolve(&file_name, &identified) {
                Some(record) => record,
                None => {
                    report.unmatched.push(file_name.clone());
                    RomRecord {
                        file: file_name,
                        game: self.fallback_title(&identified.entry_name),
                        ..RomRecord::default()
                    }
                }
            };
            report.records.push(record);
        }

        tracing::info!(
            "Scanned {}: {} records, {} unmatched, {} skipped, {} failed",
            folder.display(),
            report.records.len(),
            report.unmatched.len(),
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Catalog record for a checksum, `None` when unknown or the lookup failed
    fn resolve(&self, file_name: &str, identified: &Identified) -> Option<RomRecord> {
        let info = match self.catalog.lookup_by_checksum(&identified.checksum) {
            Ok(info) => info?,
            Err(e) => {
                tracing::warn!("Catalog lookup failed for {} ({}): {}", file_name, identified.checksum, e);
                return None;
            }
        };
        tracing::debug!("{} [{}] -> {}", file_name, identified.checksum, info.title);
        Some(RomRecord {
            file: file_name.to_string(),
            game: info.title,
            developer: info.developer,
            description: info.description,
        })
    }

    fn fallback_title(&self, entry_name: &str) -> String {
        match self.unmatched_title {
            UnmatchedTitle::Blank => String::new(),
            UnmatchedTitle::FileStem => Path::new(entry_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// Regular files directly inside `folder`, sorted by name
pub fn folder_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(Error::io(
            folder,
            io::Error::new(io::ErrorKind::NotFound, "ROM folder does not exist"),
        ));
    }

    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() => Some(Ok(e.into_path())),
            Ok(_) => None,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| folder.to_path_buf());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"));
                Some(Err(Error::io(path, source)))
            }
        })
        .collect()
}
