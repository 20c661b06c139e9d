//! Archive-aware ROM identification
//!
//! Finds the one ROM-like payload inside a plain file, a zip, or a 7z and
//! produces its CRC32. Containers that carry a per-entry CRC are trusted;
//! nothing is decompressed unless a 7z entry lacks one.
//!
//! Entry selection differs by container: zip picks the largest allowed
//! entry, 7z picks the first allowed entry in listing order without looking
//! at sizes.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sevenz_rust::{Password, SevenZReader};

use crate::cache::{FingerprintCache, FingerprintKey};
use crate::checksum::{self, Checksum};
use crate::error::{Error, Result};

const ZIP_SIGNATURES: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const SEVEN_ZIP_SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";

/// Set of lowercase file extensions (without the dot) a platform accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(BTreeSet<String>);

impl Extensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a file or entry name carries one of the allowed extensions
    pub fn matches(&self, name: &str) -> bool {
        extension_of(name)
            .map(|ext| self.0.contains(&ext))
            .unwrap_or(false)
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// Container format, decided by extension and confirmed by signature bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    SevenZip,
    Plain,
}

impl ContainerKind {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("zip") => ContainerKind::Zip,
            Some("7z") => ContainerKind::SevenZip,
            _ => ContainerKind::Plain,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ContainerKind::Zip => "zip",
            ContainerKind::SevenZip => "7z",
            ContainerKind::Plain => "plain",
        }
    }

    fn signature_matches(self, head: &[u8]) -> bool {
        match self {
            ContainerKind::Zip => ZIP_SIGNATURES.iter().any(|sig| head.starts_with(sig)),
            ContainerKind::SevenZip => head.starts_with(SEVEN_ZIP_SIGNATURE),
            ContainerKind::Plain => true,
        }
    }

    /// Determine the kind of `path` and reject renamed files
    pub fn detect(path: &Path) -> Result<Self> {
        let kind = Self::from_path(path);
        if kind == ContainerKind::Plain {
            return Ok(kind);
        }

        let mut head = [0u8; 6];
        let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut filled = 0;
        while filled < head.len() {
            match file.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(path, e)),
            }
        }

        if kind.signature_matches(&head[..filled]) {
            Ok(kind)
        } else {
            Err(Error::SignatureMismatch {
                path: path.to_path_buf(),
                expected: kind.label(),
            })
        }
    }
}

/// One file inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size_bytes: u64,
    pub stored_checksum: Option<Checksum>,
}

/// The selected payload and its checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    pub entry_name: String,
    pub checksum: Checksum,
}

/// Identifies ROM payloads, optionally through a checksum cache
#[derive(Debug, Clone)]
pub struct ArchiveInspector {
    cache: Option<FingerprintCache>,
}

impl ArchiveInspector {
    pub fn new(cache: FingerprintCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Inspector that recomputes every checksum
    pub fn uncached() -> Self {
        Self { cache: None }
    }

    /// Find the relevant payload of `path` and its checksum.
    ///
    /// `Ok(None)` means nothing in the file carries an allowed extension.
    pub fn identify(&self, path: &Path, allowed: &Extensions) -> Result<Option<Identified>> {
        match ContainerKind::detect(path)? {
            ContainerKind::Plain => self.identify_plain(path, allowed),
            ContainerKind::Zip => self.identify_zip(path, allowed),
            ContainerKind::SevenZip => self.identify_seven_zip(path, allowed),
        }
    }

    fn identify_plain(&self, path: &Path, allowed: &Extensions) -> Result<Option<Identified>> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        if !allowed.matches(&file_name) {
            return Ok(None);
        }

        let checksum = self.cached(path, None, || {
            checksum::checksum_file(path).map_err(|e| Error::io(path, e))
        })?;

        Ok(Some(Identified {
            entry_name: file_name,
            checksum,
        }))
    }

    fn identify_zip(&self, path: &Path, allowed: &Extensions) -> Result<Option<Identified>> {
        let entries = list_zip_entries(path)?;
        let Some(selected) = select_largest(&entries, allowed) else {
            tracing::debug!("No allowed entries in {}", path.display());
            return Ok(None);
        };
        tracing::debug!("Selected {} ({} bytes) from {}", selected.name, selected.size_bytes, path.display());

        let stored = selected
            .stored_checksum
            .ok_or_else(|| Error::archive(path, format!("no CRC stored for {}", selected.name)))?;
        let checksum = self.cached(path, Some(selected.name.clone()), || Ok(stored))?;

        Ok(Some(Identified {
            entry_name: selected.name.clone(),
            checksum,
        }))
    }

    fn identify_seven_zip(&self, path: &Path, allowed: &Extensions) -> Result<Option<Identified>> {
        let entries = list_seven_zip_entries(path)?;
        let Some(selected) = select_first(&entries, allowed) else {
            tracing::debug!("No allowed entries in {}", path.display());
            return Ok(None);
        };
        tracing::debug!("Selected {} from {}", selected.name, path.display());

        let checksum = self.cached(path, Some(selected.name.clone()), || match selected.stored_checksum {
            Some(stored) => Ok(stored),
            None => decompress_checksum(path, &selected.name),
        })?;

        Ok(Some(Identified {
            entry_name: selected.name.clone(),
            checksum,
        }))
    }

    fn cached<F>(&self, path: &Path, entry: Option<String>, compute: F) -> Result<Checksum>
    where
        F: FnOnce() -> Result<Checksum>,
    {
        match &self.cache {
            Some(cache) => {
                let key = FingerprintKey::for_file(path, entry)?;
                cache.resolve(&key, compute)
            }
            None => compute(),
        }
    }
}

/// List the file entries of a zip or 7z container (empty for plain files)
pub fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    match ContainerKind::detect(path)? {
        ContainerKind::Zip => list_zip_entries(path),
        ContainerKind::SevenZip => list_seven_zip_entries(path),
        ContainerKind::Plain => Ok(Vec::new()),
    }
}

fn list_zip_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| Error::archive(path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        // Raw access reads the central directory record without inflating
        let entry = archive.by_index_raw(i).map_err(|e| Error::archive(path, e))?;
        if entry.is_dir() {
            continue;
        }
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            size_bytes: entry.size(),
            stored_checksum: Some(Checksum::new(entry.crc32())),
        });
    }
    Ok(entries)
}

fn list_seven_zip_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let reader = SevenZReader::open(path, Password::empty()).map_err(|e| Error::archive(path, e))?;

    let entries = reader
        .archive()
        .files
        .iter()
        .filter(|entry| !entry.is_directory())
        .map(|entry| ArchiveEntry {
            name: entry.name().to_string(),
            size_bytes: entry.size(),
            stored_checksum: entry.has_crc.then(|| Checksum::new(entry.crc as u32)),
        })
        .collect();
    Ok(entries)
}

/// Largest allowed entry; the earliest one wins a size tie
fn select_largest<'a>(entries: &'a [ArchiveEntry], allowed: &Extensions) -> Option<&'a ArchiveEntry> {
    entries
        .iter()
        .filter(|e| allowed.matches(&e.name))
        .fold(None, |best: Option<&ArchiveEntry>, entry| match best {
            Some(b) if b.size_bytes >= entry.size_bytes => Some(b),
            _ => Some(entry),
        })
}

fn select_first<'a>(entries: &'a [ArchiveEntry], allowed: &Extensions) -> Option<&'a ArchiveEntry> {
    entries.iter().find(|e| allowed.matches(&e.name))
}

/// Decompress one 7z entry and checksum its bytes
pub(crate) fn decompress_checksum(path: &Path, entry_name: &str) -> Result<Checksum> {
    let mut reader = SevenZReader::open(path, Password::empty()).map_err(|e| Error::archive(path, e))?;
    let mut outcome: Option<io::Result<Checksum>> = None;

    reader
        .for_each_entries(|entry, data| {
            if entry.name() != entry_name {
                return Ok(true);
            }
            outcome = Some(checksum::checksum_reader(data));
            Ok(false)
        })
        .map_err(|e| Error::archive(path, e))?;

    match outcome {
        Some(result) => result.map_err(|e| Error::io(path, e)),
        None => Err(Error::archive(path, format!("entry {} not found", entry_name))),
    }
}
