//! Pegasus `metadata.pegasus.txt` store
//!
//! The file is line oriented: `field: value`, with indented lines continuing
//! the previous value. Everything before the first `game:` line is the
//! collection header; each `game:` line starts a new block that runs until
//! the next one. Blank lines carry no meaning.
//!
//! Parsing keeps every raw line, so an untouched document renders back to the
//! exact bytes it was read from.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogHit;
use crate::error::{Error, Result};
use crate::platform::{LaunchTemplate, Platform};

/// Fields this store reads and writes
pub const RECOGNIZED_FIELDS: &[&str] = &[
    "game",
    "file",
    "developer",
    "publisher",
    "genre",
    "tag",
    "summary",
    "description",
    "players",
    "release",
    "rating",
    "collection",
    "shortname",
    "extensions",
    "launch",
];

/// Fields the data edit view exposes per game
pub const EDITABLE_FIELDS: &[&str] = &[
    "game",
    "developer",
    "publisher",
    "genre",
    "tag",
    "summary",
    "description",
    "players",
    "release",
    "rating",
];

const BLOCK_START: &str = "game:";

/// Split `field: value` into its parts; `None` for comments, blanks and continuations
fn split_field(line: &str) -> Option<(&str, &str)> {
    if line.starts_with(char::is_whitespace) || line.starts_with('#') {
        return None;
    }
    let (field, value) = line.split_once(':')?;
    let field = field.trim();
    if field.is_empty() || field.contains(char::is_whitespace) {
        return None;
    }
    Some((field, value.trim()))
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(char::is_whitespace) && !line.trim().is_empty()
}

/// Render one field; extra lines of a multi-line value become indented
/// continuation lines, blank ones a lone `.`
pub fn format_field(field: &str, value: &str) -> String {
    let mut lines = value.trim().lines();
    let mut out = format!("{}: {}\n", field, lines.next().unwrap_or("").trim());
    for line in lines {
        let line = line.trim();
        out.push_str("  ");
        out.push_str(if line.is_empty() { "." } else { line });
        out.push('\n');
    }
    out
}

/// How `set_fields` decides which blocks a game key refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMatch {
    /// Title contains the key; overlapping titles all match
    #[default]
    Contains,
    /// Title equals the key
    Exact,
}

impl KeyMatch {
    pub fn matches(self, title: &str, key: &str) -> bool {
        match self {
            KeyMatch::Contains => title.contains(key),
            KeyMatch::Exact => title == key,
        }
    }
}

/// One game entry: the raw lines from its `game:` line up to the next block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBlock {
    lines: Vec<String>,
}

impl MetadataBlock {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// `(field, value)` pairs in order, continuation lines folded into their value
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in &self.lines {
            if let Some((field, value)) = split_field(line) {
                fields.push((field.to_string(), value.to_string()));
            } else if is_continuation(line) {
                if let Some((_, value)) = fields.last_mut() {
                    let text = line.trim();
                    value.push('\n');
                    if text != "." {
                        value.push_str(text);
                    }
                }
            }
        }
        fields
    }

    /// First value of `field`
    pub fn get(&self, field: &str) -> Option<String> {
        self.fields()
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    pub fn game(&self) -> String {
        self.lines
            .first()
            .and_then(|l| split_field(l))
            .map(|(_, v)| v.to_string())
            .unwrap_or_default()
    }

    pub fn file(&self) -> Option<String> {
        self.lines
            .iter()
            .filter_map(|l| split_field(l))
            .find(|(f, _)| *f == "file")
            .map(|(_, v)| v.to_string())
    }

    /// A block counts as mapped once its title is filled in
    pub fn is_mapped(&self) -> bool {
        !self.game().is_empty()
    }

    /// Replace the first line of each field in `values`; absent fields are not added
    fn replace_fields(&mut self, values: &BTreeMap<String, String>) -> usize {
        let mut done: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(self.lines.len());
        let mut replaced = 0;
        let mut skipping_continuation = false;

        for line in self.lines.drain(..) {
            if skipping_continuation && is_continuation(&line) {
                continue;
            }
            skipping_continuation = false;

            let target = split_field(&line)
                .and_then(|(field, _)| values.get_key_value(field))
                .filter(|(field, _)| !done.contains(field.as_str()));

            match target {
                Some((field, value)) => {
                    let mut new_line = format_field(field, value);
                    if !line.ends_with('\n') {
                        new_line.pop();
                    }
                    out.push(new_line);
                    done.insert(field.as_str());
                    replaced += 1;
                    skipping_continuation = true;
                }
                None => out.push(line),
            }
        }

        self.lines = out;
        replaced
    }
}

/// Header lines plus game blocks, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDocument {
    pub header: Vec<String>,
    pub blocks: Vec<MetadataBlock>,
}

impl MetadataDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = MetadataDocument::default();
        for line in text.split_inclusive('\n') {
            if line.starts_with(BLOCK_START) {
                doc.blocks.push(MetadataBlock {
                    lines: vec![line.to_string()],
                });
            } else if let Some(block) = doc.blocks.last_mut() {
                block.lines.push(line.to_string());
            } else {
                doc.header.push(line.to_string());
            }
        }
        doc
    }

    pub fn render(&self) -> String {
        self.header
            .iter()
            .chain(self.blocks.iter().flat_map(|b| b.lines.iter()))
            .map(String::as_str)
            .collect()
    }

    /// Read an existing store; a missing file is `Error::StoreMissing`
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::parse(&read_store(path)?))
    }

    /// Header field values (`collection`, `shortname`, ...)
    pub fn header_fields(&self) -> Vec<(String, String)> {
        MetadataBlock {
            lines: self.header.clone(),
        }
        .fields()
    }
}

/// A resolved ROM ready to be written as a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomRecord {
    pub file: String,
    pub game: String,
    pub developer: String,
    pub description: String,
}

impl RomRecord {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format_field("game", &self.game));
        out.push_str(&format_field("file", &self.file));
        out.push_str(&format_field("developer", &self.developer));
        out.push_str(&format_field("description", &self.description));
        out.push('\n');
        out
    }
}

fn read_store(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoreMissing(path.to_path_buf())),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replace the file's contents through a temp file and rename
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(contents.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| Error::io(&temp_path, e))?;
    drop(writer);
    fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))
}

/// Split a store file into its game blocks (header excluded)
pub fn read_blocks(path: &Path) -> Result<Vec<MetadataBlock>> {
    Ok(MetadataDocument::read(path)?.blocks)
}

/// Every `file:` value across `blocks`
pub fn existing_files(blocks: &[MetadataBlock]) -> HashSet<String> {
    blocks
        .iter()
        .flat_map(|b| b.lines.iter())
        .filter_map(|l| split_field(l))
        .filter(|(f, _)| *f == "file")
        .map(|(_, v)| v.to_string())
        .collect()
}

/// Collection header for `platform`
pub fn render_header(platform: &Platform, launch: &LaunchTemplate) -> String {
    let mut out = String::new();
    out.push_str(&format_field("collection", &platform.system_name));
    out.push_str(&format_field("shortname", &platform.abbreviation));
    out.push_str(&format_field("extensions", &platform.extensions.join(",")));
    out.push_str(&format_field("launch", &launch.expand(&platform.core)));
    out.push('\n');
    out
}

/// Write a fresh store, replacing anything already at `path`
pub fn generate(path: &Path, platform: &Platform, launch: &LaunchTemplate, records: &[RomRecord]) -> Result<()> {
    let mut contents = render_header(platform, launch);
    for record in records {
        contents.push_str(&record.render());
    }
    write_atomic(path, &contents)?;

    tracing::info!("Generated {} with {} games", path.display(), records.len());
    Ok(())
}

/// Append blocks for records whose file is not in the store yet.
///
/// Existing bytes are never rewritten; with nothing new the file is left
/// untouched. Returns the number of blocks appended.
pub fn update(path: &Path, records: &[RomRecord]) -> Result<usize> {
    let text = read_store(path)?;
    let mut known = existing_files(&MetadataDocument::parse(&text).blocks);

    let fresh: Vec<&RomRecord> = records
        .iter()
        .filter(|r| known.insert(r.file.clone()))
        .collect();
    if fresh.is_empty() {
        tracing::info!("No new games for {}", path.display());
        return Ok(0);
    }

    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut contents = String::new();
    if !text.is_empty() && !text.ends_with('\n') {
        contents.push('\n');
    }
    for record in &fresh {
        contents.push_str(&record.render());
    }
    writer
        .write_all(contents.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| Error::io(path, e))?;

    tracing::info!("Appended {} games to {}", fresh.len(), path.display());
    Ok(fresh.len())
}

/// Overwrite existing field lines in every block whose title matches `game_key`.
///
/// Only lines already present are changed. Returns the number of lines replaced.
pub fn set_fields(
    path: &Path,
    game_key: &str,
    values: &BTreeMap<String, String>,
    matcher: KeyMatch,
) -> Result<usize> {
    let mut doc = MetadataDocument::read(path)?;

    let mut replaced = 0;
    let mut touched_blocks = 0;
    for block in doc.blocks.iter_mut() {
        if matcher.matches(&block.game(), game_key) {
            touched_blocks += 1;
            replaced += block.replace_fields(values);
        }
    }
    if touched_blocks == 0 {
        tracing::warn!("No game matching {:?} in {}", game_key, path.display());
        return Ok(0);
    }
    if touched_blocks > 1 {
        tracing::warn!("Game key {:?} matched {} blocks in {}", game_key, touched_blocks, path.display());
    }

    write_atomic(path, &doc.render())?;
    Ok(replaced)
}

/// Files whose blocks have no title yet
pub fn unmapped_files(path: &Path) -> Result<Vec<String>> {
    Ok(read_blocks(path)?
        .iter()
        .filter(|b| !b.is_mapped())
        .filter_map(MetadataBlock::file)
        .collect())
}

/// Fill the block owning `file` from a catalog search hit.
///
/// Search hits carry no description, so the hit's genre goes there.
/// Returns the number of lines replaced; 0 when no block owns `file`.
pub fn map_file(path: &Path, file: &str, hit: &CatalogHit) -> Result<usize> {
    let mut doc = MetadataDocument::read(path)?;
    let values = BTreeMap::from([
        ("game".to_string(), hit.title.clone()),
        ("developer".to_string(), hit.developer.clone()),
        ("description".to_string(), hit.genre.clone()),
    ]);

    let mut replaced = 0;
    for block in doc.blocks.iter_mut() {
        if block.file().as_deref() == Some(file) {
            replaced += block.replace_fields(&values);
        }
    }
    if replaced == 0 {
        tracing::warn!("No block for file {:?} in {}", file, path.display());
        return Ok(0);
    }

    write_atomic(path, &doc.render())?;
    Ok(replaced)
}

/// Every block title, in file order
pub fn game_titles(path: &Path) -> Result<Vec<String>> {
    Ok(read_blocks(path)?.iter().map(MetadataBlock::game).collect())
}

/// Editable fields of the last block matching `game_key`, blank when missing
pub fn block_fields(path: &Path, game_key: &str, matcher: KeyMatch) -> Result<Option<BTreeMap<String, String>>> {
    let blocks = read_blocks(path)?;
    let Some(block) = blocks.iter().rev().find(|b| matcher.matches(&b.game(), game_key)) else {
        return Ok(None);
    };

    let mut fields: BTreeMap<String, String> = EDITABLE_FIELDS
        .iter()
        .map(|f| (f.to_string(), String::new()))
        .collect();
    for (field, value) in block.fields() {
        if let Some(slot) = fields.get_mut(&field) {
            *slot = value;
        }
    }
    Ok(Some(fields))
}
