//! Folder scan through store generation, using real archives on disk

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use filetime::FileTime;
use pegasus_meta_core::checksum::checksum_bytes;
use pegasus_meta_core::store;
use pegasus_meta_core::{
    ArchiveInspector, CatalogHit, Checksum, Error, Extensions, FingerprintCache, FingerprintKey, GameInfo, KeyMatch,
    LaunchTemplate, MetadataDocument, Platform, ReferenceCatalog, Result, RomScanner,
};
use tempfile::tempdir;

fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn rom(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn nes() -> Platform {
    Platform {
        full_name: "Nintendo - NES (FCEUmm)".to_string(),
        system_name: "Nintendo Entertainment System".to_string(),
        extensions: vec!["nes".to_string(), "fds".to_string()],
        abbreviation: "nes".to_string(),
        core: "fceumm_libretro_android.so".to_string(),
    }
}

/// Catalog backed by an in-memory checksum table
struct MemoryCatalog(BTreeMap<Checksum, GameInfo>);

impl ReferenceCatalog for MemoryCatalog {
    fn lookup_by_checksum(&self, checksum: &Checksum) -> Result<Option<GameInfo>> {
        Ok(self.0.get(checksum).cloned())
    }

    fn search_by_keyword(&self, keyword: &str) -> Result<Vec<CatalogHit>> {
        Ok(self
            .0
            .values()
            .filter(|info| info.title.contains(keyword))
            .map(|info| CatalogHit {
                title: info.title.clone(),
                genre: info.genre.clone(),
                developer: info.developer.clone(),
                platform: info.platform.clone(),
            })
            .collect())
    }
}

fn game(title: &str) -> GameInfo {
    GameInfo {
        title: title.to_string(),
        genre: "Action".to_string(),
        developer: format!("{} Team", title),
        description: format!("All about {}.", title),
        platform: "Nintendo Entertainment System".to_string(),
    }
}

#[test]
fn zip_selects_largest_allowed_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("game.zip");
    let b = rom(7, 500);
    write_zip(
        &path,
        &[("a.nes", rom(1, 100)), ("b.nes", b.clone()), ("c.txt", rom(3, 900))],
    );

    let identified = ArchiveInspector::uncached()
        .identify(&path, &Extensions::new(["nes"]))
        .unwrap()
        .unwrap();
    assert_eq!(identified.entry_name, "b.nes");
    assert_eq!(identified.checksum, checksum_bytes(&b));

    let none = ArchiveInspector::uncached()
        .identify(&path, &Extensions::new(["gba"]))
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn cache_follows_modification_time() {
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("game.nes");
    let cache_path = dir.path().join("crc_cache.json");
    fs::write(&rom_path, b"first").unwrap();
    let stamp = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&rom_path, stamp).unwrap();

    let inspector = ArchiveInspector::new(FingerprintCache::new(&cache_path));
    let allowed = Extensions::new(["nes"]);
    let first = inspector.identify(&rom_path, &allowed).unwrap().unwrap();
    assert_eq!(first.checksum, checksum_bytes(b"first"));

    // Same mtime: the cached value is trusted
    fs::write(&rom_path, b"second").unwrap();
    filetime::set_file_mtime(&rom_path, stamp).unwrap();
    let cached = inspector.identify(&rom_path, &allowed).unwrap().unwrap();
    assert_eq!(cached.checksum, checksum_bytes(b"first"));

    filetime::set_file_mtime(&rom_path, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
    let fresh = inspector.identify(&rom_path, &allowed).unwrap().unwrap();
    assert_eq!(fresh.checksum, checksum_bytes(b"second"));

    assert_eq!(FingerprintCache::new(&cache_path).load().unwrap().len(), 2);
}

#[test]
fn seven_zip_entries_are_cached_per_entry() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir(&src).unwrap();
    let payload = rom(11, 3000);
    fs::write(src.join("game.nes"), &payload).unwrap();
    fs::write(src.join("manual.txt"), rom(0, 9000)).unwrap();

    let archive = dir.path().join("game.7z");
    sevenz_rust::compress_to_path(&src, &archive).unwrap();
    let stamp = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&archive, stamp).unwrap();

    let cache_path = dir.path().join("crc_cache.json");
    let inspector = ArchiveInspector::new(FingerprintCache::new(&cache_path));
    let allowed = Extensions::new(["nes"]);

    let first = inspector.identify(&archive, &allowed).unwrap().unwrap();
    assert!(first.entry_name.ends_with("game.nes"));
    assert_eq!(first.checksum, checksum_bytes(&payload));

    let key = FingerprintKey::for_file(&archive, Some(first.entry_name.clone())).unwrap();
    let rows = FingerprintCache::new(&cache_path).load().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[&key.flatten()], first.checksum);
    assert!(key.flatten().contains(&format!(":{}:", first.entry_name)));

    // A row already under the entry's key wins over the archive's own CRC
    let planted = Checksum::new(0xDEADBEEF);
    let rows = BTreeMap::from([(key.flatten(), planted)]);
    fs::write(&cache_path, serde_json::to_string_pretty(&rows).unwrap()).unwrap();
    assert_eq!(inspector.identify(&archive, &allowed).unwrap().unwrap().checksum, planted);

    filetime::set_file_mtime(&archive, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
    let fresh = inspector.identify(&archive, &allowed).unwrap().unwrap();
    assert_eq!(fresh.checksum, checksum_bytes(&payload));
    assert_eq!(FingerprintCache::new(&cache_path).load().unwrap().len(), 2);
}

#[test]
fn renamed_file_is_reported_and_skipped() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("fake.zip"), b"plain bytes, not an archive").unwrap();
    write_zip(&dir.path().join("real.zip"), &[("real.nes", rom(9, 64))]);

    let err = ArchiveInspector::uncached()
        .identify(&dir.path().join("fake.zip"), &Extensions::new(["nes"]))
        .unwrap_err();
    assert!(matches!(err, Error::SignatureMismatch { expected: "zip", .. }));

    let catalog = MemoryCatalog(BTreeMap::new());
    let report = RomScanner::new(ArchiveInspector::uncached(), &catalog)
        .scan(dir.path(), &nes(), &HashSet::new(), None)
        .unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].file, "real.zip");
    assert_eq!(report.records[0].game, "");
    assert_eq!(report.failures.len(), 1);
}

#[test]
fn generate_then_update() {
    let roms = tempdir().unwrap();
    let data = tempdir().unwrap();
    let folder = roms.path().join("nes");
    fs::create_dir(&folder).unwrap();

    let titles = ["Alpha Quest", "Beta Racer", "Gamma Force"];
    let mut table = BTreeMap::new();
    for (i, title) in titles.iter().enumerate() {
        let payload = rom(i as u8 * 40, 256 + i);
        table.insert(checksum_bytes(&payload), game(title));
        write_zip(
            &folder.join(format!("{}.zip", title)),
            &[("readme.txt", rom(0, 4096)), ("game.nes", payload)],
        );
    }
    let catalog = MemoryCatalog(table);
    let cache = FingerprintCache::new(data.path().join("crc_cache.json"));
    let scanner = RomScanner::new(ArchiveInspector::new(cache), &catalog);
    let store_path = folder.join("metadata.pegasus.txt");

    let report = scanner.scan(&folder, &nes(), &HashSet::new(), None).unwrap();
    assert!(report.unmatched.is_empty());
    store::generate(&store_path, &nes(), &LaunchTemplate::default(), &report.records).unwrap();

    let document = MetadataDocument::read(&store_path).unwrap();
    let header: BTreeMap<_, _> = document.header_fields().into_iter().collect();
    assert_eq!(header["collection"], "Nintendo Entertainment System");
    assert_eq!(header["shortname"], "nes");
    assert_eq!(header["extensions"], "nes,fds");
    assert!(header["launch"].contains("fceumm_libretro_android.so"));
    assert!(header["launch"].contains("{file.path}"));

    assert_eq!(document.blocks.len(), 3);
    for (block, title) in document.blocks.iter().zip(titles) {
        assert_eq!(block.game(), title);
        assert_eq!(block.file().unwrap(), format!("{}.zip", title));
        assert_eq!(block.get("developer").unwrap(), format!("{} Team", title));
        assert!(!block.get("description").unwrap().is_empty());
    }

    // Nothing new: the file keeps its bytes
    let before = fs::read(&store_path).unwrap();
    let skip = store::existing_files(&document.blocks);
    let rescan = scanner.scan(&folder, &nes(), &skip, None).unwrap();
    assert!(rescan.records.is_empty());
    assert_eq!(store::update(&store_path, &rescan.records).unwrap(), 0);
    assert_eq!(fs::read(&store_path).unwrap(), before);

    // One new unknown ROM is appended after the existing bytes
    write_zip(&folder.join("Delta.zip"), &[("delta.nes", rom(200, 128))]);
    let rescan = scanner.scan(&folder, &nes(), &skip, None).unwrap();
    assert_eq!(rescan.unmatched, vec!["Delta.zip".to_string()]);
    assert_eq!(store::update(&store_path, &rescan.records).unwrap(), 1);

    let after = fs::read(&store_path).unwrap();
    assert!(after.starts_with(&before));
    assert_eq!(store::unmapped_files(&store_path).unwrap(), vec!["Delta.zip".to_string()]);
    assert_eq!(store::game_titles(&store_path).unwrap().last().unwrap(), "");

    // Mapping by hand fills the block and takes it off the unmapped list
    let hit = CatalogHit {
        title: "Delta Strike".to_string(),
        genre: "Shooter".to_string(),
        developer: "Delta Works".to_string(),
        platform: "Nintendo Entertainment System".to_string(),
    };
    assert_eq!(store::map_file(&store_path, "Delta.zip", &hit).unwrap(), 3);
    assert!(store::unmapped_files(&store_path).unwrap().is_empty());

    // Manual edits land in the block and survive a further update
    let mut values = BTreeMap::new();
    values.insert("players".to_string(), "2".to_string());
    values.insert("developer".to_string(), "Delta Works Ltd.".to_string());
    assert_eq!(store::set_fields(&store_path, "Delta Strike", &values, KeyMatch::Exact).unwrap(), 1);
    assert_eq!(store::update(&store_path, &rescan.records).unwrap(), 0);
    let fields = store::block_fields(&store_path, "Delta Strike", KeyMatch::Exact).unwrap().unwrap();
    assert_eq!(fields["developer"], "Delta Works Ltd.");
    assert_eq!(fields["description"], "Shooter");
    assert_eq!(fields["players"], "");
}
