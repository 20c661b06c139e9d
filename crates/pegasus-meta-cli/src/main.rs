//! Pegasus Meta CLI - builds and edits metadata.pegasus.txt for ROM folders

mod logging;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pegasus_meta_core::store::{self, EDITABLE_FIELDS};
use pegasus_meta_core::{
    ArchiveInspector, Extensions, FingerprintCache, OpenVgdb, Platform, PlatformRegistry,
    ReferenceCatalog, RomScanner, ScanProgress, ScanReport, Settings,
};

#[derive(Parser)]
#[command(name = "pegasus-meta")]
#[command(author, version, about = "Pegasus metadata generator for ROM folders", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "PEGASUS_META_SETTINGS")]
    settings: Option<PathBuf>,

    /// OpenVGDB SQLite database
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Platform definition file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Checksum cache file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Show debug output on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a ROM folder and write a fresh metadata file
    Generate {
        /// ROM folder, named after the platform abbreviation (e.g. "nes")
        folder: PathBuf,

        /// Platform full name, when the folder matches several
        #[arg(short, long)]
        platform: Option<String>,
    },

    /// Append blocks for ROMs missing from an existing metadata file
    Update {
        /// ROM folder containing the metadata file
        folder: PathBuf,

        /// Platform full name, when the folder matches several
        #[arg(short, long)]
        platform: Option<String>,
    },

    /// Print the selected entry and checksum of a ROM file or archive
    Identify {
        /// ROM file, zip or 7z archive
        path: PathBuf,

        /// Allowed ROM extensions (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        ext: Vec<String>,
    },

    /// List platforms from the registry
    Platforms {
        /// Only show platforms for this folder name / abbreviation
        abbr: Option<String>,
    },

    /// List files whose block has no game title
    Unmapped {
        /// ROM folder containing the metadata file
        folder: PathBuf,
    },

    /// Search the catalog by title keyword
    Search {
        keyword: String,
    },

    /// Map an unmapped file to a catalog search result
    Map {
        /// ROM folder containing the metadata file
        folder: PathBuf,

        /// File name as written in the `file:` field
        #[arg(short, long)]
        file: String,

        /// Title keyword to search for
        #[arg(short, long)]
        keyword: String,

        /// Result number to apply (1-based); without it, results are listed
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Show the editable fields of a game
    Show {
        /// ROM folder containing the metadata file
        folder: PathBuf,

        /// Game title (or part of it, depending on the key_match setting)
        game: String,
    },

    /// Set fields of a game
    Edit {
        /// ROM folder containing the metadata file
        folder: PathBuf,

        /// Game title (or part of it, depending on the key_match setting)
        game: String,

        /// Field assignments, e.g. --set genre=Platform
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        set: Vec<(String, String)>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(cli.verbose);

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Generate { folder, platform } => {
            cmd_generate(&settings, &folder, platform.as_deref())?;
        }
        Commands::Update { folder, platform } => {
            cmd_update(&settings, &folder, platform.as_deref())?;
        }
        Commands::Identify { path, ext } => {
            cmd_identify(&settings, &path, &ext)?;
        }
        Commands::Platforms { abbr } => {
            cmd_platforms(&settings, abbr.as_deref())?;
        }
        Commands::Unmapped { folder } => {
            cmd_unmapped(&settings, &folder)?;
        }
        Commands::Search { keyword } => {
            cmd_search(&settings, &keyword)?;
        }
        Commands::Map {
            folder,
            file,
            keyword,
            pick,
        } => {
            cmd_map(&settings, &folder, &file, &keyword, pick)?;
        }
        Commands::Show { folder, game } => {
            cmd_show(&settings, &folder, &game)?;
        }
        Commands::Edit { folder, game, set } => {
            cmd_edit(&settings, &folder, &game, set)?;
        }
    }

    Ok(())
}

/// Settings file, with path flags taking precedence
fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = cli.settings.clone().unwrap_or_else(Settings::default_path);
    let mut settings =
        Settings::load(&path).with_context(|| format!("Failed to load settings from {}", path.display()))?;
    tracing::debug!("Settings loaded from {}", path.display());

    if let Some(catalog) = &cli.catalog {
        settings.catalog_path = Some(catalog.clone());
    }
    if let Some(registry) = &cli.registry {
        settings.registry_path = Some(registry.clone());
    }
    if let Some(cache) = &cli.cache {
        settings.cache_path = Some(cache.clone());
    }
    Ok(settings)
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got {:?}", s))?;
    let field = field.trim();
    if !EDITABLE_FIELDS.contains(&field) {
        return Err(format!(
            "unknown field {:?} (editable: {})",
            field,
            EDITABLE_FIELDS.join(", ")
        ));
    }
    Ok((field.to_string(), value.to_string()))
}

fn open_catalog(settings: &Settings) -> Result<OpenVgdb> {
    let path = settings.get_catalog_path();
    OpenVgdb::open(&path).with_context(|| format!("Failed to open catalog at {}", path.display()))
}

fn load_registry(settings: &Settings) -> Result<PlatformRegistry> {
    let path = settings.get_registry_path();
    let (registry, issues) = PlatformRegistry::load(&path)
        .with_context(|| format!("Failed to load platforms from {}", path.display()))?;
    if !issues.is_empty() {
        println!("Warning: {} platform entries could not be read", issues.len());
    }
    Ok(registry)
}

fn inspector(settings: &Settings) -> ArchiveInspector {
    ArchiveInspector::new(FingerprintCache::new(settings.get_cache_path()))
}

fn folder_name(folder: &Path) -> Result<String> {
    folder
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot take a platform name from {}", folder.display()))
}

/// Platform for `folder`: the named one, or the first whose abbreviation is the folder name
fn choose_platform(registry: &PlatformRegistry, folder: &Path, requested: Option<&str>) -> Result<Platform> {
    let name = folder_name(folder)?;
    let candidates = registry.candidates(&name);

    let platform = match requested {
        Some(full_name) => registry
            .find(full_name)
            .with_context(|| format!("Unknown platform: {}", full_name))?,
        None => match candidates.as_slice() {
            [] => bail!("No platform with abbreviation '{}'; use `pegasus-meta platforms` to list them", name),
            [only] => *only,
            [first, ..] => {
                println!("Folder '{}' matches {} platforms, using {}", name, candidates.len(), first.full_name);
                println!("Pass --platform to choose another:");
                for p in &candidates {
                    println!("  {}", p.full_name);
                }
                *first
            }
        },
    };

    tracing::info!("Platform for {}: {}", folder.display(), platform.full_name);
    Ok(platform.clone())
}

fn scan_with_progress(
    settings: &Settings,
    catalog: &dyn ReferenceCatalog,
    folder: &Path,
    platform: &Platform,
    skip: &HashSet<String>,
) -> Result<ScanReport> {
    let scanner = RomScanner::new(inspector(settings), catalog)
        .with_unmatched_title(settings.unmatched_title)
        .with_store_file_name(settings.store_file_name());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let on_progress = |progress: ScanProgress| {
        pb.set_length(progress.total_files as u64);
        pb.set_position(progress.scanned_files as u64);
        pb.set_message(progress.current_file);
    };

    let report = scanner
        .scan(folder, platform, skip, Some(&on_progress))
        .with_context(|| format!("Failed to scan {}", folder.display()))?;
    pb.finish_with_message("Done");

    for (path, error) in &report.failures {
        println!("  Error reading {}: {}", path.display(), error);
    }
    Ok(report)
}

fn print_summary(report: &ScanReport) {
    println!("\nResults:");
    println!("  Identified: {}", report.records.len() - report.unmatched.len());
    println!("  Unmatched:  {}", report.unmatched.len());
    println!("  Skipped:    {}", report.skipped.len());
    println!("  Errors:     {}", report.failures.len());
}

fn cmd_generate(settings: &Settings, folder: &Path, requested: Option<&str>) -> Result<()> {
    let registry = load_registry(settings)?;
    let platform = choose_platform(&registry, folder, requested)?;
    let catalog = open_catalog(settings)?;
    let store_path = settings.store_path(folder);

    println!("Scanning {} for {}...\n", folder.display(), platform.full_name);
    let report = scan_with_progress(settings, &catalog, folder, &platform, &HashSet::new())?;

    store::generate(&store_path, &platform, &settings.launch(), &report.records)
        .with_context(|| format!("Failed to write {}", store_path.display()))?;

    print_summary(&report);
    println!("\nWrote {} games to {}", report.records.len(), store_path.display());
    Ok(())
}

fn cmd_update(settings: &Settings, folder: &Path, requested: Option<&str>) -> Result<()> {
    let store_path = settings.store_path(folder);
    let blocks = store::read_blocks(&store_path)
        .with_context(|| format!("No metadata file to update; run `pegasus-meta generate {}` first", folder.display()))?;

    let registry = load_registry(settings)?;
    let platform = choose_platform(&registry, folder, requested)?;
    let catalog = open_catalog(settings)?;

    let skip = store::existing_files(&blocks);
    println!(
        "Scanning {} for new {} ROMs ({} already listed)...\n",
        folder.display(),
        platform.abbreviation,
        blocks.len()
    );
    let report = scan_with_progress(settings, &catalog, folder, &platform, &skip)?;

    let added = store::update(&store_path, &report.records)
        .with_context(|| format!("Failed to update {}", store_path.display()))?;

    print_summary(&report);
    if added == 0 {
        println!("\n{} is up to date", store_path.display());
    } else {
        println!("\nAdded {} games to {}", added, store_path.display());
    }
    Ok(())
}

fn cmd_identify(settings: &Settings, path: &Path, ext: &[String]) -> Result<()> {
    let allowed = Extensions::new(ext);
    match inspector(settings)
        .identify(path, &allowed)
        .with_context(|| format!("Failed to identify {}", path.display()))?
    {
        Some(identified) => println!("{}  {}", identified.checksum, identified.entry_name),
        None => println!("No ROM with extension {} in {}", ext.join(","), path.display()),
    }
    Ok(())
}

fn cmd_platforms(settings: &Settings, abbr: Option<&str>) -> Result<()> {
    let registry = load_registry(settings)?;
    let platforms: Vec<&Platform> = match abbr {
        Some(abbr) => registry.candidates(abbr),
        None => registry.platforms().iter().collect(),
    };

    for platform in &platforms {
        println!(
            "{:<8} {:<40} {}",
            platform.abbreviation,
            platform.full_name,
            platform.extensions.join(",")
        );
    }
    println!("\nTotal: {} platforms", platforms.len());
    Ok(())
}

fn cmd_unmapped(settings: &Settings, folder: &Path) -> Result<()> {
    let store_path = settings.store_path(folder);
    let files = store::unmapped_files(&store_path)
        .with_context(|| format!("Failed to read {}", store_path.display()))?;

    for file in &files {
        println!("{}", file);
    }
    println!("\n{} unmapped files", files.len());
    Ok(())
}

fn print_hits(hits: &[pegasus_meta_core::CatalogHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!("{:>3}. {} [{}] {} / {}", i + 1, hit.title, hit.platform, hit.developer, hit.genre);
    }
}

fn cmd_search(settings: &Settings, keyword: &str) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let hits = catalog.search_by_keyword(keyword).context("Catalog search failed")?;

    print_hits(&hits);
    println!("\n{} results", hits.len());
    Ok(())
}

fn cmd_map(settings: &Settings, folder: &Path, file: &str, keyword: &str, pick: Option<usize>) -> Result<()> {
    let store_path = settings.store_path(folder);
    let catalog = open_catalog(settings)?;
    let hits = catalog.search_by_keyword(keyword).context("Catalog search failed")?;

    let Some(pick) = pick else {
        print_hits(&hits);
        println!("\nRe-run with --pick N to map {} to a result", file);
        return Ok(());
    };
    let hit = pick
        .checked_sub(1)
        .and_then(|i| hits.get(i))
        .with_context(|| format!("No result {} (search returned {})", pick, hits.len()))?;

    let replaced = store::map_file(&store_path, file, hit)
        .with_context(|| format!("Failed to update {}", store_path.display()))?;
    if replaced == 0 {
        bail!("No block for file '{}' in {}", file, store_path.display());
    }
    println!("Mapped {} to {}", file, hit.title);
    Ok(())
}

fn cmd_show(settings: &Settings, folder: &Path, game: &str) -> Result<()> {
    let store_path = settings.store_path(folder);
    let fields = store::block_fields(&store_path, game, settings.key_match)
        .with_context(|| format!("Failed to read {}", store_path.display()))?
        .with_context(|| format!("No game matching '{}'", game))?;

    for field in EDITABLE_FIELDS {
        let value = fields.get(*field).map(String::as_str).unwrap_or("");
        println!("{:<12} {}", format!("{}:", field), value.replace('\n', "\n             "));
    }
    Ok(())
}

fn cmd_edit(settings: &Settings, folder: &Path, game: &str, set: Vec<(String, String)>) -> Result<()> {
    let store_path = settings.store_path(folder);
    let values: BTreeMap<String, String> = set.into_iter().collect();

    let replaced = store::set_fields(&store_path, game, &values, settings.key_match)
        .with_context(|| format!("Failed to update {}", store_path.display()))?;
    if replaced == 0 {
        println!("Nothing changed: no game matching '{}' has those fields", game);
    } else {
        println!("Updated {} fields", replaced);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
        { fullname: "Nintendo - NES (FCEUmm)", sysname: "Nintendo Entertainment System", exts: "nes", abbr: "nes", core: "fceumm_libretro_android.so" },
        { fullname: "Nintendo - NES (Nestopia)", sysname: "Nintendo Entertainment System", exts: "nes", abbr: "nes", core: "nestopia_libretro_android.so" },
    "#;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("genre=Platform").unwrap(),
            ("genre".to_string(), "Platform".to_string())
        );
        assert_eq!(parse_assignment("summary=a=b").unwrap().1, "a=b");
        assert!(parse_assignment("genre").is_err());
        assert!(parse_assignment("file=x.zip").is_err());
    }

    #[test]
    fn test_choose_platform() {
        let (registry, issues) = PlatformRegistry::parse(REGISTRY);
        assert!(issues.is_empty());

        let first = choose_platform(&registry, Path::new("/roms/NES"), None).unwrap();
        assert_eq!(first.core, "fceumm_libretro_android.so");

        let named = choose_platform(&registry, Path::new("/roms/nes"), Some("Nintendo - NES (Nestopia)")).unwrap();
        assert_eq!(named.core, "nestopia_libretro_android.so");

        assert!(choose_platform(&registry, Path::new("/roms/snes"), None).is_err());
        assert!(choose_platform(&registry, Path::new("/roms/nes"), Some("Unknown")).is_err());
    }
}
