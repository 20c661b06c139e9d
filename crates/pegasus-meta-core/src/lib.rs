//! Pegasus Meta Core - ROM fingerprinting, checksum cache, and metadata store

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod error;
pub mod platform;
pub mod scanner;
pub mod store;

pub use archive::{ArchiveEntry, ArchiveInspector, ContainerKind, Extensions, Identified};
pub use cache::{FingerprintCache, FingerprintKey};
pub use catalog::{CatalogHit, GameInfo, OpenVgdb, ReferenceCatalog};
pub use checksum::Checksum;
pub use config::{Settings, UnmatchedTitle};
pub use error::{Error, Result};
pub use platform::{LaunchTemplate, Platform, PlatformRegistry, RegistryIssue};
pub use scanner::{RomScanner, ScanProgress, ScanReport};
pub use store::{KeyMatch, MetadataBlock, MetadataDocument, RomRecord};
