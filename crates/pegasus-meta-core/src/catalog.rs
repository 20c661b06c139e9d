//! Reference catalog lookups
//!
//! The catalog maps ROM checksums and title keywords to release metadata.
//! [`OpenVgdb`] reads an OpenVGDB SQLite file; each call opens its own
//! read-only connection and closes it before returning.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use tokio::runtime::Runtime;

use crate::checksum::Checksum;
use crate::error::{Error, Result};

/// Maximum number of keyword search results
pub const SEARCH_LIMIT: i64 = 20;

/// Release metadata found by checksum
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub title: String,
    pub genre: String,
    pub developer: String,
    pub description: String,
    pub platform: String,
}

/// One keyword search result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogHit {
    pub title: String,
    pub genre: String,
    pub developer: String,
    pub platform: String,
}

/// Read-only game metadata source
pub trait ReferenceCatalog {
    fn lookup_by_checksum(&self, checksum: &Checksum) -> Result<Option<GameInfo>>;

    /// Titles matching `keyword`, at most [`SEARCH_LIMIT`], in catalog order
    fn search_by_keyword(&self, keyword: &str) -> Result<Vec<CatalogHit>>;
}

/// OpenVGDB SQLite database
pub struct OpenVgdb {
    path: PathBuf,
    runtime: Runtime,
}

type LookupRow = (Option<String>, Option<String>, Option<String>, Option<String>, Option<String>);
type SearchRow = (Option<String>, Option<String>, Option<String>, Option<String>);

impl OpenVgdb {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "catalog database not found"),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self { path, runtime })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        let options = SqliteConnectOptions::new().filename(&self.path).read_only(true);
        Ok(SqliteConnection::connect_with(&options).await?)
    }
}

fn text(value: Option<String>) -> String {
    value.unwrap_or_default()
}

impl ReferenceCatalog for OpenVgdb {
    fn lookup_by_checksum(&self, checksum: &Checksum) -> Result<Option<GameInfo>> {
        self.runtime.block_on(async {
            let mut conn = self.connect().await?;
            let row: std::result::Result<Option<LookupRow>, sqlx::Error> = sqlx::query_as(
                r#"
                SELECT rl.releaseTitleName, rl.releaseGenre, rl.releaseDeveloper,
                       rl.releaseDescription, rl.TEMPsystemName
                FROM ROMs r
                JOIN RELEASES rl ON r.romID = rl.romID
                WHERE r.romHashCRC = ?
                "#,
            )
            .bind(checksum.to_string())
            .fetch_optional(&mut conn)
            .await;
            conn.close().await?;

            Ok::<_, Error>(row?.map(|(title, genre, developer, description, platform)| GameInfo {
                title: text(title),
                genre: text(genre),
                developer: text(developer),
                description: text(description),
                platform: text(platform),
            }))
        })
    }

    fn search_by_keyword(&self, keyword: &str) -> Result<Vec<CatalogHit>> {
        self.runtime.block_on(async {
            let mut conn = self.connect().await?;
            let rows: std::result::Result<Vec<SearchRow>, sqlx::Error> = sqlx::query_as(
                r#"
                SELECT rl.releaseTitleName, rl.releaseGenre, rl.releaseDeveloper, rl.TEMPsystemName
                FROM RELEASES rl
                WHERE rl.releaseTitleName LIKE ?
                LIMIT ?
                "#,
            )
            .bind(format!("%{}%", keyword))
            .bind(SEARCH_LIMIT)
            .fetch_all(&mut conn)
            .await;
            conn.close().await?;

            Ok::<_, Error>(rows?
                .into_iter()
                .map(|(title, genre, developer, platform)| CatalogHit {
                    title: text(title),
                    genre: text(genre),
                    developer: text(developer),
                    platform: text(platform),
                })
                .collect())
        })
    }
}
