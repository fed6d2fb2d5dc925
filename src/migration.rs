/*
 * Copyright 2025 Paul Moore Parks and contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Schema migration runner for per-store catalog databases.
//!
//! Scripts are versioned, checksummed SQL units applied exactly once. The
//! runner fails fast on any gap, tamper, or partial failure; it backs up the
//! database file before the first mutating script and never silently skips a
//! script. Re-running a fully-applied list makes no further changes.

use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Store database not found at {0}")]
    DatabaseMissing(PathBuf),

    #[error("Migration scripts for '{store}' have a gap: expected version {expected}, found {found}")]
    VersionGap {
        store: String,
        expected: u32,
        found: u32,
    },

    #[error("Applied migration version {version} is not present in the script list for '{store}'")]
    UnknownAppliedVersion { store: String, version: u32 },

    #[error(
        "Checksum mismatch for migration {version} '{name}': potential tampering with an applied script"
    )]
    ChecksumMismatch { version: u32, name: String },

    #[error(
        "Database for '{store}' is at version {applied}, newer than this extension's highest script {highest}: extension outdated"
    )]
    ExtensionOutdated {
        store: String,
        applied: u32,
        highest: u32,
    },

    #[error("Migration {version} '{name}' failed and was rolled back: {source}")]
    ScriptFailed {
        version: u32,
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Migration run cancelled before version {0}")]
    Cancelled(u32),

    #[error("Database backup failed: {0}")]
    Backup(#[from] std::io::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

/// One SQL unit with a monotonic version. `checksum_override` substitutes the
/// recorded checksum for scripts whose text was reformatted after release.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub version: u32,
    pub name: String,
    pub sql: String,
    pub checksum_override: Option<String>,
}

impl MigrationScript {
    pub fn new(version: u32, name: &str, sql: &str) -> Self {
        Self {
            version,
            name: name.to_string(),
            sql: sql.to_string(),
            checksum_override: None,
        }
    }

    /// SHA-256 over the script's UTF-8 bytes, lowercase hex.
    pub fn checksum(&self) -> String {
        match &self.checksum_override {
            Some(fixed) => fixed.clone(),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.sql.as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }
}

/// What a store extension tells the runner about its schema.
#[derive(Debug, Clone)]
pub struct MigrationInfo {
    pub store_name: String,
    pub target_version: u32,
    pub scripts: Vec<MigrationScript>,
}

#[derive(Debug)]
pub struct MigrationReport {
    pub store_name: String,
    pub applied: Vec<u32>,
    pub backup_path: Option<PathBuf>,
    pub current_version: u32,
}

pub struct MigrationRunner;

impl MigrationRunner {
    /// Brings the database at `db_path` to the info's target version.
    pub fn run(
        db_path: &Path,
        info: &MigrationInfo,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrationError> {
        if !db_path.exists() {
            return Err(MigrationError::DatabaseMissing(db_path.to_path_buf()));
        }

        // Code-side list must be contiguous from version 1.
        let mut scripts = info.scripts.clone();
        scripts.sort_by_key(|s| s.version);
        for (i, script) in scripts.iter().enumerate() {
            let expected = i as u32 + 1;
            if script.version != expected {
                return Err(MigrationError::VersionGap {
                    store: info.store_name.clone(),
                    expected,
                    found: script.version,
                });
            }
        }
        let highest = scripts.last().map(|s| s.version).unwrap_or(0);

        let mut conn = Connection::open(db_path)?;
        // Legacy adoption path: a database that predates the runner gets the
        // version table on first contact.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                script_name TEXT NOT NULL,
                applied_utc TEXT NOT NULL,
                checksum TEXT NOT NULL
            )",
        )?;

        let applied: Vec<(u32, String)> = {
            let mut stmt =
                conn.prepare("SELECT version, checksum FROM schema_version ORDER BY version")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut max_applied = 0u32;
        for (version, stored_checksum) in &applied {
            let script = scripts.iter().find(|s| s.version == *version);
            match script {
                None if *version > highest => {
                    return Err(MigrationError::ExtensionOutdated {
                        store: info.store_name.clone(),
                        applied: *version,
                        highest,
                    });
                }
                None => {
                    return Err(MigrationError::UnknownAppliedVersion {
                        store: info.store_name.clone(),
                        version: *version,
                    });
                }
                Some(script) => {
                    if script.checksum() != *stored_checksum {
                        return Err(MigrationError::ChecksumMismatch {
                            version: script.version,
                            name: script.name.clone(),
                        });
                    }
                }
            }
            max_applied = max_applied.max(*version);
        }

        let pending: Vec<&MigrationScript> = scripts
            .iter()
            .filter(|s| s.version > max_applied && s.version <= info.target_version)
            .collect();
        if pending.is_empty() {
            return Ok(MigrationReport {
                store_name: info.store_name.clone(),
                applied: Vec::new(),
                backup_path: None,
                current_version: max_applied,
            });
        }

        // Backup before the first mutating script.
        let backup_path = backup_database(db_path)?;
        info!(
            store = %info.store_name,
            backup = %backup_path.display(),
            pending = pending.len(),
            "applying schema migrations"
        );

        let mut applied_now = Vec::new();
        let mut current_version = max_applied;
        for script in pending {
            // Cooperative cancellation between scripts; the current script's
            // transaction either commits whole or rolls back whole.
            if cancel.is_cancelled() {
                warn!(store = %info.store_name, version = script.version, "migration run cancelled");
                return Err(MigrationError::Cancelled(script.version));
            }

            let tx = conn.transaction()?;
            let outcome = tx.execute_batch(&script.sql).and_then(|_| {
                tx.execute(
                    "INSERT INTO schema_version (version, script_name, applied_utc, checksum) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        script.version,
                        script.name,
                        Utc::now().to_rfc3339(),
                        script.checksum()
                    ],
                )
                .map(|_| ())
            });
            match outcome {
                Ok(()) => tx.commit()?,
                Err(source) => {
                    drop(tx); // rolls back
                    return Err(MigrationError::ScriptFailed {
                        version: script.version,
                        name: script.name.clone(),
                        source,
                    });
                }
            }
            info!(store = %info.store_name, version = script.version, name = %script.name, "migration applied");
            applied_now.push(script.version);
            current_version = script.version;
        }

        Ok(MigrationReport {
            store_name: info.store_name.clone(),
            applied: applied_now,
            backup_path: Some(backup_path),
            current_version,
        })
    }
}

fn backup_database(db_path: &Path) -> Result<PathBuf, std::io::Error> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let file_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store.db".to_string());
    let backup = db_path.with_file_name(format!("{file_name}.backup-{stamp}"));
    std::fs::copy(db_path, &backup)?;
    Ok(backup)
}

/// The baseline schema every store catalog database starts from. Matches the
/// store database contract consumed by the catalog and modifier services.
pub fn baseline_store_migrations() -> Vec<MigrationScript> {
    vec![
        MigrationScript::new(
            1,
            "001_create_catalog",
            "CREATE TABLE products (
                sku TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                category_id TEXT,
                base_price INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );",
        ),
        MigrationScript::new(
            2,
            "002_create_modifier_graph",
            "CREATE TABLE product_modifications (
                modification_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                modification_type TEXT,
                price_adjustment_type TEXT NOT NULL DEFAULT 'FREE',
                base_price_cents INTEGER NOT NULL DEFAULT 0,
                is_automatic INTEGER NOT NULL DEFAULT 0,
                display_order INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE product_modifier_applicability (
                sku TEXT NOT NULL,
                modification_id TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (sku, modification_id)
            );
            CREATE TABLE modification_groups (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                selection_type TEXT NOT NULL DEFAULT 'multi',
                is_required INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE modification_group_members (
                modification_id TEXT NOT NULL,
                group_code TEXT NOT NULL,
                PRIMARY KEY (modification_id, group_code)
            );",
        ),
        MigrationScript::new(
            3,
            "003_create_modifier_relations",
            "CREATE TABLE modification_implications (
                source_modification_id TEXT NOT NULL,
                implied_modification_id TEXT NOT NULL,
                PRIMARY KEY (source_modification_id, implied_modification_id)
            );
            CREATE TABLE modification_incompatibilities (
                modification_id TEXT NOT NULL,
                incompatible_modification_id TEXT NOT NULL,
                PRIMARY KEY (modification_id, incompatible_modification_id)
            );
            CREATE TABLE modification_group_incompatibilities (
                modification_id TEXT NOT NULL,
                incompatible_group_code TEXT NOT NULL,
                PRIMARY KEY (modification_id, incompatible_group_code)
            );",
        ),
    ]
}

/// Migration info for the baseline store schema.
pub fn baseline_migration_info(store_name: &str) -> MigrationInfo {
    let scripts = baseline_store_migrations();
    let target_version = scripts.last().map(|s| s.version).unwrap_or(0);
    MigrationInfo {
        store_name: store_name.to_string(),
        target_version,
        scripts,
    }
}
