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

//! Store profile records and host-side profile discovery.
//!
//! The kernel consumes parsed `StoreProfile` values only; the TOML documents
//! read here are a host concern and the kernel does not prescribe their
//! format. A small index file enumerates per-store profile files.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse profile file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Profile index {0} lists no store profiles")]
    NoProfiles(PathBuf),
}

/// One tender type a store accepts, with its change/exactness policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentTenderType {
    #[serde(default)]
    pub id: String,
    pub allows_change: bool,
    #[serde(default)]
    pub requires_exact: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseRef {
    #[serde(rename = "type")]
    pub db_type: String,
    pub connection_string: String,
}

/// Parsed store profile. The payment-type table maps tender id to policy
/// flags; `database` points at the per-store catalog database when one
/// exists.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreProfile {
    pub store_id: String,
    pub display_name: String,
    pub currency: String,
    pub culture: String,
    pub version: u32,
    #[serde(default)]
    pub payment_types: BTreeMap<String, PaymentTenderType>,
    pub database: Option<DatabaseRef>,
}

impl StoreProfile {
    /// Tender types with their map key folded into `id`.
    pub fn tender_types(&self) -> Vec<PaymentTenderType> {
        self.payment_types
            .iter()
            .map(|(id, flags)| PaymentTenderType {
                id: id.clone(),
                allows_change: flags.allows_change,
                requires_exact: flags.requires_exact,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ProfileIndex {
    #[serde(default)]
    stores: Vec<ProfileRef>,
}

#[derive(Debug, Deserialize)]
struct ProfileRef {
    profile: PathBuf,
}

/// Loads the profile index and every profile it references. Paths in the
/// index resolve relative to the index file's directory.
pub fn load_profile_index(index_path: &Path) -> Result<Vec<StoreProfile>, ProfileError> {
    let index_text = std::fs::read_to_string(index_path).map_err(|source| ProfileError::Io {
        path: index_path.to_path_buf(),
        source,
    })?;
    let index: ProfileIndex = toml::from_str(&index_text).map_err(|source| ProfileError::Parse {
        path: index_path.to_path_buf(),
        source,
    })?;

    if index.stores.is_empty() {
        return Err(ProfileError::NoProfiles(index_path.to_path_buf()));
    }

    let base = index_path.parent().unwrap_or_else(|| Path::new("."));
    let mut profiles = Vec::with_capacity(index.stores.len());
    for entry in &index.stores {
        let path = base.join(&entry.profile);
        let profile = load_profile(&path)?;
        info!(store_id = %profile.store_id, path = %path.display(), "store profile loaded");
        profiles.push(profile);
    }
    Ok(profiles)
}

pub fn load_profile(path: &Path) -> Result<StoreProfile, ProfileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_profile_document() {
        let doc = r#"
            store_id = "COFFEE_SG"
            display_name = "Kopi Corner"
            currency = "SGD"
            culture = "en-SG"
            version = 2

            [payment_types.cash]
            allows_change = true

            [payment_types.paynow]
            allows_change = false
            requires_exact = true

            [database]
            type = "sqlite"
            connection_string = "catalog/coffee_sg.db"
        "#;
        let profile: StoreProfile = toml::from_str(doc).unwrap();
        assert_eq!(profile.store_id, "COFFEE_SG");
        assert_eq!(profile.currency, "SGD");
        let tenders = profile.tender_types();
        assert_eq!(tenders.len(), 2);
        let paynow = tenders.iter().find(|t| t.id == "paynow").unwrap();
        assert!(paynow.requires_exact);
        assert!(!paynow.allows_change);
        assert_eq!(profile.database.unwrap().db_type, "sqlite");
    }

    #[test]
    fn index_with_no_stores_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.toml");
        std::fs::File::create(&index_path)
            .unwrap()
            .write_all(b"stores = []")
            .unwrap();
        let err = load_profile_index(&index_path).unwrap_err();
        assert!(matches!(err, ProfileError::NoProfiles(_)));
    }

    #[test]
    fn index_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let profile_path = dir.path().join("store1.toml");
        std::fs::write(
            &profile_path,
            r#"
                store_id = "S1"
                display_name = "Store One"
                currency = "USD"
                culture = "en-US"
                version = 1

                [payment_types.cash]
                allows_change = true
            "#,
        )
        .unwrap();
        let index_path = dir.path().join("index.toml");
        std::fs::write(&index_path, "[[stores]]\nprofile = \"store1.toml\"\n").unwrap();

        let profiles = load_profile_index(&index_path).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].store_id, "S1");
    }
}
