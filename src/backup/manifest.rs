use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CaKitError, Result};

/// Name of the archive entry that holds the serialized manifest.
pub const MANIFEST_ENTRY: &str = "manifest";

/// A CA datastore always has at least an identity file and key material.
pub const MIN_ENTRIES: usize = 2;

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifestEntry {
    /// Archive entry name, `description/relative/path` with `/` separators.
    pub relative_path: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-512 of the file content.
    pub digest_hex: String,
}

/// Identity and per-file integrity record of a backup archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub archive_id: Uuid,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub entries: Vec<BackupManifestEntry>,
}

impl BackupManifest {
    pub fn new(archive_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            archive_id,
            description: description.into(),
            created_at: OffsetDateTime::now_utc(),
            entries: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CaKitError::MalformedArchive(format!("unreadable manifest: {e}")))
    }

    /// Checks the structural floor every datastore backup satisfies.
    pub fn check_structure(&self) -> Result<()> {
        if self.entries.len() < MIN_ENTRIES {
            return Err(CaKitError::MalformedArchive(format!(
                "manifest lists {} entries, at least {MIN_ENTRIES} expected",
                self.entries.len()
            )));
        }
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.relative_path.trim().is_empty())
        {
            return Err(CaKitError::MalformedArchive(format!(
                "manifest entry {i} has a blank path"
            )));
        }
        Ok(())
    }
}
