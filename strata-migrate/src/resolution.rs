//! Operator overrides for migration history problems.
//!
//! The history tracker never accepts a checksum mismatch on its own. When a
//! migration was edited on purpose after it ran, an operator records that
//! decision here and the engine consults it:
//!
//! ```toml
//! [resolutions.20240101000000_create_users]
//! reason = "Fixed a typo in a comment"
//! created_at = "2024-01-02T09:00:00Z"
//!
//! [resolutions.20240101000000_create_users.action]
//! type = "accept_checksum"
//! from_checksum = "9f2c..."
//! to_checksum = "41ab..."
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Resolutions keyed by migration name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// When the file was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Map of migration name to resolution.
    #[serde(default)]
    pub resolutions: BTreeMap<String, Resolution>,
    /// Where the config was loaded from.
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl ResolutionConfig {
    /// Create a new empty resolution config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load resolutions from a file. A missing file yields an empty config.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    file_path: Some(path.to_path_buf()),
                    ..Default::default()
                });
            }
            Err(e) => {
                return Err(MigrationError::resolution_file(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let mut config = Self::parse(&content)?;
        config.file_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse resolutions from TOML.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| MigrationError::resolution_file(format!("failed to parse resolutions: {}", e)))?;
        for (name, resolution) in &mut config.resolutions {
            if resolution.migration_name.is_empty() {
                resolution.migration_name = name.clone();
            }
        }
        Ok(config)
    }

    /// Save resolutions to a file.
    pub async fn save(&self, path: impl AsRef<Path>) -> MigrateResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrationError::resolution_file(format!("failed to create directory: {}", e)))?;
        }

        let mut config = self.clone();
        config.last_modified = Some(Utc::now());

        let content = toml::to_string_pretty(&config)
            .map_err(|e| MigrationError::resolution_file(format!("failed to serialize resolutions: {}", e)))?;
        let content = format!("# strata migration resolutions\n\n{}", content);

        tokio::fs::write(path, content)
            .await
            .map_err(|e| MigrationError::resolution_file(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Add a resolution, replacing any earlier one for the same migration.
    pub fn add(&mut self, resolution: Resolution) {
        self.resolutions
            .insert(resolution.migration_name.clone(), resolution);
    }

    /// Remove a resolution.
    pub fn remove(&mut self, name: &str) -> Option<Resolution> {
        self.resolutions.remove(name)
    }

    /// The active resolution for a migration. Expired resolutions are ignored.
    pub fn get(&self, name: &str) -> Option<&Resolution> {
        self.resolutions.get(name).filter(|r| !r.is_expired())
    }

    /// Check if a migration should be skipped.
    pub fn should_skip(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|r| matches!(r.action, ResolutionAction::Skip))
    }

    /// Names of skipped migrations.
    pub fn skipped(&self) -> Vec<&str> {
        self.resolutions
            .values()
            .filter(|r| !r.is_expired() && matches!(r.action, ResolutionAction::Skip))
            .map(|r| r.migration_name.as_str())
            .collect()
    }

    /// Check if the change from `stored` to `current` checksum was accepted.
    pub fn accepts_checksum(&self, name: &str, stored: &str, current: &str) -> bool {
        self.get(name).is_some_and(|r| match &r.action {
            ResolutionAction::AcceptChecksum {
                from_checksum,
                to_checksum,
            } => from_checksum == stored && to_checksum == current,
            ResolutionAction::Skip => false,
        })
    }
}

/// A single operator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The migration this resolution applies to. Filled from the table key when omitted.
    #[serde(default, skip_serializing)]
    pub migration_name: String,
    /// Why the resolution exists.
    pub reason: String,
    /// When it was created.
    pub created_at: DateTime<Utc>,
    /// Who created it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// When it stops applying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The action to take.
    pub action: ResolutionAction,
}

impl Resolution {
    fn new(name: impl Into<String>, action: ResolutionAction, reason: impl Into<String>) -> Self {
        Self {
            migration_name: name.into(),
            action,
            reason: reason.into(),
            created_at: Utc::now(),
            created_by: None,
            expires_at: None,
        }
    }

    /// Accept a checksum change (the migration was edited on purpose).
    pub fn accept_checksum(
        name: impl Into<String>,
        from_checksum: impl Into<String>,
        to_checksum: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ResolutionAction::AcceptChecksum {
                from_checksum: from_checksum.into(),
                to_checksum: to_checksum.into(),
            },
            reason,
        )
    }

    /// Skip a migration entirely.
    pub fn skip(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, ResolutionAction::Skip, reason)
    }

    /// Record who made the decision.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.created_by = Some(author.into());
        self
    }

    /// Let the resolution lapse at `expires_at`.
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if this resolution has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|e| e < Utc::now())
    }
}

/// The action to take for a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Accept a checksum change.
    AcceptChecksum {
        /// Checksum stored in history.
        from_checksum: String,
        /// Checksum of the edited source.
        to_checksum: String,
    },
    /// Never apply this migration.
    Skip,
}
