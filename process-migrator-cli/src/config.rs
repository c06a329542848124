//! Invocation configuration
//!
//! The config file is JSON with the same camelCase keys the original tool
//! used, so existing config files keep working. Validation is fail-fast and
//! happens before any I/O: an invalid mode/config combination never touches
//! the network.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Supported run modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Read from the source account, write a process definition file
    Export,
    /// Read a process definition file, write to the target account
    Import,
    /// Read from the source account, write to the target account
    Migrate,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
            Self::Migrate => "migrate",
        }
    }

    pub fn needs_source_account(&self) -> bool {
        matches!(self, Self::Export | Self::Migrate)
    }

    pub fn needs_target_account(&self) -> bool {
        matches!(self, Self::Import | Self::Migrate)
    }

    pub fn needs_file(&self) -> bool {
        matches!(self, Self::Export | Self::Import)
    }
}

/// Behavior toggles, all off by default
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationOptions {
    /// Allow destructive picklist edits on the target
    pub overwrite_picklist: bool,
    /// Downgrade rule-import identity failures to skips
    pub continue_on_rule_import_failure: bool,
    /// Downgrade field default-value identity failures to skips
    pub continue_on_identity_default_value_failure: bool,
    /// Bypass form contribution imports entirely
    pub skip_import_form_contributions: bool,
    /// Accept matched states whose categories differ (category itself is
    /// never changed)
    pub tolerate_state_category_mismatch: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    pub source_account_url: Option<String>,
    pub source_account_token: Option<String>,
    pub target_account_url: Option<String>,
    pub target_account_token: Option<String>,
    pub source_process_name: Option<String>,
    /// Defaults to the source process name when omitted
    pub target_process_name: Option<String>,
    /// Export destination / import source
    pub export_file_path: Option<PathBuf>,
    pub options: MigrationOptions,
}

impl MigrationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Target process name with the source-name fallback
    pub fn effective_target_process_name(&self) -> Option<&str> {
        self.target_process_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.source_process_name.as_deref())
    }

    /// Reject invalid mode/config combinations before any I/O happens
    pub fn validate(&self, mode: Mode) -> Result<(), MigrationError> {
        if mode.needs_source_account() {
            if self.source_account_url.as_deref().unwrap_or("").is_empty() {
                return Err(MigrationError::Config(
                    "sourceAccountUrl is required for export/migrate".to_string(),
                ));
            }
            if self.source_account_token.as_deref().unwrap_or("").is_empty() {
                return Err(MigrationError::Config(
                    "sourceAccountToken is required for export/migrate".to_string(),
                ));
            }
            if self.source_process_name.as_deref().unwrap_or("").is_empty() {
                return Err(MigrationError::Config(
                    "sourceProcessName is required for export/migrate".to_string(),
                ));
            }
        }

        if mode.needs_target_account() {
            if self.target_account_url.as_deref().unwrap_or("").is_empty() {
                return Err(MigrationError::Config(
                    "targetAccountUrl is required for import/migrate".to_string(),
                ));
            }
            if self.target_account_token.as_deref().unwrap_or("").is_empty() {
                return Err(MigrationError::Config(
                    "targetAccountToken is required for import/migrate".to_string(),
                ));
            }
        }

        if mode.needs_file() && self.export_file_path.is_none() {
            return Err(MigrationError::Config(format!(
                "exportFilePath is required for {} mode",
                mode.as_str()
            )));
        }

        if mode == Mode::Import && self.effective_target_process_name().is_none() {
            return Err(MigrationError::Config(
                "sourceProcessName or targetProcessName is required for import".to_string(),
            ));
        }

        Ok(())
    }
}
