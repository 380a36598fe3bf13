//! core::settings
//!
//! Server settings consumed by the receive pipeline.
//!
//! Settings are loaded from a TOML file by the hosting server and passed
//! into the pipeline at construction; there is no process-wide settings
//! singleton.
//!
//! # Example
//!
//! ```toml
//! short_commit_id_length = 6
//! min_title_length = 10
//! max_title_length = 100
//! require_mergeable = true
//!
//! [hooks]
//! pre_receive = ["blockpush.sh"]
//! post_receive = ["notify.sh"]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from settings loading.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Script hooks declared for each receive phase, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HookSettings {
    /// Scripts run before any ref changes; a failure rejects pending
    /// commands.
    pub pre_receive: Vec<String>,

    /// Scripts run after refs are applied; best-effort.
    pub post_receive: Vec<String>,
}

/// Server-wide settings for the receive pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Abbreviation length for commit ids in protocol messages.
    pub short_commit_id_length: usize,

    /// Minimum length of a new proposal's title.
    pub min_title_length: usize,

    /// Maximum length of a new proposal's title.
    pub max_title_length: usize,

    /// When true, every patchset revision must merge cleanly into its
    /// integration branch; when false only brand-new proposals must.
    pub require_mergeable: bool,

    /// Append `Signed-off-by` trailers for reviewers to merge commits.
    pub signoff_reviewers: bool,

    /// Directory containing hook scripts.
    pub hooks_dir: Option<std::path::PathBuf>,

    /// Hook scripts per phase.
    pub hooks: HookSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            short_commit_id_length: 6,
            min_title_length: 10,
            max_title_length: 100,
            require_mergeable: true,
            signoff_reviewers: false,
            hooks_dir: None,
            hooks: HookSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text and validate.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Validate the settings values.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` if any value is out of range.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_title_length == 0 {
            return Err(SettingsError::InvalidValue(
                "min_title_length must be at least 1".into(),
            ));
        }
        if self.max_title_length < self.min_title_length {
            return Err(SettingsError::InvalidValue(format!(
                "max_title_length ({}) is below min_title_length ({})",
                self.max_title_length, self.min_title_length
            )));
        }
        if self.short_commit_id_length < 4 || self.short_commit_id_length > 40 {
            return Err(SettingsError::InvalidValue(
                "short_commit_id_length must be between 4 and 40".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.min_title_length, 10);
        assert_eq!(settings.max_title_length, 100);
    }

    #[test]
    fn parses_toml_with_hooks() {
        let settings = Settings::from_toml(
            r#"
            min_title_length = 5
            [hooks]
            pre_receive = ["block.sh"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.min_title_length, 5);
        assert_eq!(settings.hooks.pre_receive, vec!["block.sh"]);
        assert!(settings.hooks.post_receive.is_empty());
    }

    #[test]
    fn rejects_inverted_title_bounds() {
        let err = Settings::from_toml("min_title_length = 50\nmax_title_length = 10");
        assert!(err.is_err());
    }
}
