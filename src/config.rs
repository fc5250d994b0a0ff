//! Engine configuration

use crate::error::{TabulaError, TabulaResult};
use crate::style::StyleTheme;
use crate::validation::ValidationPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tunables shared by export and import
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Records per sheet before a new sheet is started
    pub max_rows_per_sheet: usize,
    pub inline_list_max_count: usize,
    pub inline_list_max_chars: usize,
    /// Rows below the header that receive dropdown constraints
    pub validation_rows: u32,
    pub title_row_height: f64,
    pub default_font: String,
    pub totals_label: String,
    pub download_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rows_per_sheet: 65_536,
            inline_list_max_count: 15,
            inline_list_max_chars: 255,
            validation_rows: 100,
            title_row_height: 30.0,
            default_font: "Arial".to_string(),
            totals_label: "Total".to_string(),
            download_dir: PathBuf::from("./download"),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(path: &Path) -> TabulaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TabulaResult<()> {
        if self.max_rows_per_sheet == 0 {
            return Err(TabulaError::Config(
                "max_rows_per_sheet must be at least 1".to_string(),
            ));
        }
        if self.title_row_height <= 0.0 {
            return Err(TabulaError::Config(
                "title_row_height must be positive".to_string(),
            ));
        }
        if self.default_font.trim().is_empty() {
            return Err(TabulaError::Config("default_font is empty".to_string()));
        }
        Ok(())
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            max_inline_count: self.inline_list_max_count,
            max_inline_chars: self.inline_list_max_chars,
        }
    }

    pub fn style_theme(&self) -> StyleTheme {
        StyleTheme {
            font: self.default_font.clone(),
            ..StyleTheme::default()
        }
    }
}
