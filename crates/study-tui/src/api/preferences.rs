use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use study_shared::projection::{CategoryFilter, SortOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMode {
    #[default]
    List,
    Calendar,
}

impl DashboardMode {
    pub fn toggle(&self) -> Self {
        match self {
            Self::List => Self::Calendar,
            Self::Calendar => Self::List,
        }
    }
}

/// Dashboard settings remembered between sessions. Search text is not kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub mode: DashboardMode,
    #[serde(default)]
    pub category: CategoryFilter,
    #[serde(default)]
    pub sort: SortOrder,
}

impl UserPreferences {
    fn prefs_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("study-tui");

        fs::create_dir_all(&config_dir)
            .context("Could not create config directory")?;

        Ok(config_dir.join("preferences.json"))
    }

    /// Load preferences from disk
    pub fn load() -> Result<Self> {
        let path = Self::prefs_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .context("Could not read preferences file")?;

        let prefs: Self = serde_json::from_str(&contents)
            .context("Could not parse preferences file")?;

        Ok(prefs)
    }

    /// Save preferences to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::prefs_path()?;
        let contents = serde_json::to_string_pretty(self)
            .context("Could not serialize preferences")?;

        fs::write(&path, contents)
            .context("Could not write preferences file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_shared::Category;

    #[test]
    fn reads_partial_files_with_defaults() {
        let prefs: UserPreferences = serde_json::from_str(r#"{ "sort": "za" }"#).unwrap();
        assert_eq!(prefs.sort, SortOrder::TitleDesc);
        assert_eq!(prefs.mode, DashboardMode::List);
        assert_eq!(prefs.category, CategoryFilter::All);
    }

    #[test]
    fn category_is_stored_by_name() {
        let prefs = UserPreferences {
            mode: DashboardMode::Calendar,
            category: CategoryFilter::Only(Category::ThreeDModeling),
            sort: SortOrder::Oldest,
        };
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["category"], "3D Modeling");
        assert_eq!(json["mode"], "calendar");
    }
}
