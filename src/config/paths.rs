//! Filesystem locations for configuration and data

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolved directories for the running instance
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Paths {
    /// Resolve directories, honouring an explicit data directory override
    pub fn new(data_override: Option<PathBuf>) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("fm", "teal", "piper");

        let config_dir = dirs
            .as_ref()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let data_dir = match data_override {
            Some(path) => path,
            None => dirs
                .as_ref()
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("./data")),
        };

        let paths = Self {
            config_dir,
            data_dir,
        };
        paths.create_directories()?;

        Ok(paths)
    }

    fn create_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", self.data_dir))?;
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default location of the TOML configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("piper.toml")
    }

    /// Default SQLite database URL
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.data_dir.join("piper.db").display())
    }
}
