use super::ProjectConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find the project file starting from the current directory.
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        let config_path = dir.join(".poststack.yaml");
        if config_path.exists() {
            return Ok(config_path);
        }

        // Try alternate name
        let alt_path = dir.join(".poststack.yml");
        if alt_path.exists() {
            return Ok(alt_path);
        }

        // Try parent directory
        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find .poststack.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load and parse the project file. Does not validate — callers run
    /// `validate` with the config file's directory.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<ProjectConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    /// Parse a project document from a YAML string.
    pub fn parse_config(&self, content: &str) -> Result<ProjectConfig> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse project file: {}", e)))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
