use std::env;
use std::path::PathBuf;

use anyhow::Result;

use crate::db::models::TokenType;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
pub struct Config {
    /// Directory holding one `<dataset>.db` store per dataset.
    pub workspace: PathBuf,
    /// Token type for newly created datasets (TOKENSIEVE_TOKEN_TYPE).
    pub default_token_type: TokenType,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let default_token_type = match env::var("TOKENSIEVE_TOKEN_TYPE") {
            Ok(value) => TokenType::parse(&value)?,
            Err(_) => TokenType::Raw,
        };

        Ok(Self {
            workspace: env::var("TOKENSIEVE_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./workspace")),
            default_token_type,
        })
    }

    /// Path of a dataset's store file.
    ///
    /// Dataset names become file names, so they are restricted to letters,
    /// digits, `-` and `_`.
    pub fn dataset_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!(
                "Invalid dataset name '{name}'. Use letters, digits, '-' and '_' only."
            );
        }
        Ok(self.workspace.join(format!("{name}.db")))
    }

    /// Names of the datasets present in the workspace, sorted.
    pub fn list_datasets(&self) -> Result<Vec<String>> {
        if !self.workspace.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.workspace)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "db") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
