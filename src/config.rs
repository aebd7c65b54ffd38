//! `codegraph.toml` settings
//!
//! Every field is optional. A CLI flag beats the file, and the file beats
//! the built-in default.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Chunk size the CLI uses when neither a flag nor the config sets one
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(500) {
    Some(n) => n,
    None => unreachable!(),
};

pub const CONFIG_FILE: &str = "codegraph.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CodegraphConfig {
    pub database: Option<String>,
    /// Records per sub-transaction when committing a batch
    pub chunk_size: Option<usize>,
    /// Derive `similar` relationships between embeddings at or above this score
    pub similarity_threshold: Option<f64>,
    /// Repository name recorded for ingested batches
    pub repository: Option<String>,
}

impl CodegraphConfig {
    /// Settings written by `codegraph init`
    pub fn for_database(database: &Path) -> Self {
        Self {
            database: Some(database.to_string_lossy().into_owned()),
            chunk_size: Some(DEFAULT_CHUNK_SIZE.get()),
            ..Default::default()
        }
    }

    /// Read and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(config)
    }

    /// Write the config, refusing to replace an existing file unless `force`
    pub fn save(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        if path.exists() && !force {
            bail!("config already exists at {} (use --force to overwrite)", path.display());
        }
        self.validate()?;
        ensure_parent_dir(path)?;
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == Some(0) {
            bail!("chunk_size must be at least 1");
        }
        if let Some(t) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                bail!("similarity_threshold must be within [0, 1], got {}", t);
            }
        }
        Ok(())
    }

    /// Flag over config over [`DEFAULT_CHUNK_SIZE`]; zero is rejected
    pub fn resolve_chunk_size(&self, flag: Option<usize>) -> anyhow::Result<NonZeroUsize> {
        match flag.or(self.chunk_size) {
            Some(n) => NonZeroUsize::new(n).context("chunk size must be at least 1"),
            None => Ok(DEFAULT_CHUNK_SIZE),
        }
    }

    /// Flag over config over `<base>/.codegraph/codegraph.db`
    pub fn resolve_database(&self, flag: Option<&Path>, base: &Path) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| default_database_path_in(base))
    }
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".codegraph").join("codegraph.db")
}

/// Create the directory a file will live in
pub fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = CodegraphConfig {
            database: Some("graph.db".to_string()),
            chunk_size: Some(250),
            similarity_threshold: Some(0.9),
            repository: Some("demo".to_string()),
        };

        config.save(&path, false).unwrap();
        assert!(config.save(&path, false).is_err());
        config.save(&path, true).unwrap();

        assert_eq!(CodegraphConfig::load(&path).unwrap(), config);
        let missing = CodegraphConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing, CodegraphConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        std::fs::write(&path, "similarity_threshold = 1.5\n").unwrap();
        assert!(CodegraphConfig::load(&path).is_err());

        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        assert!(CodegraphConfig::load(&path).is_err());

        std::fs::write(&path, "chunk = 10\n").unwrap();
        assert!(CodegraphConfig::load(&path).is_err());
    }

    #[test]
    fn test_chunk_size_precedence() {
        let config = CodegraphConfig {
            chunk_size: Some(250),
            ..Default::default()
        };
        assert_eq!(config.resolve_chunk_size(Some(10)).unwrap().get(), 10);
        assert_eq!(config.resolve_chunk_size(None).unwrap().get(), 250);
        assert_eq!(CodegraphConfig::default().resolve_chunk_size(None).unwrap(), DEFAULT_CHUNK_SIZE);
        assert!(config.resolve_chunk_size(Some(0)).is_err());
    }

    #[test]
    fn test_database_precedence() {
        let base = Path::new("/work");
        let config = CodegraphConfig::for_database(Path::new("from-config.db"));

        assert_eq!(
            config.resolve_database(Some(Path::new("flag.db")), base),
            PathBuf::from("flag.db")
        );
        assert_eq!(config.resolve_database(None, base), PathBuf::from("from-config.db"));
        assert_eq!(
            CodegraphConfig::default().resolve_database(None, base),
            base.join(".codegraph").join("codegraph.db")
        );
    }

    #[test]
    fn test_ensure_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = default_database_path_in(dir.path());
        ensure_parent_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_parent_dir(Path::new("bare.db")).unwrap();
    }
}
