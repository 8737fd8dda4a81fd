//! Resolution of user settings.
//!
//! Every setting is looked up in order: command-line flag, environment
//! variable, `config.redb`, built-in default.

use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    embedding::EmbedderSpec,
    error::{Error, Result},
    ingestion::{DEFAULT_BATCH_SIZE, IngestionConfig},
    model_manager::MODEL_ENV_VAR,
    retrieval::DEFAULT_TOP_K,
};

pub const DOCS_DIR_ENV_VAR: &str = "DOCRAG_DOCS_DIR";
pub const EMBEDDER_ENV_VAR: &str = "DOCRAG_EMBEDDER";

/// Document directory used when nothing else is configured.
pub const DEFAULT_DOCS_DIR: &str = "data/docs";

/// Keys accepted by `docrag config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    DocsDir,
    Embedder,
    ChunkSize,
    ChunkOverlap,
    BatchSize,
    TopK,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::DocsDir,
        SettingKey::Embedder,
        SettingKey::ChunkSize,
        SettingKey::ChunkOverlap,
        SettingKey::BatchSize,
        SettingKey::TopK,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocsDir => "docs_dir",
            Self::Embedder => "embedder",
            Self::ChunkSize => "chunk_size",
            Self::ChunkOverlap => "chunk_overlap",
            Self::BatchSize => "batch_size",
            Self::TopK => "top_k",
        }
    }

    /// Check that `value` is acceptable for this key.
    pub fn validate(&self, value: &str) -> Result<()> {
        match self {
            Self::DocsDir if value.trim().is_empty() => {
                Err(Error::Config("docs_dir must not be empty".into()))
            }
            Self::DocsDir => Ok(()),
            Self::Embedder => value.parse::<EmbedderSpec>().map(|_| ()),
            Self::ChunkOverlap => parse_count(*self, value).map(|_| ()),
            Self::ChunkSize | Self::BatchSize | Self::TopK => {
                parse_positive(*self, value).map(|_| ())
            }
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::NotFound {
                kind: "setting",
                name: s.to_string(),
            })
    }
}

fn parse_count(key: SettingKey, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}

fn parse_positive(key: SettingKey, value: &str) -> Result<usize> {
    match parse_count(key, value)? {
        0 => Err(Error::Config(format!("{key} must be positive"))),
        n => Ok(n),
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub docs_dir: Option<PathBuf>,
    pub embedder: Option<EmbedderSpec>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub batch_size: Option<usize>,
    pub top_k: Option<usize>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub docs_dir: PathBuf,
    /// `None` means "whatever the index was built with".
    pub embedder: Option<EmbedderSpec>,
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    pub top_k: usize,
}

impl Settings {
    pub fn resolve(config: &ConfigDb, overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(config, overrides, |name| std::env::var(name).ok())
    }

    fn resolve_with(
        config: &ConfigDb,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let stored = |key: SettingKey| config.get_setting(key.as_str());

        let docs_dir = match &overrides.docs_dir {
            Some(dir) => dir.clone(),
            None => env(DOCS_DIR_ENV_VAR)
                .or(stored(SettingKey::DocsDir)?)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_DIR)),
        };

        let embedder = match &overrides.embedder {
            Some(spec) => Some(spec.clone()),
            None => {
                if let Some(spec) = env(EMBEDDER_ENV_VAR) {
                    Some(spec.parse()?)
                } else if let Some(model_id) = env(MODEL_ENV_VAR) {
                    Some(EmbedderSpec::Colbert { model_id })
                } else {
                    stored(SettingKey::Embedder)?
                        .map(|s| s.parse())
                        .transpose()?
                }
            }
        };

        let number = |key: SettingKey, flag: Option<usize>| -> Result<Option<usize>> {
            match flag {
                Some(n) => Ok(Some(n)),
                None => stored(key)?
                    .map(|v| {
                        key.validate(&v)?;
                        parse_count(key, &v)
                    })
                    .transpose(),
            }
        };

        let chunk_size = number(SettingKey::ChunkSize, overrides.chunk_size)?
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        // An unset overlap shrinks to fit small chunk sizes.
        let chunk_overlap =
            number(SettingKey::ChunkOverlap, overrides.chunk_overlap)?
                .unwrap_or_else(|| {
                    if DEFAULT_CHUNK_OVERLAP < chunk_size {
                        DEFAULT_CHUNK_OVERLAP
                    } else {
                        chunk_size / 4
                    }
                });
        let chunking = ChunkingConfig::new(chunk_size, chunk_overlap)?;

        let batch_size = number(SettingKey::BatchSize, overrides.batch_size)?
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let top_k =
            number(SettingKey::TopK, overrides.top_k)?.unwrap_or(DEFAULT_TOP_K);
        if batch_size == 0 || top_k == 0 {
            return Err(Error::Config(
                "batch_size and top_k must be positive".into(),
            ));
        }

        Ok(Self {
            docs_dir,
            embedder,
            chunking,
            batch_size,
            top_k,
        })
    }

    pub fn ingestion_config(&self) -> Result<IngestionConfig> {
        IngestionConfig::new(self.chunking, self.batch_size)
    }

    /// `(key, effective value)` pairs for display.
    pub fn describe(&self) -> Vec<(SettingKey, String)> {
        vec![
            (SettingKey::DocsDir, self.docs_dir.display().to_string()),
            (
                SettingKey::Embedder,
                self.embedder
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "(from index)".to_string()),
            ),
            (SettingKey::ChunkSize, self.chunking.chunk_size().to_string()),
            (
                SettingKey::ChunkOverlap,
                self.chunking.chunk_overlap().to_string(),
            ),
            (SettingKey::BatchSize, self.batch_size.to_string()),
            (SettingKey::TopK, self.top_k.to_string()),
        ]
    }
}
