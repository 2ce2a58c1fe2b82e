//! Session configuration.

use std::path::PathBuf;

use crate::error::ConfigurationError;
use crate::keyword::KeywordSet;
use crate::storage::PersistentConfig;

/// Default store location, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "database.db";

/// Where and how counts are persisted.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store directory.
    pub path: PathBuf,
    /// Whether to fsync after every write.
    pub sync_on_write: bool,
    /// Log size that triggers compaction (bytes).
    pub max_log_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let persistent = PersistentConfig::default();
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            sync_on_write: persistent.sync_on_write,
            max_log_size: persistent.max_log_size,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn validate(self) -> Result<Self, ConfigurationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigurationError::InvalidStorePath {
                path: String::new(),
                reason: "path is empty".to_string(),
            });
        }
        if self.path.is_file() {
            return Err(ConfigurationError::InvalidStorePath {
                path: self.path.display().to_string(),
                reason: "exists and is not a directory".to_string(),
            });
        }
        self.persistent().validate()?;
        Ok(self)
    }

    /// Storage-layer view of this configuration.
    #[must_use]
    pub fn persistent(&self) -> PersistentConfig {
        PersistentConfig {
            max_log_size: self.max_log_size,
            sync_on_write: self.sync_on_write,
        }
    }
}

/// Everything a session needs before it starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tracked keywords in display order.
    pub keywords: Vec<String>,
    /// Where and how counts are persisted.
    pub store: StoreConfig,
    /// Reload counts from the store before streaming.
    pub resume: bool,
    /// Register a channel and publish every match on it.
    pub publish: bool,
}

impl SessionConfig {
    pub fn new<I, S>(keywords: I, store: StoreConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            store,
            resume: false,
            publish: false,
        }
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    pub fn validate(self) -> Result<Self, ConfigurationError> {
        KeywordSet::new(self.keywords.iter().map(String::as_str))?;
        let store = self.store.validate()?;
        Ok(Self { store, ..self })
    }

    /// Build the keyword set.
    pub fn keyword_set(&self) -> Result<KeywordSet, ConfigurationError> {
        KeywordSet::new(self.keywords.iter().map(String::as_str))
    }
}
