// Layered settings for the trawler search client

pub mod env;
pub mod error;
pub mod source;
pub mod validation;

pub use env::EnvSource;
pub use error::{ConfigError, Result};
pub use source::FileFormat;
pub use validation::{ConfigValidator, Validate};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key/value settings assembled from files, `.env`, and the environment.
///
/// Later loads overwrite earlier keys. Values that arrive as strings (every
/// environment variable does) are parsed into the requested type on read, so
/// `TRAWLER_NUMBER_OF_SHARDS=3` reads back as `3u32` while a password of
/// `12345` still reads back as the string `"12345"`.
#[derive(Clone, Default)]
pub struct Settings {
    values: Arc<RwLock<HashMap<String, Value>>>,
    env: EnvSource,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings whose environment source only reads `PREFIX_*` variables.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            values: Arc::default(),
            env: EnvSource::new(Some(prefix.into())),
        }
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    pub fn load_env(&self) -> Result<()> {
        let vars = self.env.collect();
        let mut values = self.write();
        for (key, value) in vars {
            values.insert(key, Value::String(value));
        }
        Ok(())
    }

    /// Export a `.env` file into the process environment, then reload it.
    ///
    /// Without an explicit path a missing `.env` is not an error.
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let map = format.load(path)?;
        self.merge_map(map);
        Ok(())
    }

    /// Parse settings from an in-memory document.
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let map = format.parse(content)?;
        self.merge_map(map);
        Ok(())
    }

    fn merge_map(&self, map: serde_json::Map<String, Value>) {
        let mut values = self.write();
        for (key, value) in map {
            values.insert(key, value);
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.write().insert(key.to_string(), value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)?
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// `Ok(None)` when the key is absent, an error when it is present but
    /// cannot be read as `T`.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let values = self.read();
        match values.get(key) {
            Some(value) => decode(key, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    pub fn has(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    let direct = serde_json::from_value::<T>(value.clone());
    match (direct, value) {
        (Ok(decoded), _) => Ok(decoded),
        (Err(first), Value::String(raw)) => {
            serde_json::from_str(raw.trim()).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: first.to_string(),
            })
        }
        (Err(err), _) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Assembles [`Settings`] in a fixed order: files, then `.env`, then the
/// process environment, so environment variables win.
#[derive(Default)]
pub struct SettingsBuilder {
    prefix: Option<String>,
    files: Vec<(String, Option<FileFormat>)>,
    dotenv: Option<Option<String>>,
    env: bool,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Add a settings file; the format is detected from the extension when
    /// `format` is `None`.
    pub fn add_file(mut self, path: impl Into<String>, format: Option<FileFormat>) -> Self {
        self.files.push((path.into(), format));
        self
    }

    pub fn load_dotenv(mut self, path: Option<String>) -> Self {
        self.dotenv = Some(path);
        self
    }

    pub fn load_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn build(self) -> Result<Settings> {
        let settings = match self.prefix {
            Some(prefix) => Settings::with_prefix(prefix),
            None => Settings::new(),
        };

        for (path, format) in &self.files {
            let format = match format {
                Some(format) => *format,
                None => FileFormat::detect(path)?,
            };
            settings.load_file(path, format)?;
        }

        if let Some(path) = &self.dotenv {
            settings.load_dotenv(path.as_deref())?;
        } else if self.env {
            settings.load_env()?;
        }

        Ok(settings)
    }
}
