// Settings file parsing

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported settings file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of `path` from its extension.
    pub fn detect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|s| s.to_str()).ok_or_else(|| {
            ConfigError::LoadError(format!("{} has no file extension", path.display()))
        })?;

        Self::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))
    }

    /// Parse file contents into a flat-or-nested JSON object.
    pub fn parse(&self, content: &str) -> Result<Map<String, Value>> {
        let value = match self {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(table)
                    .map_err(|e| ConfigError::ParseError(format!("TOML conversion error: {}", e)))?
            }
            FileFormat::Env => Value::Object(parse_env_lines(content)),
        };

        match value {
            Value::Object(map) => Ok(map),
            other => Err(ConfigError::ParseError(format!(
                "expected a table of settings, found {}",
                other
            ))),
        }
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Map<String, Value>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.parse(&content)
    }
}

// KEY=value lines; keys are lowercased so they line up with environment keys.
fn parse_env_lines(content: &str) -> Map<String, Value> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_lowercase(), Value::String(value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let map = FileFormat::Json
            .parse(r#"{"url": "http://localhost:9200", "number_of_shards": 2}"#)
            .unwrap();
        assert_eq!(map["number_of_shards"], 2);
    }

    #[test]
    fn test_parse_json_rejects_non_object() {
        assert!(FileFormat::Json.parse("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let map = FileFormat::Toml
            .parse(
                r#"
                url = "http://es:9200"
                single_node = true
                number_of_replicas = 1
            "#,
            )
            .unwrap();
        assert_eq!(map["single_node"], true);
        assert_eq!(map["number_of_replicas"], 1);
    }

    #[test]
    fn test_parse_env() {
        let map = FileFormat::Env
            .parse(
                r#"
                # cluster
                URL=http://es:9200
                PASSWORD="s3cret"
            "#,
            )
            .unwrap();
        assert_eq!(map["url"], "http://es:9200");
        assert_eq!(map["password"], "s3cret");
    }

    #[test]
    fn test_detect() {
        assert_eq!(FileFormat::detect("search.toml").unwrap(), FileFormat::Toml);
        assert_eq!(FileFormat::detect("a/b/search.JSON").unwrap(), FileFormat::Json);
        assert!(FileFormat::detect("search").is_err());
        assert!(FileFormat::detect("search.yaml").is_err());
    }
}
