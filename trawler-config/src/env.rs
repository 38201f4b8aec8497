// Environment variable source

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Reads settings from process environment variables.
///
/// With a prefix of `TRAWLER`, the variable `TRAWLER_INDEX_NAME` becomes the
/// key `index_name`. Variables without the prefix are ignored.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Collect every matching variable as `key -> raw value`.
    pub fn collect(&self) -> HashMap<String, String> {
        self.collect_from(env::vars())
    }

    pub(crate) fn collect_from(
        &self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> HashMap<String, String> {
        vars.into_iter()
            .filter_map(|(name, value)| self.key_for(&name).map(|key| (key, value)))
            .collect()
    }

    /// Read a single variable by its unprefixed key.
    pub fn var(&self, key: &str) -> Result<String> {
        env::var(self.var_name(key)).map_err(ConfigError::EnvError)
    }

    pub fn var_or(&self, key: &str, default: &str) -> String {
        self.var(key).unwrap_or_else(|_| default.to_string())
    }

    fn var_name(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    fn key_for(&self, name: &str) -> Option<String> {
        match &self.prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| rest.to_lowercase()),
            None => Some(name.to_lowercase()),
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_is_stripped_and_lowercased() {
        let source = EnvSource::new(Some("TRAWLER".to_string()));
        let collected = source.collect_from(vars(&[
            ("TRAWLER_URL", "http://localhost:9200"),
            ("TRAWLER_NUMBER_OF_SHARDS", "3"),
            ("HOME", "/root"),
            ("TRAWLERX", "ignored"),
        ]));

        assert_eq!(collected.len(), 2);
        assert_eq!(collected["url"], "http://localhost:9200");
        assert_eq!(collected["number_of_shards"], "3");
    }

    #[test]
    fn test_bare_prefix_variable_is_ignored() {
        let source = EnvSource::new(Some("TRAWLER".to_string()));
        let collected = source.collect_from(vars(&[("TRAWLER_", "x")]));
        assert!(collected.is_empty());
    }

    #[test]
    fn test_without_prefix_keeps_everything() {
        let source = EnvSource::default();
        let collected = source.collect_from(vars(&[("A_B", "1")]));
        assert_eq!(collected["a_b"], "1");
    }

    #[test]
    fn test_missing_var_uses_default() {
        let source = EnvSource::new(Some("TRAWLER_TEST".to_string()));
        assert!(source.var("DEFINITELY_MISSING_51234").is_err());
        assert_eq!(source.var_or("DEFINITELY_MISSING_51234", "fallback"), "fallback");
    }
}
