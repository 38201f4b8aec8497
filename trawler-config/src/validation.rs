// Settings validation

use crate::{ConfigError, Result};

/// Implemented by typed settings that can check their own invariants.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    pub fn at_least<T: PartialOrd + std::fmt::Display>(value: T, min: T, field: &str) -> Result<()> {
        if value < min {
            return Err(invalid(field, &format!("must be at least {}", min)));
        }
        Ok(())
    }

    pub fn is_url(value: &str, field: &str) -> Result<()> {
        let value = value.trim();
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(invalid(field, "must be an http:// or https:// URL"));
        }
        Ok(())
    }

    /// Every comma-separated entry must be a URL.
    pub fn is_url_list(value: &str, field: &str) -> Result<()> {
        Self::not_empty(value, field)?;
        value
            .split(',')
            .try_for_each(|entry| Self::is_url(entry, field))
    }

    pub fn is_lowercase(value: &str, field: &str) -> Result<()> {
        if value.chars().any(|c| c.is_uppercase()) {
            return Err(invalid(field, "must be lowercase"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::ValidationError(format!("{} {}", field, reason))
}
