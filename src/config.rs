use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{Error, Result};

/// Capture parameter restricting which tables a source emits events for.
pub const TABLE_REGEX_OPTION: &str = "TableRegex";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Connection target handed to the capture source.
    pub uri: String,
    #[serde(default)]
    pub table_regex: Option<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Session initialization request sent to a capture source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInit {
    pub uri: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ConsumerConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            table_regex: None,
            channel_capacity: default_channel_capacity(),
        }
    }

    pub fn with_table_regex(mut self, table_regex: impl Into<String>) -> Self {
        self.table_regex = Some(table_regex.into());
        self
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(
                ::config::Environment::with_prefix("PG_CAPTURE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(Error::Config("uri must not be empty".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(pattern) = self.table_regex() {
            Regex::new(pattern)
                .map_err(|e| Error::Config(format!("invalid table_regex: {}", e)))?;
        }
        Ok(())
    }

    /// The configured table filter, treating an empty pattern as unset.
    pub fn table_regex(&self) -> Option<&str> {
        self.table_regex.as_deref().filter(|p| !p.is_empty())
    }

    pub fn capture_init(&self) -> Result<CaptureInit> {
        self.validate()?;

        let mut parameters = BTreeMap::new();
        if let Some(pattern) = self.table_regex() {
            parameters.insert(TABLE_REGEX_OPTION.to_string(), pattern.to_string());
        }

        Ok(CaptureInit {
            uri: self.uri.clone(),
            parameters,
        })
    }
}

impl CaptureInit {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Compiles the `TableRegex` parameter. `None` means no filtering.
    pub fn table_filter(&self) -> Result<Option<Regex>> {
        match self.parameters.get(TABLE_REGEX_OPTION) {
            Some(pattern) if !pattern.is_empty() => Regex::new(pattern)
                .map(Some)
                .map_err(|e| Error::Config(format!("invalid {}: {}", TABLE_REGEX_OPTION, e))),
            _ => Ok(None),
        }
    }
}

fn default_channel_capacity() -> usize {
    1000
}
