//! Hierarchical variable paths.

use crate::error::{AppCoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalised, absolute variable path such as `/Devices/adc/status`.
///
/// Normalisation adds the leading slash, collapses repeated slashes and
/// strips a trailing slash. Components must be non-empty and must not
/// contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariablePath(String);

impl VariablePath {
    /// Parse and normalise a path.
    pub fn parse(raw: &str) -> Result<Self> {
        let components: Vec<&str> = raw.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(AppCoreError::InvalidName {
                name: raw.to_string(),
                cause: "path has no components".to_string(),
            });
        }
        if let Some(bad) = components
            .iter()
            .find(|c| c.chars().any(char::is_whitespace))
        {
            return Err(AppCoreError::InvalidName {
                name: raw.to_string(),
                cause: format!("component '{}' contains whitespace", bad),
            });
        }
        Ok(Self(format!("/{}", components.join("/"))))
    }

    /// Append a relative component.
    pub fn join(&self, child: &str) -> Result<Self> {
        Self::parse(&format!("{}/{}", self.0, child))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path component.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VariablePath {
    type Error = AppCoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VariablePath> for String {
    fn from(path: VariablePath) -> Self {
        path.0
    }
}

impl AsRef<str> for VariablePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_slashes() {
        let path = VariablePath::parse("Devices//adc/status/").unwrap();
        assert_eq!(path.as_str(), "/Devices/adc/status");
        assert_eq!(path.name(), "status");
    }

    #[test]
    fn join_appends() {
        let base = VariablePath::parse("/Devices/adc").unwrap();
        assert_eq!(
            base.join("status_message").unwrap().as_str(),
            "/Devices/adc/status_message"
        );
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(VariablePath::parse("///").is_err());
        assert!(VariablePath::parse("/a b/c").is_err());
    }
}
