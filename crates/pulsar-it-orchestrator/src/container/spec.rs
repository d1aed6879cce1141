//! Container image references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container image specification.
///
/// Represents a Docker image reference with optional registry, tag and digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerImage {
    reference: String,
}

impl ContainerImage {
    /// Creates a new container image from a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulsar_it_orchestrator::container::ContainerImage;
    ///
    /// let image = ContainerImage::new("cassandra:3");
    /// assert_eq!(image.reference(), "cassandra:3");
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the image name (without tag or digest).
    pub fn name(&self) -> &str {
        let without_digest = self.reference.split('@').next().unwrap_or(&self.reference);
        match without_digest.rfind(':') {
            // A colon before the last slash belongs to a registry port.
            Some(idx) if !without_digest[idx..].contains('/') => &without_digest[..idx],
            _ => without_digest,
        }
    }

    /// Returns the image tag if present.
    pub fn tag(&self) -> Option<&str> {
        let without_digest = self.reference.split('@').next()?;
        let idx = without_digest.rfind(':')?;
        let tag = &without_digest[idx + 1..];
        (!tag.contains('/')).then_some(tag)
    }

    /// Returns the image digest if present.
    pub fn digest(&self) -> Option<&str> {
        self.reference.split_once('@').map(|(_, digest)| digest)
    }
}

impl fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)
    }
}

impl From<&str> for ContainerImage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerImage {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_image_parsing() {
        let image = ContainerImage::new("apachepulsar/pulsar-test-latest-version:latest");
        assert_eq!(image.name(), "apachepulsar/pulsar-test-latest-version");
        assert_eq!(image.tag(), Some("latest"));
        assert_eq!(image.digest(), None);
    }

    #[test]
    fn test_container_image_with_registry_port() {
        let image = ContainerImage::new("localhost:5000/pulsar");
        assert_eq!(image.name(), "localhost:5000/pulsar");
        assert_eq!(image.tag(), None);
    }

    #[test]
    fn test_container_image_with_digest() {
        let image = ContainerImage::new("mysql@sha256:abc123");
        assert_eq!(image.name(), "mysql");
        assert_eq!(image.tag(), None);
        assert_eq!(image.digest(), Some("sha256:abc123"));
    }
}
