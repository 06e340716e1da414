//! Container backend configuration
//!
//! Defines the container runtime binary, the target label to image mapping,
//! and the timeout bounding each sandbox sub-operation.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "docker.io/library/ubuntu:latest";
pub const ALPINE_IMAGE: &str = "docker.io/library/alpine:latest";

/// Container backend configuration
///
/// Pulling an image can legitimately take far longer than starting a short
/// script, so every phase has its own limit. The await-termination phase is
/// bounded by the run deadline instead.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Runtime CLI, `podman` or any docker-compatible binary
    pub runtime: String,

    /// Image used for targets without an explicit mapping
    pub default_image: String,

    /// Target label to image
    pub images: HashMap<String, String>,

    pub pull_timeout: Duration,
    pub create_timeout: Duration,
    pub start_timeout: Duration,
    pub logs_timeout: Duration,
    pub remove_timeout: Duration,
}

impl ContainerConfig {
    /// Creates a configuration with defaults for the given runtime
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            default_image: DEFAULT_IMAGE.to_string(),
            images: HashMap::from([("alpine".to_string(), ALPINE_IMAGE.to_string())]),
            pull_timeout: Duration::from_secs(300),
            create_timeout: Duration::from_secs(60),
            start_timeout: Duration::from_secs(60),
            logs_timeout: Duration::from_secs(30),
            remove_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONTAINER_RUNTIME (optional, default: podman)
    /// - IMAGE_PULL_TIMEOUT (optional, seconds, default: 300)
    /// - CONTAINER_CREATE_TIMEOUT (optional, seconds, default: 60)
    /// - CONTAINER_START_TIMEOUT (optional, seconds, default: 60)
    /// - CONTAINER_LOGS_TIMEOUT (optional, seconds, default: 30)
    /// - CONTAINER_REMOVE_TIMEOUT (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let runtime = std::env::var("CONTAINER_RUNTIME").unwrap_or_else(|_| "podman".to_string());
        let defaults = Self::new(runtime);

        let config = Self {
            pull_timeout: secs_from_env("IMAGE_PULL_TIMEOUT", defaults.pull_timeout)?,
            create_timeout: secs_from_env("CONTAINER_CREATE_TIMEOUT", defaults.create_timeout)?,
            start_timeout: secs_from_env("CONTAINER_START_TIMEOUT", defaults.start_timeout)?,
            logs_timeout: secs_from_env("CONTAINER_LOGS_TIMEOUT", defaults.logs_timeout)?,
            remove_timeout: secs_from_env("CONTAINER_REMOVE_TIMEOUT", defaults.remove_timeout)?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Maps a target label to an image
    pub fn with_image(mut self, target: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(target.into(), image.into());
        self
    }

    /// Image for a job's target label
    ///
    /// Unknown and empty labels fall back to the default image.
    pub fn image_for(&self, target: &str) -> &str {
        self.images
            .get(target.trim())
            .map(String::as_str)
            .unwrap_or(&self.default_image)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runtime.trim().is_empty() {
            anyhow::bail!("container runtime cannot be empty");
        }

        if self.default_image.trim().is_empty() {
            anyhow::bail!("default_image cannot be empty");
        }

        let limits = [
            ("pull_timeout", self.pull_timeout),
            ("create_timeout", self.create_timeout),
            ("start_timeout", self.start_timeout),
            ("logs_timeout", self.logs_timeout),
            ("remove_timeout", self.remove_timeout),
        ];
        for (name, limit) in limits {
            if limit.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new("podman")
    }
}

fn secs_from_env(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| anyhow::anyhow!("{} must be a number of seconds, got '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContainerConfig::default();
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.pull_timeout, Duration::from_secs(300));
        assert_eq!(config.create_timeout, Duration::from_secs(60));
        assert_eq!(config.remove_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_image_for_target() {
        let config = ContainerConfig::default();
        assert_eq!(config.image_for("alpine"), ALPINE_IMAGE);
        assert_eq!(config.image_for("ubuntu"), DEFAULT_IMAGE);
        assert_eq!(config.image_for(""), DEFAULT_IMAGE);
        assert_eq!(config.image_for("windows-latest"), DEFAULT_IMAGE);
    }

    #[test]
    fn test_with_image() {
        let config = ContainerConfig::default().with_image("rust", "docker.io/library/rust:1");
        assert_eq!(config.image_for("rust"), "docker.io/library/rust:1");
        assert_eq!(config.image_for("alpine"), ALPINE_IMAGE);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ContainerConfig::default();
        assert!(config.validate().is_ok());

        config.runtime = String::new();
        assert!(config.validate().is_err());

        config.runtime = "docker".to_string();
        config.pull_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.pull_timeout = Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }
}
