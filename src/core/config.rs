use serde::{Deserialize, Serialize};

use crate::core::errors::{QueueError, Result};

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name used in log output
    pub name: String,
    /// Maximum number of task bodies running at once (None = unbounded)
    pub max_concurrent_tasks: Option<usize>,
    /// Attach a `LoggingObserver` to every submitted task
    pub log_lifecycle: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "gatequeue".to_string(),
            max_concurrent_tasks: None,
            log_lifecycle: false,
        }
    }
}

impl QueueConfig {
    /// Create a new builder for QueueConfig
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Parse a configuration from YAML, filling missing fields with defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: QueueConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QueueError::configuration_field("name must not be empty", "name"));
        }
        if self.max_concurrent_tasks == Some(0) {
            return Err(QueueError::configuration_field(
                "max_concurrent_tasks must be greater than 0",
                "max_concurrent_tasks",
            ));
        }
        Ok(())
    }

    /// Configuration that runs at most one task body at a time
    pub fn serial() -> Self {
        Self {
            max_concurrent_tasks: Some(1),
            ..Default::default()
        }
    }
}

/// Builder for QueueConfig
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
        }
    }

    /// Set the queue name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the concurrency limit
    pub fn max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.config.max_concurrent_tasks = Some(limit);
        self
    }

    /// Enable/disable lifecycle logging
    pub fn log_lifecycle(mut self, enabled: bool) -> Self {
        self.config.log_lifecycle = enabled;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<QueueConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_tasks, None);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = QueueConfig::default();

        config.max_concurrent_tasks = Some(0);
        assert!(config.validate().is_err());
        config.max_concurrent_tasks = Some(2);

        config.name = "  ".to_string();
        assert!(config.validate().is_err());
        config.name = "q".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::builder()
            .name("uploads")
            .max_concurrent_tasks(3)
            .log_lifecycle(true)
            .build()
            .unwrap();

        assert_eq!(config.name, "uploads");
        assert_eq!(config.max_concurrent_tasks, Some(3));
        assert!(config.log_lifecycle);
        assert!(QueueConfig::builder().max_concurrent_tasks(0).build().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = QueueConfig::from_yaml_str("name: sync\nmax_concurrent_tasks: 4\n").unwrap();
        assert_eq!(config.name, "sync");
        assert_eq!(config.max_concurrent_tasks, Some(4));
        assert!(!config.log_lifecycle);

        assert!(matches!(
            QueueConfig::from_yaml_str("max_concurrent_tasks: 0"),
            Err(QueueError::Configuration { .. })
        ));
        assert!(matches!(
            QueueConfig::from_yaml_str("max_concurrent_tasks: [1, 2]"),
            Err(QueueError::Yaml(_))
        ));
    }
}
