//! Registry configuration
//!
//! Manages the named marketplace registries a user may publish to.
//! Stored as an operator-editable `registries.yaml` in the user config
//! directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default registry name
pub const DEFAULT_REGISTRY_NAME: &str = "marketplace";

/// Default registry URL
pub const DEFAULT_REGISTRY_URL: &str = "https://marketplace.dashforge.io";

/// A configured marketplace registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Registry name (e.g. "marketplace", "mycompany")
    pub name: String,

    /// Base URL of the registry API
    pub url: String,

    /// Whether this is the default publish target
    #[serde(default)]
    pub is_default: bool,
}

/// Registry configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// List of configured registries
    pub registries: Vec<Registry>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registries: vec![Registry {
                name: DEFAULT_REGISTRY_NAME.to_string(),
                url: DEFAULT_REGISTRY_URL.to_string(),
                is_default: true,
            }],
        }
    }
}

/// Manages the configured registries
pub struct RegistryManager {
    config: RegistryConfig,
    config_path: PathBuf,
}

impl RegistryManager {
    /// Load registry configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(config_path)
    }

    /// Load registry configuration from a specific path
    pub fn load_from_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read registry config: {}", config_path.display())
            })?;
            serde_yaml_ng::from_str(&content).with_context(|| {
                format!("Failed to parse registry config: {}", config_path.display())
            })?
        } else {
            RegistryConfig::default()
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get the default config file path
    fn default_config_path() -> Result<PathBuf> {
        let config_dir = directories::ProjectDirs::from("io", "dashforge", "dashforge")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|d| d.join("dashforge")))
            .context("Could not determine config directory")?;

        Ok(config_dir.join("registries.yaml"))
    }

    /// Save the current configuration
    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(&self.config)
            .context("Failed to serialize registry config")?;

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write registry config: {}",
                self.config_path.display()
            )
        })?;

        Ok(())
    }

    /// Get all configured registries
    pub fn registries(&self) -> &[Registry] {
        &self.config.registries
    }

    /// Get a registry by name
    pub fn get_registry(&self, name: &str) -> Option<&Registry> {
        self.config.registries.iter().find(|r| r.name == name)
    }

    /// Get the default registry
    pub fn default_registry(&self) -> Option<&Registry> {
        self.config
            .registries
            .iter()
            .find(|r| r.is_default)
            .or_else(|| self.config.registries.first())
    }

    /// Add a new registry
    pub fn add_registry(&mut self, name: &str, url: &str) -> Result<()> {
        if self.config.registries.iter().any(|r| r.name == name) {
            anyhow::bail!("Registry '{}' already exists", name);
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Registry URL must start with http:// or https://");
        }

        self.config.registries.push(Registry {
            name: name.to_string(),
            url: url.to_string(),
            is_default: false,
        });

        Ok(())
    }

    /// Remove a registry by name
    pub fn remove_registry(&mut self, name: &str) -> Result<()> {
        if name == DEFAULT_REGISTRY_NAME {
            anyhow::bail!(
                "Cannot remove the default '{}' registry",
                DEFAULT_REGISTRY_NAME
            );
        }

        let initial_len = self.config.registries.len();
        self.config.registries.retain(|r| r.name != name);

        if self.config.registries.len() == initial_len {
            anyhow::bail!("Registry '{}' not found", name);
        }

        Ok(())
    }
}
