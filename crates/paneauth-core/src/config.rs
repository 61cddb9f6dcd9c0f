//! Configuration management for paneauth.
//!
//! Loads configuration from ${PANEAUTH_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::request::DEFAULT_SCOPES;

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for paneauth configuration.
    //!
    //! PANEAUTH_HOME resolution order:
    //! 1. PANEAUTH_HOME environment variable (if set)
    //! 2. ~/.config/paneauth (default)

    use std::path::PathBuf;

    /// Returns the paneauth home directory.
    pub fn paneauth_home() -> PathBuf {
        if let Ok(home) = std::env::var("PANEAUTH_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".paneauth"),
            |h| h.join(".config").join("paneauth"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        paneauth_home().join("config.toml")
    }
}

/// Identity-client and page configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application (client) id
    pub client_id: String,
    pub authority: String,
    /// Origin the add-in pages are served from
    pub origin: String,
    pub redirect_page: String,
    pub dialog_page: String,
    pub post_logout_redirect_page: String,
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: Self::DEFAULT_CLIENT_ID.to_string(),
            authority: Self::DEFAULT_AUTHORITY.to_string(),
            origin: Self::DEFAULT_ORIGIN.to_string(),
            redirect_page: "auth.html".to_string(),
            dialog_page: "dialog.html".to_string(),
            post_logout_redirect_page: "auth.html".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl AuthConfig {
    const DEFAULT_CLIENT_ID: &str = "148b0448-c6ab-4d8e-adb2-a0f2696966d2";
    const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";
    const DEFAULT_ORIGIN: &str = "https://localhost:3000";

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Checks that the URLs are well-formed and scopes are present.
    ///
    /// # Errors
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.authority_url()?;
        self.origin_url()?;
        if self.client_id.trim().is_empty() {
            anyhow::bail!("client_id must not be empty");
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            anyhow::bail!("at least one scope is required");
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the authority is not a valid URL.
    pub fn authority_url(&self) -> Result<Url> {
        Url::parse(&self.authority)
            .with_context(|| format!("Invalid authority URL: {}", self.authority))
    }

    /// Tenant segment of the authority (`common`, `organizations` or a tenant id).
    ///
    /// # Errors
    /// Returns an error if the authority is not a valid URL.
    pub fn authority_tenant(&self) -> Result<String> {
        let url = self.authority_url()?;
        Ok(url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .unwrap_or("common")
            .to_string())
    }

    fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin URL: {}", self.origin))
    }

    /// Absolute URL of a page served from the add-in origin.
    ///
    /// # Errors
    /// Returns an error if the origin or path is not a valid URL.
    pub fn local_url(&self, path: &str) -> Result<Url> {
        self.origin_url()?
            .join(path)
            .with_context(|| format!("Invalid page path: {path}"))
    }

    /// # Errors
    /// Returns an error if the origin is invalid.
    pub fn redirect_uri(&self) -> Result<Url> {
        self.local_url(&self.redirect_page)
    }

    /// # Errors
    /// Returns an error if the origin is invalid.
    pub fn post_logout_redirect_uri(&self) -> Result<Url> {
        self.local_url(&self.post_logout_redirect_page)
    }

    /// # Errors
    /// Returns an error if the origin is invalid.
    pub fn dialog_url(&self) -> Result<Url> {
        self.local_url(&self.dialog_page)
    }
}
