//! Reporter configuration
//!
//! Loaded from a TOML file, overlaid with `RP_*` environment variables and
//! validated before any reporting begins.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{Attribute, LaunchId, LaunchMode};

/// Environment variable carrying the reporting service endpoint
pub const ENV_ENDPOINT: &str = "RP_ENDPOINT";
/// Environment variable carrying the API token
pub const ENV_TOKEN: &str = "RP_TOKEN";
/// Environment variable carrying the project name
pub const ENV_PROJECT: &str = "RP_PROJECT";
/// Environment variable carrying an externally owned launch
pub const ENV_LAUNCH_ID: &str = "RP_LAUNCH_ID";

/// Reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Reporting service API base, e.g. `https://rp.example.com/api/v1`
    pub endpoint: String,

    /// API token
    pub token: String,

    /// Custom header carrying the token instead of `Authorization: Bearer`
    pub auth_header: Option<String>,

    /// Project the launch is reported into
    pub project: String,

    /// Verbose diagnostics
    pub debug: bool,

    /// Capture a screenshot when a test fails
    pub screenshot_on_fail: bool,

    /// Screenshot command; `{path}` is replaced with the target file
    pub screenshot_command: Option<Vec<String>>,

    /// Launch configuration
    pub launch: LaunchConfig,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            auth_header: None,
            project: String::new(),
            debug: false,
            screenshot_on_fail: true,
            screenshot_command: None,
            launch: LaunchConfig::default(),
        }
    }
}

/// Launch-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub name: String,
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub rerun: bool,
    pub rerun_of: Option<String>,
    pub mode: LaunchMode,

    /// Report into an existing launch instead of creating one
    pub id: Option<LaunchId>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            name: "stepmirror launch".to_string(),
            description: None,
            attributes: Vec::new(),
            rerun: false,
            rerun_of: None,
            mode: LaunchMode::Default,
            id: None,
        }
    }
}

impl ReporterConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from the process environment
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable source
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.token = token;
        }
        if let Some(project) = non_empty(ENV_PROJECT) {
            self.project = project;
        }
        if let Some(raw) = non_empty(ENV_LAUNCH_ID) {
            let id = raw.parse::<LaunchId>().map_err(|e| {
                Error::InvalidConfig(format!("{} is not a valid launch id: {}", ENV_LAUNCH_ID, e))
            })?;
            self.launch.id = Some(id);
        }
        Ok(self)
    }

    /// Check required settings
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint is required".to_string()));
        }
        reqwest::Url::parse(&self.endpoint).map_err(|e| {
            Error::InvalidConfig(format!("endpoint '{}' is not a valid URL: {}", self.endpoint, e))
        })?;
        if self.token.trim().is_empty() {
            return Err(Error::InvalidConfig("token is required".to_string()));
        }
        if self.project.trim().is_empty() {
            return Err(Error::InvalidConfig("project is required".to_string()));
        }
        if let Some(header) = &self.auth_header {
            if header.trim().is_empty() {
                return Err(Error::InvalidConfig("auth_header must not be empty".to_string()));
            }
        }
        if let Some(command) = &self.screenshot_command {
            if command.is_empty() {
                return Err(Error::InvalidConfig(
                    "screenshot_command must name a program".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the launch is owned by someone else
    pub fn external_launch(&self) -> Option<LaunchId> {
        self.launch.id
    }
}
