// ABOUTME: Configuration types and parsing for rexec.yml.
// ABOUTME: Decodes the server, token, and project record plus optional SSH settings.

mod ssh;

pub use ssh::SshConfig;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "rexec.yml";
pub const CONFIG_FILENAME_ALT: &str = "rexec.yaml";
pub const CONFIG_FILENAME_LEGACY: &str = "config.yaml";

#[derive(Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    /// Opaque API token, passed through untouched.
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub projects: ProjectSection,

    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    #[serde(rename = "baseUrl", default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("token", &self.redacted_token())
            .field("projects", &self.projects)
            .field("ssh", &self.ssh)
            .finish()
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_LEGACY),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!("loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Token with all but its last four characters masked.
    pub fn redacted_token(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }

    /// SSH settings, or an error naming what is missing.
    pub fn ssh(&self) -> Result<&SshConfig> {
        self.ssh
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("no ssh section and no --host given".to_string()))
    }
}
