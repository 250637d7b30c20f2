//! Connection settings for the storage driver.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::AdapterError;

const ENV_PREFIX: &str = "NEXUS_ADAPTER_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub username: String,
    pub password: String,
    /// Authentication database, when it differs from `db`.
    pub delegate: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 27017,
            db: "test".into(),
            username: String::new(),
            password: String::new(),
            delegate: None,
        }
    }
}

impl AdapterConfig {
    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, AdapterError> {
        Ok(toml::from_str(s)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self, AdapterError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Overlays `NEXUS_ADAPTER_*` environment variables on top of `self`.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(p) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = p;
        }
        if let Some(v) = var("DB") {
            self.db = v;
        }
        if let Some(v) = var("USERNAME") {
            self.username = v;
        }
        if let Some(v) = var("PASSWORD") {
            self.password = v;
        }
        if let Some(v) = var("DELEGATE") {
            self.delegate = Some(v).filter(|d| !d.is_empty());
        }
        self
    }

    #[must_use]
    pub fn connection_url(&self) -> String {
        self.url_with_password(&self.password)
    }

    /// Connection URL safe for logs.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        self.url_with_password("***")
    }

    fn url_with_password(&self, password: &str) -> String {
        let mut url = String::from("mongodb://");
        if !self.username.is_empty() {
            url.push_str(&format!("{}:{password}@", self.username));
        }
        url.push_str(&format!("{}:{}/{}", self.host, self.port, self.db));
        if let Some(d) = &self.delegate {
            url.push_str(&format!("?authSource={d}"));
        }
        url
    }
}
