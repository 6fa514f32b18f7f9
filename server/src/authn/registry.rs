//! Registry credential encodings
//!
//! The registry credentials are needed downstream in two shapes: the
//! base64 `user:pass` blob the docker credential store understands, and the
//! `{"auths": {...}}` document a `kubernetes.io/dockerconfigjson` secret
//! carries.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::settings::RegistrySettings;
use crate::config::SecretValue;
use crate::errors::StormError;

/// Base64 encoding of `username:password`
pub fn auth_base64(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password))
}

/// One registry entry of a docker config document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub username: String,
    pub password: String,
    pub email: String,
    pub auth: String,
}

/// Docker config document (`.dockerconfigjson`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthsDocument {
    pub auths: BTreeMap<String, AuthEntry>,
}

/// Docker config JSON with a single entry keyed by `registry`
pub fn pull_secret_document(
    registry: &str,
    username: &str,
    password: &str,
) -> Result<Vec<u8>, StormError> {
    let entry = AuthEntry {
        username: username.to_string(),
        password: password.to_string(),
        email: String::new(),
        auth: auth_base64(username, password),
    };
    let document = AuthsDocument {
        auths: BTreeMap::from([(registry.to_string(), entry)]),
    };
    Ok(serde_json::to_vec(&document)?)
}

/// Registry credentials taken from the settings
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    url: String,
    host: String,
    username: String,
    password: SecretValue,
}

impl RegistryCredentials {
    pub fn new(settings: &RegistrySettings) -> Self {
        Self {
            url: settings.url.trim().to_string(),
            host: settings.host().to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    /// Registry host used in image references
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Payload of the cluster pull secret, keyed by the configured URL
    pub fn pull_secret_document(&self) -> Result<Vec<u8>, StormError> {
        pull_secret_document(&self.url, &self.username, self.password.expose())
    }

    /// Docker CLI `config.json`, keyed by the registry host so that
    /// `docker push <host>/<repo>:<tag>` finds the credential
    pub fn docker_config_document(&self) -> Result<Vec<u8>, StormError> {
        pull_secret_document(&self.host, &self.username, self.password.expose())
    }
}
