//! Container image building and publishing
//!
//! An uploaded executable is turned into an image in two steps: [`context`]
//! materializes a build directory (binary plus generated Dockerfile), then an
//! [`ImageBuilder`] streams that directory as a tar archive into the image
//! engine and pushes the resulting tag.

pub mod context;
pub mod docker;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;

use crate::errors::StormError;

/// Readable stream of executable bytes
pub type BinaryStream = Box<dyn AsyncRead + Send + Unpin>;

/// Length of the hex fingerprint in an image tag
pub const FINGERPRINT_LEN: usize = 6;

/// Image builder trait for testability
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Assemble a context under `build_dir` and build a uniquely tagged image
    async fn build(
        &self,
        build_dir: &str,
        app_name: &str,
        binary: BinaryStream,
    ) -> Result<ImageTag, StormError>;

    /// Push a previously built tag to the registry
    async fn push(&self, tag: &ImageTag) -> Result<(), StormError>;
}

/// Fully qualified image reference, `{registry}/{app}:{fingerprint}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTag(String);

impl ImageTag {
    pub fn new(registry_host: &str, app_name: &str, fingerprint: &str) -> Self {
        Self(format!(
            "{}/{}:{}",
            registry_host,
            app_name.to_lowercase(),
            fingerprint
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ImageTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ImageTag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh per-build fingerprint: hex prefix of SHA-256 over a random UUID.
///
/// Identical binaries get different fingerprints on every build.
pub fn fingerprint() -> String {
    let digest = Sha256::digest(uuid::Uuid::new_v4().as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}
