//! Docker CLI image builder

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use crate::authn::registry::RegistryCredentials;
use crate::config::settings::BuildSettings;
use crate::errors::StormError;
use crate::filesys::dir::Dir;
use crate::image::context::{BuildContext, DOCKERFILE_NAME};
use crate::image::{fingerprint, BinaryStream, ImageBuilder, ImageTag};
use crate::sync::keyed::KeyedLocks;

/// Characters of stderr kept in error messages
const STDERR_TAIL: usize = 2048;

/// Builds with `docker build` and pushes with `docker push`
pub struct DockerImageBuilder {
    settings: BuildSettings,
    credentials: RegistryCredentials,
    build_dirs: KeyedLocks<()>,
}

impl DockerImageBuilder {
    pub fn new(settings: BuildSettings, credentials: RegistryCredentials) -> Self {
        Self {
            settings,
            credentials,
            build_dirs: KeyedLocks::new(),
        }
    }

    /// Run `docker build` with the context tarred straight into its stdin
    async fn docker_build(&self, tag: &ImageTag, context: &BuildContext) -> Result<(), StormError> {
        debug!("Running docker build for {}", tag);
        let mut child = Command::new(&self.settings.docker_bin)
            .args(["build", "--tag", tag.as_str(), "--file", DOCKERFILE_NAME, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StormError::Build(format!("failed to run docker build: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StormError::Build("docker build stdin unavailable".to_string()))?;

        // The bridge must be created on the runtime; the tar writer is blocking.
        let mut stdin = SyncIoBridge::new(stdin);
        let context = context.clone();
        let writer = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            context.write_archive(&mut stdin)?;
            stdin.shutdown()
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StormError::Build(format!("failed to wait for docker build: {}", e)))?;
        let streamed = writer
            .await
            .map_err(|e| StormError::Build(format!("build context writer failed: {}", e)))?;

        if !output.status.success() {
            return Err(StormError::Build(format!(
                "docker build failed for {}: {}",
                tag,
                stderr_tail(&output)
            )));
        }
        streamed.map_err(|e| StormError::Build(format!("failed to stream build context: {}", e)))
    }

    async fn docker_push(&self, tag: &ImageTag, config_dir: &Path) -> Result<Output, StormError> {
        Command::new(&self.settings.docker_bin)
            .arg("--config")
            .arg(config_dir)
            .args(["push", tag.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StormError::Push(format!("failed to run docker push: {}", e)))
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(
        &self,
        build_dir: &str,
        app_name: &str,
        mut binary: BinaryStream,
    ) -> Result<ImageTag, StormError> {
        let _guard = self.build_dirs.lock(build_dir).await;

        let context = BuildContext::new(&self.settings.base_dir, build_dir, app_name);
        context.assemble(&mut binary).await?;

        let tag = ImageTag::new(self.credentials.host(), app_name, &fingerprint());
        info!(app = %app_name, "Building image {}", tag);
        self.docker_build(&tag, &context).await?;

        if self.settings.cleanup_context {
            if let Err(e) = context.remove().await {
                warn!(app = %app_name, error = %e, "Failed to remove build context");
            }
        }

        info!(app = %app_name, "Built image {}", tag);
        Ok(tag)
    }

    async fn push(&self, tag: &ImageTag) -> Result<(), StormError> {
        info!("Pushing image {}", tag);

        let config_dir = Dir::create_temp_dir("storm-docker-config")
            .await
            .map_err(|e| StormError::Push(format!("failed to prepare registry auth: {}", e)))?;
        let config_file = config_dir.file("config.json");
        let prepared = match self.credentials.docker_config_document() {
            Ok(document) => config_file.write_bytes(&document).await,
            Err(e) => Err(e),
        };

        let result = match prepared {
            Ok(()) => self.docker_push(tag, config_dir.path()).await,
            Err(e) => Err(StormError::Push(format!(
                "failed to prepare registry auth: {}",
                e
            ))),
        };

        if let Err(e) = config_dir.delete().await {
            warn!(error = %e, "Failed to remove docker config directory");
        }

        let output = result?;
        if !output.status.success() {
            return Err(StormError::Push(format!(
                "docker push failed for {}: {}",
                tag,
                stderr_tail(&output)
            )));
        }

        info!("Pushed image {}", tag);
        Ok(())
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let start = stderr
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    stderr[start..].to_string()
}
