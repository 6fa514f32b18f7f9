//! Build context assembly

use std::io::Write;
use std::path::Path;

use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::errors::StormError;
use crate::filesys::dir::Dir;

/// File name of the generated build recipe
pub const DOCKERFILE_NAME: &str = "Dockerfile";

const BASE_IMAGE: &str = "alpine:3.19";

/// Build recipe for an application binary named `app_name`
pub fn dockerfile(app_name: &str) -> String {
    format!(
        "FROM {base}\n\
         RUN apk update && apk add --no-cache ca-certificates\n\
         ADD . /app\n\
         WORKDIR /app\n\
         RUN chmod +x /app/{app}\n\
         ENTRYPOINT [ \"/app/{app}\" ]\n",
        base = BASE_IMAGE,
        app = app_name,
    )
}

/// On-disk build directory for one in-flight build
#[derive(Debug, Clone)]
pub struct BuildContext {
    dir: Dir,
    app_name: String,
}

impl BuildContext {
    /// Context at `{base_dir}/{key}`
    pub fn new(base_dir: &Path, key: &str, app_name: &str) -> Self {
        Self {
            dir: Dir::new(base_dir.join(key)),
            app_name: app_name.to_string(),
        }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    /// Write the binary and recipe into the directory.
    ///
    /// Returns the number of binary bytes written.
    pub async fn assemble<R>(&self, binary: &mut R) -> Result<u64, StormError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.dir.create().await.map_err(|e| {
            StormError::Build(format!(
                "failed to create build directory {}: {}",
                self.dir.path().display(),
                e
            ))
        })?;

        let binary_file = self.dir.file(&self.app_name);
        let written = binary_file
            .write_stream(binary)
            .await
            .map_err(|e| StormError::Build(format!("failed to write binary: {}", e)))?;
        binary_file
            .set_mode(0o755)
            .await
            .map_err(|e| StormError::Build(format!("failed to mark binary executable: {}", e)))?;
        debug!(app = %self.app_name, bytes = written, "Wrote binary into build context");

        self.dir
            .file(DOCKERFILE_NAME)
            .write_string(&dockerfile(&self.app_name))
            .await
            .map_err(|e| StormError::Build(format!("failed to write Dockerfile: {}", e)))?;

        info!("Assembled build context in {}", self.dir.path().display());
        Ok(written)
    }

    /// Serialize the directory as an uncompressed tar stream into `writer`.
    ///
    /// Blocking; run it off the async workers.
    pub fn write_archive<W: Write>(&self, writer: W) -> std::io::Result<W> {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", self.dir.path())?;
        builder.into_inner()
    }

    /// Remove the directory and everything in it
    pub async fn remove(&self) -> Result<(), StormError> {
        self.dir.delete().await
    }
}
