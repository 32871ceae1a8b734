use camino::{Utf8Path, Utf8PathBuf};
use tokio::fs::{create_dir_all, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::trace;

use crate::error::HarnessError;

/// Where a router's raw output ends up.
#[derive(Debug)]
pub struct RouterLog {
    router: String,
    file: Option<BufWriter<File>>,
}

impl RouterLog {
    /// Only traces lines, nothing is written to disk.
    #[must_use]
    pub const fn discard(router: String) -> Self {
        Self { router, file: None }
    }

    /// Writes lines to `<dir>/<router>.router.log`.
    pub async fn create(router: String, dir: &Utf8Path) -> Result<Self, HarnessError> {
        create_dir_all(dir).await?;

        let file = File::create(Self::path(dir, &router)).await?;

        Ok(Self {
            router,
            file: Some(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(dir: &Utf8Path, router: &str) -> Utf8PathBuf {
        dir.join(format!("{router}.router.log"))
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), HarnessError> {
        trace!(router = %self.router, "{line}");

        if let Some(file) = &mut self.file {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), HarnessError> {
        if let Some(file) = &mut self.file {
            file.flush().await?;
        }

        Ok(())
    }
}
