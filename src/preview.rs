use crate::frame::ImageBuffer;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Passive consumer that keeps the most recent photo on disk.
///
/// Writes go to a sibling temporary file first and are renamed into place,
/// so readers never observe a half-written JPEG. Failures are logged and
/// reported to the caller but never affect the doorbell cycle.
#[derive(Debug, Clone)]
pub struct PreviewSink {
    path: PathBuf,
}

impl PreviewSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn show(&self, image: &ImageBuffer) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("jpg.tmp");
        let result = async {
            tokio::fs::write(&tmp, image.bytes()).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        match &result {
            Ok(()) => debug!(
                "Preview updated at {} ({} bytes)",
                self.path.display(),
                image.len()
            ),
            Err(e) => {
                warn!("Failed to update preview {}: {}", self.path.display(), e);
                let _ = tokio::fs::remove_file(&tmp).await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_latest_image() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PreviewSink::new(dir.path().join("nested").join("latest.jpg"));

        sink.show(&ImageBuffer::jpeg(vec![1, 2, 3])).await.unwrap();
        sink.show(&ImageBuffer::jpeg(vec![4, 5])).await.unwrap();

        let written = tokio::fs::read(sink.path()).await.unwrap();
        assert_eq!(written, vec![4, 5]);
        assert!(!sink.path().with_extension("jpg.tmp").exists());
    }

    #[tokio::test]
    async fn test_unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        // Parent path is a regular file
        let sink = PreviewSink::new(blocker.join("latest.jpg"));
        assert!(sink.show(&ImageBuffer::jpeg(vec![1])).await.is_err());
    }
}
