use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::StorageError;

/// Storage driver that stores files beneath a local directory.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, remote: &Utf8Path) -> Utf8PathBuf {
        self.root.join(remote)
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let local = self.path(remote);
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;
        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?
                .into(),
        })
    }

    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        let local = self.path(remote);
        tokio::fs::remove_file(local)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;
        Ok(())
    }

    async fn upload(&self, remote: &Utf8Path, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        let local = self.path(remote);

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;
        }

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&local)
                .await
                .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?,
        );

        tokio::io::copy(reader, &mut writer)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        writer
            .shutdown()
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;
        Ok(())
    }

    async fn download(
        &self,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let local = self.path(remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&local)
                .await
                .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?,
        );

        tokio::io::copy(&mut reader, writer)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        writer
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        Ok(())
    }

    async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        let mut target = self.root.clone();
        if let Some(part) = prefix {
            target.push(part);
        }

        let root = self.root.clone();
        let items = tokio::task::spawn_blocking(move || collect_list(&root, &target))
            .in_current_span()
            .await
            .map_err(|err| {
                StorageError::io(self.name(), std::io::Error::other(err.to_string()))
            })?
            .map_err(|err| StorageError::io(self.name(), err))?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

fn collect_list(root: &Utf8Path, target: &Utf8Path) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    if target.is_dir() {
        visit(target, &mut files)?;
    }

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
