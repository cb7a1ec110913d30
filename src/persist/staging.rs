// Append-only CSV staging, one headerless file per (book, bucket start); appends are synced

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::engine::types::Sample;
use crate::persist::types::{parse_staging_file_name, staging_file_name, ArchiveKey, PersistResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArtifact {
    book: String,
    start: DateTime<Utc>,
    path: PathBuf,
}

impl StagingArtifact {
    pub fn new(dir: &Path, book: &str, start: DateTime<Utc>) -> Self {
        Self {
            book: book.to_string(),
            start,
            path: dir.join(staging_file_name(book, start)),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_key(&self) -> ArchiveKey {
        ArchiveKey::for_bucket(&self.book, self.start)
    }

    pub async fn append(&self, sample: &Sample) -> PersistResult<()> {
        let mut row = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        row.serialize(sample)?;
        let bytes = row.into_inner().map_err(|e| e.into_error())?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.sync_data().await?;
        debug!(path = %self.path.display(), "appended sample");
        Ok(())
    }

    pub async fn read_all(&self) -> PersistResult<Vec<Sample>> {
        let bytes = tokio::fs::read(&self.path).await?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(bytes.as_slice());
        let rows = reader.deserialize::<Sample>().collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    // Already gone counts as removed.
    pub async fn remove(&self) -> PersistResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Staging files in `dir` that belong to `book`, oldest bucket first.
    pub async fn scan(dir: &Path, book: &str) -> PersistResult<Vec<StagingArtifact>> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match parse_staging_file_name(name) {
                Some((owner, start)) if owner == book => found.push(Self::new(dir, book, start)),
                Some(_) => {}
                None => warn!(file = %name, "ignoring unrecognised file in staging dir"),
            }
        }
        found.sort_by_key(|a| a.start);
        Ok(found)
    }
}
