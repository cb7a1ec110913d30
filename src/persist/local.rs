use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::persist::retry::RetryPolicy;
use crate::persist::types::{ArchiveKey, PersistResult};
use crate::persist::ArchiveStore;

/// Archives into a directory tree on the local filesystem: `<root>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
    retry: RetryPolicy,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self { root: root.into(), retry }
    }

    pub fn path_for(&self, key: &ArchiveKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

#[async_trait::async_trait]
impl ArchiveStore for LocalArchive {
    #[instrument(skip_all, fields(key = %key))]
    async fn store(&self, path: &Path, key: &ArchiveKey) -> PersistResult<()> {
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // copy + rename: the key always holds either the old or the new archive, never a partial one
        let partial = target.with_extension("csv.partial");
        tokio::fs::copy(path, &partial).await?;
        tokio::fs::rename(&partial, &target).await?;
        info!(target = %target.display(), "stored locally");
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}
