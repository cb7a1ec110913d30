pub mod types;
pub use types::*;
pub mod local;
pub mod object;
pub mod retry;
pub mod staging;

use std::path::Path;

use async_trait::async_trait;

use crate::persist::retry::RetryPolicy;

/// Durable home for completed buckets.
///
/// `store` must be an overwrite keyed by `key`: storing the same key twice leaves one archive.
/// The caller owns the staging file and removes it only after `store` returns `Ok`.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn store(&self, path: &Path, key: &ArchiveKey) -> PersistResult<()>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn describe(&self) -> String;
}
