// Remote archive over a plain HTTP object API: PUT <endpoint>/<bucket>/<key>.
// A PUT replaces whatever is stored under the key, which is what makes re-flushing safe.

use std::path::Path;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{info, instrument};

use crate::persist::retry::RetryPolicy;
use crate::persist::types::{ArchiveKey, PersistError, PersistResult};
use crate::persist::ArchiveStore;

pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> PersistResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
            retry,
        })
    }

    pub fn url_for(&self, key: &ArchiveKey) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

impl std::fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait::async_trait]
impl ArchiveStore for HttpObjectStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn store(&self, path: &Path, key: &ArchiveKey) -> PersistResult<()> {
        let body = tokio::fs::read(path).await?;
        let mut request = self
            .client
            .put(self.url_for(key))
            .header(CONTENT_TYPE, "text/csv")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PersistError::Status { key: key.to_string(), status: status.as_u16() });
        }
        info!(bucket = %self.bucket, "uploaded");
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn describe(&self) -> String {
        format!("remote:{}/{}", self.endpoint, self.bucket)
    }
}
