// Runtime settings: defaults < TOML file < ARCHIVER__* env (`__` nests) < CLI overrides

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File};
use reqwest::Url;
use serde::Deserialize;

use crate::engine::buffer::BufferOptions;
use crate::engine::interval::BucketWidth;
use crate::engine::pipeline::PipelineOptions;
use crate::persist::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid { field, reason: reason.into() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Remote,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub mode: StorageMode,
    pub local_root: PathBuf,
    pub endpoint: String,
    pub bucket: String,
    // Name of the env var holding the bearer token, not the token itself.
    pub token_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub interval_minutes: u32,
    pub books: Vec<String>,
    pub base_url: String,
    pub auth_scheme: String,
    pub request_timeout_ms: u64,
    pub staging_dir: PathBuf,
    pub channel_capacity: usize,
    pub recover_staging: bool,
    pub flush_on_shutdown: bool,
    pub log_filter: String,
    pub metrics_listen: String,
    pub storage: StorageSettings,
    pub retry: RetryPolicy,
}

/// Command-line values that win over every other layer when present.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub interval_minutes: Option<u32>,
    pub books: Vec<String>,
    pub storage_mode: Option<StorageMode>,
    pub base_url: Option<String>,
    pub staging_dir: Option<PathBuf>,
    pub flush_on_shutdown: Option<bool>,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, SettingsError> {
    let retry = RetryPolicy::default();
    Ok(Config::builder()
        .set_default("interval_minutes", 2u32)?
        .set_default("books", vec!["btc_mxn", "eth_mxn", "xrp_mxn"])?
        .set_default("base_url", "https://stage.bitso.com/api/v3/order_book")?
        .set_default("auth_scheme", "Bitso")?
        .set_default("request_timeout_ms", 5_000u64)?
        .set_default("staging_dir", "staging")?
        .set_default("channel_capacity", 256u64)?
        .set_default("recover_staging", true)?
        .set_default("flush_on_shutdown", false)?
        .set_default("log_filter", "info")?
        .set_default("metrics_listen", "0.0.0.0:9000")?
        .set_default("storage.mode", "remote")?
        .set_default("storage.local_root", "data")?
        .set_default("storage.endpoint", "https://storage.googleapis.com")?
        .set_default("storage.bucket", "bitsode")?
        .set_default("storage.token_env", "ARCHIVER_STORAGE_TOKEN")?
        .set_default("retry.max_attempts", retry.max_attempts as u64)?
        .set_default("retry.base_delay_ms", retry.base_delay_ms)?
        .set_default("retry.max_delay_ms", retry.max_delay_ms)?
        .set_default("retry.jitter_pct", retry.jitter_pct)?)
}

impl Settings {
    /// Loads and validates. A missing `file` is not an error.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, SettingsError> {
        let mut builder = defaults()?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("ARCHIVER")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("books")
                .try_parsing(true),
        );
        builder = builder
            .set_override_option("interval_minutes", overrides.interval_minutes)?
            .set_override_option("storage.mode", overrides.storage_mode.map(|m| m.as_str()))?
            .set_override_option("base_url", overrides.base_url.clone())?
            .set_override_option("staging_dir", overrides.staging_dir.as_ref().map(|p| p.display().to_string()))?
            .set_override_option("flush_on_shutdown", overrides.flush_on_shutdown)?;
        if !overrides.books.is_empty() {
            builder = builder.set_override("books", overrides.books.clone())?;
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.retry = settings.retry.normalized();
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.interval_minutes == 0 {
            return Err(invalid("interval_minutes", "must be at least 1"));
        }
        if self.books.is_empty() {
            return Err(invalid("books", "at least one book is required"));
        }
        let mut seen = HashSet::new();
        for book in &self.books {
            if book.is_empty() || !book.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(invalid("books", format!("{book:?} may only contain letters, digits, '_' and '-'")));
            }
            if !seen.insert(book) {
                return Err(invalid("books", format!("{book:?} is listed twice")));
            }
        }
        self.base_url()?;
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be at least 1"));
        }
        if self.storage.mode == StorageMode::Remote && self.storage.bucket.trim().is_empty() {
            return Err(invalid("storage.bucket", "required in remote mode"));
        }
        Ok(())
    }

    pub fn width(&self) -> Result<BucketWidth, SettingsError> {
        BucketWidth::from_minutes(self.interval_minutes).ok_or_else(|| invalid("interval_minutes", "must be at least 1"))
    }

    pub fn base_url(&self) -> Result<Url, SettingsError> {
        Url::parse(&self.base_url).map_err(|e| invalid("base_url", e.to_string()))
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.metrics_listen.parse().map_err(|_| invalid("metrics_listen", format!("{:?} is not host:port", self.metrics_listen)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions, SettingsError> {
        Ok(PipelineOptions {
            width: self.width()?,
            staging_dir: self.staging_dir.clone(),
            channel_capacity: self.channel_capacity,
            buffer: BufferOptions {
                recover_staging: self.recover_staging,
                flush_on_shutdown: self.flush_on_shutdown,
            },
        })
    }
}

impl StorageMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_toml(body: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(file.path(), body).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(Some(&dir.path().join("absent.toml")), &Overrides::default()).unwrap();
        assert_eq!(s.interval_minutes, 2);
        assert_eq!(s.books, vec!["btc_mxn", "eth_mxn", "xrp_mxn"]);
        assert_eq!(s.storage.mode, StorageMode::Remote);
        assert_eq!(s.storage.bucket, "bitsode");
        assert_eq!(s.auth_scheme, "Bitso");
        assert_eq!(s.retry, RetryPolicy::default());
        assert!(s.recover_staging);
        assert!(!s.flush_on_shutdown);
        assert_eq!(s.width().unwrap().as_secs(), 120);
    }

    #[test]
    fn file_then_overrides() {
        let file = write_toml(
            r#"
            interval_minutes = 5
            books = ["btc_mxn"]
            [storage]
            mode = "local"
            local_root = "/tmp/archive"
            [retry]
            max_attempts = 2
            "#,
        );
        let s = Settings::load(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(s.interval_minutes, 5);
        assert_eq!(s.books, vec!["btc_mxn"]);
        assert_eq!(s.storage.mode, StorageMode::Local);
        assert_eq!(s.storage.local_root, PathBuf::from("/tmp/archive"));
        assert_eq!(s.retry.max_attempts, 2);
        assert_eq!(s.retry.base_delay_ms, 250);

        let overrides = Overrides {
            interval_minutes: Some(1),
            books: vec!["eth_mxn".into(), "xrp_mxn".into()],
            storage_mode: Some(StorageMode::Remote),
            flush_on_shutdown: Some(true),
            ..Overrides::default()
        };
        let s = Settings::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(s.interval_minutes, 1);
        assert_eq!(s.books, vec!["eth_mxn", "xrp_mxn"]);
        assert_eq!(s.storage.mode, StorageMode::Remote);
        assert!(s.flush_on_shutdown);
    }

    #[test]
    fn rejects_bad_values() {
        for (body, field) in [
            ("interval_minutes = 0", "interval_minutes"),
            ("books = []", "books"),
            (r#"books = ["btc_mxn", "btc_mxn"]"#, "books"),
            (r#"books = ["../etc"]"#, "books"),
            (r#"base_url = "not a url""#, "base_url"),
            ("request_timeout_ms = 0", "request_timeout_ms"),
            ("[storage]\nbucket = \"\"", "storage.bucket"),
        ] {
            let file = write_toml(body);
            match Settings::load(Some(file.path()), &Overrides::default()) {
                Err(SettingsError::Invalid { field: f, .. }) => assert_eq!(f, field, "{body}"),
                other => panic!("{body}: expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn pipeline_options_follow_settings() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides { staging_dir: Some(dir.path().to_path_buf()), ..Overrides::default() };
        let s = Settings::load(None, &overrides).unwrap();
        let opts = s.pipeline_options().unwrap();
        assert_eq!(opts.staging_dir, dir.path());
        assert_eq!(opts.channel_capacity, 256);
        assert!(opts.buffer.recover_staging);
        assert_eq!(s.metrics_addr().unwrap().port(), 9000);
    }
}
