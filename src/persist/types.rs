use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("object store transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("object store rejected {key} with status {status}")]
    Status { key: String, status: u16 },
}

pub type PersistResult<T> = Result<T, PersistError>;

const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// `<book>_<start:%Y-%m-%d-%H-%M-%S>.csv`
pub fn staging_file_name(book: &str, start: DateTime<Utc>) -> String {
    format!("{}_{}.csv", book, start.format(STAMP_FORMAT))
}

/// Inverse of [`staging_file_name`]. Books may themselves contain underscores.
pub fn parse_staging_file_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_suffix(".csv")?;
    let (book, stamp) = stem.rsplit_once('_')?;
    if book.is_empty() {
        return None;
    }
    let start = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?.and_utc();
    Some((book.to_string(), start))
}

/// Storage key of an archived bucket: `{year}/{month}/{day}/{hour}/{staging file name}`.
///
/// Date parts are not zero padded. The key depends only on the book and the
/// bucket start, so storing the same bucket twice lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey(String);

impl ArchiveKey {
    pub fn for_bucket(book: &str, start: DateTime<Utc>) -> Self {
        Self(format!(
            "{}/{}/{}/{}/{}",
            start.year(),
            start.month(),
            start.day(),
            start.hour(),
            staging_file_name(book, start)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
