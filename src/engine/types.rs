use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One top-of-book observation for a single book.
///
/// Field order is the on-disk column order of a staging artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "offset_timestamp")]
    pub captured_at: DateTime<Utc>,
    pub book: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
}

impl Sample {
    // Builds a sample from the best prices and derives the spread column.
    pub fn from_top_of_book(captured_at: DateTime<Utc>, book: &str, best_bid: f64, best_ask: f64) -> Self {
        Self {
            captured_at,
            book: book.to_string(),
            best_bid,
            best_ask,
            spread: spread(best_bid, best_ask),
        }
    }
}

/// `(bid / ask) * 100 / ask`, rounded to 4 decimal places.
///
/// Not a conventional bid-ask percentage; archived files depend on this exact value.
pub fn spread(best_bid: f64, best_ask: f64) -> f64 {
    let raw = (best_bid / best_ask) * 100.0 / best_ask;
    format!("{raw:.4}").parse().unwrap_or(raw)
}

// Timestamp column: ISO-8601 with a numeric UTC offset, e.g. 2024-03-01T10:00:05+0000
pub(crate) mod offset_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_str(&raw, FORMAT)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
