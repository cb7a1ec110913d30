// Wall-clock bucket boundaries, aligned to multiples of the width since the Unix epoch

use chrono::{DateTime, Duration, SubsecRound, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketWidth {
    secs: i64,
}

impl BucketWidth {
    /// `None` for a zero width.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes > 0).then(|| Self { secs: i64::from(minutes) * 60 })
    }

    pub fn as_secs(&self) -> i64 {
        self.secs
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.secs)
    }
}

/// Start of the bucket containing `now`.
pub fn bucket_start(now: DateTime<Utc>, width: BucketWidth) -> DateTime<Utc> {
    let into_bucket = now.timestamp().rem_euclid(width.as_secs());
    now.trunc_subsecs(0) - Duration::seconds(into_bucket)
}

/// Half-open `[start, end)` window of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BucketWindow {
    pub fn containing(now: DateTime<Utc>, width: BucketWidth) -> Self {
        let start = bucket_start(now, width);
        Self { start, end: start + width.as_duration() }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}
