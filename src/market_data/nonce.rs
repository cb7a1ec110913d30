use chrono::Utc;
use parking_lot::Mutex;

/// Process-wide nonce source for one credential.
///
/// Nonces are wall-clock milliseconds, bumped to `last + 1` whenever the clock
/// has not moved past the previous nonce (same millisecond, or a clock step back).
/// Every request signed with the credential must draw from the same counter.
#[derive(Debug, Default)]
pub struct NonceCounter {
    last: Mutex<u64>,
}

impl NonceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.next_at(now_ms)
    }

    pub fn next_at(&self, now_ms: u64) -> u64 {
        let mut last = self.last.lock();
        let nonce = now_ms.max(last.saturating_add(1));
        *last = nonce;
        nonce
    }

    pub fn last_issued(&self) -> u64 {
        *self.last.lock()
    }
}
