// Interval scheduling and flush coordination
pub mod types;    // Sample + spread
pub mod interval; // wall-clock bucket boundaries
pub mod buffer;   // per-book open bucket, staging appends
pub mod flush;    // exactly-once archival of closed buckets
pub mod poller;   // once-a-second sampling loop
pub mod pipeline; // per-book task wiring
