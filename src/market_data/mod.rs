// Market data module entrypoint
pub mod adapters;   // venue-specific samplers (e.g. Bitso REST)
pub mod normaliser; // converts wire prices -> f64
pub mod nonce;      // process-wide nonce counter
pub mod signing;    // HMAC request signing
