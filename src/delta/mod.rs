// =============================================================================
// Delta Exchange integration
// =============================================================================
//
// Public REST market data (products, candle history), the wire schema those
// endpoints speak, and a guard that backs off after rate-limit responses.

pub mod client;
pub mod rate_limit;
pub mod schema;

pub use client::DeltaClient;
