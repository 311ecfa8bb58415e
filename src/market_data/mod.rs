pub mod cache;
pub mod candle;
pub mod timeframe;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use cache::{CacheStats, CandleCache};
pub use candle::{Candle, CandleKey, Series};
pub use timeframe::Timeframe;
