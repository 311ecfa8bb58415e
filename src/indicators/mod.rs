// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free moving-average helpers used by the trend classifier
// and the chart endpoint. Functions return `Option<T>` or an empty series so
// callers must handle insufficient data explicitly.

pub mod sma;
