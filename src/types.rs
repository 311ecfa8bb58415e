// =============================================================================
// Shared types used across the screener
// =============================================================================

use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Trend category assigned to one (symbol, timeframe) pair.
///
/// `BullishReversal` and `BearishReversal` belong to the price-aware rule and
/// are kept so that stored reports and client filters stay compatible; the
/// moving-average rule in [`crate::trend`] never produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendLabel {
    Bullish,
    Bearish,
    Neutral,
    BullishReversal,
    BearishReversal,
    BullishCrossover,
    BearishCrossover,
    InsufficientData,
}

impl TrendLabel {
    pub const ALL: [TrendLabel; 8] = [
        Self::Bullish,
        Self::Bearish,
        Self::Neutral,
        Self::BullishReversal,
        Self::BearishReversal,
        Self::BullishCrossover,
        Self::BearishCrossover,
        Self::InsufficientData,
    ];

    /// Stable identifier used on the wire and in CSV cells.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "Bullish",
            Self::Bearish => "Bearish",
            Self::Neutral => "Neutral",
            Self::BullishReversal => "BullishReversal",
            Self::BearishReversal => "BearishReversal",
            Self::BullishCrossover => "BullishCrossover",
            Self::BearishCrossover => "BearishCrossover",
            Self::InsufficientData => "InsufficientData",
        }
    }
}

impl Default for TrendLabel {
    fn default() -> Self {
        Self::InsufficientData
    }
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendLabel {
    type Err = anyhow::Error;

    /// Case-insensitive; accepts `_`, `-` and spaces as separators so query
    /// strings like `bullish-crossover` work.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        for label in Self::ALL {
            if label.as_str().to_lowercase() == normalised {
                return Ok(label);
            }
        }
        bail!("unknown trend label '{s}'")
    }
}
