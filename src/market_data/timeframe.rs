// =============================================================================
// Timeframe: candle resolutions accepted by the Delta Exchange history API
// =============================================================================

use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Candle resolution. Ordered by duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 11] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::D1,
        Self::W1,
    ];

    /// Resolution string as sent in the `resolution` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// Candle duration in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M3 => 3 * 60,
            Self::M5 => 5 * 60,
            Self::M15 => 15 * 60,
            Self::M30 => 30 * 60,
            Self::H1 => 3_600,
            Self::H2 => 2 * 3_600,
            Self::H4 => 4 * 3_600,
            Self::H6 => 6 * 3_600,
            Self::D1 => 86_400,
            Self::W1 => 7 * 86_400,
        }
    }

    /// Parse a comma-separated list such as `"15m, 1h,4h"`, dropping
    /// duplicates and sorting by duration.
    pub fn parse_list(s: &str) -> anyhow::Result<Vec<Timeframe>> {
        let mut out = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            out.push(part.parse::<Timeframe>()?);
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        // Case-insensitive: "1H" and "1D" parse, and "1M" is one minute.
        for tf in Self::ALL {
            if tf.as_str() == lower {
                return Ok(tf);
            }
        }
        bail!("unsupported timeframe '{s}'")
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_resolution() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("1D".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn ordering_follows_duration() {
        let mut seconds: Vec<i64> = Timeframe::ALL.iter().map(Timeframe::seconds).collect();
        let sorted = seconds.clone();
        seconds.sort();
        assert_eq!(seconds, sorted);
        assert!(Timeframe::M15 < Timeframe::H1);
    }

    #[test]
    fn parse_list_sorts_and_dedups() {
        let list = Timeframe::parse_list("4h, 15m,1h,15m,").unwrap();
        assert_eq!(list, vec![Timeframe::M15, Timeframe::H1, Timeframe::H4]);
        assert!(Timeframe::parse_list("1h,bogus").is_err());
    }

    #[test]
    fn serde_uses_wire_string() {
        let json = serde_json::to_string(&Timeframe::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let tf: Timeframe = serde_json::from_str("\"30m\"").unwrap();
        assert_eq!(tf, Timeframe::M30);
    }
}
