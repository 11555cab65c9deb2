//! Asset string parsing for projections

use crate::error::TransformError;
use crate::serialize::parse_asset;

/// An asset amount normalized by its symbol precision
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub amount: f64,
    pub precision: u8,
    pub symbol: String,
}

impl Asset {
    /// Parses `"<amount> <symbol>"`, e.g. `"12.5000 EOS"` to 12.5 EOS
    pub fn parse(s: &str) -> Result<Self, TransformError> {
        let (raw, precision, symbol) =
            parse_asset(s).map_err(|_| TransformError::InvalidAsset(s.to_string()))?;
        Ok(Self {
            amount: raw as f64 / 10f64.powi(precision as i32),
            precision,
            symbol,
        })
    }
}

/// Rounds to four decimals, the precision of the core token
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_asset() {
        let asset = Asset::parse("12.5000 EOS").unwrap();
        assert_eq!(asset.amount, 12.5);
        assert_eq!(asset.symbol, "EOS");
        assert_eq!(asset.precision, 4);

        assert_eq!(Asset::parse("-3 TOK").unwrap().amount, -3.0);
        assert_eq!(Asset::parse("0.0001 WAX").unwrap().amount, 0.0001);
    }

    #[test]
    fn test_invalid_assets() {
        for bad in ["garbage", "", "12.5000", "EOS 12.5", "1.0 eos"] {
            assert_eq!(
                Asset::parse(bad),
                Err(TransformError::InvalidAsset(bad.to_string())),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.1 + 0.2), 0.3);
        assert_eq!(round4(1.23456), 1.2346);
    }
}
