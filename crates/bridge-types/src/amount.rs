//! Fixed-point token amounts
//!
//! Amounts are held as integer base units at the token's decimal precision.
//! Parsing and fee arithmetic never touch floating point, so the source and
//! destination legs of a transfer always agree on the exact value.

use crate::{error::BridgeError, RATE_PRECISION, TOKEN_DECIMALS, TOKEN_UNIT};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Token amount in base units (6 decimals)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create from raw base units
    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    /// Create from a whole number of tokens
    pub const fn from_whole(tokens: u64) -> Self {
        Self(tokens as u128 * TOKEN_UNIT)
    }

    /// Raw base units
    pub const fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"100"`, `"0.25"` or `"1000.000001"`
    pub fn parse(input: &str) -> Result<Self, BridgeError> {
        let invalid = || BridgeError::InvalidRequest(format!("Invalid amount: {:?}", input));

        let s = input.trim();
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > TOKEN_DECIMALS as usize {
            return Err(BridgeError::InvalidRequest(format!(
                "Amount {} has more than {} decimal places",
                s, TOKEN_DECIMALS
            )));
        }

        let whole_units: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let digits: u128 = frac.parse().map_err(|_| invalid())?;
            digits * 10u128.pow(TOKEN_DECIMALS - frac.len() as u32)
        };

        whole_units
            .checked_mul(TOKEN_UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Apply a fee rate, rounding down to the nearest base unit
    pub fn apply_rate(&self, rate: FeeRate) -> Amount {
        Amount(self.0.saturating_mul(rate.ppm() as u128) / RATE_PRECISION)
    }

    /// Multiply by an integer factor
    pub fn checked_mul(&self, factor: u128) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Render with a fixed number of fractional digits, truncating extra precision
    pub fn to_fixed(&self, places: u32) -> String {
        let places = places.min(TOKEN_DECIMALS);
        let whole = self.0 / TOKEN_UNIT;
        if places == 0 {
            return whole.to_string();
        }
        let frac = (self.0 % TOKEN_UNIT) / 10u128.pow(TOKEN_DECIMALS - places);
        format!("{}.{:0width$}", whole, frac, width = places as usize)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / TOKEN_UNIT;
        let frac = self.0 % TOKEN_UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:0width$}", frac, width = TOKEN_DECIMALS as usize);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Fee rate in parts per million (0.1% = 1000)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u32);

impl FeeRate {
    pub const fn from_ppm(ppm: u32) -> Self {
        Self(ppm)
    }

    pub const fn ppm(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ppm / 10_000 = percent
        let whole = self.0 / 10_000;
        let frac = self.0 % 10_000;
        if frac == 0 {
            write!(f, "{}%", whole)
        } else {
            let digits = format!("{:04}", frac);
            write!(f, "{}.{}%", whole, digits.trim_end_matches('0'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(Amount::parse("100").unwrap().units(), 100_000_000);
        assert_eq!(Amount::parse("0.25").unwrap().units(), 250_000);
        assert_eq!(Amount::parse(".5").unwrap().units(), 500_000);
        assert_eq!(Amount::parse("1000.000001").unwrap().units(), 1_000_000_001);
        assert_eq!(Amount::parse(" 7 ").unwrap(), Amount::from_whole(7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", ".", "-1", "1e6", "abc", "1.2.3", "0x10", "1.0000001", "NaN"] {
            assert!(
                matches!(Amount::parse(bad), Err(BridgeError::InvalidRequest(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_fee_is_exact() {
        let amount = Amount::from_whole(1000);
        let fee = amount.apply_rate(FeeRate::from_ppm(1000));
        assert_eq!(fee.units(), 1_000_000);
        assert_eq!(fee.to_fixed(4), "1.0000");
    }

    #[test]
    fn test_fee_on_awkward_amount_does_not_drift() {
        // 0.1 + 0.2 style inputs stay exact
        let amount = Amount::parse("0.3").unwrap();
        let fee = amount.apply_rate(FeeRate::from_ppm(2000));
        assert_eq!(fee.units(), 600);
        assert_eq!(fee.to_string(), "0.0006");
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(Amount::from_units(1_500_000).to_string(), "1.5");
        assert_eq!(Amount::from_whole(42).to_string(), "42");
        assert_eq!(Amount::from_units(1).to_string(), "0.000001");
    }

    #[test]
    fn test_serde_as_string() {
        let amount = Amount::parse("12.34").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"12.34\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_fee_rate_display() {
        assert_eq!(FeeRate::from_ppm(1000).to_string(), "0.1%");
        assert_eq!(FeeRate::from_ppm(2500).to_string(), "0.25%");
        assert_eq!(FeeRate::from_ppm(10_000).to_string(), "1%");
    }
}
