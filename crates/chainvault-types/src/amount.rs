//! Bitcoin amount helpers.
//!
//! Node RPC encodes output values as decimal BTC. Everything stored or
//! compared inside chainvault is an integer number of satoshis.

use thiserror::Error;

/// Satoshis per bitcoin (10^8).
pub const COIN: u64 = 100_000_000;

/// Number of decimal places for display.
pub const DISPLAY_DECIMAL_POINT: u32 = 8;

/// Upper bound on any single amount (21 million BTC).
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmountError {
    #[error("amount is negative: {0}")]
    Negative(String),

    #[error("amount is not a finite number")]
    NotFinite,

    #[error("amount exceeds 21 million BTC: {0}")]
    TooLarge(String),

    #[error("invalid amount string: {0:?}")]
    Invalid(String),
}

/// Format a satoshi amount as BTC (e.g., `1.23456789`).
pub fn format_amount(sats: u64) -> String {
    let whole = sats / COIN;
    let frac = sats % COIN;
    if frac == 0 {
        format!("{}.0", whole)
    } else {
        let frac_str = format!("{:08}", frac);
        let trimmed = frac_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}

/// Parse a decimal BTC string to satoshis, exactly.
pub fn parse_amount(s: &str) -> Result<u64, AmountError> {
    let s = s.trim();
    if s.starts_with('-') {
        return Err(AmountError::Negative(s.to_string()));
    }
    let (whole_str, frac_str) = match s.find('.') {
        Some(dot_pos) => (&s[..dot_pos], &s[dot_pos + 1..]),
        None => (s, ""),
    };

    if whole_str.is_empty() && frac_str.is_empty() {
        return Err(AmountError::Invalid(s.to_string()));
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole_str) || !all_digits(frac_str) || frac_str.len() > 8 {
        return Err(AmountError::Invalid(s.to_string()));
    }

    let whole: u64 = if whole_str.is_empty() {
        0
    } else {
        whole_str
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?
    };
    let frac: u64 = if frac_str.is_empty() {
        0
    } else {
        format!("{:0<8}", frac_str)
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?
    };

    let sats = whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| AmountError::TooLarge(s.to_string()))?;
    if sats > MAX_MONEY {
        return Err(AmountError::TooLarge(s.to_string()));
    }
    Ok(sats)
}

/// Convert a JSON-number BTC value to satoshis.
///
/// Rounds to the nearest satoshi. Every amount up to [`MAX_MONEY`] has at most
/// 8 decimal places and fits in 53 bits once scaled, so the nearest `f64` to
/// the decimal value always rounds back to the exact satoshi count.
pub fn btc_to_sats(btc: f64) -> Result<u64, AmountError> {
    if !btc.is_finite() {
        return Err(AmountError::NotFinite);
    }
    if btc < 0.0 {
        return Err(AmountError::Negative(btc.to_string()));
    }
    let sats = (btc * COIN as f64).round();
    if sats > MAX_MONEY as f64 {
        return Err(AmountError::TooLarge(btc.to_string()));
    }
    Ok(sats as u64)
}

/// Deserialize a BTC amount (JSON number or decimal string) into satoshis.
pub fn deserialize_sats<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct SatsVisitor;
    impl<'de> de::Visitor<'de> for SatsVisitor {
        type Value = u64;
        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a BTC amount as a number or decimal string")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            v.checked_mul(COIN)
                .filter(|sats| *sats <= MAX_MONEY)
                .ok_or_else(|| E::custom(AmountError::TooLarge(v.to_string())))
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            if v < 0 {
                return Err(E::custom(AmountError::Negative(v.to_string())));
            }
            self.visit_u64(v as u64)
        }
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            btc_to_sats(v).map_err(E::custom)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            parse_amount(v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(SatsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.0");
        assert_eq!(format_amount(100_000_000), "1.0");
        assert_eq!(format_amount(123_456_789), "1.23456789");
        assert_eq!(format_amount(100_000_001), "1.00000001");
        assert_eq!(format_amount(50_000_000), "0.5");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0"), Ok(0));
        assert_eq!(parse_amount("1.0"), Ok(100_000_000));
        assert_eq!(parse_amount("1.23456789"), Ok(123_456_789));
        assert_eq!(parse_amount(".5"), Ok(50_000_000));
        assert_eq!(parse_amount("50.00000000"), Ok(5_000_000_000));
    }

    #[test]
    fn test_parse_amount_rejects() {
        assert!(matches!(parse_amount("-1"), Err(AmountError::Negative(_))));
        assert!(matches!(parse_amount("1.000000001"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("1e-5"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("."), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("21000000.00000001"), Err(AmountError::TooLarge(_))));
    }

    #[test]
    fn test_btc_to_sats_rounds_binary_drift() {
        // 0.1 + 0.2 style values that are not exact in binary.
        assert_eq!(btc_to_sats(0.29), Ok(29_000_000));
        assert_eq!(btc_to_sats(0.00000001), Ok(1));
        assert_eq!(btc_to_sats(20999999.97690000), Ok(2_099_999_997_690_000));
        assert_eq!(btc_to_sats(50.0), Ok(5_000_000_000));
    }

    #[test]
    fn test_btc_to_sats_rejects() {
        assert_eq!(btc_to_sats(f64::NAN), Err(AmountError::NotFinite));
        assert!(matches!(btc_to_sats(-0.5), Err(AmountError::Negative(_))));
        assert!(matches!(btc_to_sats(21_000_001.0), Err(AmountError::TooLarge(_))));
    }

    #[derive(serde::Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize_sats")]
        value: u64,
    }

    #[test]
    fn test_deserialize_sats_forms() {
        let h: Holder = serde_json::from_str(r#"{"value": 0.00001}"#).unwrap();
        assert_eq!(h.value, 1_000);
        let h: Holder = serde_json::from_str(r#"{"value": "12.5"}"#).unwrap();
        assert_eq!(h.value, 1_250_000_000);
        let h: Holder = serde_json::from_str(r#"{"value": 3}"#).unwrap();
        assert_eq!(h.value, 300_000_000);
        assert!(serde_json::from_str::<Holder>(r#"{"value": -1}"#).is_err());
    }
}
