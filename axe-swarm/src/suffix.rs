//! Magnitude-suffixed numbers such as `"1.5M"` or `"250K"`.
//!
//! Miner firmware reports best difficulties as abbreviated strings while
//! other fields are plain numbers. [`SuffixedNumber`] accepts either form
//! on the wire; [`parse_suffixed`] turns the abbreviated form into a value.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unit letters and their multipliers, matched case-insensitively.
const UNITS: [(char, f64); 6] = [
    ('K', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
    ('E', 1e18),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a number: {0:?}")]
pub struct ParseSuffixError(pub String);

/// Parse a number with an optional trailing unit letter.
///
/// Whitespace anywhere in the input is ignored. A missing unit means a
/// multiplier of one.
pub fn parse_suffixed(input: &str) -> Result<f64, ParseSuffixError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    let (number, multiplier) = match compact.chars().last() {
        Some(last) if last.is_ascii_alphabetic() => {
            let unit = last.to_ascii_uppercase();
            let Some(&(_, multiplier)) = UNITS.iter().find(|(u, _)| *u == unit) else {
                return Err(ParseSuffixError(input.to_string()));
            };
            (&compact[..compact.len() - 1], multiplier)
        }
        _ => (compact.as_str(), 1.0),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| ParseSuffixError(input.to_string()))?;
    if !value.is_finite() {
        return Err(ParseSuffixError(input.to_string()));
    }

    Ok(value * multiplier)
}

/// Format a value with SI suffixes, e.g. `1_500_000.0` as `"1.50M"`.
pub fn format_suffixed(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "0".to_string();
    }

    if value < 1.0 {
        let s = format!("{:.6}", value);
        return s.trim_end_matches('0').trim_end_matches('.').to_string();
    }

    let mut unit = UNITS.iter().rposition(|(_, multiplier)| value >= *multiplier);
    loop {
        let scaled = unit.map_or(value, |i| value / UNITS[i].1);
        let decimals = if scaled >= 100.0 || scaled.fract() == 0.0 {
            0
        } else if scaled >= 10.0 {
            1
        } else {
            2
        };
        let digits = format!("{scaled:.decimals$}");

        // Rounded up to a full thousand: show it in the next unit instead.
        let next = unit.map_or(0, |i| i + 1);
        if next < UNITS.len() && digits.parse::<f64>().is_ok_and(|v| v >= 1000.0) {
            unit = Some(next);
            continue;
        }

        let suffix = unit.map(|i| UNITS[i].0.to_string()).unwrap_or_default();
        return format!("{digits}{suffix}");
    }
}

/// A number as the firmware sends it: either numeric or abbreviated text.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(untagged)]
pub enum SuffixedNumber {
    Number(f64),
    Text(String),
}

impl SuffixedNumber {
    /// Numeric value, or `None` if the text form does not parse.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SuffixedNumber::Number(n) => Some(*n),
            SuffixedNumber::Text(s) => parse_suffixed(s).ok(),
        }
    }

    /// Convert the text form to a number in place. Unparsable text is left
    /// as is.
    pub fn numerize(&mut self) {
        if let SuffixedNumber::Text(s) = self {
            if let Ok(value) = parse_suffixed(s) {
                *self = SuffixedNumber::Number(value);
            }
        }
    }
}

impl fmt::Display for SuffixedNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuffixedNumber::Number(n) => f.write_str(&format_suffixed(*n)),
            SuffixedNumber::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1.5M", 1_500_000.0 ; "mega")]
    #[test_case("250K", 250_000.0 ; "kilo")]
    #[test_case("42", 42.0 ; "no unit")]
    #[test_case("2.1g", 2.1e9 ; "lowercase unit")]
    #[test_case(" 3 T ", 3e12 ; "whitespace")]
    #[test_case("1P", 1e15 ; "peta")]
    #[test_case("4E", 4e18 ; "exa")]
    #[test_case("0", 0.0 ; "zero")]
    fn parses(input: &str, expected: f64) {
        let value = parse_suffixed(input).unwrap();
        assert!(
            (value - expected).abs() <= expected * 1e-12,
            "{input}: {value} != {expected}"
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("M" ; "unit only")]
    #[test_case("abc" ; "letters")]
    #[test_case("12X" ; "unknown unit")]
    #[test_case("1.2.3K" ; "malformed number")]
    fn rejects(input: &str) {
        assert!(parse_suffixed(input).is_err());
    }

    #[test]
    fn formats_like_miner_display() {
        assert_eq!(format_suffixed(1_500_000.0), "1.50M");
        assert_eq!(format_suffixed(112_700_000_000_000.0), "113T");
        assert_eq!(format_suffixed(11_200_000_000_000.0), "11.2T");
        assert_eq!(format_suffixed(500.0), "500");
        assert_eq!(format_suffixed(1.0), "1");
        assert_eq!(format_suffixed(0.5), "0.5");
        assert_eq!(format_suffixed(0.0), "0");
    }

    #[test_case(999_999.0, "1.00M" ; "thousand k")]
    #[test_case(999.7, "1.00K" ; "thousand units")]
    #[test_case(999_600_000_000.0, "1.00T" ; "thousand g")]
    #[test_case(999_400.0, "999K" ; "stays below")]
    fn rounding_carries_into_next_unit(value: f64, expected: &str) {
        assert_eq!(format_suffixed(value), expected);
    }

    #[test]
    fn wire_form_accepts_number_or_text() {
        let n: SuffixedNumber = serde_json::from_str("12345").unwrap();
        assert_eq!(n, SuffixedNumber::Number(12345.0));

        let mut t: SuffixedNumber = serde_json::from_str("\"4.2G\"").unwrap();
        assert_eq!(t, SuffixedNumber::Text("4.2G".into()));
        t.numerize();
        assert!((t.as_f64().unwrap() - 4.2e9).abs() < 1.0);
        assert!(matches!(t, SuffixedNumber::Number(_)));
    }

    #[test]
    fn unparsable_text_stays_text() {
        let mut t = SuffixedNumber::Text("n/a".into());
        t.numerize();
        assert_eq!(t, SuffixedNumber::Text("n/a".into()));
        assert_eq!(t.as_f64(), None);
    }
}
