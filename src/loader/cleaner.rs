use crate::models::{OhlcRow, RawOhlcRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse price: drop any text prefix, then keep digits, dot, sign, exponent.
/// "$1,234.56" → 1234.56 | "EUR 1.2" → 1.2 | "1.5e-7" → 0.00000015
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("n/a") || s == "-" || s == "—" {
        return None;
    }
    let start = s.find(|c: char| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))?;

    let mut cleaned = String::with_capacity(s.len());
    let mut chars = s[start..].chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '0'..='9' | '.' | '-' | '+' => cleaned.push(c),
            // Exponent only between a digit and a digit or sign.
            'e' | 'E'
                if cleaned.ends_with(|p: char| p.is_ascii_digit())
                    && chars
                        .peek()
                        .is_some_and(|n| n.is_ascii_digit() || matches!(n, '-' | '+')) =>
            {
                cleaned.push(c)
            }
            _ => {}
        }
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Unix seconds, unix milliseconds, RFC 3339, `%Y-%m-%d %H:%M:%S` or a bare date.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(n) = s.parse::<i64>() {
        // Anything past 1e11 is too far out for seconds; treat as millis.
        let dt = if n.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
        return dt.map(|d| d.naive_utc());
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Trim, and lower-case EVM-style hex addresses so one token has one id.
pub fn normalise_asset(s: &str) -> String {
    let s = s.trim();
    if s.len() > 2 && (s.starts_with("0x") || s.starts_with("0X")) {
        s.to_ascii_lowercase()
    } else {
        s.to_string()
    }
}

// ── CSV row → OhlcRow ─────────────────────────────────────────────────────────

pub fn csv_row_to_ohlc(default_asset: &str, row: &RawOhlcRow) -> Option<OhlcRow> {
    let asset = row
        .asset
        .as_deref()
        .map(normalise_asset)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| normalise_asset(default_asset));
    if asset.is_empty() {
        return None;
    }

    let ts = parse_timestamp(row.ts.as_deref()?)?;
    let close = parse_price(row.close.as_deref()?)?;

    if close <= 0.0 {
        warn!("Invalid close {} for {} at {}", close, asset, ts);
        return None;
    }

    Some(OhlcRow {
        asset,
        ts,
        open: row.open.as_deref().and_then(parse_price),
        high: row.high.as_deref().and_then(parse_price),
        low: row.low.as_deref().and_then(parse_price),
        close,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("1.5e-7"), Some(1.5e-7));
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("abc"), None);
    }

    #[test]
    fn test_parse_price_with_text_around_number() {
        assert_eq!(parse_price("EUR 1.2"), Some(1.2));
        assert_eq!(parse_price("Price 3"), Some(3.0));
        assert_eq!(parse_price("1.2 EUR"), Some(1.2));
        assert_eq!(parse_price("USD -0.5"), Some(-0.5));
        assert_eq!(parse_price("2E+3"), Some(2000.0));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parse_timestamp("1704164645"), Some(expected));
        assert_eq!(parse_timestamp("1704164645000"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-02"),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_normalise_asset() {
        assert_eq!(normalise_asset(" 0xABcd "), "0xabcd");
        assert_eq!(normalise_asset("SoLMint"), "SoLMint");
    }

    #[test]
    fn test_csv_row_to_ohlc() {
        let raw = RawOhlcRow {
            asset: None,
            ts: Some("2024-01-02".into()),
            open: Some("1.0".into()),
            high: Some("".into()),
            low: None,
            close: Some("1.1".into()),
        };
        let row = csv_row_to_ohlc("0xAA", &raw).unwrap();
        assert_eq!(row.asset, "0xaa");
        assert_eq!(row.open, Some(1.0));
        assert_eq!(row.high, None);
        assert_eq!(row.close, 1.1);

        let row_asset = RawOhlcRow { asset: Some("0xBB".into()), ..raw.clone() };
        assert_eq!(csv_row_to_ohlc("0xAA", &row_asset).unwrap().asset, "0xbb");

        let bad_close = RawOhlcRow { close: Some("0".into()), ..raw };
        assert!(csv_row_to_ohlc("0xAA", &bad_close).is_none());
    }
}
