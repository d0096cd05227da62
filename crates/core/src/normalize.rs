//! Canonicalization of raw extracted values.
//!
//! Amounts become integer minor units (cents) plus an explicit currency;
//! times become minute-precision timestamps anchored against a reference
//! "now". Time normalization never hard-fails: an unanchorable phrase is
//! treated as absent and defaults to the reference instant, since a missing
//! time must not block persistence.

use chrono::{Days, NaiveDateTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedAmount {
    pub amount_cents: i64,
    pub currency: String,
}

impl NormalizedAmount {
    /// The canonical value back in major units, for re-normalization checks.
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.amount_cents) / Decimal::ONE_HUNDRED
    }
}

/// Convert a raw decimal amount into minor units. Negative amounts are
/// rejected; an absent currency falls back to the configured default.
/// Idempotent: re-normalizing a canonical (cents, currency) pair yields the
/// same pair.
pub fn normalize_amount(
    raw: Decimal,
    raw_currency: Option<&str>,
    fallback_currency: &str,
) -> Result<NormalizedAmount, DomainError> {
    if raw.is_sign_negative() && !raw.is_zero() {
        return Err(DomainError::InvalidAmount(format!("amount must not be negative, got {raw}")));
    }

    let cents = (raw * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| DomainError::InvalidAmount(format!("amount out of range: {raw}")))?;

    let currency = raw_currency
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(fallback_currency)
        .to_ascii_uppercase();

    Ok(NormalizedAmount { amount_cents: cents, currency })
}

/// Resolve a time phrase or ISO string against `now`, at minute precision.
///
/// An explicit ISO value wins. Otherwise relative phrases are interpreted the
/// way the extractor produces them: a day shift ("昨天"/"yesterday") combined
/// with a coarse time of day ("早"/"morning" 08:00, "中午"/"noon" 12:00,
/// "晚"/"evening" 19:00), or a "right now" phrase that keeps `now`. Fails
/// with `InvalidTime` only when a phrase is present but cannot be anchored.
pub fn anchor_time(
    text: Option<&str>,
    iso: Option<&str>,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, DomainError> {
    if let Some(iso) = iso.map(str::trim).filter(|s| !s.is_empty()) {
        return parse_iso_minute(iso)
            .ok_or_else(|| DomainError::InvalidTime(format!("unparsable timestamp `{iso}`")));
    }

    let Some(text) = text.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(to_minute(now));
    };

    let mut anchored = false;
    let mut t = now;
    if text.contains("昨天") || text.contains("yesterday") {
        t = t
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| DomainError::InvalidTime(format!("cannot shift day for `{text}`")))?;
        anchored = true;
    }

    if text.contains('早') || text.contains("morning") {
        t = at_hour(t, 8);
        anchored = true;
    } else if text.contains("中午") || text.contains("noon") || text.contains("midday") {
        t = at_hour(t, 12);
        anchored = true;
    } else if text.contains('晚') || text.contains("evening") || text.contains("night") {
        t = at_hour(t, 19);
        anchored = true;
    } else if ["刚刚", "现在", "今天", "just now", "now", "today"]
        .iter()
        .any(|phrase| text.contains(phrase))
    {
        anchored = true;
    }

    if anchored {
        Ok(to_minute(t))
    } else {
        Err(DomainError::InvalidTime(format!("cannot anchor time phrase `{text}`")))
    }
}

/// [`anchor_time`] with the documented fallback: an unanchorable phrase is
/// treated as absent and resolves to `now`.
pub fn normalize_time(text: Option<&str>, iso: Option<&str>, now: NaiveDateTime) -> NaiveDateTime {
    anchor_time(text, iso, now).unwrap_or_else(|_| to_minute(now))
}

fn parse_iso_minute(iso: &str) -> Option<NaiveDateTime> {
    let trimmed = iso.trim_end_matches('Z');
    const FORMATS: [&str; 4] =
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(to_minute)
}

fn at_hour(t: NaiveDateTime, hour: u32) -> NaiveDateTime {
    t.with_hour(hour).and_then(|t| t.with_minute(0)).unwrap_or(t)
}

fn to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;

    use super::{anchor_time, normalize_amount, normalize_time};
    use crate::errors::DomainError;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 26)
            .and_then(|d| d.and_hms_opt(14, 32, 45))
            .unwrap()
    }

    #[test]
    fn yuan_amounts_become_cents_with_fallback_currency() {
        let normalized = normalize_amount(Decimal::TEN, None, "CNY").unwrap();
        assert_eq!(normalized.amount_cents, 1000);
        assert_eq!(normalized.currency, "CNY");

        let normalized = normalize_amount(Decimal::new(105, 1), Some("usd"), "CNY").unwrap();
        assert_eq!(normalized.amount_cents, 1050);
        assert_eq!(normalized.currency, "USD");
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = normalize_amount(Decimal::new(-10, 0), None, "CNY").unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn normalization_is_idempotent_over_canonical_values() {
        let first = normalize_amount(Decimal::new(1234, 2), Some("CNY"), "CNY").unwrap();
        let second =
            normalize_amount(first.as_decimal(), Some(&first.currency), "CNY").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_iso_wins_and_truncates_to_minute() {
        let t = normalize_time(Some("今天早上"), Some("2025-08-26T08:00:31"), now());
        assert_eq!(t.to_string(), "2025-08-26 08:00:00");
    }

    #[test]
    fn relative_phrases_resolve_against_reference_now() {
        let t = normalize_time(Some("昨天晚上"), None, now());
        assert_eq!(t.to_string(), "2025-08-25 19:00:00");

        let t = normalize_time(Some("this morning"), None, now());
        assert_eq!(t.to_string(), "2025-08-26 08:00:00");

        let t = normalize_time(Some("刚刚"), None, now());
        assert_eq!(t.to_string(), "2025-08-26 14:32:00");
    }

    #[test]
    fn absent_time_defaults_to_now_at_minute_precision() {
        let t = normalize_time(None, None, now());
        assert_eq!(t.to_string(), "2025-08-26 14:32:00");
    }

    #[test]
    fn unanchorable_phrase_fails_anchor_but_not_normalize() {
        let err = anchor_time(Some("下下下个火星年"), None, now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTime(_)));

        let t = normalize_time(Some("下下下个火星年"), None, now());
        assert_eq!(t.to_string(), "2025-08-26 14:32:00");
    }
}
