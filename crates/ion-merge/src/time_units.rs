// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `"<unit> since <timestamp>"` time bases and ISO 8601 timestamp parsing.

use std::str::FromStr;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

use crate::MergeError;

/// Step size of a numeric time coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// SI seconds.
    Seconds,
    /// 60 s.
    Minutes,
    /// 3600 s.
    Hours,
    /// 86400 s.
    Days,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Days => 86_400.0,
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Seconds),
            "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeUnit::Hours),
            "d" | "day" | "days" => Some(TimeUnit::Days),
            _ => None,
        }
    }
}

/// A parsed `units` attribute: values count `unit`s since `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    /// Step size.
    pub unit: TimeUnit,
    /// Reference instant (UTC when the text carries no offset).
    pub epoch: OffsetDateTime,
}

impl TimeBase {
    /// Distance from this epoch to `other`'s epoch, in this base's unit.
    ///
    /// Both bases must share a unit; values in different units would need
    /// rescaling, not shifting.
    pub fn offset_to(&self, other: &TimeBase) -> Result<f64, MergeError> {
        if self.unit != other.unit {
            return Err(MergeError::InvalidTimeUnits(format!(
                "unit {:?} cannot be shifted onto {:?}",
                other.unit, self.unit
            )));
        }
        Ok((other.epoch - self.epoch).as_seconds_f64() / self.unit.seconds())
    }

    /// RFC 3339 rendering of the instant `value` units after the epoch.
    pub fn timestamp_at(&self, value: f64) -> Option<String> {
        let delta = Duration::checked_seconds_f64(value * self.unit.seconds())?;
        self.epoch.checked_add(delta)?.format(&Rfc3339).ok()
    }
}

impl FromStr for TimeBase {
    type Err = MergeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || MergeError::InvalidTimeUnits(text.to_string());
        let lowered = text.to_ascii_lowercase();
        let split = lowered.find(" since ").ok_or_else(invalid)?;
        let unit = TimeUnit::from_word(text[..split].trim()).ok_or_else(invalid)?;
        let epoch = parse_timestamp(&text[split + " since ".len()..]).ok_or_else(invalid)?;
        Ok(TimeBase { unit, epoch })
    }
}

/// Parse an ISO 8601 timestamp. Accepts RFC 3339 and the common
/// offset-less forms (`T` or space separator, optional seconds/fraction, bare
/// dates); offset-less forms are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    if let Ok(t) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(t);
    }
    let bare = text
        .strip_suffix('Z')
        .or_else(|| text.strip_suffix("UTC"))
        .unwrap_or(text)
        .trim_end();
    let naive = PrimitiveDateTime::parse(
        bare,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            bare,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            bare,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            bare,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(bare, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(bare, format_description!("[year]-[month]-[day] [hour]:[minute]"))
    })
    .or_else(|_| {
        Date::parse(bare, format_description!("[year]-[month]-[day]")).map(Date::midnight)
    });
    naive.ok().map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_cf_units() {
        let base: TimeBase = "hours since 2024-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(base.unit, TimeUnit::Hours);
        assert_eq!(base.epoch, datetime!(2024-01-01 0:00 UTC));

        let base: TimeBase = "Days Since 1970-01-01".parse().unwrap();
        assert_eq!(base.unit, TimeUnit::Days);
        assert_eq!(base.epoch, datetime!(1970-01-01 0:00 UTC));

        let base: TimeBase = "seconds since 2000-06-01 12:30:00".parse().unwrap();
        assert_eq!(base.epoch, datetime!(2000-06-01 12:30 UTC));
    }

    #[test]
    fn rejects_malformed_units() {
        assert!(matches!(
            "fortnights since 2020-01-01".parse::<TimeBase>(),
            Err(MergeError::InvalidTimeUnits(_))
        ));
        assert!("hours".parse::<TimeBase>().is_err());
        assert!("hours since yesterday".parse::<TimeBase>().is_err());
    }

    #[test]
    fn offset_is_expressed_in_receiver_unit() {
        let current: TimeBase = "hours since 2024-01-01T00:00:00Z".parse().unwrap();
        let later: TimeBase = "hours since 2024-01-02T06:00:00Z".parse().unwrap();
        assert!((current.offset_to(&later).unwrap() - 30.0).abs() < 1e-9);
        assert!((later.offset_to(&current).unwrap() + 30.0).abs() < 1e-9);

        let days: TimeBase = "days since 2024-01-01".parse().unwrap();
        assert!(current.offset_to(&days).is_err());
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let a = parse_timestamp("2024-03-01T00:00:00Z").unwrap();
        let b = parse_timestamp("2024-03-01 01:00:00").unwrap();
        let c = parse_timestamp("2024-02-28").unwrap();
        assert!(c < a && a < b);
        assert!(parse_timestamp("2024-03-01T00:00:00.250Z").is_some());
        assert!(parse_timestamp("not a time").is_none());
    }

    #[test]
    fn timestamp_at_renders_rfc3339() {
        let base: TimeBase = "hours since 2024-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(
            base.timestamp_at(36.0).as_deref(),
            Some("2024-01-02T12:00:00Z")
        );
    }
}
