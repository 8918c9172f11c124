//! Timezone-aware 5-field cron evaluator
//! (`minute hour day-of-month month day-of-week`).
//!
//! Expressions are parsed once into a [`CronExpr`]; evaluation scans
//! minute-by-minute in the schedule's zone, bounded at one year.
//!
//! **DST handling:**
//! - Spring-forward gaps: a matching local time that doesn't exist fires
//!   at the first valid instant at or after the gap.
//! - Fall-back overlaps: the earliest (pre-transition) mapping is chosen,
//!   so the schedule fires once.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Parse a timezone string into a `chrono_tz::Tz`. Unknown zones are an
/// error — a schedule with a bad zone must be flagged invalid, not
/// silently run in UTC.
pub fn parse_tz(tz: &str) -> Result<Tz, String> {
    tz.parse::<Tz>()
        .map_err(|_| format!("unknown timezone \"{tz}\""))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field grammar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One term of a comma-separated cron field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    All,
    /// `*/n`
    Step(u32),
    /// `a-b` inclusive
    Range(u32, u32),
    Value(u32),
}

impl Part {
    fn matches(&self, value: u32) -> bool {
        match *self {
            Part::All => true,
            Part::Step(n) => value % n == 0,
            Part::Range(lo, hi) => (lo..=hi).contains(&value),
            Part::Value(v) => value == v,
        }
    }
}

/// A parsed field: any of its parts may match.
#[derive(Clone, Debug)]
struct Field {
    parts: Vec<Part>,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|p| p.matches(value))
    }
}

fn parse_field(raw: &str, name: &str, min: u32, max: u32) -> Result<Field, String> {
    if raw == "*" {
        return Ok(Field { parts: vec![Part::All] });
    }
    if let Some(step) = raw.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| format!("{name}: invalid step '*/{step}' — expected a number"))?;
        if n == 0 || n > max {
            return Err(format!("{name}: step {n} out of range 1..={max}"));
        }
        return Ok(Field { parts: vec![Part::Step(n)] });
    }

    let mut parts = Vec::new();
    for piece in raw.split(',') {
        if let Some((start_s, end_s)) = piece.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| format!("{name}: invalid range start '{start_s}'"))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| format!("{name}: invalid range end '{end_s}'"))?;
            if start < min || start > max || end < min || end > max {
                return Err(format!("{name}: range {start}-{end} out of bounds {min}..={max}"));
            }
            if start > end {
                return Err(format!("{name}: range start {start} > end {end}"));
            }
            parts.push(Part::Range(start, end));
        } else {
            let n: u32 = piece
                .parse()
                .map_err(|_| format!("{name}: invalid value '{piece}'"))?;
            if n < min || n > max {
                return Err(format!("{name}: value {n} out of range {min}..={max}"));
            }
            parts.push(Part::Value(n));
        }
    }
    Ok(Field { parts })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CronExpr
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed 5-field cron expression. Day-of-week is Sunday-based (0–6).
#[derive(Clone, Debug)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

impl CronExpr {
    /// Parse and validate an expression. The error message names the
    /// offending field.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }
        Ok(Self {
            minute: parse_field(fields[0], "minute", 0, 59)?,
            hour: parse_field(fields[1], "hour", 0, 23)?,
            dom: parse_field(fields[2], "day-of-month", 1, 31)?,
            month: parse_field(fields[3], "month", 1, 12)?,
            dow: parse_field(fields[4], "day-of-week", 0, 6)?,
        })
    }

    /// Check whether a **local** naive datetime matches.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.dom.matches(dt.day())
            && self.month.matches(dt.month())
            && self.dow.matches(dt.weekday().num_days_from_sunday())
    }

    /// Compute the next occurrence strictly after `after`, evaluated in
    /// `tz`, returned in UTC. Scans at minute granularity, bounded at one
    /// year; `None` means no occurrence inside the bound.
    pub fn next_after_tz(&self, after: &DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        // Advance to the next whole local minute strictly after `after`.
        let local_after = after.with_timezone(&tz).naive_local();
        let next_min_secs = 60 - i64::from(local_after.second());
        let mut candidate = local_after + Duration::seconds(next_min_secs);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        let max_checks = 366 * 24 * 60; // one year of minutes
        for _ in 0..max_checks {
            if self.matches(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    chrono::LocalResult::None => {
                        // Spring-forward gap: this local minute doesn't
                        // exist. Fire at the instant the wall clock would
                        // have reached it — the skipped time shifted past
                        // the gap (02:30 in a 02:00→03:00 jump fires at
                        // 03:30 local).
                        return resolve_gap(candidate, tz);
                    }
                }
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Map a local minute inside a DST gap to the instant at which the wall
/// clock skips past it: interpret the nonexistent time with the
/// pre-transition offset. The probe walks back to the last minute that
/// exists (gaps are at most a few hours) to learn that offset.
fn resolve_gap(inside_gap: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    use chrono::Offset;

    let mut probe = inside_gap;
    for _ in 0..(4 * 60) {
        probe -= Duration::minutes(1);
        match tz.from_local_datetime(&probe) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(_, dt) => {
                let offset_secs = i64::from(dt.offset().fix().local_minus_utc());
                let utc_naive = inside_gap - Duration::seconds(offset_secs);
                return Some(Utc.from_utc_datetime(&utc_naive));
            }
            chrono::LocalResult::None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parse_accepts_valid_expressions() {
        assert!(CronExpr::parse("0 * * * *").is_ok());
        assert!(CronExpr::parse("*/5 9-17 * * 1-5").is_ok());
        assert!(CronExpr::parse("30 9 1,15 * *").is_ok());
        assert!(CronExpr::parse("0 0 * * 0").is_ok());
    }

    #[test]
    fn parse_rejects_invalid_expressions() {
        // Wrong field count
        assert!(CronExpr::parse("* * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
        // Out of range
        assert!(CronExpr::parse("60 * * * *").is_err()); // minute 60
        assert!(CronExpr::parse("* 24 * * *").is_err()); // hour 24
        assert!(CronExpr::parse("* * 0 * *").is_err()); // dom 0
        assert!(CronExpr::parse("* * * 13 *").is_err()); // month 13
        assert!(CronExpr::parse("* * * * 7").is_err()); // dow 7
        // Invalid step
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        // Bad token
        assert!(CronExpr::parse("abc * * * *").is_err());
        // Inverted range
        assert!(CronExpr::parse("0 17-9 * * *").is_err());
    }

    #[test]
    fn parse_error_names_the_field() {
        let err = CronExpr::parse("60 * * * *").unwrap_err();
        assert!(err.starts_with("minute"), "got: {err}");
        let err = CronExpr::parse("* * * 13 *").unwrap_err();
        assert!(err.starts_with("month"), "got: {err}");
    }

    #[test]
    fn matches_step_and_lists() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert!(expr.matches(&utc(2024, 6, 15, 10, 0).naive_utc()));
        assert!(!expr.matches(&utc(2024, 6, 15, 10, 3).naive_utc()));

        let expr = CronExpr::parse("0,15,30,45 * * * *").unwrap();
        assert!(expr.matches(&utc(2024, 6, 15, 10, 15).naive_utc()));
        assert!(!expr.matches(&utc(2024, 6, 15, 10, 20).naive_utc()));
    }

    #[test]
    fn matches_range() {
        let expr = CronExpr::parse("0 9-17 * * *").unwrap();
        assert!(expr.matches(&utc(2024, 6, 15, 10, 0).naive_utc()));
        assert!(!expr.matches(&utc(2024, 6, 15, 20, 0).naive_utc()));
    }

    #[test]
    fn next_is_strictly_after() {
        let expr = CronExpr::parse("30 * * * *").unwrap();
        let at_match = utc(2024, 6, 15, 10, 30);
        let next = expr.next_after_tz(&at_match, chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 11, 30));
    }

    #[test]
    fn next_in_utc() {
        let expr = CronExpr::parse("30 * * * *").unwrap();
        let next = expr
            .next_after_tz(&utc(2024, 6, 15, 10, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2024, 6, 15, 10, 30));
    }

    #[test]
    fn next_respects_zone_offset() {
        // "0 9 * * *" in US/Eastern. After 2024-06-15 12:00 UTC (8:00 EDT),
        // next local 9:00 EDT = 13:00 UTC.
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let tz: Tz = "US/Eastern".parse().unwrap();
        let next = expr.next_after_tz(&utc(2024, 6, 15, 12, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 13, 0));
    }

    #[test]
    fn spring_forward_gap_fires_at_shifted_instant() {
        // America/Los_Angeles springs forward 2024-03-10 02:00 → 03:00.
        // 02:30 doesn't exist that day; the fire lands where the wall
        // clock skips to: 03:30 PDT = 10:30 UTC.
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        let next = expr.next_after_tz(&utc(2024, 3, 10, 7, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 3, 10, 10, 30));
    }

    #[test]
    fn spring_forward_top_of_gap_fires_at_gap_end() {
        // "0 2 * * *": 02:00 PST would be 10:00 UTC, which the wall clock
        // reads as 03:00 PDT — the first instant at/after the gap.
        let expr = CronExpr::parse("0 2 * * *").unwrap();
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        let next = expr.next_after_tz(&utc(2024, 3, 10, 7, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 3, 10, 10, 0));
    }

    #[test]
    fn fall_back_overlap_fires_once_at_first_occurrence() {
        // US/Eastern falls back 2024-11-03 02:00 → 01:00. "30 1 * * *" is
        // ambiguous; the earliest mapping (1:30 EDT = 5:30 UTC) wins.
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        let tz: Tz = "US/Eastern".parse().unwrap();
        let next = expr.next_after_tz(&utc(2024, 11, 3, 4, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 11, 3, 5, 30));
    }

    #[test]
    fn tokyo_morning_maps_to_utc_midnight() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let mut cursor = utc(2024, 6, 15, 0, 0);
        for _ in 0..3 {
            let next = expr.next_after_tz(&cursor, tz).unwrap();
            assert_eq!(next.hour(), 0);
            assert_eq!(next.minute(), 0);
            cursor = next;
        }
    }

    #[test]
    fn weekday_field_is_sunday_based() {
        // 2024-06-16 is a Sunday.
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        let next = expr
            .next_after_tz(&utc(2024, 6, 14, 0, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2024, 6, 16, 12, 0));
    }

    #[test]
    fn parse_tz_rejects_unknown_zone() {
        assert!(parse_tz("America/New_York").is_ok());
        assert!(parse_tz("Not/Real").is_err());
        assert!(parse_tz("").is_err());
    }
}
