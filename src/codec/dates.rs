//! Date patterns and spreadsheet serial dates

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Patterns tried, in order, when a text cell is decoded into a date
pub const PARSE_PATTERNS: &[&str] = &[
    "yyyy-MM-dd",
    "yyyy-MM-dd HH:mm:ss",
    "yyyy-MM-dd HH:mm",
    "yyyy/MM/dd",
    "yyyy/MM/dd HH:mm:ss",
    "yyyy.MM.dd",
    "yyyy-MM",
];

/// One pattern token: a quoted literal, a run of a pattern letter, or any
/// other single character
static TOKEN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"'[^']*'?|y+|M+|d+|H+|h+|m+|s+|S+|a+|E+|(?s:.)"));

/// Translate a `yyyy-MM-dd HH:mm:ss` style pattern into a chrono format string.
///
/// Letters outside the known set are kept as literals; single-quoted runs are
/// copied verbatim.
pub fn to_chrono(pattern: &str) -> String {
    let token = match TOKEN.as_ref() {
        Ok(token) => token,
        Err(e) => {
            debug!(error = %e, "Date pattern tokenizer unavailable");
            return pattern.replace('%', "%%");
        }
    };
    let mut out = String::with_capacity(pattern.len() * 2);
    for m in token.find_iter(pattern) {
        let text = m.as_str();
        if let Some(quoted) = text.strip_prefix('\'') {
            push_literal(&mut out, quoted.strip_suffix('\'').unwrap_or(quoted));
            continue;
        }
        let run = text.chars().count();
        let spec = match (text.chars().next(), run) {
            (Some('y'), 2) => "%y",
            (Some('y'), _) => "%Y",
            (Some('M'), 1 | 2) => "%m",
            (Some('M'), 3) => "%b",
            (Some('M'), _) => "%B",
            (Some('d'), _) => "%d",
            (Some('H'), _) => "%H",
            (Some('h'), _) => "%I",
            (Some('m'), _) => "%M",
            (Some('s'), _) => "%S",
            (Some('S'), _) => "%3f",
            (Some('a'), _) => "%p",
            (Some('E'), 1..=3) => "%a",
            (Some('E'), _) => "%A",
            _ => {
                push_literal(&mut out, text);
                continue;
            }
        };
        out.push_str(spec);
    }
    out
}

fn push_literal(out: &mut String, text: &str) {
    out.push_str(&text.replace('%', "%%"));
}

pub fn format_datetime(value: &NaiveDateTime, pattern: &str) -> String {
    value.format(&to_chrono(pattern)).to_string()
}

/// Parse `text` with one pattern. Date-only patterns yield midnight and a
/// month pattern yields the first of the month.
pub fn parse_with(text: &str, pattern: &str) -> Option<NaiveDateTime> {
    let fmt = to_chrono(pattern);
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, &fmt) {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, &fmt) {
        return Some(d.and_time(NaiveTime::MIN));
    }
    if !fmt.contains("%d") {
        let padded = format!("{text}-01");
        let fmt = format!("{fmt}-%d");
        if let Ok(d) = NaiveDate::parse_from_str(&padded, &fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Parse with an optional preferred pattern, then the built-in list
pub fn parse_lenient(text: &str, preferred: Option<&str>) -> Option<NaiveDateTime> {
    preferred
        .into_iter()
        .chain(PARSE_PATTERNS.iter().copied())
        .find_map(|p| parse_with(text, p))
}

fn epoch() -> NaiveDateTime {
    // 1899-12-30 absorbs the 1900 leap-year bug for serials >= 61
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

/// Spreadsheet serial day number to a timestamp, rounded to milliseconds
pub fn from_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch().checked_add_signed(Duration::milliseconds(millis))
}

pub fn to_serial(value: &NaiveDateTime) -> f64 {
    let delta = *value - epoch();
    delta.num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_pattern_translation() {
        assert_eq!(to_chrono("yyyy-MM-dd HH:mm:ss"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(to_chrono("yyyy/MM/dd"), "%Y/%m/%d");
        assert_eq!(to_chrono("yyyy'T'HH"), "%YT%H");
        assert_eq!(to_chrono("dd.MM.yy"), "%d.%m.%y");
    }

    #[test]
    fn test_pattern_literals() {
        assert_eq!(to_chrono("MMM d, yyyy"), "%b %d, %Y");
        assert_eq!(to_chrono("EEEE hh:mm a"), "%A %I:%M %p");
        assert_eq!(to_chrono("HH:mm:ss.SSS"), "%H:%M:%S.%3f");
        assert_eq!(to_chrono("100% yyyy"), "100%% %Y");
        assert_eq!(to_chrono("'at' HH'h'"), "at %Hh");
        // unterminated quote runs to the end
        assert_eq!(to_chrono("yyyy 'rest"), "%Y rest");
        assert_eq!(to_chrono("yyyy年MM月"), "%Y年%m月");
    }

    #[test]
    fn test_format_datetime() {
        let dt = ymd(2024, 2, 29).and_hms_opt(13, 4, 5).unwrap();
        assert_eq!(format_datetime(&dt, "yyyy-MM-dd"), "2024-02-29");
        assert_eq!(format_datetime(&dt, "yyyy年MM月dd日 HH:mm"), "2024年02月29日 13:04");
    }

    #[test]
    fn test_parse_lenient() {
        let midnight = ymd(2023, 7, 1).and_time(NaiveTime::MIN);
        assert_eq!(parse_lenient("2023-07-01", None), Some(midnight));
        assert_eq!(parse_lenient("2023/07/01", None), Some(midnight));
        assert_eq!(parse_lenient("2023.07.01", None), Some(midnight));
        assert_eq!(parse_lenient("2023-07", None), Some(midnight));
        assert_eq!(
            parse_lenient("2023-07-01 08:30", None),
            Some(ymd(2023, 7, 1).and_hms_opt(8, 30, 0).unwrap())
        );
        assert_eq!(parse_lenient("not a date", None), None);
    }

    #[test]
    fn test_parse_preferred_pattern_first() {
        assert_eq!(
            parse_lenient("01/07/2023", Some("dd/MM/yyyy")),
            Some(ymd(2023, 7, 1).and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn test_serial_conversion() {
        assert_eq!(from_serial(45000.0), Some(ymd(2023, 3, 15).and_time(NaiveTime::MIN)));
        assert_eq!(
            from_serial(45000.5),
            Some(ymd(2023, 3, 15).and_hms_opt(12, 0, 0).unwrap())
        );
        let dt = ymd(2023, 3, 15).and_hms_opt(6, 0, 0).unwrap();
        assert_eq!(to_serial(&dt), 45000.25);
        assert_eq!(from_serial(-1.0), None);
    }
}
