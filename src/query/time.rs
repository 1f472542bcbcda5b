use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%b %d %Y %H:%M:%S%.f",
    "%B %d %Y %H:%M:%S%.f",
    "%d %b %Y %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%b %d %Y", "%B %d %Y", "%d %b %Y", "%b %d, %Y",
    "%B %d, %Y",
];

/// Parse a timestamp written in any of the common human formats.
///
/// Underscores stand in for spaces so a timestamp fits in one search token
/// (`before:2022-01-31_14:00`). Inputs without an explicit offset are read
/// in the local time zone. All-digit input is read by length: 4, 6, 8, 12
/// and 14 digits are compact local dates (`2023`, `202306`, `20230615`,
/// ...), 10/13/16/19 digits are Unix seconds/ms/µs/ns, and anything else is
/// rejected as ambiguous.
///
/// # Errors
///
/// Returns a human-readable reason when no format matches, or when the local
/// time does not exist (a DST gap).
pub fn parse_time_generously(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.replace('_', " ");
    let input = input.trim();
    if input.is_empty() {
        return Err("empty timestamp".to_string());
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(input) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Ok(t.with_timezone(&Utc));
    }
    if input.bytes().all(|b| b.is_ascii_digit()) {
        return parse_digits(input);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return local_to_utc(&naive);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, fmt) {
            return local_to_utc(&date.and_time(NaiveTime::default()));
        }
    }
    if let Some(result) = parse_year_month(input) {
        return result;
    }
    Err(format!("unrecognised timestamp format {input:?}"))
}

/// Compact calendar layouts for all-digit input, keyed by length. Lengths
/// not listed here are epochs (10 = seconds, 13 = ms, 16 = µs, 19 = ns).
const COMPACT_FORMATS: &[(usize, &str)] = &[
    (4, "%Y"),
    (6, "%Y%m"),
    (8, "%Y%m%d"),
    (12, "%Y%m%d%H%M"),
    (14, "%Y%m%d%H%M%S"),
];

fn parse_digits(digits: &str) -> Result<DateTime<Utc>, String> {
    if let Some((_, fmt)) = COMPACT_FORMATS.iter().find(|(len, _)| *len == digits.len()) {
        return parse_compact(digits, fmt);
    }
    let n: i64 = digits
        .parse()
        .map_err(|e| format!("invalid epoch {digits:?}: {e}"))?;
    let parsed = match digits.len() {
        10 => DateTime::from_timestamp(n, 0),
        13 => DateTime::from_timestamp_millis(n),
        16 => DateTime::from_timestamp_micros(n),
        19 => Some(DateTime::from_timestamp_nanos(n)),
        len => {
            return Err(format!(
                "ambiguous numeric timestamp {digits:?} ({len} digits)"
            ));
        }
    };
    parsed.ok_or_else(|| format!("epoch {digits} is out of range"))
}

/// Parse a compact calendar value, padding missing month/day with `01` so a
/// bare year or year-month means its first instant in local time.
fn parse_compact(digits: &str, fmt: &str) -> Result<DateTime<Utc>, String> {
    let (padded, fmt) = match digits.len() {
        4 => (format!("{digits}0101"), "%Y%m%d"),
        6 => (format!("{digits}01"), "%Y%m%d"),
        _ => (digits.to_string(), fmt),
    };
    let naive = if fmt == "%Y%m%d" {
        NaiveDate::parse_from_str(&padded, fmt).map(|d| d.and_time(NaiveTime::default()))
    } else {
        NaiveDateTime::parse_from_str(&padded, fmt)
    }
    .map_err(|e| format!("invalid compact date {digits:?}: {e}"))?;
    local_to_utc(&naive)
}

/// `2023-06` / `2023/06`: the first day of the month.
fn parse_year_month(input: &str) -> Option<Result<DateTime<Utc>, String>> {
    ["%Y-%m-%d", "%Y/%m/%d"].iter().find_map(|fmt| {
        let sep = &fmt[2..3];
        NaiveDate::parse_from_str(&format!("{input}{sep}01"), fmt)
            .ok()
            .map(|d| local_to_utc(&d.and_time(NaiveTime::default())))
    })
}

fn local_to_utc(naive: &NaiveDateTime) -> Result<DateTime<Utc>, String> {
    Local
        .from_local_datetime(naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| format!("{naive} does not exist in the local time zone"))
}
