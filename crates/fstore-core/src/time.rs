/// RFC 3339 UTC timestamp with nanosecond precision.
///
/// Format: `2024-01-15T10:30:00.123456789Z`. Computed directly from epoch
/// seconds to avoid pulling in chrono/time crates.
pub fn now_rfc3339_nanos() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_rfc3339_nanos(duration.as_secs(), duration.subsec_nanos())
}

fn format_rfc3339_nanos(secs: u64, nanos: u32) -> String {
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (year, month, day) = days_to_ymd(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        year, month, day, hours, minutes, seconds, nanos
    )
}

fn days_to_ymd(mut days: u64) -> (u64, u64, u64) {
    // Civil days from epoch algorithm
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }
    let leap = is_leap(year);
    let months: [u64; 12] = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 1u64;
    for &m in &months {
        if days < m {
            break;
        }
        days -= m;
        month += 1;
    }
    (year, month, days + 1)
}

fn is_leap(y: u64) -> bool {
    y % 4 == 0 && (y % 100 != 0 || y % 400 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_start() {
        assert_eq!(format_rfc3339_nanos(0, 0), "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn known_instant() {
        // 2021-03-04T05:06:07Z
        assert_eq!(
            format_rfc3339_nanos(1_614_834_367, 123_456_789),
            "2021-03-04T05:06:07.123456789Z"
        );
    }

    #[test]
    fn leap_day() {
        // 2020-02-29T00:00:00Z
        assert_eq!(
            format_rfc3339_nanos(1_582_934_400, 0),
            "2020-02-29T00:00:00.000000000Z"
        );
    }

    #[test]
    fn now_has_nanos_suffix() {
        let now = now_rfc3339_nanos();
        assert!(now.ends_with('Z'));
        assert_eq!(now.len(), "1970-01-01T00:00:00.000000000Z".len());
    }
}
