use chrono::{FixedOffset, TimeZone};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Local seconds-of-day of the last second of a day (23:59:59).
pub const DAY_END_SECONDS: i64 = SECONDS_PER_DAY - 1;

/// Current UNIX time in whole seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn to_local(utc: i64, offset_secs: i32) -> i64 {
    utc + offset_secs as i64
}

pub fn to_utc(local: i64, offset_secs: i32) -> i64 {
    local - offset_secs as i64
}

/// Seconds since local midnight, 0..86400.
pub fn seconds_of_day(utc: i64, offset_secs: i32) -> i64 {
    to_local(utc, offset_secs).rem_euclid(SECONDS_PER_DAY)
}

/// Local day ordinal. Two timestamps share it iff they fall on the same
/// local calendar day.
pub fn local_day(utc: i64, offset_secs: i32) -> i64 {
    to_local(utc, offset_secs).div_euclid(SECONDS_PER_DAY)
}

/// UTC time of local midnight of the day containing `utc`.
pub fn local_midnight(utc: i64, offset_secs: i32) -> i64 {
    let local = to_local(utc, offset_secs);
    to_utc(local - local.rem_euclid(SECONDS_PER_DAY), offset_secs)
}

/// True when the local time of `utc` is exactly 23:59:59.
pub fn is_day_end(utc: i64, offset_secs: i32) -> bool {
    seconds_of_day(utc, offset_secs) == DAY_END_SECONDS
}

/// Floor to the nearest multiple of `interval`.
pub fn quantize(t: i64, interval: i64) -> i64 {
    t - t.rem_euclid(interval)
}

/// Human form of a UTC timestamp in the configured zone, `YYYY/MM/DD HH:MM:SS`.
pub fn date_string(utc: i64, offset_secs: i32) -> String {
    match FixedOffset::east_opt(offset_secs).and_then(|z| z.timestamp_opt(utc, 0).single()) {
        Some(dt) => dt.format("%Y/%m/%d %H:%M:%S").to_string(),
        None => format!("({})", utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_HOURS: i32 = 10 * 3600;

    #[test]
    fn local_conversion_round_trips() {
        assert_eq!(to_utc(to_local(1_700_000_000, TEN_HOURS), TEN_HOURS), 1_700_000_000);
        assert_eq!(to_local(0, -3600), -3600);
    }

    #[test]
    fn seconds_of_day_uses_local_zone() {
        // 2023-11-14 22:13:20 UTC is 08:13:20 on the 15th at UTC+10
        assert_eq!(seconds_of_day(1_700_000_000, 0), 22 * 3600 + 13 * 60 + 20);
        assert_eq!(seconds_of_day(1_700_000_000, TEN_HOURS), 8 * 3600 + 13 * 60 + 20);
    }

    #[test]
    fn local_day_changes_at_local_midnight() {
        let midnight_utc = local_midnight(1_700_000_000, TEN_HOURS);
        assert_eq!(seconds_of_day(midnight_utc, TEN_HOURS), 0);
        assert_eq!(
            local_day(midnight_utc - 1, TEN_HOURS) + 1,
            local_day(midnight_utc, TEN_HOURS)
        );
    }

    #[test]
    fn day_end_sentinel_detection() {
        let midnight_utc = local_midnight(1_700_000_000, TEN_HOURS);
        assert!(is_day_end(midnight_utc - 1, TEN_HOURS));
        assert!(!is_day_end(midnight_utc, TEN_HOURS));
        assert!(!is_day_end(midnight_utc - 2, TEN_HOURS));
    }

    #[test]
    fn quantize_floors() {
        assert_eq!(quantize(1_700_000_123, 300), 1_700_000_100);
        assert_eq!(quantize(1_700_000_100, 300), 1_700_000_100);
    }

    #[test]
    fn date_string_renders_local() {
        assert_eq!(date_string(1_700_000_000, 0), "2023/11/14 22:13:20");
        assert_eq!(date_string(1_700_000_000, TEN_HOURS), "2023/11/15 08:13:20");
    }
}
