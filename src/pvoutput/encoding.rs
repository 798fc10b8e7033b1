use crate::prelude::*;
use crate::pvoutput::entry::Entry;

use chrono::{FixedOffset, TimeZone};

/// Render one batch entry: `YYYYMMDD,HH:MM,eg,pg,ec,pc,,volts`.
///
/// Internal values carry generation as negative; the remote wants gross
/// positives. Anything still negative after conversion is clamped to zero
/// so the remote never enters its "lower than previous" rejection loop.
pub fn encode_entry(entry: &Entry, offset_secs: i32) -> String {
    let energy_generated = (-entry.energy_generated).max(0.0);
    let power_generated = (-entry.power_generated).max(0.0);
    let energy_consumed = entry.energy_consumed.max(0.0);
    let power_consumed = entry.power_consumed.max(0.0);

    let zone = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local = zone
        .timestamp_opt(entry.unix_time, 0)
        .single()
        .unwrap_or_else(|| zone.timestamp_opt(0, 0).unwrap());

    format!(
        "{},{:.0},{:.0},{:.0},{:.0},,{:.1}",
        local.format("%Y%m%d,%H:%M"),
        energy_generated,
        power_generated,
        energy_consumed,
        power_consumed,
        entry.voltage
    )
}

fn fixed_digits(s: &str, lo: u32, hi: u32) -> Result<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        bail!("expected digits, got {:?}", s);
    }
    let value: u32 = s.parse()?;
    if value < lo || value > hi {
        bail!("field {} outside {}..={}", value, lo, hi);
    }
    Ok(value)
}

/// True when an energy text field holds a real non-zero number.
fn contains_energy(field: &str) -> bool {
    field.parse::<f64>().map_or(false, |v| !v.is_nan() && v != 0.0)
}

/// Parse a `getstatus` reply (`YYYYMMDD,HH:MM,eg,pg,ec,pc,...`) into the
/// UTC time of the remote's last accepted status.
///
/// A reply of `00:00` is ambiguous: the remote rolls its clock before it
/// zeroes the daily energies, so a midnight status still carrying energy is
/// really the final report of the previous day. That case comes back as
/// 23:59:59 of that previous day.
pub fn parse_get_status(body: &str, offset_secs: i32) -> Result<i64> {
    let fields: Vec<&str> = body.trim().split(',').collect();
    if fields.len() < 6 {
        bail!("getstatus reply has {} fields, expected at least 6", fields.len());
    }

    let date = fields[0];
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        bail!("bad getstatus date {:?}", date);
    }
    let year = fixed_digits(&date[0..4], 2000, 2099)?;
    let month = fixed_digits(&date[4..6], 1, 12)?;
    let day = fixed_digits(&date[6..8], 1, 31)?;

    let time = fields[1];
    if time.len() != 5 || !time.is_ascii() || time.as_bytes()[2] != b':' {
        bail!("bad getstatus time {:?}", time);
    }
    let hour = fixed_digits(&time[0..2], 0, 23)?;
    let minute = fixed_digits(&time[3..5], 0, 59)?;

    let date = chrono::NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| anyhow!("invalid getstatus date {}-{}-{}", year, month, day))?;
    let mut local = date
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| anyhow!("invalid getstatus time {}:{}", hour, minute))?
        .and_utc()
        .timestamp();

    if hour == 0 && minute == 0 && (contains_energy(fields[2]) || contains_energy(fields[4])) {
        local -= 1;
    }

    Ok(unixtime::to_utc(local, offset_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_HOURS: i32 = 10 * 3600;

    fn entry(unix_time: i64) -> Entry {
        Entry {
            unix_time,
            voltage: 230.12,
            energy_generated: -500.0,
            power_generated: -6000.0,
            energy_consumed: 600.0,
            power_consumed: 7200.0,
        }
    }

    #[test]
    fn encodes_remote_field_layout() {
        // 2023-11-15 08:18:20 local at UTC+10
        let encoded = encode_entry(&entry(1_700_000_300), TEN_HOURS);
        assert_eq!(encoded, "20231115,08:18,500,6000,600,7200,,230.1");
    }

    #[test]
    fn encoder_clamps_negatives_to_zero() {
        let mut e = entry(1_700_000_300);
        e.energy_generated = 25.0; // positive internal generation encodes as 0
        e.power_generated = 25.0;
        e.energy_consumed = -10.0;
        e.power_consumed = -10.0;
        let encoded = encode_entry(&e, 0);
        assert_eq!(encoded, "20231114,22:18,0,0,0,0,,230.1");
    }

    #[test]
    fn encoder_renders_sentinel_minute() {
        // 23:59:59 renders as 23:59; seconds never reach the remote
        let midnight_utc = unixtime::local_midnight(1_700_000_000, TEN_HOURS);
        let encoded = encode_entry(&entry(midnight_utc - 1), TEN_HOURS);
        assert!(encoded.starts_with("20231114,23:59,"));
    }

    #[test]
    fn round_trip_preserves_field_layout() {
        let encoded = encode_entry(&entry(1_700_000_300), TEN_HOURS);
        let parsed = parse_get_status(&encoded, TEN_HOURS).unwrap();
        // HH:MM granularity: seconds are quantised away
        assert_eq!(parsed, 1_700_000_300 - (1_700_000_300 % 60));
    }

    #[test]
    fn parses_plain_status() {
        // 2023-11-15 08:15 local = 2023-11-14 22:15 UTC
        let parsed = parse_get_status("20231115,08:15,1000,200,1100,300,NaN,NaN,230.1", TEN_HOURS).unwrap();
        assert_eq!(unixtime::date_string(parsed, TEN_HOURS), "2023/11/15 08:15:00");
    }

    #[test]
    fn midnight_without_energy_is_start_of_day() {
        let parsed = parse_get_status("20231115,00:00,0,0,0,0,NaN,NaN,NaN", TEN_HOURS).unwrap();
        assert_eq!(unixtime::seconds_of_day(parsed, TEN_HOURS), 0);
        assert_eq!(unixtime::date_string(parsed, TEN_HOURS), "2023/11/15 00:00:00");
    }

    #[test]
    fn midnight_with_energy_is_end_of_previous_day() {
        let parsed = parse_get_status("20231115,00:00,1000,0,1200,100,NaN,NaN,NaN", TEN_HOURS).unwrap();
        assert!(unixtime::is_day_end(parsed, TEN_HOURS));
        assert_eq!(unixtime::date_string(parsed, TEN_HOURS), "2023/11/14 23:59:59");
    }

    #[test]
    fn midnight_with_nan_energy_is_start_of_day() {
        let parsed = parse_get_status("20231115,00:00,NaN,NaN,NaN,NaN,NaN,NaN,NaN", TEN_HOURS).unwrap();
        assert_eq!(unixtime::seconds_of_day(parsed, TEN_HOURS), 0);
    }

    #[test]
    fn rejects_range_violations() {
        assert!(parse_get_status("20231315,08:15,0,0,0,0", 0).is_err()); // month 13
        assert!(parse_get_status("20231100,08:15,0,0,0,0", 0).is_err()); // day 0
        assert!(parse_get_status("20231115,24:00,0,0,0,0", 0).is_err()); // hour 24
        assert!(parse_get_status("20231115,08:60,0,0,0,0", 0).is_err()); // minute 60
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(parse_get_status("", 0).is_err());
        assert!(parse_get_status("garbage", 0).is_err());
        assert!(parse_get_status("2023111,08:15,0,0,0,0", 0).is_err()); // short date
        assert!(parse_get_status("20231115,0815,0,0,0,0", 0).is_err()); // missing separator
        assert!(parse_get_status("20231115,08:15,0,0", 0).is_err()); // too few fields
    }
}
