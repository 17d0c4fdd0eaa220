use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// One accepted publish-date layout.
#[derive(Debug, Clone, Copy)]
enum DateFormat {
    /// strftime layout ending in a numeric `%z` offset
    NumericZone(&'static str),
    /// strftime layout for everything before a trailing zone abbreviation
    NamedZone(&'static str),
    Rfc2822,
    Rfc3339,
}

/// Tried in order; the first layout that parses wins.
const FORMATS: &[DateFormat] = &[
    // RFC 1123 with numeric zone: "Mon, 02 Jan 2006 15:04:05 -0700"
    DateFormat::NumericZone("%a, %d %b %Y %H:%M:%S %z"),
    // RFC 1123: "Mon, 02 Jan 2006 15:04:05 MST"
    DateFormat::NamedZone("%a, %d %b %Y %H:%M:%S"),
    // RFC 822 with numeric zone: "02 Jan 06 15:04 -0700"
    DateFormat::NumericZone("%d %b %y %H:%M %z"),
    // RFC 822: "02 Jan 06 15:04 MST"
    DateFormat::NamedZone("%d %b %y %H:%M"),
    DateFormat::Rfc2822,
    DateFormat::Rfc3339,
];

/// Parses a feed publish date against the accepted layouts.
///
/// Returns `None` when no layout matches; callers decide whether that is an
/// unknown date or a broken item.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    FORMATS.iter().find_map(|format| match *format {
        DateFormat::NumericZone(layout) => DateTime::parse_from_str(raw, layout)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        DateFormat::NamedZone(layout) => parse_named_zone(raw, layout),
        DateFormat::Rfc2822 => DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn parse_named_zone(raw: &str, layout: &str) -> Option<DateTime<Utc>> {
    let (stamp, zone) = raw.rsplit_once(char::is_whitespace)?;
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp.trim_end(), layout).ok()?;
    let offset = FixedOffset::east_opt(zone_offset_secs(zone)?)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Offsets for the zone names RFC 822 defines. Other abbreviations are
/// ambiguous and make the date unparsable.
fn zone_offset_secs(zone: &str) -> Option<i32> {
    const HOUR: i32 = 3600;
    let offset = match zone.to_ascii_uppercase().as_str() {
        "GMT" | "UT" | "UTC" | "Z" => 0,
        "EST" => -5 * HOUR,
        "EDT" => -4 * HOUR,
        "CST" => -6 * HOUR,
        "CDT" => -5 * HOUR,
        "MST" => -7 * HOUR,
        "MDT" => -6 * HOUR,
        "PST" => -8 * HOUR,
        "PDT" => -7 * HOUR,
        _ => return None,
    };
    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_rfc1123_numeric_zone() {
        assert_eq!(
            parse_pub_date("Mon, 02 Jan 2006 15:04:05 -0700"),
            Some(utc("2006-01-02T22:04:05Z"))
        );
    }

    #[test]
    fn test_rfc1123_named_zone() {
        assert_eq!(
            parse_pub_date("Mon, 02 Jan 2006 15:04:05 GMT"),
            Some(utc("2006-01-02T15:04:05Z"))
        );
        assert_eq!(
            parse_pub_date("Mon, 02 Jan 2006 15:04:05 MST"),
            Some(utc("2006-01-02T22:04:05Z"))
        );
    }

    #[test]
    fn test_rfc822_layouts() {
        assert_eq!(
            parse_pub_date("02 Jan 06 15:04 +0100"),
            Some(utc("2006-01-02T14:04:00Z"))
        );
        assert_eq!(
            parse_pub_date("02 Jan 06 15:04 EST"),
            Some(utc("2006-01-02T20:04:00Z"))
        );
    }

    #[test]
    fn test_rfc3339_courtesy() {
        assert_eq!(
            parse_pub_date("2024-03-01T10:00:00+02:00"),
            Some(utc("2024-03-01T08:00:00Z"))
        );
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert!(parse_pub_date("\n  Mon, 02 Jan 2006 15:04:05 +0000  ").is_some());
    }

    #[test]
    fn test_utc_zone_names() {
        for zone in ["GMT", "UT", "UTC", "Z"] {
            assert_eq!(
                parse_pub_date(&format!("Mon, 02 Jan 2006 15:04:05 {zone}")),
                Some(utc("2006-01-02T15:04:05Z")),
                "{zone}"
            );
        }
    }

    #[test]
    fn test_unknown_zone_name_unparsable() {
        assert_eq!(parse_pub_date("Mon, 02 Jan 2006 15:04:05 CEST"), None);
        assert_eq!(parse_pub_date("02 Jan 06 15:04 IST"), None);
    }

    #[test]
    fn test_unparsable_dates() {
        assert_eq!(parse_pub_date(""), None);
        assert_eq!(parse_pub_date("yesterday"), None);
        assert_eq!(parse_pub_date("Mon, 32 Foo 2006 99:04:05 GMT"), None);
    }
}
