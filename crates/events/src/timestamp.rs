//! Lenient RFC 3339 timestamps.
//!
//! Upstream producers omit zero seconds (`2020-01-01T00:00Z`,
//! `2020-03-29T10:00+01:00`). All values are normalised to UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Minute-precision forms with an explicit offset, tried after RFC 3339.
const MINUTE_PRECISION_OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M%z"];

pub(crate) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in MINUTE_PRECISION_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let naive = raw
        .strip_suffix('Z')
        .or_else(|| raw.strip_suffix('z'))
        .ok_or_else(|| format!("invalid timestamp '{raw}'"))?;

    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M")
        .map(|n| n.and_utc())
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

pub(crate) fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339())
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

pub(crate) mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|r| super::parse(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::parse;
    use chrono::{TimeZone, Utc};

    #[test]
    fn accepts_full_rfc3339_with_offset() {
        let dt = parse("2020-01-01T01:00:00+01:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn accepts_minute_precision_zulu() {
        let dt = parse("2020-01-01T00:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn accepts_minute_precision_with_offset() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 29, 9, 0, 0).unwrap();
        assert_eq!(parse("2020-03-29T10:00+01:00").unwrap(), expected);
        assert_eq!(parse("2020-03-29T10:00+0100").unwrap(), expected);
        assert_eq!(parse("2020-03-29T08:30-00:30").unwrap(), expected);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("yesterday").is_err());
    }
}
