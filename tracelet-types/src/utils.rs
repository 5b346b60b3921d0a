//! Serde adapters for the timestamp encodings used on the wire.

use std::time::{Duration, SystemTime};

use serde::{de, ser, Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

fn secs_since_epoch(st: SystemTime) -> f64 {
    st.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0.0, |offset| offset.as_secs_f64())
}

fn from_secs<E: de::Error>(secs: f64) -> Result<SystemTime, E> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|offset| SystemTime::UNIX_EPOCH.checked_add(offset))
        .ok_or_else(|| E::custom(format!("invalid timestamp: {secs}")))
}

/// Unix time as fractional seconds.
pub mod seconds {
    use super::*;

    pub fn serialize<S: Serializer>(st: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(secs_since_epoch(*st))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        from_secs(f64::deserialize(d)?)
    }
}

/// Like [`seconds`], for optional timestamps.
pub mod seconds_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        st: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match st {
            Some(st) => seconds::serialize(st, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        Option::<f64>::deserialize(d)?.map(from_secs).transpose()
    }
}

/// Optional RFC 3339 date strings, used in envelope headers.
pub mod rfc3339_opt {
    use super::*;

    pub(crate) fn format(st: SystemTime) -> Option<String> {
        let nanos = st.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_nanos();
        OffsetDateTime::from_unix_timestamp_nanos(i128::try_from(nanos).ok()?)
            .ok()?
            .format(&Rfc3339)
            .ok()
    }

    pub(crate) fn parse(value: &str) -> Option<SystemTime> {
        let nanos = OffsetDateTime::parse(value, &Rfc3339)
            .ok()?
            .unix_timestamp_nanos();
        let nanos = u64::try_from(nanos).ok()?;
        SystemTime::UNIX_EPOCH.checked_add(Duration::from_nanos(nanos))
    }

    pub fn serialize<S: Serializer>(
        st: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match st {
            Some(st) => match format(*st) {
                Some(date) => serializer.serialize_str(&date),
                None => Err(ser::Error::custom("timestamp out of range")),
            },
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|date| {
                parse(&date).ok_or_else(|| de::Error::custom(format!("invalid date: {date}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_keeps_millis() {
        let st = SystemTime::UNIX_EPOCH + Duration::from_millis(1_595_256_674_296);
        let date = rfc3339_opt::format(st).unwrap();
        assert_eq!(date, "2020-07-20T14:51:14.296Z");
        assert_eq!(rfc3339_opt::parse(&date), Some(st));
        assert_eq!(rfc3339_opt::parse("1969-12-31T23:59:59Z"), None);
    }

    #[test]
    fn rejects_negative_seconds() {
        let parsed: Result<SystemTime, serde_json::Error> = from_secs(-1.0);
        assert!(parsed.is_err());
        let parsed: Result<SystemTime, serde_json::Error> = from_secs(f64::NAN);
        assert!(parsed.is_err());
    }
}
