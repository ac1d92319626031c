//! Conversions between `chrono` timestamps and ASN.1 time values

use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Utc};
use der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::time::Time;

use crate::error::{PkiError, Result};

/// RFC 5280 §4.1.2.5: UTCTime through 2049, GeneralizedTime from 2050 on
pub fn to_x509_time(at: DateTime<Utc>) -> Result<Time> {
    let since_epoch = unix_duration(at)?;
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?))
    }
}

pub fn to_generalized_time(at: DateTime<Utc>) -> Result<GeneralizedTime> {
    Ok(GeneralizedTime::from_unix_duration(unix_duration(at)?)?)
}

pub fn from_x509_time(time: Time) -> Result<DateTime<Utc>> {
    from_unix_duration(time.to_unix_duration())
}

pub fn from_generalized_time(time: GeneralizedTime) -> Result<DateTime<Utc>> {
    from_unix_duration(time.to_unix_duration())
}

fn unix_duration(at: DateTime<Utc>) -> Result<StdDuration> {
    u64::try_from(at.timestamp())
        .map(StdDuration::from_secs)
        .map_err(|_| PkiError::MalformedRequest(format!("time before 1970: {}", at)))
}

fn from_unix_duration(since_epoch: StdDuration) -> Result<DateTime<Utc>> {
    i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| {
            PkiError::MalformedRequest(format!("time out of range: {:?}", since_epoch))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_utc_time_before_2050() {
        let at = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        assert!(matches!(to_x509_time(at).unwrap(), Time::UtcTime(_)));
        assert_eq!(from_x509_time(to_x509_time(at).unwrap()).unwrap(), at);
    }

    #[test]
    fn test_generalized_time_from_2050() {
        let at = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(to_x509_time(at).unwrap(), Time::GeneralTime(_)));
    }
}
