use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_protocol::types;

use super::PgDecode;
use crate::error::BoxError;

/// Seconds between the Unix epoch and PostgreSQL's epoch (2000-01-01).
const PG_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// `NaiveDate::num_days_from_ce` of 2000-01-01.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

pub(crate) fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>, BoxError> {
    if micros == i64::MAX || micros == i64::MIN {
        return Err("infinite timestamps are not supported".into());
    }

    micros
        .checked_add(PG_EPOCH_UNIX_SECS * 1_000_000)
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| format!("timestamp out of range: {}", micros).into())
}

#[cfg(test)]
pub(crate) fn datetime_to_micros(value: &DateTime<Utc>) -> i64 {
    value.timestamp_micros() - PG_EPOCH_UNIX_SECS * 1_000_000
}

pub(crate) fn days_to_date(days: i32) -> Result<NaiveDate, BoxError> {
    if days == i32::MAX || days == i32::MIN {
        return Err("infinite dates are not supported".into());
    }

    days.checked_add(PG_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| format!("date out of range: {}", days).into())
}

#[cfg(test)]
pub(crate) fn date_to_days(value: &NaiveDate) -> i32 {
    use chrono::Datelike;
    value.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE
}

/// `date`
impl PgDecode for NaiveDate {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        days_to_date(types::date_from_sql(raw)?)
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        Ok(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?)
    }
}

/// `timestamp`
impl PgDecode for NaiveDateTime {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        micros_to_datetime(types::timestamp_from_sql(raw)?).map(|dt| dt.naive_utc())
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        Ok(NaiveDateTime::parse_from_str(
            raw.trim(),
            "%Y-%m-%d %H:%M:%S%.f",
        )?)
    }
}

/// `timestamptz`. The server sends text in the session time zone, with an
/// offset that may omit minutes (`+00`).
impl PgDecode for DateTime<Utc> {
    fn decode_binary(raw: &[u8]) -> Result<Self, BoxError> {
        micros_to_datetime(types::timestamp_from_sql(raw)?)
    }

    fn decode_text(raw: &str) -> Result<Self, BoxError> {
        let parsed = DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f%#z")?;
        Ok(parsed.with_timezone(&Utc))
    }
}
