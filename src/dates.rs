use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("unknown IANA timezone `{0}`")]
    UnknownTimezone(String),
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Parses an IANA zone name. Unknown names are an error, never a silent fallback.
pub fn parse_timezone(name: &str) -> Result<Tz, DateError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| DateError::UnknownTimezone(name.to_string()))
}

/// The zone the host resolves to. Falls back to UTC only when the host cannot
/// report one at all.
pub fn host_timezone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(zone = %name, "host reported an unknown timezone, using UTC");
                Tz::UTC
            }
        },
        Err(err) => {
            warn!("failed to resolve host timezone: {err}; using UTC");
            Tz::UTC
        }
    }
}

pub fn resolve_timezone(name: Option<&str>) -> Result<Tz, DateError> {
    match name {
        Some(name) if !name.trim().is_empty() => parse_timezone(name),
        _ => Ok(host_timezone()),
    }
}

/// Calendar date observed in `tz` at `instant`.
pub fn date_at(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

pub fn today_at(instant: DateTime<Utc>, tz: Tz) -> String {
    date_key(date_at(instant, tz))
}

pub fn yesterday_at(instant: DateTime<Utc>, tz: Tz) -> String {
    date_key(date_at(instant, tz) - Duration::days(1))
}

pub fn today(tz: Tz) -> String {
    today_at(Utc::now(), tz)
}

/// `today` for an optional zone name, defaulting to the host zone.
pub fn today_in(timezone: Option<&str>) -> Result<String, DateError> {
    Ok(today(resolve_timezone(timezone)?))
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(value: &str) -> Result<NaiveDate, DateError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| DateError::InvalidDate(value.to_string()))
}
