//! Typed event payloads.
//!
//! Producers store a loosely-typed JSON object in the queue row. Each
//! notification type only cares about a subset of it; this module extracts
//! that subset into a typed value so delivery never has to poke at raw JSON.
//!
//! Only the event date is required. Every other field is display-only, so a
//! malformed one is logged and left out of the message instead of failing the
//! notification.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::kind::NotificationType;

/// Payload extraction failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl PayloadError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// `newRace`: a race result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceResult {
    pub race_date: NaiveDate,
    pub position: Option<u32>,
    pub city: Option<String>,
    pub distance: Option<u32>,
    pub prize_money: Option<f64>,
}

/// `horseRegistered`: entry for an upcoming race.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub race_date: NaiveDate,
    pub city: Option<String>,
    pub distance: Option<u32>,
}

/// `horseDeclared`: declared starter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Declaration {
    pub declaration_date: Option<NaiveDate>,
    pub race_date: NaiveDate,
    pub city: Option<String>,
    pub distance: Option<u32>,
    pub jockey_name: Option<String>,
}

/// `newTraining`: recorded training session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Training {
    pub training_date: NaiveDate,
    pub racecourse: Option<String>,
    pub distances: Vec<String>,
}

/// Event-specific payload, one variant per [`NotificationType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotificationPayload {
    NewRace(RaceResult),
    HorseRegistered(Registration),
    HorseDeclared(Declaration),
    NewTraining(Training),
}

impl NotificationPayload {
    /// Extract the payload for `kind` from the raw queue `data`.
    pub fn from_data(kind: NotificationType, data: &Value) -> Result<Self, PayloadError> {
        let obj = data.as_object().ok_or(PayloadError::NotAnObject)?;

        let payload = match kind {
            NotificationType::NewRace => NotificationPayload::NewRace(RaceResult {
                race_date: required_date(obj, "raceDate")?,
                position: optional_u32(obj, "position"),
                city: optional_text(obj, "city"),
                distance: optional_u32(obj, "distance"),
                prize_money: optional_amount(obj, "prizeMoney"),
            }),
            NotificationType::HorseRegistered => {
                NotificationPayload::HorseRegistered(Registration {
                    race_date: required_date(obj, "raceDate")?,
                    city: optional_text(obj, "city"),
                    distance: optional_u32(obj, "distance"),
                })
            }
            NotificationType::HorseDeclared => NotificationPayload::HorseDeclared(Declaration {
                declaration_date: optional_date(obj, "declarationDate"),
                race_date: required_date(obj, "raceDate")?,
                city: optional_text(obj, "city"),
                distance: optional_u32(obj, "distance"),
                jockey_name: optional_text(obj, "jockeyName"),
            }),
            NotificationType::NewTraining => NotificationPayload::NewTraining(Training {
                training_date: required_date(obj, "trainingDate")?,
                racecourse: optional_text(obj, "racecourse"),
                distances: text_list(obj, "distances"),
            }),
        };

        Ok(payload)
    }

    pub fn kind(&self) -> NotificationType {
        match self {
            NotificationPayload::NewRace(_) => NotificationType::NewRace,
            NotificationPayload::HorseRegistered(_) => NotificationType::HorseRegistered,
            NotificationPayload::HorseDeclared(_) => NotificationType::HorseDeclared,
            NotificationPayload::NewTraining(_) => NotificationType::NewTraining,
        }
    }
}

/// Present and not JSON `null`.
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

/// Optional fields are display-only: a malformed one is dropped, never fatal.
fn lenient<T>(name: &'static str, parsed: Result<Option<T>, PayloadError>) -> Option<T> {
    parsed.unwrap_or_else(|e| {
        warn!(field = name, error = %e, "ignoring malformed optional payload field");
        None
    })
}

fn required_date(obj: &Map<String, Value>, name: &'static str) -> Result<NaiveDate, PayloadError> {
    let value = field(obj, name).ok_or(PayloadError::MissingField(name))?;
    parse_date(name, value)
}

fn optional_date(obj: &Map<String, Value>, name: &'static str) -> Option<NaiveDate> {
    lenient(name, field(obj, name).map(|v| parse_date(name, v)).transpose())
}

// Producers serialize dates either as `YYYY-MM-DD` or as full ISO timestamps.
// Timestamps are read in Türkiye time (fixed UTC+3) so a local midnight stored
// as 21:00Z keeps its calendar day.
fn parse_date(name: &'static str, value: &Value) -> Result<NaiveDate, PayloadError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PayloadError::invalid(name, "expected a date string"))?
        .trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }

    let turkey = FixedOffset::east_opt(3 * 3600)
        .ok_or_else(|| PayloadError::invalid(name, "invalid timezone offset"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&turkey).date_naive())
        .map_err(|e| PayloadError::invalid(name, e.to_string()))
}

fn optional_text(obj: &Map<String, Value>, name: &'static str) -> Option<String> {
    let parsed = match field(obj, name) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(PayloadError::invalid(name, "expected text")),
    };
    lenient(name, parsed)
}

/// Whole number, optionally written with a meter suffix (`"1400"`, `"1400m"`, `"1400 m"`).
fn optional_u32(obj: &Map<String, Value>, name: &'static str) -> Option<u32> {
    let parsed = match field(obj, name) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| PayloadError::invalid(name, format!("not a non-negative integer: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .trim_end_matches(['m', 'M'])
            .trim_end()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| PayloadError::invalid(name, e.to_string())),
        Some(_) => Err(PayloadError::invalid(name, "expected an integer")),
    };
    lenient(name, parsed)
}

fn optional_amount(obj: &Map<String, Value>, name: &'static str) -> Option<f64> {
    let non_negative = |v: f64| v.is_finite() && v >= 0.0;
    let parsed = match field(obj, name) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| non_negative(*v))
            .map(Some)
            .ok_or_else(|| PayloadError::invalid(name, format!("not a non-negative amount: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_amount(s)
            .filter(|v| non_negative(*v))
            .map(Some)
            .ok_or_else(|| PayloadError::invalid(name, format!("unrecognized amount: {s:?}"))),
        Some(_) => Err(PayloadError::invalid(name, "expected an amount")),
    };
    lenient(name, parsed)
}

/// Amount text as producers write it.
///
/// `"150.000"`, `"1.250.000,50"` and `"150.000 TL"` use Turkish grouping (`.`
/// thousands, `,` decimals). Anything else must be a plain decimal such as
/// `"125000.5"`.
fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let raw = raw
        .strip_suffix("TL")
        .or_else(|| raw.strip_suffix('₺'))
        .unwrap_or(raw)
        .trim_end();

    let (whole, fraction) = match raw.split_once(',') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (raw, None),
    };
    let groups: Vec<&str> = whole.split('.').collect();
    let grouped = groups.len() > 1
        && (1..=3).contains(&groups[0].len())
        && groups[1..].iter().all(|g| g.len() == 3);
    let digits_only = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if grouped || fraction.is_some() {
        if !groups.iter().all(|g| digits_only(g)) || (!grouped && groups.len() > 1) {
            return None;
        }
        let mut normalized = groups.concat();
        if let Some(fraction) = fraction {
            if !digits_only(fraction) {
                return None;
            }
            normalized.push('.');
            normalized.push_str(fraction);
        }
        return normalized.parse().ok();
    }

    let plain = raw.strip_prefix('-').unwrap_or(raw);
    let valid = plain.split_once('.').map_or(digits_only(plain), |(w, f)| {
        digits_only(w) && digits_only(f)
    });
    if valid { raw.parse().ok() } else { None }
}

/// Missing or malformed lists read as empty; malformed items are dropped.
fn text_list(obj: &Map<String, Value>, name: &'static str) -> Vec<String> {
    match field(obj, name) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                other => lenient::<String>(
                    name,
                    Err(PayloadError::invalid(name, format!("unexpected list item: {other}"))),
                ),
            })
            .collect(),
        Some(_) => {
            warn!(field = name, "ignoring malformed optional payload field: expected a list");
            Vec::new()
        }
    }
}
