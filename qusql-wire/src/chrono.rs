//! Contains conversions between chrono types and [DateTime] and [Time]
use std::borrow::Cow;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::{
    decode::{FromValue, type_error},
    package_parser::{DecodeError, DecodeResult},
    param::{BindError, Param},
    temporal::{DateTime, Time},
    value::{Value, ValueKind},
};

impl TryFrom<NaiveDateTime> for DateTime {
    type Error = BindError;

    fn try_from(v: NaiveDateTime) -> Result<Self, Self::Error> {
        Ok(DateTime::date(
            v.year().try_into()?,
            v.month() as u8,
            v.day() as u8,
        )
        .with_time(
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1000,
        ))
    }
}

impl TryFrom<NaiveDate> for DateTime {
    type Error = BindError;

    fn try_from(v: NaiveDate) -> Result<Self, Self::Error> {
        Ok(DateTime::date(
            v.year().try_into()?,
            v.month() as u8,
            v.day() as u8,
        ))
    }
}

impl From<NaiveTime> for Time {
    fn from(v: NaiveTime) -> Self {
        Time::new(
            v.hour(),
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1000,
        )
    }
}

impl TryFrom<TimeDelta> for Time {
    type Error = BindError;

    fn try_from(v: TimeDelta) -> Result<Self, Self::Error> {
        let negative = v < TimeDelta::zero();
        let v = v.abs();
        let secs = v.num_seconds();
        Ok(Time {
            negative,
            hours: (secs / 3600).try_into()?,
            minutes: ((secs / 60) % 60) as u8,
            seconds: (secs % 60) as u8,
            microseconds: v.subsec_nanos().unsigned_abs() / 1000,
        })
    }
}

/// Years the server cannot store are sent as text so the server reports the error
impl From<NaiveDateTime> for Param<'_> {
    fn from(v: NaiveDateTime) -> Self {
        match DateTime::try_from(v) {
            Ok(d) => Param::DateTime(d),
            Err(_) => Param::Text(Cow::Owned(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string())),
        }
    }
}

impl From<NaiveDate> for Param<'_> {
    fn from(v: NaiveDate) -> Self {
        match DateTime::try_from(v) {
            Ok(d) => Param::DateTime(d),
            Err(_) => Param::Text(Cow::Owned(v.format("%Y-%m-%d").to_string())),
        }
    }
}

impl From<NaiveTime> for Param<'_> {
    fn from(v: NaiveTime) -> Self {
        Param::Time(v.into())
    }
}

impl From<TimeDelta> for Param<'_> {
    fn from(v: TimeDelta) -> Self {
        match Time::try_from(v) {
            Ok(t) => Param::Time(t),
            Err(_) => Param::Null,
        }
    }
}

/// Convert a [DateTime] to a calendar date, zero dates are invalid
fn naive_date(v: &DateTime) -> DecodeResult<NaiveDate> {
    NaiveDate::from_ymd_opt(v.year.into(), v.month.into(), v.day.into())
        .ok_or(DecodeError::InvalidValue)
}

impl FromValue for NaiveDateTime {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::DateTime(v) => naive_date(&v)?
                .and_hms_micro_opt(
                    v.hour.into(),
                    v.minute.into(),
                    v.second.into(),
                    v.microsecond,
                )
                .ok_or(DecodeError::InvalidValue),
            v => Err(type_error(&v, ValueKind::DateTime)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::DateTime(v) => naive_date(&v),
            v => Err(type_error(&v, ValueKind::DateTime)),
        }
    }
}

/// Only times within a day are valid, use [TimeDelta] for the full range
impl FromValue for NaiveTime {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Time(t) if t.negative || t.hours >= 24 => Err(DecodeError::OutOfRange),
            Value::Time(t) => NaiveTime::from_hms_micro_opt(
                t.hours,
                t.minutes.into(),
                t.seconds.into(),
                t.microseconds,
            )
            .ok_or(DecodeError::InvalidValue),
            v => Err(type_error(&v, ValueKind::Time)),
        }
    }
}

impl FromValue for TimeDelta {
    fn from_value(v: Value) -> DecodeResult<Self> {
        match v {
            Value::Time(t) => {
                let d = TimeDelta::hours(t.hours.into())
                    + TimeDelta::minutes(t.minutes.into())
                    + TimeDelta::seconds(t.seconds.into())
                    + TimeDelta::microseconds(t.microseconds.into());
                Ok(if t.negative { -d } else { d })
            }
            v => Err(type_error(&v, ValueKind::Time)),
        }
    }
}
