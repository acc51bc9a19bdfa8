//! Calendar accessors on timestamps and durations.
//!
//! Timestamp accessors take an optional timezone argument. Fixed numeric
//! offsets (`"+01:00"`, `"-0800"`, `"+2"`) and `"UTC"` are supported; named
//! IANA zones are rejected with a conversion error.

use chrono::{DateTime, Datelike, FixedOffset, TimeDelta, Timelike};

use crate::{
    error::RuntimeError,
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_string},
    types::CelType,
    value::Value,
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    register_timestamp_accessor(registry, "getFullYear", "year", |t| i64::from(t.year()));
    // getMonth is zero-based (January == 0), matching the catalogue.
    register_timestamp_accessor(registry, "getMonth", "month", |t| i64::from(t.month0()));
    register_timestamp_accessor(registry, "getDate", "day_of_month_1_based", |t| i64::from(t.day()));
    register_timestamp_accessor(registry, "getDayOfMonth", "day_of_month_0_based", |t| i64::from(t.day0()));
    register_timestamp_accessor(registry, "getDayOfWeek", "day_of_week", |t| {
        i64::from(t.weekday().num_days_from_sunday())
    });
    register_timestamp_accessor(registry, "getDayOfYear", "day_of_year", |t| i64::from(t.ordinal0()));

    register_split_accessor(
        registry,
        "getHours",
        "hours",
        |t| i64::from(t.hour()),
        |d| d.num_hours(),
    );
    register_split_accessor(
        registry,
        "getMinutes",
        "minutes",
        |t| i64::from(t.minute()),
        TimeDelta::num_minutes,
    );
    register_split_accessor(
        registry,
        "getSeconds",
        "seconds",
        |t| i64::from(t.second()),
        TimeDelta::num_seconds,
    );
    register_split_accessor(
        registry,
        "getMilliseconds",
        "milliseconds",
        |t| i64::from(t.timestamp_subsec_millis()),
        TimeDelta::num_milliseconds,
    );
}

type TimestampAccessor = fn(&DateTime<FixedOffset>) -> i64;

/// Registers a timestamp-only accessor with and without a timezone argument.
fn register_timestamp_accessor(registry: &mut FunctionRegistry, name: &str, id_suffix: &str, get: TimestampAccessor) {
    use CelType::{Int, String as Str, Timestamp};
    registry.add(
        FunctionDecl::new(name)
            .overload(
                Overload::member(&format!("timestamp_to_{id_suffix}"), vec![Timestamp], Int)
                    .with_impl(move |a| timestamp_field(&a[0], None, get)),
            )
            .overload(
                Overload::member(&format!("timestamp_to_{id_suffix}_with_tz"), vec![Timestamp, Str], Int)
                    .with_impl(move |a| timestamp_field(&a[0], Some(want_string(&a[1])?), get)),
            ),
    );
}

/// Registers an accessor that exists on timestamps (field component) and on
/// durations (whole-unit total).
fn register_split_accessor(
    registry: &mut FunctionRegistry,
    name: &str,
    id_suffix: &str,
    get: TimestampAccessor,
    duration_total: fn(&TimeDelta) -> i64,
) {
    use CelType::{Duration, Int, String as Str, Timestamp};
    registry.add(
        FunctionDecl::new(name)
            .overload(
                Overload::member(&format!("timestamp_to_{id_suffix}"), vec![Timestamp], Int)
                    .with_impl(move |a| timestamp_field(&a[0], None, get)),
            )
            .overload(
                Overload::member(&format!("timestamp_to_{id_suffix}_with_tz"), vec![Timestamp, Str], Int)
                    .with_impl(move |a| timestamp_field(&a[0], Some(want_string(&a[1])?), get)),
            )
            .overload(
                Overload::member(&format!("duration_to_{id_suffix}"), vec![Duration], Int).with_impl(move |a| {
                    match &a[0] {
                        Value::Duration(d) => Ok(Value::Int(duration_total(d))),
                        other => Err(RuntimeError::type_mismatch(format!(
                            "expected duration, found {}",
                            other.type_name()
                        ))),
                    }
                }),
            ),
    );
}

fn timestamp_field(v: &Value, tz: Option<&str>, get: TimestampAccessor) -> Result<Value, RuntimeError> {
    let Value::Timestamp(t) = v else {
        return Err(RuntimeError::type_mismatch(format!(
            "expected timestamp, found {}",
            v.type_name()
        )));
    };
    let offset = match tz {
        Some(tz) => parse_timezone(tz)?,
        None => FixedOffset::east_opt(0).expect("zero offset"),
    };
    Ok(Value::Int(get(&t.with_timezone(&offset))))
}

/// Parses `UTC`, `Z`, `±H`, `±HH`, `±HHMM`, or `±HH:MM`.
fn parse_timezone(tz: &str) -> Result<FixedOffset, RuntimeError> {
    if tz == "UTC" || tz == "Z" || tz == "z" {
        return Ok(FixedOffset::east_opt(0).expect("zero offset"));
    }
    let bad = || RuntimeError::conversion(format!("unsupported timezone {tz:?} (use a fixed offset or UTC)"));
    let (sign, body) = match tz.as_bytes().first() {
        Some(b'+') => (1i32, &tz[1..]),
        Some(b'-') => (-1i32, &tz[1..]),
        _ => return Err(bad()),
    };
    let (hours, minutes) = match body.split_once(':') {
        Some((h, m)) => (h, m),
        None if body.len() > 2 => body.split_at(body.len() - 2),
        None => (body, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| bad())?;
    let minutes: i32 = minutes.parse().map_err(|_| bad())?;
    if hours > 18 || minutes > 59 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ts(s: &str) -> Value {
        Value::Timestamp(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
    }

    #[test]
    fn calendar_fields() {
        let t = ts("2009-02-13T23:31:30Z");
        let year = timestamp_field(&t, None, |t| i64::from(t.year())).unwrap();
        assert!(matches!(year, Value::Int(2009)));
        let month = timestamp_field(&t, None, |t| i64::from(t.month0())).unwrap();
        assert!(matches!(month, Value::Int(1)));
        let dow = timestamp_field(&t, None, |t| i64::from(t.weekday().num_days_from_sunday())).unwrap();
        assert!(matches!(dow, Value::Int(5)));
    }

    #[test]
    fn timezone_shifts_fields() {
        let t = ts("2009-02-13T23:31:30Z");
        let hour_utc = timestamp_field(&t, None, |t| i64::from(t.hour())).unwrap();
        assert!(matches!(hour_utc, Value::Int(23)));
        let hour_east = timestamp_field(&t, Some("+01:00"), |t| i64::from(t.hour())).unwrap();
        assert!(matches!(hour_east, Value::Int(0)));
        assert!(timestamp_field(&t, Some("America/New_York"), |t| i64::from(t.hour())).is_err());
    }

    #[test]
    fn duration_totals() {
        let d = Value::Duration(TimeDelta::seconds(3 * 3600 + 25 * 60 + 9));
        match &d {
            Value::Duration(delta) => {
                assert_eq!(delta.num_hours(), 3);
                assert_eq!(delta.num_minutes(), 205);
            }
            _ => unreachable!(),
        }
    }
}
