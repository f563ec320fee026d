//! Write-value parser
//!
//! Turns the textual value handed to a write into a [`PropertyValue`] of the
//! property's datatype:
//!
//! - `"null"` always encodes Null (relinquish a priority slot)
//! - ambiguous (`AnyAtomic`) properties take a tagged `"<code>:<payload>"`
//!   form, e.g. `"u:7"`, `"r:21.5"`, `"c:Lobby"`
//! - everything else is parsed as a literal of the resolved type
//!
//! Nothing here touches the link; a parse failure never reaches the wire.

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::datatype::Datatype;
use crate::error::{ClientError, ClientResult};
use crate::types::{fold_name, ObjectIdentifier, ObjectType, MAX_INSTANCE};
use crate::value::{BitString, Date, PropertyValue, Time, UNSPECIFIED};

/// Type codes accepted in the tagged form
const TAG_CODES: &[(&str, Datatype)] = &[
    ("b", Datatype::Boolean),
    ("u", Datatype::Unsigned),
    ("i", Datatype::Signed),
    ("r", Datatype::Real),
    ("d", Datatype::Double),
    ("o", Datatype::OctetString),
    ("c", Datatype::CharacterString),
    ("bs", Datatype::BitString),
    ("date", Datatype::Date),
    ("time", Datatype::Time),
    ("id", Datatype::ObjectIdentifier),
];

/// Parse `value` for a property of `datatype`, optionally at an array index
pub fn parse_write_value(value: &str, datatype: &Datatype, index: Option<u32>) -> ClientResult<PropertyValue> {
    if value == "null" {
        return Ok(PropertyValue::Null);
    }

    match (datatype, index) {
        (Datatype::Array(_), Some(0)) => parse_literal(value, &Datatype::Unsigned),
        (Datatype::Array(element), Some(_)) => parse_scalar(value, element),
        (Datatype::Array(_), None) => Err(cast_error(format!(
            "{} can only be written one element at a time; give an array index",
            datatype
        ))),
        (scalar, _) => parse_scalar(value, scalar),
    }
}

fn parse_scalar(value: &str, datatype: &Datatype) -> ClientResult<PropertyValue> {
    match datatype {
        Datatype::AnyAtomic => parse_tagged(value),
        _ => parse_literal(value, datatype),
    }
}

/// Parse the `"<code>:<payload>"` form
fn parse_tagged(value: &str) -> ClientResult<PropertyValue> {
    let (code, payload) = value
        .split_once(':')
        .ok_or_else(|| cast_error(format!("expected '<code>:<value>' for an untyped property, got {:?}", value)))?;
    let datatype = TAG_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, datatype)| datatype)
        .ok_or_else(|| cast_error(format!("unknown type code {:?}", code)))?;
    parse_literal(payload, datatype)
}

/// Parse a bare literal as `datatype`
fn parse_literal(raw: &str, datatype: &Datatype) -> ClientResult<PropertyValue> {
    let text = raw.trim();
    let invalid = || cast_error(format!("{:?} is not a valid {}", raw, datatype));

    match datatype {
        Datatype::Null => match text {
            "null" | "" => Ok(PropertyValue::Null),
            _ => Err(invalid()),
        },
        Datatype::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "active" => Ok(PropertyValue::Boolean(true)),
            "false" | "0" | "off" | "inactive" => Ok(PropertyValue::Boolean(false)),
            _ => Err(invalid()),
        },
        Datatype::Unsigned => text.parse().map(PropertyValue::Unsigned).map_err(|_| invalid()),
        Datatype::Signed => text.parse().map(PropertyValue::Signed).map_err(|_| invalid()),
        Datatype::Real => text.parse().map(PropertyValue::Real).map_err(|_| invalid()),
        Datatype::Double => text.parse().map(PropertyValue::Double).map_err(|_| invalid()),
        // Kept verbatim; leading/trailing spaces are part of the string
        Datatype::CharacterString => Ok(PropertyValue::CharacterString(raw.to_string())),
        Datatype::OctetString => parse_hex(text).map(PropertyValue::OctetString).ok_or_else(invalid),
        Datatype::BitString => parse_bits(text).map(PropertyValue::BitString).ok_or_else(invalid),
        Datatype::Enumerated(names) => {
            if let Ok(number) = text.parse::<u32>() {
                return Ok(PropertyValue::Enumerated(number));
            }
            let folded = fold_name(text);
            names
                .iter()
                .position(|name| fold_name(name) == folded)
                .map(|position| PropertyValue::Enumerated(position as u32))
                .ok_or_else(invalid)
        }
        Datatype::Date => parse_date(text).map(PropertyValue::Date).ok_or_else(invalid),
        Datatype::Time => parse_time(text).map(PropertyValue::Time).ok_or_else(invalid),
        Datatype::ObjectIdentifier => parse_object_identifier(text)
            .map(PropertyValue::ObjectIdentifier)
            .ok_or_else(invalid),
        Datatype::AnyAtomic | Datatype::Array(_) => Err(invalid()),
    }
}

fn cast_error(message: String) -> ClientError {
    ClientError::Cast(message)
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if digits.len() % 2 != 0 || !digits.is_ascii() {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

/// `"0101"`, `"0,1,0,1"` or `"[0, 1, 0, 1]"`
fn parse_bits(text: &str) -> Option<BitString> {
    text.chars()
        .filter(|c| !matches!(c, '[' | ']' | ',' | ' '))
        .map(|c| match c {
            '0' => Some(false),
            '1' => Some(true),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(BitString)
}

/// `YYYY-MM-DD`, with `*` allowed for any field
fn parse_date(text: &str) -> Option<Date> {
    if !text.contains('*') {
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        return Date::from_ymd(date);
    }

    let mut parts = text.split('-');
    let year = match parts.next()? {
        "*" => UNSPECIFIED,
        year => u8::try_from(year.parse::<i32>().ok()? - 1900).ok()?,
    };
    let month = wildcard_field(parts.next()?, 1..=12)?;
    let day = wildcard_field(parts.next()?, 1..=31)?;
    if parts.next().is_some() {
        return None;
    }

    // Weekday is only known when the date is fully specified
    Some(Date {
        year,
        month,
        day,
        weekday: UNSPECIFIED,
    })
}

/// `HH:MM`, `HH:MM:SS` or `HH:MM:SS.ff`, with `*` allowed for any field
fn parse_time(text: &str) -> Option<Time> {
    if !text.contains('*') {
        let time = NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
            .ok()?;
        return Some(Time {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            hundredths: (time.nanosecond() / 10_000_000).min(99) as u8,
        });
    }

    let (clock, hundredths) = match text.split_once('.') {
        Some((clock, fraction)) => (clock, wildcard_field(fraction, 0..=99)?),
        None => (text, 0),
    };
    let mut parts = clock.split(':');
    let hour = wildcard_field(parts.next()?, 0..=23)?;
    let minute = wildcard_field(parts.next()?, 0..=59)?;
    let second = match parts.next() {
        Some(second) => wildcard_field(second, 0..=59)?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Time {
        hour,
        minute,
        second,
        hundredths,
    })
}

fn wildcard_field(part: &str, range: std::ops::RangeInclusive<u8>) -> Option<u8> {
    if part == "*" {
        return Some(UNSPECIFIED);
    }
    part.parse().ok().filter(|value| range.contains(value))
}

/// `analogInput,1` or `analogInput:1`
fn parse_object_identifier(text: &str) -> Option<ObjectIdentifier> {
    let (object_type, instance) = text.split_once(',').or_else(|| text.rsplit_once(':'))?;
    let object_type = ObjectType::from_name(object_type.trim())?;
    let instance = instance.trim().parse().ok().filter(|i| *i <= MAX_INSTANCE)?;
    Some(ObjectIdentifier::new(object_type, instance))
}
