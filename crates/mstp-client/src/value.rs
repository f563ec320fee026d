//! Application-tagged property values
//!
//! Encoding and type-directed decoding of BACnet primitive application tags
//! (Null through ObjectIdentifier), plus conversion of decoded values to JSON
//! for structured output.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::json;

use crate::datatype::Datatype;
use crate::types::ObjectIdentifier;

/// Application tag numbers
mod tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const UNSIGNED: u8 = 2;
    pub const SIGNED: u8 = 3;
    pub const REAL: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const OCTET_STRING: u8 = 6;
    pub const CHARACTER_STRING: u8 = 7;
    pub const BIT_STRING: u8 = 8;
    pub const ENUMERATED: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const OBJECT_IDENTIFIER: u8 = 12;
}

/// Character set code for UTF-8 (ANSI X3.4)
const CHARSET_UTF8: u8 = 0;

/// Octet value marking an unspecified date/time field
pub const UNSPECIFIED: u8 = 255;

/// Errors decoding application-tagged data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of data")]
    Truncated,

    #[error("Context-specific tag {0} where an application tag was expected")]
    ContextTag(u8),

    #[error("Unknown application tag {0}")]
    UnknownTag(u8),

    #[error("Invalid length {len} for {what}")]
    InvalidLength { what: &'static str, len: usize },

    #[error("Unsupported character set {0}")]
    Charset(u8),

    #[error("Character string is not valid UTF-8")]
    InvalidUtf8,

    #[error("Expected {expected}, found {found}")]
    UnexpectedTag { expected: String, found: &'static str },

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

// ─────────────────────────────────────────────────────────────────────────────
// Date / Time / BitString
// ─────────────────────────────────────────────────────────────────────────────

/// BACnet date; 255 in any octet means "unspecified"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    /// Years since 1900
    pub year: u8,
    pub month: u8,
    pub day: u8,
    /// 1 = Monday .. 7 = Sunday
    pub weekday: u8,
}

impl Date {
    pub fn from_ymd(date: chrono::NaiveDate) -> Option<Self> {
        use chrono::Datelike;
        let year = u8::try_from(date.year() - 1900).ok().filter(|y| *y != UNSPECIFIED)?;
        Some(Self {
            year,
            month: date.month() as u8,
            day: date.day() as u8,
            weekday: date.weekday().number_from_monday() as u8,
        })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.year == UNSPECIFIED {
            f.write_str("*")?;
        } else {
            write!(f, "{}", 1900 + u16::from(self.year))?;
        }
        for part in [self.month, self.day] {
            if part == UNSPECIFIED {
                f.write_str("-*")?;
            } else {
                write!(f, "-{:02}", part)?;
            }
        }
        Ok(())
    }
}

/// BACnet time of day; 255 in any octet means "unspecified"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [self.hour, self.minute, self.second, self.hundredths];
        for (i, part) in parts.iter().enumerate() {
            let sep = match i {
                0 => "",
                3 => ".",
                _ => ":",
            };
            f.write_str(sep)?;
            if *part == UNSPECIFIED {
                f.write_str("*")?;
            } else {
                write!(f, "{:02}", part)?;
            }
        }
        Ok(())
    }
}

/// Ordered bits, first bit first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitString(pub Vec<bool>);

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.0 {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PropertyValue
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectIdentifier(ObjectIdentifier),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Short name of the value's own type
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::Unsigned(_) => "Unsigned",
            PropertyValue::Signed(_) => "Integer",
            PropertyValue::Real(_) => "Real",
            PropertyValue::Double(_) => "Double",
            PropertyValue::OctetString(_) => "OctetString",
            PropertyValue::CharacterString(_) => "CharacterString",
            PropertyValue::BitString(_) => "BitString",
            PropertyValue::Enumerated(_) => "Enumerated",
            PropertyValue::Date(_) => "Date",
            PropertyValue::Time(_) => "Time",
            PropertyValue::ObjectIdentifier(_) => "ObjectIdentifier",
            PropertyValue::Array(_) => "Array",
        }
    }

    /// Whether this value is a valid encoding of `datatype`
    fn conforms_to(&self, datatype: &Datatype) -> bool {
        match (self, datatype) {
            (PropertyValue::Array(_), _) => false,
            (_, Datatype::AnyAtomic) => true,
            (PropertyValue::Null, Datatype::Null)
            | (PropertyValue::Boolean(_), Datatype::Boolean)
            | (PropertyValue::Unsigned(_), Datatype::Unsigned)
            | (PropertyValue::Signed(_), Datatype::Signed)
            | (PropertyValue::Real(_), Datatype::Real)
            | (PropertyValue::Double(_), Datatype::Double)
            | (PropertyValue::OctetString(_), Datatype::OctetString)
            | (PropertyValue::CharacterString(_), Datatype::CharacterString)
            | (PropertyValue::BitString(_), Datatype::BitString)
            | (PropertyValue::Enumerated(_), Datatype::Enumerated(_))
            | (PropertyValue::Date(_), Datatype::Date)
            | (PropertyValue::Time(_), Datatype::Time)
            | (PropertyValue::ObjectIdentifier(_), Datatype::ObjectIdentifier) => true,
            _ => false,
        }
    }

    /// Encode as application-tagged data (arrays encode their elements in order)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            PropertyValue::Null => buf.put_u8(tag::NULL << 4),
            PropertyValue::Boolean(b) => buf.put_u8((tag::BOOLEAN << 4) | u8::from(*b)),
            PropertyValue::Unsigned(v) => put_unsigned(buf, tag::UNSIGNED, *v),
            PropertyValue::Enumerated(v) => put_unsigned(buf, tag::ENUMERATED, u64::from(*v)),
            PropertyValue::Signed(v) => {
                let width = signed_width(*v);
                put_header(buf, tag::SIGNED, width);
                buf.put_slice(&v.to_be_bytes()[8 - width..]);
            }
            PropertyValue::Real(v) => {
                put_header(buf, tag::REAL, 4);
                buf.put_f32(*v);
            }
            PropertyValue::Double(v) => {
                put_header(buf, tag::DOUBLE, 8);
                buf.put_f64(*v);
            }
            PropertyValue::OctetString(octets) => {
                put_header(buf, tag::OCTET_STRING, octets.len());
                buf.put_slice(octets);
            }
            PropertyValue::CharacterString(s) => {
                put_header(buf, tag::CHARACTER_STRING, s.len() + 1);
                buf.put_u8(CHARSET_UTF8);
                buf.put_slice(s.as_bytes());
            }
            PropertyValue::BitString(bits) => {
                let octets = bits.0.len().div_ceil(8);
                let unused = (octets * 8 - bits.0.len()) as u8;
                put_header(buf, tag::BIT_STRING, octets + 1);
                buf.put_u8(unused);
                for chunk in bits.0.chunks(8) {
                    let byte = chunk
                        .iter()
                        .enumerate()
                        .fold(0u8, |acc, (i, bit)| if *bit { acc | (0x80 >> i) } else { acc });
                    buf.put_u8(byte);
                }
            }
            PropertyValue::Date(d) => {
                put_header(buf, tag::DATE, 4);
                buf.put_slice(&[d.year, d.month, d.day, d.weekday]);
            }
            PropertyValue::Time(t) => {
                put_header(buf, tag::TIME, 4);
                buf.put_slice(&[t.hour, t.minute, t.second, t.hundredths]);
            }
            PropertyValue::ObjectIdentifier(id) => {
                put_header(buf, tag::OBJECT_IDENTIFIER, 4);
                buf.put_u32(id.to_raw());
            }
            PropertyValue::Array(items) => {
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }

    /// Decode `data` as a value of `datatype`
    ///
    /// Arrays decode every element as the element type. Scalars must consume
    /// the whole buffer.
    pub fn decode(data: &[u8], datatype: &Datatype) -> Result<Self, DecodeError> {
        let mut buf = data;
        if let Datatype::Array(element) = datatype {
            let mut items = Vec::new();
            while buf.has_remaining() {
                items.push(decode_expected(&mut buf, element)?);
            }
            return Ok(PropertyValue::Array(items));
        }

        let value = decode_expected(&mut buf, datatype)?;
        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }
        Ok(value)
    }

    /// Convert to JSON for structured output
    ///
    /// Named enumerations render as their names. Values JSON cannot carry
    /// (non-finite reals) fall back to their string form.
    pub fn to_json(&self, datatype: &Datatype) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Boolean(b) => json!(b),
            PropertyValue::Unsigned(v) => json!(v),
            PropertyValue::Signed(v) => json!(v),
            // Go through the shortest decimal form so 0.1f32 stays 0.1
            PropertyValue::Real(v) => float_json(v.to_string().parse().unwrap_or(f64::from(*v)), v),
            PropertyValue::Double(v) => float_json(*v, v),
            PropertyValue::OctetString(octets) => {
                json!(octets.iter().map(|b| format!("{:02x}", b)).collect::<String>())
            }
            PropertyValue::CharacterString(s) => json!(s),
            PropertyValue::BitString(bits) => json!(bits.0.iter().map(|b| u8::from(*b)).collect::<Vec<_>>()),
            PropertyValue::Enumerated(v) => match datatype {
                Datatype::Enumerated(names) => match names.get(*v as usize) {
                    Some(name) => json!(name),
                    None => json!(v),
                },
                _ => json!(v),
            },
            PropertyValue::Date(d) => json!(d.to_string()),
            PropertyValue::Time(t) => json!(t.to_string()),
            PropertyValue::ObjectIdentifier(id) => json!([id.object_type.to_string(), id.instance]),
            PropertyValue::Array(items) => {
                let element = datatype.element().unwrap_or(Datatype::AnyAtomic);
                serde_json::Value::Array(items.iter().map(|item| item.to_json(&element)).collect())
            }
        }
    }
}

fn float_json(value: f64, original: &dyn fmt::Display) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| json!(original.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn put_header(buf: &mut BytesMut, number: u8, len: usize) {
    if len <= 4 {
        buf.put_u8((number << 4) | len as u8);
        return;
    }
    buf.put_u8((number << 4) | 5);
    if len <= 253 {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(254);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(255);
        buf.put_u32(len as u32);
    }
}

fn put_unsigned(buf: &mut BytesMut, number: u8, value: u64) {
    let width = ((64 - value.leading_zeros() as usize) + 7) / 8;
    let width = width.max(1);
    put_header(buf, number, width);
    buf.put_slice(&value.to_be_bytes()[8 - width..]);
}

/// Smallest two's-complement width holding `value`
fn signed_width(value: i64) -> usize {
    (1..=8)
        .find(|width| {
            let bits = width * 8 - 1;
            let min = -(1i128 << bits);
            let max = (1i128 << bits) - 1;
            (min..=max).contains(&i128::from(value))
        })
        .unwrap_or(8)
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn decode_expected(buf: &mut &[u8], datatype: &Datatype) -> Result<PropertyValue, DecodeError> {
    let value = decode_one(buf)?;
    if value.conforms_to(datatype) {
        Ok(value)
    } else {
        Err(DecodeError::UnexpectedTag {
            expected: datatype.to_string(),
            found: value.type_name(),
        })
    }
}

/// Decode the next application-tagged value, whatever its tag
fn decode_one(buf: &mut &[u8]) -> Result<PropertyValue, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::Truncated);
    }
    let header = buf.get_u8();
    let mut number = header >> 4;
    if header & 0x08 != 0 {
        return Err(DecodeError::ContextTag(number));
    }
    if number == 0x0F {
        number = take_u8(buf)?;
    }
    let lvt = header & 0x07;

    if number == tag::BOOLEAN {
        return match lvt {
            0 => Ok(PropertyValue::Boolean(false)),
            1 => Ok(PropertyValue::Boolean(true)),
            other => Err(DecodeError::InvalidLength {
                what: "Boolean",
                len: other as usize,
            }),
        };
    }

    let len = match lvt {
        0..=4 => lvt as usize,
        5 => match take_u8(buf)? {
            254 => take(buf, 2)?.get_u16() as usize,
            255 => take(buf, 4)?.get_u32() as usize,
            len => len as usize,
        },
        _ => return Err(DecodeError::UnknownTag(number)),
    };
    let mut content = take(buf, len)?;

    match number {
        tag::NULL => expect_len("Null", len, |l| l == 0).map(|_| PropertyValue::Null),
        tag::UNSIGNED => {
            expect_len("Unsigned", len, |l| (1..=8).contains(&l))?;
            Ok(PropertyValue::Unsigned(be_unsigned(content)))
        }
        tag::ENUMERATED => {
            expect_len("Enumerated", len, |l| (1..=4).contains(&l))?;
            Ok(PropertyValue::Enumerated(be_unsigned(content) as u32))
        }
        tag::SIGNED => {
            expect_len("Integer", len, |l| (1..=8).contains(&l))?;
            let shift = 64 - 8 * len as u32;
            Ok(PropertyValue::Signed(((be_unsigned(content) << shift) as i64) >> shift))
        }
        tag::REAL => {
            expect_len("Real", len, |l| l == 4)?;
            Ok(PropertyValue::Real(content.get_f32()))
        }
        tag::DOUBLE => {
            expect_len("Double", len, |l| l == 8)?;
            Ok(PropertyValue::Double(content.get_f64()))
        }
        tag::OCTET_STRING => Ok(PropertyValue::OctetString(content.to_vec())),
        tag::CHARACTER_STRING => {
            expect_len("CharacterString", len, |l| l >= 1)?;
            let charset = content.get_u8();
            if charset != CHARSET_UTF8 {
                return Err(DecodeError::Charset(charset));
            }
            String::from_utf8(content.to_vec())
                .map(PropertyValue::CharacterString)
                .map_err(|_| DecodeError::InvalidUtf8)
        }
        tag::BIT_STRING => {
            expect_len("BitString", len, |l| l >= 1)?;
            let unused = content.get_u8() as usize;
            let total = content.len() * 8;
            if unused > 7 || unused > total {
                return Err(DecodeError::InvalidLength {
                    what: "BitString",
                    len,
                });
            }
            let bits = content
                .iter()
                .flat_map(|byte| (0..8).map(move |i| byte & (0x80 >> i) != 0))
                .take(total - unused)
                .collect();
            Ok(PropertyValue::BitString(BitString(bits)))
        }
        tag::DATE => {
            expect_len("Date", len, |l| l == 4)?;
            Ok(PropertyValue::Date(Date {
                year: content[0],
                month: content[1],
                day: content[2],
                weekday: content[3],
            }))
        }
        tag::TIME => {
            expect_len("Time", len, |l| l == 4)?;
            Ok(PropertyValue::Time(Time {
                hour: content[0],
                minute: content[1],
                second: content[2],
                hundredths: content[3],
            }))
        }
        tag::OBJECT_IDENTIFIER => {
            expect_len("ObjectIdentifier", len, |l| l == 4)?;
            Ok(PropertyValue::ObjectIdentifier(ObjectIdentifier::from_raw(content.get_u32())))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    if buf.has_remaining() {
        Ok(buf.get_u8())
    } else {
        Err(DecodeError::Truncated)
    }
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Truncated);
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn expect_len(what: &'static str, len: usize, ok: impl Fn(usize) -> bool) -> Result<(), DecodeError> {
    if ok(len) {
        Ok(())
    } else {
        Err(DecodeError::InvalidLength { what, len })
    }
}

fn be_unsigned(content: &[u8]) -> u64 {
    content.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
