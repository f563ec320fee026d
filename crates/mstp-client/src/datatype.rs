//! Object-property datatype schema
//!
//! Maps (object type, property) to the datatype a property value is encoded
//! with, so reads can be decoded and writes encoded without guessing.

use std::fmt;

use crate::types::{ObjectType, PropertyIdentifier};

/// Datatype of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Null,
    Boolean,
    Unsigned,
    Signed,
    Real,
    Double,
    OctetString,
    CharacterString,
    BitString,
    /// Enumerated, with the names of the known values (may be empty)
    Enumerated(&'static [&'static str]),
    Date,
    Time,
    ObjectIdentifier,
    /// Any primitive value; the wire tag decides
    AnyAtomic,
    /// BACnetARRAY of the element type
    Array(&'static Datatype),
}

impl Datatype {
    /// Primitive (single application tag) datatype
    pub fn is_atomic(&self) -> bool {
        !matches!(self, Datatype::AnyAtomic | Datatype::Array(_))
    }

    /// Element type of an array datatype
    pub fn element(&self) -> Option<Datatype> {
        match self {
            Datatype::Array(element) => Some(**element),
            _ => None,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Null => f.write_str("Null"),
            Datatype::Boolean => f.write_str("Boolean"),
            Datatype::Unsigned => f.write_str("Unsigned"),
            Datatype::Signed => f.write_str("Integer"),
            Datatype::Real => f.write_str("Real"),
            Datatype::Double => f.write_str("Double"),
            Datatype::OctetString => f.write_str("OctetString"),
            Datatype::CharacterString => f.write_str("CharacterString"),
            Datatype::BitString => f.write_str("BitString"),
            Datatype::Enumerated(_) => f.write_str("Enumerated"),
            Datatype::Date => f.write_str("Date"),
            Datatype::Time => f.write_str("Time"),
            Datatype::ObjectIdentifier => f.write_str("ObjectIdentifier"),
            Datatype::AnyAtomic => f.write_str("AnyAtomic"),
            Datatype::Array(element) => write!(f, "ArrayOf({})", element),
        }
    }
}

/// BACnetBinaryPV
pub const BINARY_PV: &[&str] = &["inactive", "active"];
/// BACnetPolarity
pub const POLARITY: &[&str] = &["normal", "reverse"];
/// BACnetEventState
pub const EVENT_STATE: &[&str] = &[
    "normal",
    "fault",
    "offnormal",
    "highLimit",
    "lowLimit",
    "lifeSafetyAlarm",
];
/// BACnetReliability
pub const RELIABILITY: &[&str] = &[
    "noFaultDetected",
    "noSensor",
    "overRange",
    "underRange",
    "openLoop",
    "shortedLoop",
    "noOutput",
    "unreliableOther",
    "processError",
    "multiStateFault",
    "configurationError",
];
/// BACnetSegmentation
pub const SEGMENTATION: &[&str] = &[
    "segmentedBoth",
    "segmentedTransmit",
    "segmentedReceive",
    "noSegmentation",
];
/// BACnetDeviceStatus
pub const DEVICE_STATUS: &[&str] = &[
    "operational",
    "operationalReadOnly",
    "downloadRequired",
    "downloadInProgress",
    "nonOperational",
    "backupInProgress",
];

const ENUMERATED: Datatype = Datatype::Enumerated(&[]);
const PRIORITY_ARRAY: Datatype = Datatype::Array(&Datatype::AnyAtomic);

// Property codes used in the table below
mod prop {
    pub const ACTIVE_TEXT: u32 = 4;
    pub const APDU_TIMEOUT: u32 = 11;
    pub const APPLICATION_SOFTWARE_VERSION: u32 = 12;
    pub const COV_INCREMENT: u32 = 22;
    pub const DESCRIPTION: u32 = 28;
    pub const EVENT_STATE: u32 = 36;
    pub const FIRMWARE_REVISION: u32 = 44;
    pub const INACTIVE_TEXT: u32 = 46;
    pub const LOCAL_DATE: u32 = 56;
    pub const LOCAL_TIME: u32 = 57;
    pub const LOCATION: u32 = 58;
    pub const MAX_APDU_LENGTH_ACCEPTED: u32 = 62;
    pub const MAX_INFO_FRAMES: u32 = 63;
    pub const MAX_MASTER: u32 = 64;
    pub const MAX_PRES_VALUE: u32 = 65;
    pub const MIN_PRES_VALUE: u32 = 69;
    pub const MODEL_NAME: u32 = 70;
    pub const NUMBER_OF_APDU_RETRIES: u32 = 73;
    pub const NUMBER_OF_STATES: u32 = 74;
    pub const OBJECT_IDENTIFIER: u32 = 75;
    pub const OBJECT_LIST: u32 = 76;
    pub const OBJECT_NAME: u32 = 77;
    pub const OBJECT_TYPE: u32 = 79;
    pub const OUT_OF_SERVICE: u32 = 81;
    pub const POLARITY: u32 = 84;
    pub const PRESENT_VALUE: u32 = 85;
    pub const PRIORITY_ARRAY: u32 = 87;
    pub const PROTOCOL_VERSION: u32 = 98;
    pub const RELIABILITY: u32 = 103;
    pub const RELINQUISH_DEFAULT: u32 = 104;
    pub const RESOLUTION: u32 = 106;
    pub const SEGMENTATION_SUPPORTED: u32 = 107;
    pub const STATE_TEXT: u32 = 110;
    pub const STATUS_FLAGS: u32 = 111;
    pub const SYSTEM_STATUS: u32 = 112;
    pub const UNITS: u32 = 117;
    pub const VENDOR_IDENTIFIER: u32 = 120;
    pub const VENDOR_NAME: u32 = 121;
    pub const PROTOCOL_REVISION: u32 = 139;
    pub const DATABASE_REVISION: u32 = 155;
    pub const SCHEDULE_DEFAULT: u32 = 174;
    pub const PULSE_RATE: u32 = 186;
}

/// Datatype of `property` on objects of `object_type`, if known
pub fn property_datatype(object_type: ObjectType, property: PropertyIdentifier) -> Option<Datatype> {
    object_datatype(object_type, property.0).or_else(|| {
        // Properties every standard object carries
        object_type.name()?;
        match property.0 {
            prop::OBJECT_IDENTIFIER => Some(Datatype::ObjectIdentifier),
            prop::OBJECT_NAME => Some(Datatype::CharacterString),
            prop::OBJECT_TYPE => Some(ENUMERATED),
            prop::DESCRIPTION => Some(Datatype::CharacterString),
            _ => None,
        }
    })
}

/// Resolve names and datatype together
pub fn resolve(object_type: &str, property: &str) -> Option<(ObjectType, PropertyIdentifier, Datatype)> {
    let object_type = ObjectType::from_name(object_type)?;
    let property = PropertyIdentifier::from_name(property)?;
    let datatype = property_datatype(object_type, property)?;
    Some((object_type, property, datatype))
}

fn object_datatype(object_type: ObjectType, property: u32) -> Option<Datatype> {
    match object_type {
        ObjectType::ANALOG_INPUT => analog(property, false),
        ObjectType::ANALOG_OUTPUT | ObjectType::ANALOG_VALUE => analog(property, true),
        ObjectType::BINARY_INPUT => binary(property, true, false),
        ObjectType::BINARY_OUTPUT => binary(property, true, true),
        ObjectType::BINARY_VALUE => binary(property, false, true),
        ObjectType::MULTI_STATE_INPUT => multi_state(property, false),
        ObjectType::MULTI_STATE_OUTPUT | ObjectType::MULTI_STATE_VALUE => multi_state(property, true),
        ObjectType::ACCUMULATOR => accumulator(property),
        ObjectType::SCHEDULE => schedule(property),
        ObjectType::DEVICE => device(property),
        _ => None,
    }
}

/// statusFlags, eventState, reliability, outOfService
fn status(property: u32) -> Option<Datatype> {
    match property {
        prop::STATUS_FLAGS => Some(Datatype::BitString),
        prop::EVENT_STATE => Some(Datatype::Enumerated(EVENT_STATE)),
        prop::RELIABILITY => Some(Datatype::Enumerated(RELIABILITY)),
        prop::OUT_OF_SERVICE => Some(Datatype::Boolean),
        _ => None,
    }
}

fn analog(property: u32, commandable: bool) -> Option<Datatype> {
    match property {
        prop::PRESENT_VALUE
        | prop::COV_INCREMENT
        | prop::MIN_PRES_VALUE
        | prop::MAX_PRES_VALUE
        | prop::RESOLUTION => Some(Datatype::Real),
        prop::UNITS => Some(ENUMERATED),
        prop::PRIORITY_ARRAY if commandable => Some(PRIORITY_ARRAY),
        prop::RELINQUISH_DEFAULT if commandable => Some(Datatype::Real),
        _ => status(property),
    }
}

fn binary(property: u32, has_polarity: bool, commandable: bool) -> Option<Datatype> {
    match property {
        prop::PRESENT_VALUE => Some(Datatype::Enumerated(BINARY_PV)),
        prop::ACTIVE_TEXT | prop::INACTIVE_TEXT => Some(Datatype::CharacterString),
        prop::POLARITY if has_polarity => Some(Datatype::Enumerated(POLARITY)),
        prop::PRIORITY_ARRAY if commandable => Some(PRIORITY_ARRAY),
        prop::RELINQUISH_DEFAULT if commandable => Some(Datatype::Enumerated(BINARY_PV)),
        _ => status(property),
    }
}

fn multi_state(property: u32, commandable: bool) -> Option<Datatype> {
    match property {
        prop::PRESENT_VALUE | prop::NUMBER_OF_STATES => Some(Datatype::Unsigned),
        prop::STATE_TEXT => Some(Datatype::Array(&Datatype::CharacterString)),
        prop::PRIORITY_ARRAY if commandable => Some(PRIORITY_ARRAY),
        prop::RELINQUISH_DEFAULT if commandable => Some(Datatype::Unsigned),
        _ => status(property),
    }
}

fn accumulator(property: u32) -> Option<Datatype> {
    match property {
        prop::PRESENT_VALUE | prop::MAX_PRES_VALUE | prop::PULSE_RATE => Some(Datatype::Unsigned),
        prop::UNITS => Some(ENUMERATED),
        _ => status(property),
    }
}

fn schedule(property: u32) -> Option<Datatype> {
    match property {
        prop::PRESENT_VALUE | prop::SCHEDULE_DEFAULT => Some(Datatype::AnyAtomic),
        _ => status(property),
    }
}

fn device(property: u32) -> Option<Datatype> {
    match property {
        prop::SYSTEM_STATUS => Some(Datatype::Enumerated(DEVICE_STATUS)),
        prop::VENDOR_NAME
        | prop::MODEL_NAME
        | prop::FIRMWARE_REVISION
        | prop::APPLICATION_SOFTWARE_VERSION
        | prop::LOCATION => Some(Datatype::CharacterString),
        prop::VENDOR_IDENTIFIER
        | prop::PROTOCOL_VERSION
        | prop::PROTOCOL_REVISION
        | prop::MAX_APDU_LENGTH_ACCEPTED
        | prop::APDU_TIMEOUT
        | prop::NUMBER_OF_APDU_RETRIES
        | prop::MAX_MASTER
        | prop::MAX_INFO_FRAMES
        | prop::DATABASE_REVISION => Some(Datatype::Unsigned),
        prop::OBJECT_LIST => Some(Datatype::Array(&Datatype::ObjectIdentifier)),
        prop::SEGMENTATION_SUPPORTED => Some(Datatype::Enumerated(SEGMENTATION)),
        prop::LOCAL_DATE => Some(Datatype::Date),
        prop::LOCAL_TIME => Some(Datatype::Time),
        _ => None,
    }
}
