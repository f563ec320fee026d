//! Shared BACnet types
//!
//! Identifiers, addressing and the records produced by discovery and
//! enumeration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// MS/TP station address (0..=254, 255 is the broadcast MAC)
pub type Mac = u8;

/// MS/TP broadcast station address
pub const BROADCAST_MAC: Mac = 255;

/// Largest object instance a 22-bit object identifier can carry
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

/// Where an unconfirmed request is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Global broadcast
    Broadcast,
    /// A single station on the local link
    Station(Mac),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => write!(f, "*:*"),
            Destination::Station(mac) => write!(f, "{}", mac),
        }
    }
}

/// Fold a BACnet name for lookups: lower case, separators removed.
///
/// `presentValue`, `present-value` and `present_value` all fold to
/// `presentvalue`.
pub(crate) fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Object types
// ─────────────────────────────────────────────────────────────────────────────

/// BACnet object type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectType(pub u16);

const OBJECT_TYPE_NAMES: &[(u16, &str)] = &[
    (0, "analogInput"),
    (1, "analogOutput"),
    (2, "analogValue"),
    (3, "binaryInput"),
    (4, "binaryOutput"),
    (5, "binaryValue"),
    (6, "calendar"),
    (7, "command"),
    (8, "device"),
    (9, "eventEnrollment"),
    (10, "file"),
    (11, "group"),
    (12, "loop"),
    (13, "multiStateInput"),
    (14, "multiStateOutput"),
    (15, "notificationClass"),
    (16, "program"),
    (17, "schedule"),
    (18, "averaging"),
    (19, "multiStateValue"),
    (20, "trendLog"),
    (21, "lifeSafetyPoint"),
    (22, "lifeSafetyZone"),
    (23, "accumulator"),
    (24, "pulseConverter"),
    (25, "eventLog"),
    (26, "globalGroup"),
    (27, "trendLogMultiple"),
    (28, "loadControl"),
    (29, "structuredView"),
    (30, "accessDoor"),
    (40, "characterstringValue"),
    (45, "integerValue"),
    (46, "largeAnalogValue"),
    (48, "positiveIntegerValue"),
    (54, "lightingOutput"),
    (55, "binaryLightingOutput"),
    (56, "networkPort"),
];

impl ObjectType {
    pub const ANALOG_INPUT: ObjectType = ObjectType(0);
    pub const ANALOG_OUTPUT: ObjectType = ObjectType(1);
    pub const ANALOG_VALUE: ObjectType = ObjectType(2);
    pub const BINARY_INPUT: ObjectType = ObjectType(3);
    pub const BINARY_OUTPUT: ObjectType = ObjectType(4);
    pub const BINARY_VALUE: ObjectType = ObjectType(5);
    pub const DEVICE: ObjectType = ObjectType(8);
    pub const MULTI_STATE_INPUT: ObjectType = ObjectType(13);
    pub const MULTI_STATE_OUTPUT: ObjectType = ObjectType(14);
    pub const SCHEDULE: ObjectType = ObjectType(17);
    pub const MULTI_STATE_VALUE: ObjectType = ObjectType(19);
    pub const ACCUMULATOR: ObjectType = ObjectType(23);

    /// Resolve a type by name (`analogInput`, `analog-input`, ...) or by a
    /// `proprietary-<n>` / bare numeric code.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded = fold_name(name);
        if let Some((code, _)) = OBJECT_TYPE_NAMES
            .iter()
            .find(|(_, known)| fold_name(known) == folded)
        {
            return Some(ObjectType(*code));
        }
        let digits = folded.strip_prefix("proprietary").unwrap_or(&folded);
        digits.parse::<u16>().ok().filter(|code| *code < 1024).map(ObjectType)
    }

    /// Canonical name, if this is a standard type
    pub fn name(&self) -> Option<&'static str> {
        OBJECT_TYPE_NAMES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "proprietary-{}", self.0),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// BACnet property identifier code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyIdentifier(pub u32);

const PROPERTY_NAMES: &[(u32, &str)] = &[
    (4, "activeText"),
    (11, "apduTimeout"),
    (12, "applicationSoftwareVersion"),
    (22, "covIncrement"),
    (28, "description"),
    (30, "deviceAddressBinding"),
    (32, "effectivePeriod"),
    (36, "eventState"),
    (44, "firmwareRevision"),
    (46, "inactiveText"),
    (56, "localDate"),
    (57, "localTime"),
    (58, "location"),
    (62, "maxApduLengthAccepted"),
    (63, "maxInfoFrames"),
    (64, "maxMaster"),
    (65, "maxPresValue"),
    (69, "minPresValue"),
    (70, "modelName"),
    (73, "numberOfApduRetries"),
    (74, "numberOfStates"),
    (75, "objectIdentifier"),
    (76, "objectList"),
    (77, "objectName"),
    (79, "objectType"),
    (81, "outOfService"),
    (84, "polarity"),
    (85, "presentValue"),
    (87, "priorityArray"),
    (98, "protocolVersion"),
    (103, "reliability"),
    (104, "relinquishDefault"),
    (106, "resolution"),
    (107, "segmentationSupported"),
    (110, "stateText"),
    (111, "statusFlags"),
    (112, "systemStatus"),
    (117, "units"),
    (120, "vendorIdentifier"),
    (121, "vendorName"),
    (139, "protocolRevision"),
    (155, "databaseRevision"),
    (174, "scheduleDefault"),
    (186, "pulseRate"),
];

impl PropertyIdentifier {
    pub const OBJECT_IDENTIFIER: PropertyIdentifier = PropertyIdentifier(75);
    pub const OBJECT_LIST: PropertyIdentifier = PropertyIdentifier(76);
    pub const OBJECT_NAME: PropertyIdentifier = PropertyIdentifier(77);
    pub const PRESENT_VALUE: PropertyIdentifier = PropertyIdentifier(85);
    pub const PRIORITY_ARRAY: PropertyIdentifier = PropertyIdentifier(87);

    /// Resolve a property by name, or by a `proprietary-<n>` / numeric code.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded = fold_name(name);
        if let Some((code, _)) = PROPERTY_NAMES
            .iter()
            .find(|(_, known)| fold_name(known) == folded)
        {
            return Some(PropertyIdentifier(*code));
        }
        let digits = folded.strip_prefix("proprietary").unwrap_or(&folded);
        digits.parse::<u32>().ok().filter(|code| *code < (1 << 22)).map(PropertyIdentifier)
    }

    pub fn name(&self) -> Option<&'static str> {
        PROPERTY_NAMES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for PropertyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "proprietary-{}", self.0),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object identifier
// ─────────────────────────────────────────────────────────────────────────────

/// A (type, instance) pair as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Pack into the 32-bit wire form (10-bit type, 22-bit instance)
    ///
    /// Instance bits above 22 are dropped; callers check the range first.
    pub fn to_raw(&self) -> u32 {
        (u32::from(self.object_type.0) << 22) | (self.instance & MAX_INSTANCE)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self {
            object_type: ObjectType((raw >> 22) as u16),
            instance: raw & MAX_INSTANCE,
        }
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.object_type, self.instance)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Segmentation
// ─────────────────────────────────────────────────────────────────────────────

/// Segmentation capability advertised in I-Am
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Segmentation {
    Both,
    Transmit,
    Receive,
    #[default]
    NoSegmentation,
}

impl Segmentation {
    /// Wire enumeration value
    pub fn code(&self) -> u32 {
        match self {
            Segmentation::Both => 0,
            Segmentation::Transmit => 1,
            Segmentation::Receive => 2,
            Segmentation::NoSegmentation => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Segmentation::Both),
            1 => Some(Segmentation::Transmit),
            2 => Some(Segmentation::Receive),
            3 => Some(Segmentation::NoSegmentation),
            _ => None,
        }
    }

    /// Parse `"no segmentation"`, `"noSegmentation"`, `"segmentedBoth"`, ...
    pub fn from_name(name: &str) -> Option<Self> {
        match fold_name(name).as_str() {
            "segmentedboth" | "both" => Some(Segmentation::Both),
            "segmentedtransmit" | "transmit" => Some(Segmentation::Transmit),
            "segmentedreceive" | "receive" => Some(Segmentation::Receive),
            "nosegmentation" | "none" => Some(Segmentation::NoSegmentation),
            _ => None,
        }
    }
}

impl fmt::Display for Segmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Segmentation::Both => "segmentedBoth",
            Segmentation::Transmit => "segmentedTransmit",
            Segmentation::Receive => "segmentedReceive",
            Segmentation::NoSegmentation => "noSegmentation",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Discovered BACnet device from an I-Am announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// BACnet device instance number
    pub device_instance: u32,
    /// Maximum APDU length the device accepts
    pub max_apdu: u32,
    /// Segmentation support
    pub segmentation: String,
    /// BACnet vendor ID
    pub vendor_id: u32,
    /// MS/TP MAC the announcement came from
    pub source_mac: Option<Mac>,
}

/// A BACnet object reference found in a device's object list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Object type name (e.g., "analogInput", "device")
    pub object_type: String,
    /// Object instance number
    pub object_instance: u32,
}

impl From<ObjectIdentifier> for ObjectReference {
    fn from(id: ObjectIdentifier) -> Self {
        Self {
            object_type: id.object_type.to_string(),
            object_instance: id.instance,
        }
    }
}
