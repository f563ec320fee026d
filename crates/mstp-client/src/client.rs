//! Confirmed ReadProperty / WriteProperty
//!
//! Each call resolves the property's datatype, hands one confirmed request to
//! the engine and blocks until that transaction completes, fails or times out.

use serde::{Deserialize, Serialize};

use crate::datatype::{self, property_datatype, Datatype};
use crate::error::{ClientError, ClientResult};
use crate::link::{Acknowledgement, ConfirmedRequest, ReadPropertyAck, ReadPropertyRequest, WritePropertyRequest};
use crate::session::Session;
use crate::types::{Mac, ObjectIdentifier, ObjectType, PropertyIdentifier, MAX_INSTANCE};
use crate::value::PropertyValue;
use crate::write::parse_write_value;

/// Object addressed by a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSelector {
    #[serde(rename = "type")]
    pub object_type: String,
    pub instance: u32,
}

/// Result of a successful ReadProperty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyReading {
    pub address: Mac,
    pub object: ObjectSelector,
    pub property: String,
    pub index: Option<u32>,
    /// Decoded value in structured form
    pub value: serde_json::Value,
}

/// Look up (object type, property) in the datatype schema
fn resolve(object_type: &str, property: &str) -> ClientResult<(ObjectType, PropertyIdentifier, Datatype)> {
    datatype::resolve(object_type, property).ok_or_else(|| ClientError::UnknownProperty {
        object_type: object_type.to_string(),
        property: property.to_string(),
    })
}

/// Instances that do not fit an object identifier never reach the link
pub(crate) fn check_instance(instance: u32) -> ClientResult<()> {
    if instance > MAX_INSTANCE {
        return Err(ClientError::InvalidInstance(instance));
    }
    Ok(())
}

/// Decode an acknowledgment using the datatype of the object it names
fn decode_ack(ack: &ReadPropertyAck) -> ClientResult<(PropertyValue, Datatype)> {
    let datatype = property_datatype(ack.object_identifier.object_type, ack.property_identifier).ok_or_else(|| {
        ClientError::Protocol(format!(
            "unknown datatype for {} of {}",
            ack.property_identifier, ack.object_identifier.object_type
        ))
    })?;

    let datatype = match (datatype.element(), ack.array_index) {
        (Some(_), Some(0)) => Datatype::Unsigned,
        (Some(element), Some(_)) => element,
        _ => datatype,
    };
    let value = PropertyValue::decode(&ack.value, &datatype)
        .map_err(|e| ClientError::Protocol(format!("undecodable {}: {}", datatype, e)))?;
    Ok((value, datatype))
}

impl Session {
    /// Read one property from the station at `address`
    ///
    /// For array properties `index` selects an element; index 0 is the
    /// element count.
    pub fn read_property(
        &self,
        address: Mac,
        object_type: &str,
        object_instance: u32,
        property: &str,
        index: Option<u32>,
    ) -> ClientResult<PropertyReading> {
        let engine = self.engine()?;
        check_instance(object_instance)?;
        let (type_code, property_id, _) = resolve(object_type, property)?;

        let request = ConfirmedRequest::ReadProperty(ReadPropertyRequest {
            object_identifier: ObjectIdentifier::new(type_code, object_instance),
            property_identifier: property_id,
            array_index: index,
        });
        tracing::debug!(
            "ReadProperty {}:{} {} [{:?}] from {}",
            object_type,
            object_instance,
            property,
            index,
            address
        );

        let ack = match engine.transact(address, request).map_err(ClientError::Transport)? {
            Acknowledgement::ReadProperty(ack) => ack,
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected ReadProperty-ACK, got {}",
                    other.kind()
                )))
            }
        };
        let (value, datatype) = decode_ack(&ack)?;

        Ok(PropertyReading {
            address,
            object: ObjectSelector {
                object_type: object_type.to_string(),
                instance: object_instance,
            },
            property: property.to_string(),
            index,
            value: value.to_json(&datatype),
        })
    }

    /// Write one property on the station at `address`
    ///
    /// `value` is `"null"`, a `"<code>:<payload>"` tagged value for
    /// properties of ambiguous type, or a literal of the property's type.
    /// `priority` is passed through unchecked.
    #[allow(clippy::too_many_arguments)]
    pub fn write_property(
        &self,
        address: Mac,
        object_type: &str,
        object_instance: u32,
        property: &str,
        value: &str,
        index: Option<u32>,
        priority: Option<u8>,
    ) -> ClientResult<()> {
        let engine = self.engine()?;
        check_instance(object_instance).map_err(|e| ClientError::Cast(e.to_string()))?;
        let (type_code, property_id, datatype) = resolve(object_type, property)?;
        let encoded = parse_write_value(value, &datatype, index)?;

        let request = ConfirmedRequest::WriteProperty(WritePropertyRequest {
            object_identifier: ObjectIdentifier::new(type_code, object_instance),
            property_identifier: property_id,
            array_index: index,
            value: encoded.encode(),
            priority,
        });
        tracing::debug!(
            "WriteProperty {}:{} {} [{:?}] = {} (priority {:?}) to {}",
            object_type,
            object_instance,
            property,
            index,
            encoded.type_name(),
            priority,
            address
        );

        match engine.transact(address, request).map_err(ClientError::Transport)? {
            Acknowledgement::Simple => Ok(()),
            other => Err(ClientError::Protocol(format!("expected Simple-ACK, got {}", other.kind()))),
        }
    }

    /// [`read_property`](Self::read_property) addressed by device instance
    pub fn read_device_property(
        &self,
        device_instance: u32,
        object_type: &str,
        object_instance: u32,
        property: &str,
        index: Option<u32>,
    ) -> ClientResult<PropertyReading> {
        let address = self.device_address(device_instance)?;
        self.read_property(address, object_type, object_instance, property, index)
    }

    /// [`write_property`](Self::write_property) addressed by device instance
    #[allow(clippy::too_many_arguments)]
    pub fn write_device_property(
        &self,
        device_instance: u32,
        object_type: &str,
        object_instance: u32,
        property: &str,
        value: &str,
        index: Option<u32>,
        priority: Option<u8>,
    ) -> ClientResult<()> {
        let address = self.device_address(device_instance)?;
        self.write_property(address, object_type, object_instance, property, value, index, priority)
    }

    /// MAC of a discovered device
    pub(crate) fn device_address(&self, device_instance: u32) -> ClientResult<Mac> {
        self.engine()?;
        self.cache()
            .get_transport_address(device_instance)
            .ok_or(ClientError::UnknownDevice(device_instance))
    }
}
