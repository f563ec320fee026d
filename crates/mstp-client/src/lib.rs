//! MS/TP Client - BACnet session layer over an MS/TP link
//!
//! This crate provides:
//! - A session that starts the protocol engine once and owns the local device identity
//! - Who-Is / I-Am device discovery with a shared device cache
//! - Confirmed ReadProperty / WriteProperty with type-directed value encoding
//! - Object-list enumeration chained on the engine thread
//! - Present-value normalization driven by an object-type schema
//!
//! The MS/TP framing itself sits behind the [`DataLink`] trait.

// Configuration and errors
pub mod config;
pub mod error;

// Identifiers, datatypes and the value codec
pub mod datatype;
pub mod types;
pub mod value;
pub mod write;

// Object-type schema and present-value normalization
pub mod normalize;
pub mod registry;

// Engine boundary and run loop
pub mod link;
mod engine;

// Session and operations
pub mod cache;
mod client;
mod discovery;
mod enumerate;
pub mod session;

// Async facade
pub mod async_client;

#[cfg(test)]
pub(crate) mod testing;

pub use async_client::AsyncClient;
pub use cache::DeviceCache;
pub use client::{ObjectSelector, PropertyReading};
pub use config::{LinkConfig, LocalDevice, LocalDeviceConfig, SessionConfig, TimingConfig};
pub use enumerate::EnumerationResult;
pub use error::{ClientError, ClientResult, ConfigError, SchemaError, SessionError, TransactionFailure};
pub use link::{DataLink, LinkError, LinkParams};
pub use normalize::{encode_for_write, normalize_present_value};
pub use registry::{Access, ExternalType, ObjectTypeDefinition, ObjectTypeRegistry, SemanticType};
pub use session::{Session, SessionState};
pub use types::{Destination, DeviceRecord, Mac, ObjectIdentifier, ObjectReference, ObjectType, PropertyIdentifier};
pub use value::PropertyValue;
pub use write::parse_write_value;
