//! Protocol engine boundary
//!
//! The MS/TP token-passing state machine and the NPDU/APDU framing live in the
//! underlying protocol engine. This module defines the request/response
//! interface the session drives it through: requests go down as typed service
//! requests, and announcements and confirmed-transaction completions come back
//! up as [`Indication`]s. Property values cross the boundary still encoded as
//! application-tagged data.

use std::time::Duration;

use bytes::Bytes;

use crate::error::TransactionFailure;
use crate::types::{Destination, Mac, ObjectIdentifier, PropertyIdentifier, Segmentation};

/// Invoke ID correlating a confirmed request with its acknowledgment
pub type InvokeId = u8;

/// Parameters used to open the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParams {
    pub mac: Mac,
    pub interface: String,
    pub baudrate: u32,
    pub max_masters: u8,
    pub max_info_frames: u8,
}

/// Error raised by the link itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open interface {interface}: {reason}")]
    Open { interface: String, reason: String },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Link closed")]
    Closed,
}

/// Body of an I-Am announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IAmPayload {
    pub device_identifier: ObjectIdentifier,
    pub max_apdu_length_accepted: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u32,
}

/// Unconfirmed service requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnconfirmedRequest {
    WhoIs {
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    },
    IAm(IAmPayload),
}

/// ReadProperty service request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
}

/// WriteProperty service request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// Application-tagged encoded value
    pub value: Bytes,
    /// Write priority (1 = highest), passed through as given
    pub priority: Option<u8>,
}

/// Confirmed service requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmedRequest {
    ReadProperty(ReadPropertyRequest),
    WriteProperty(WritePropertyRequest),
}

impl ConfirmedRequest {
    pub fn service_name(&self) -> &'static str {
        match self {
            ConfirmedRequest::ReadProperty(_) => "ReadProperty",
            ConfirmedRequest::WriteProperty(_) => "WriteProperty",
        }
    }
}

/// ReadProperty-ACK body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyAck {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// Application-tagged encoded value
    pub value: Bytes,
}

/// Positive acknowledgment of a confirmed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Simple-ACK (WriteProperty)
    Simple,
    /// Complex-ACK carrying a ReadProperty result
    ReadProperty(ReadPropertyAck),
    /// Complex-ACK for some other service choice
    Other { service_choice: u8 },
}

impl Acknowledgement {
    pub fn kind(&self) -> &'static str {
        match self {
            Acknowledgement::Simple => "Simple-ACK",
            Acknowledgement::ReadProperty(_) => "ReadProperty-ACK",
            Acknowledgement::Other { .. } => "Complex-ACK",
        }
    }
}

/// Events delivered by the link to the engine loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    /// An I-Am was received
    IAm {
        source: Option<Mac>,
        payload: IAmPayload,
    },
    /// A confirmed request finished
    Completion {
        source: Mac,
        invoke_id: InvokeId,
        outcome: Result<Acknowledgement, TransactionFailure>,
    },
}

/// The underlying protocol engine as seen by the session
///
/// Implementations own the serial port and the MS/TP master node state
/// machine. All methods are called from the single engine thread.
pub trait DataLink: Send + 'static {
    /// Bind the local station and bring the link up
    fn open(&mut self, params: &LinkParams) -> Result<(), LinkError>;

    /// Release the interface
    fn close(&mut self);

    /// Queue an unconfirmed request for transmission
    fn send_unconfirmed(
        &mut self,
        destination: Destination,
        request: &UnconfirmedRequest,
    ) -> Result<(), LinkError>;

    /// Queue a confirmed request for transmission
    fn send_confirmed(
        &mut self,
        destination: Mac,
        invoke_id: InvokeId,
        request: &ConfirmedRequest,
    ) -> Result<(), LinkError>;

    /// Wait up to `timeout` for the next indication
    fn receive(&mut self, timeout: Duration) -> Result<Option<Indication>, LinkError>;
}

impl<T: DataLink + ?Sized> DataLink for Box<T> {
    fn open(&mut self, params: &LinkParams) -> Result<(), LinkError> {
        (**self).open(params)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn send_unconfirmed(
        &mut self,
        destination: Destination,
        request: &UnconfirmedRequest,
    ) -> Result<(), LinkError> {
        (**self).send_unconfirmed(destination, request)
    }

    fn send_confirmed(
        &mut self,
        destination: Mac,
        invoke_id: InvokeId,
        request: &ConfirmedRequest,
    ) -> Result<(), LinkError> {
        (**self).send_confirmed(destination, invoke_id, request)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Indication>, LinkError> {
        (**self).receive(timeout)
    }
}
