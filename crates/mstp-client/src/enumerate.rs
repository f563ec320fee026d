//! Object enumeration
//!
//! Walks a device's `objectList` one element at a time on the engine thread
//! and waits for the walk to finish, up to a caller-supplied deadline.
//! Whatever was read before a timeout or a failure is kept.

use std::time::{Duration, Instant};

use crate::client::check_instance;
use crate::error::ClientError;
use crate::session::Session;
use crate::types::{Mac, ObjectReference};

/// Objects found on a device, plus the error that stopped the walk, if any
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerationResult {
    pub objects: Vec<ObjectReference>,
    pub error: Option<ClientError>,
}

impl EnumerationResult {
    fn failed(error: ClientError) -> Self {
        Self {
            objects: Vec::new(),
            error: Some(error),
        }
    }

    /// True if every element of the object list was read
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

impl Session {
    /// Read the object list of device `device_instance` at `address`
    ///
    /// Elements are returned in array order. On a timeout the walk is
    /// abandoned and the objects read so far come back with
    /// [`ClientError::EnumerationTimeout`]; the first failed read ends the walk
    /// with [`ClientError::EnumerationProtocol`].
    pub fn enumerate_objects(&self, address: Mac, device_instance: u32, timeout: Duration) -> EnumerationResult {
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(e) => return EnumerationResult::failed(e),
        };
        if let Err(e) = check_instance(device_instance) {
            return EnumerationResult::failed(e);
        }

        let deadline = Instant::now() + timeout;
        let walk = match engine.start_walk(address, device_instance) {
            Ok(walk) => walk,
            Err(failure) => return EnumerationResult::failed(ClientError::EnumerationProtocol(failure.to_string())),
        };
        tracing::debug!("Enumerating objects of device {} at {}", device_instance, address);

        let snapshot = walk.wait_or_abandon(deadline);
        let error = if !snapshot.finished {
            tracing::warn!(
                "Enumeration of device {} timed out after {:?} ({} objects read)",
                device_instance,
                timeout,
                snapshot.objects.len()
            );
            Some(ClientError::EnumerationTimeout(timeout))
        } else {
            snapshot.error.map(ClientError::EnumerationProtocol)
        };

        if error.is_none() {
            tracing::info!(
                "Enumerated {} objects on device {}",
                snapshot.objects.len(),
                device_instance
            );
        }
        EnumerationResult {
            objects: snapshot.objects,
            error,
        }
    }

    /// [`enumerate_objects`](Self::enumerate_objects) addressed by device instance
    pub fn enumerate_device_objects(&self, device_instance: u32, timeout: Duration) -> EnumerationResult {
        match self.device_address(device_instance) {
            Ok(address) => self.enumerate_objects(address, device_instance, timeout),
            Err(e) => EnumerationResult::failed(e),
        }
    }
}
