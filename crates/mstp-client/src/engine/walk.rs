//! Object-list walk
//!
//! Enumerates a device's `objectList` one element at a time: index 0 yields the
//! element count, then indices `1..=n` are read in ascending order, each read
//! issued only when the previous reply has been handled. The walk lives on the
//! engine thread and is its only writer; the caller holds an
//! `Arc<WalkShared>` and reads a snapshot once the walk is finished or its own
//! deadline passes.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::datatype::{property_datatype, Datatype};
use crate::error::TransactionFailure;
use crate::link::{Acknowledgement, ConfirmedRequest, ReadPropertyAck, ReadPropertyRequest};
use crate::types::{Mac, ObjectIdentifier, ObjectReference, ObjectType, PropertyIdentifier};
use crate::value::PropertyValue;

#[derive(Debug, Default)]
struct WalkState {
    objects: Vec<ObjectReference>,
    error: Option<String>,
    finished: bool,
    abandoned: bool,
}

/// State shared between the engine thread and the waiting caller
#[derive(Debug, Default)]
pub(crate) struct WalkShared {
    state: Mutex<WalkState>,
    done: Condvar,
}

/// What the caller sees when it stops waiting
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WalkSnapshot {
    pub objects: Vec<ObjectReference>,
    pub error: Option<String>,
    pub finished: bool,
}

impl WalkShared {
    /// Block until the walk finishes or `deadline` passes
    ///
    /// A walk still running at the deadline is marked abandoned under the
    /// snapshot's lock.
    pub fn wait_or_abandon(&self, deadline: Instant) -> WalkSnapshot {
        let mut state = self.state.lock();
        while !state.finished {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if !state.finished {
            state.abandoned = true;
        }
        WalkSnapshot {
            objects: state.objects.clone(),
            error: state.error.clone(),
            finished: state.finished,
        }
    }

    /// Record the first abort cause and finish
    fn abort(&self, reason: String) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(reason);
        }
        state.finished = true;
        self.done.notify_all();
    }
}

/// Engine-side walk state machine
#[derive(Debug)]
pub(crate) struct ObjectListWalk {
    destination: Mac,
    device: ObjectIdentifier,
    /// Indices still to read; empty until the count is known
    pending: RangeInclusive<u32>,
    shared: Arc<WalkShared>,
}

impl ObjectListWalk {
    pub fn new(destination: Mac, device_instance: u32, shared: Arc<WalkShared>) -> Self {
        Self {
            destination,
            device: ObjectIdentifier::new(ObjectType::DEVICE, device_instance),
            pending: empty_range(),
            shared,
        }
    }

    pub fn destination(&self) -> Mac {
        self.destination
    }

    /// Read of the element count
    pub fn first_request(&self) -> ConfirmedRequest {
        self.request(0)
    }

    fn request(&self, index: u32) -> ConfirmedRequest {
        ConfirmedRequest::ReadProperty(ReadPropertyRequest {
            object_identifier: self.device,
            property_identifier: PropertyIdentifier::OBJECT_LIST,
            array_index: Some(index),
        })
    }

    /// Consume one reply; returns the next read to issue, if any
    pub fn on_reply(&mut self, outcome: Result<Acknowledgement, TransactionFailure>) -> Option<ConfirmedRequest> {
        let step = match outcome {
            Ok(Acknowledgement::ReadProperty(ack)) => self.apply(&ack),
            Ok(other) => Err(format!("expected ReadProperty-ACK, got {}", other.kind())),
            Err(failure) => Err(failure.to_string()),
        };
        let next = match step {
            Ok(_) => self.pending.next(),
            Err(_) => None,
        };

        // Publishing the step and finishing happen under one lock
        let mut state = self.shared.state.lock();
        if state.abandoned {
            tracing::debug!("Object list walk of device {} abandoned", self.device.instance);
            state.finished = true;
            self.shared.done.notify_all();
            return None;
        }
        match step {
            Err(reason) => {
                tracing::warn!("Object list walk of device {} aborted: {}", self.device.instance, reason);
                if state.error.is_none() {
                    state.error = Some(reason);
                }
                state.finished = true;
                self.shared.done.notify_all();
                None
            }
            Ok(objects) => {
                state.objects.extend(objects);
                match next {
                    Some(index) => Some(self.request(index)),
                    None => {
                        state.finished = true;
                        self.shared.done.notify_all();
                        None
                    }
                }
            }
        }
    }

    /// Fail the walk without a reply (send failure, engine stopping)
    pub fn fail(&mut self, failure: TransactionFailure) {
        self.pending = empty_range();
        self.shared.abort(failure.to_string());
    }

    /// Decode one reply into the objects it carries
    fn apply(&mut self, ack: &ReadPropertyAck) -> Result<Vec<ObjectReference>, String> {
        let datatype = property_datatype(ack.object_identifier.object_type, ack.property_identifier)
            .ok_or_else(|| {
                format!(
                    "unknown datatype for {} of {}",
                    ack.property_identifier, ack.object_identifier.object_type
                )
            })?;
        let decode = |datatype: &Datatype| {
            PropertyValue::decode(&ack.value, datatype).map_err(|e| format!("undecodable {}: {}", datatype, e))
        };

        match (datatype.element(), ack.array_index) {
            (Some(_), Some(0)) => {
                let count = match decode(&Datatype::Unsigned)? {
                    PropertyValue::Unsigned(count) => u32::try_from(count)
                        .map_err(|_| format!("object list length {} out of range", count))?,
                    other => return Err(format!("object list length is {}", other.type_name())),
                };
                tracing::debug!("Device {} reports {} objects", self.device.instance, count);
                self.pending = 1..=count;
                Ok(Vec::new())
            }
            (Some(element), Some(_)) => Ok(vec![object_reference(decode(&element)?)?]),
            // Some devices answer with the whole array even when asked for one element
            _ => match decode(&datatype)? {
                PropertyValue::Array(items) => items.into_iter().map(object_reference).collect(),
                single => Ok(vec![object_reference(single)?]),
            },
        }
    }
}

fn empty_range() -> RangeInclusive<u32> {
    1..=0
}

fn object_reference(value: PropertyValue) -> Result<ObjectReference, String> {
    match value {
        PropertyValue::ObjectIdentifier(id) => Ok(id.into()),
        other => Err(format!("object list element is {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn ack(index: Option<u32>, value: PropertyValue) -> Result<Acknowledgement, TransactionFailure> {
        Ok(Acknowledgement::ReadProperty(ReadPropertyAck {
            object_identifier: ObjectIdentifier::new(ObjectType::DEVICE, 10),
            property_identifier: PropertyIdentifier::OBJECT_LIST,
            array_index: index,
            value: value.encode(),
        }))
    }

    fn oid(object_type: ObjectType, instance: u32) -> PropertyValue {
        PropertyValue::ObjectIdentifier(ObjectIdentifier::new(object_type, instance))
    }

    fn requested_index(request: &ConfirmedRequest) -> Option<u32> {
        match request {
            ConfirmedRequest::ReadProperty(read) => read.array_index,
            ConfirmedRequest::WriteProperty(_) => None,
        }
    }

    #[test]
    fn test_walk_in_index_order() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        assert_eq!(requested_index(&walk.first_request()), Some(0));

        let next = walk.on_reply(ack(Some(0), PropertyValue::Unsigned(2))).unwrap();
        assert_eq!(requested_index(&next), Some(1));
        let next = walk.on_reply(ack(Some(1), oid(ObjectType::DEVICE, 10))).unwrap();
        assert_eq!(requested_index(&next), Some(2));
        assert!(walk.on_reply(ack(Some(2), oid(ObjectType::ANALOG_INPUT, 1))).is_none());

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(snapshot.finished);
        assert_eq!(snapshot.error, None);
        assert_eq!(
            snapshot.objects,
            vec![
                ObjectReference {
                    object_type: "device".to_string(),
                    object_instance: 10
                },
                ObjectReference {
                    object_type: "analogInput".to_string(),
                    object_instance: 1
                },
            ]
        );
    }

    #[test]
    fn test_zero_count_finishes_immediately() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        assert!(walk.on_reply(ack(Some(0), PropertyValue::Unsigned(0))).is_none());

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(snapshot.finished);
        assert!(snapshot.objects.is_empty());
        assert_eq!(snapshot.error, None);
    }

    #[test]
    fn test_error_keeps_prefix() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        walk.on_reply(ack(Some(0), PropertyValue::Unsigned(3)));
        walk.on_reply(ack(Some(1), oid(ObjectType::DEVICE, 10)));
        assert!(walk.on_reply(Err(TransactionFailure::Abort(4))).is_none());

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(snapshot.finished);
        assert_eq!(snapshot.objects.len(), 1);
        assert!(snapshot.error.unwrap().contains("aborted"));
    }

    #[test]
    fn test_unexpected_ack_and_bad_payload_abort() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        assert!(walk.on_reply(Ok(Acknowledgement::Simple)).is_none());
        assert!(shared.wait_or_abandon(Instant::now()).error.unwrap().contains("Simple-ACK"));

        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        walk.on_reply(ack(Some(0), PropertyValue::Unsigned(1)));
        assert!(walk
            .on_reply(ack(Some(1), PropertyValue::Real(1.0)))
            .is_none());
        assert!(shared.wait_or_abandon(Instant::now()).error.is_some());
    }

    #[test]
    fn test_whole_array_reply_is_extended() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        let whole = PropertyValue::Array(vec![oid(ObjectType::DEVICE, 10), oid(ObjectType::BINARY_VALUE, 2)]);
        assert!(walk.on_reply(ack(None, whole)).is_none());

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(snapshot.finished);
        assert_eq!(snapshot.objects.len(), 2);
        assert_eq!(snapshot.objects[1].object_type, "binaryValue");
    }

    #[test]
    fn test_abandoned_walk_stops() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        walk.on_reply(ack(Some(0), PropertyValue::Unsigned(5)));

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(!snapshot.finished);
        assert!(walk.on_reply(ack(Some(1), oid(ObjectType::DEVICE, 10))).is_none());
        assert!(shared.wait_or_abandon(Instant::now()).objects.is_empty());
    }

    #[test]
    fn test_reply_after_timeout_changes_nothing() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        walk.on_reply(ack(Some(0), PropertyValue::Unsigned(2)));
        walk.on_reply(ack(Some(1), oid(ObjectType::DEVICE, 10)));

        let timed_out = shared.wait_or_abandon(Instant::now());
        assert!(!timed_out.finished);
        assert_eq!(timed_out.objects.len(), 1);

        // The last element arrives after the caller gave up
        assert!(walk.on_reply(ack(Some(2), oid(ObjectType::ANALOG_INPUT, 1))).is_none());
        let after = shared.wait_or_abandon(Instant::now());
        assert!(after.finished);
        assert_eq!(after.objects, timed_out.objects);
    }

    #[test]
    fn test_huge_count_reads_lazily() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));

        let next = walk.on_reply(ack(Some(0), PropertyValue::Unsigned(u64::from(u32::MAX)))).unwrap();
        assert_eq!(requested_index(&next), Some(1));
        assert_eq!(walk.pending, 2..=u32::MAX);

        let next = walk.on_reply(ack(Some(1), oid(ObjectType::DEVICE, 10))).unwrap();
        assert_eq!(requested_index(&next), Some(2));
        assert!(walk.on_reply(Err(TransactionFailure::Abort(4))).is_none());

        let snapshot = shared.wait_or_abandon(Instant::now());
        assert!(snapshot.finished);
        assert_eq!(snapshot.objects.len(), 1);
    }

    #[test]
    fn test_count_beyond_u32_aborts() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        assert!(walk
            .on_reply(ack(Some(0), PropertyValue::Unsigned(u64::from(u32::MAX) + 1)))
            .is_none());
        assert!(shared.wait_or_abandon(Instant::now()).error.unwrap().contains("out of range"));
    }

    #[test]
    fn test_wait_times_out_unfinished() {
        let shared = WalkShared::default();
        let started = Instant::now();
        let snapshot = shared.wait_or_abandon(started + Duration::from_millis(50));
        assert!(!snapshot.finished);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_undecodable_count() {
        let shared = Arc::new(WalkShared::default());
        let mut walk = ObjectListWalk::new(4, 10, Arc::clone(&shared));
        let broken = Ok(Acknowledgement::ReadProperty(ReadPropertyAck {
            object_identifier: ObjectIdentifier::new(ObjectType::DEVICE, 10),
            property_identifier: PropertyIdentifier::OBJECT_LIST,
            array_index: Some(0),
            value: Bytes::from_static(&[0x22, 0x01]),
        }));
        assert!(walk.on_reply(broken).is_none());
        assert!(shared.wait_or_abandon(Instant::now()).error.unwrap().contains("undecodable"));
    }
}
