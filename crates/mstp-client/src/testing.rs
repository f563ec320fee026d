//! Scripted in-memory link for tests
//!
//! Simulates a handful of MS/TP stations: they answer Who-Is with I-Am, serve
//! their object list and stored property values, accept writes, and can be
//! told to stay silent or answer with a scripted outcome.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::error::TransactionFailure;
use crate::link::{
    Acknowledgement, ConfirmedRequest, DataLink, IAmPayload, Indication, InvokeId, LinkError, LinkParams,
    ReadPropertyAck, UnconfirmedRequest,
};
use crate::types::{Destination, Mac, ObjectIdentifier, ObjectType, PropertyIdentifier, Segmentation};
use crate::value::PropertyValue;

/// Error class/code used for "unknown property"
pub(crate) const UNKNOWN_PROPERTY: TransactionFailure = TransactionFailure::Error { class: 2, code: 32 };
/// Error class/code used for "invalid array index"
pub(crate) const INVALID_ARRAY_INDEX: TransactionFailure = TransactionFailure::Error { class: 2, code: 42 };

/// A request the engine handed to the link
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Unconfirmed {
        destination: Destination,
        request: UnconfirmedRequest,
    },
    Confirmed {
        destination: Mac,
        invoke_id: InvokeId,
        request: ConfirmedRequest,
    },
}

#[derive(Debug, Default)]
struct SimDevice {
    instance: u32,
    objects: Vec<ObjectIdentifier>,
    values: HashMap<(ObjectIdentifier, PropertyIdentifier), Bytes>,
    silent: bool,
    object_list_failure: Option<(u32, TransactionFailure)>,
    object_list_stall: Option<u32>,
    scripted: VecDeque<Result<Acknowledgement, TransactionFailure>>,
}

impl SimDevice {
    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::new(ObjectType::DEVICE, self.instance)
    }

    /// Device object first, then the listed objects
    fn object_list(&self) -> Vec<ObjectIdentifier> {
        std::iter::once(self.identifier()).chain(self.objects.iter().copied()).collect()
    }
}

#[derive(Debug, Default)]
struct Sim {
    devices: BTreeMap<Mac, SimDevice>,
    inbox: VecDeque<Indication>,
    opened: Option<LinkParams>,
    open_count: usize,
    close_count: usize,
    fail_open: bool,
    open_delay: Duration,
}

/// Cloneable handle to one simulated segment
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedLink {
    sim: Arc<Mutex<Sim>>,
    sent: Arc<Mutex<Vec<Sent>>>,
}

/// Route engine and session logs to the test harness
///
/// Filtered by `RUST_LOG`; only errors show when it is unset.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

impl ScriptedLink {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Add a station at `mac` hosting device `instance` with the given objects
    pub fn add_device(&self, mac: Mac, instance: u32, objects: &[(ObjectType, u32)]) {
        let device = SimDevice {
            instance,
            objects: objects
                .iter()
                .map(|(object_type, instance)| ObjectIdentifier::new(*object_type, *instance))
                .collect(),
            ..SimDevice::default()
        };
        self.sim.lock().devices.insert(mac, device);
    }

    pub fn set_value(
        &self,
        mac: Mac,
        object_type: ObjectType,
        instance: u32,
        property: PropertyIdentifier,
        value: PropertyValue,
    ) {
        if let Some(device) = self.sim.lock().devices.get_mut(&mac) {
            device
                .values
                .insert((ObjectIdentifier::new(object_type, instance), property), value.encode());
        }
    }

    /// Encoded value currently stored for a property
    pub fn stored(&self, mac: Mac, object_type: ObjectType, instance: u32, property: PropertyIdentifier) -> Option<Bytes> {
        self.sim
            .lock()
            .devices
            .get(&mac)?
            .values
            .get(&(ObjectIdentifier::new(object_type, instance), property))
            .cloned()
    }

    /// Stop answering anything at `mac`
    pub fn silence(&self, mac: Mac) {
        let mut sim = self.sim.lock();
        sim.devices.entry(mac).or_default().silent = true;
    }

    /// Answer the object-list read at `index` with `failure`
    pub fn fail_object_list_at(&self, mac: Mac, index: u32, failure: TransactionFailure) {
        if let Some(device) = self.sim.lock().devices.get_mut(&mac) {
            device.object_list_failure = Some((index, failure));
        }
    }

    /// Never answer the object-list read at `index`
    pub fn stall_object_list_at(&self, mac: Mac, index: u32) {
        if let Some(device) = self.sim.lock().devices.get_mut(&mac) {
            device.object_list_stall = Some(index);
        }
    }

    /// Answer the next confirmed request to `mac` with `outcome`
    pub fn script_reply(&self, mac: Mac, outcome: Result<Acknowledgement, TransactionFailure>) {
        if let Some(device) = self.sim.lock().devices.get_mut(&mac) {
            device.scripted.push_back(outcome);
        }
    }

    /// Deliver an unsolicited I-Am
    pub fn inject_iam(&self, source: Mac, instance: u32) {
        let payload = iam_payload(instance);
        self.sim.lock().inbox.push_back(Indication::IAm {
            source: Some(source),
            payload,
        });
    }

    pub fn fail_open(&self) {
        self.sim.lock().fail_open = true;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.sim.lock().open_delay = delay;
    }

    pub fn open_count(&self) -> usize {
        self.sim.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.sim.lock().close_count
    }

    pub fn opened_params(&self) -> Option<LinkParams> {
        self.sim.lock().opened.clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_log(&self) -> Arc<Mutex<Vec<Sent>>> {
        Arc::clone(&self.sent)
    }

    pub fn confirmed_sent(&self) -> Vec<ConfirmedRequest> {
        self.sent
            .lock()
            .iter()
            .filter_map(|sent| match sent {
                Sent::Confirmed { request, .. } => Some(request.clone()),
                Sent::Unconfirmed { .. } => None,
            })
            .collect()
    }
}

fn iam_payload(instance: u32) -> IAmPayload {
    IAmPayload {
        device_identifier: ObjectIdentifier::new(ObjectType::DEVICE, instance),
        max_apdu_length_accepted: 480,
        segmentation: Segmentation::NoSegmentation,
        vendor_id: 260,
    }
}

fn in_range(instance: u32, low: Option<u32>, high: Option<u32>) -> bool {
    low.map_or(true, |low| instance >= low) && high.map_or(true, |high| instance <= high)
}

fn stalls(device: &SimDevice, request: &ConfirmedRequest) -> bool {
    match (request, device.object_list_stall) {
        (ConfirmedRequest::ReadProperty(read), Some(stall)) => {
            read.property_identifier == PropertyIdentifier::OBJECT_LIST && read.array_index == Some(stall)
        }
        _ => false,
    }
}

fn answer(device: &mut SimDevice, request: &ConfirmedRequest) -> Result<Acknowledgement, TransactionFailure> {
    if let Some(outcome) = device.scripted.pop_front() {
        return outcome;
    }

    match request {
        ConfirmedRequest::ReadProperty(read) => {
            let is_object_list = read.object_identifier == device.identifier()
                && read.property_identifier == PropertyIdentifier::OBJECT_LIST;
            let value = if is_object_list {
                let list = device.object_list();
                match read.array_index {
                    Some(0) => PropertyValue::Unsigned(list.len() as u64).encode(),
                    Some(index) => {
                        if let Some((failing, failure)) = &device.object_list_failure {
                            if *failing == index {
                                return Err(failure.clone());
                            }
                        }
                        let id = list.get(index as usize - 1).ok_or(INVALID_ARRAY_INDEX)?;
                        PropertyValue::ObjectIdentifier(*id).encode()
                    }
                    None => PropertyValue::Array(list.into_iter().map(PropertyValue::ObjectIdentifier).collect())
                        .encode(),
                }
            } else {
                device
                    .values
                    .get(&(read.object_identifier, read.property_identifier))
                    .cloned()
                    .ok_or(UNKNOWN_PROPERTY)?
            };
            Ok(Acknowledgement::ReadProperty(ReadPropertyAck {
                object_identifier: read.object_identifier,
                property_identifier: read.property_identifier,
                array_index: read.array_index,
                value,
            }))
        }
        ConfirmedRequest::WriteProperty(write) => {
            device
                .values
                .insert((write.object_identifier, write.property_identifier), write.value.clone());
            Ok(Acknowledgement::Simple)
        }
    }
}

impl DataLink for ScriptedLink {
    fn open(&mut self, params: &LinkParams) -> Result<(), LinkError> {
        let delay = self.sim.lock().open_delay;
        thread::sleep(delay);

        let mut sim = self.sim.lock();
        if sim.fail_open {
            return Err(LinkError::Open {
                interface: params.interface.clone(),
                reason: "no such device".to_string(),
            });
        }
        sim.opened = Some(params.clone());
        sim.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.sim.lock().close_count += 1;
    }

    fn send_unconfirmed(&mut self, destination: Destination, request: &UnconfirmedRequest) -> Result<(), LinkError> {
        self.sent.lock().push(Sent::Unconfirmed {
            destination,
            request: request.clone(),
        });

        if let UnconfirmedRequest::WhoIs { low_limit, high_limit } = request {
            let mut sim = self.sim.lock();
            let replies: Vec<Indication> = sim
                .devices
                .iter()
                .filter(|(mac, device)| {
                    let addressed = match destination {
                        Destination::Broadcast => true,
                        Destination::Station(station) => station == **mac,
                    };
                    addressed && !device.silent && in_range(device.instance, *low_limit, *high_limit)
                })
                .map(|(mac, device)| Indication::IAm {
                    source: Some(*mac),
                    payload: iam_payload(device.instance),
                })
                .collect();
            sim.inbox.extend(replies);
        }
        Ok(())
    }

    fn send_confirmed(
        &mut self,
        destination: Mac,
        invoke_id: InvokeId,
        request: &ConfirmedRequest,
    ) -> Result<(), LinkError> {
        self.sent.lock().push(Sent::Confirmed {
            destination,
            invoke_id,
            request: request.clone(),
        });

        let mut sim = self.sim.lock();
        let outcome = match sim.devices.get_mut(&destination) {
            Some(device) if !device.silent && !stalls(device, request) => answer(device, request),
            _ => return Ok(()),
        };
        sim.inbox.push_back(Indication::Completion {
            source: destination,
            invoke_id,
            outcome,
        });
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Indication>, LinkError> {
        if let Some(indication) = self.sim.lock().inbox.pop_front() {
            return Ok(Some(indication));
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(None)
    }
}
