//! Engine run loop
//!
//! Runs on the `mstp-engine` thread. Each iteration drains queued commands,
//! waits on the link for one poll interval, then fails transactions that have
//! outlived the APDU timeout.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{EngineCommand, ListenerId, Responder};
use crate::cache::DeviceCache;
use crate::config::{LocalDevice, TimingConfig};
use crate::error::TransactionFailure;
use crate::link::{Acknowledgement, ConfirmedRequest, DataLink, IAmPayload, Indication, InvokeId, UnconfirmedRequest};
use crate::types::{Destination, DeviceRecord, Mac, ObjectType};

/// Confirmed request awaiting its completion
struct PendingTransaction {
    destination: Mac,
    service: &'static str,
    sent_at: Instant,
    responder: Responder,
}

/// Owns the link and all in-flight engine state
pub(crate) struct EngineWorker {
    link: Box<dyn DataLink>,
    commands: Receiver<EngineCommand>,
    cache: Arc<DeviceCache>,
    local: LocalDevice,
    timing: TimingConfig,
    /// Next invoke ID to try
    invoke_id: InvokeId,
    /// Confirmed requests awaiting completion
    pending: HashMap<InvokeId, PendingTransaction>,
    /// Discovery calls currently collecting I-Am replies
    listeners: HashMap<ListenerId, SyncSender<DeviceRecord>>,
}

impl EngineWorker {
    pub fn new(
        link: Box<dyn DataLink>,
        commands: Receiver<EngineCommand>,
        cache: Arc<DeviceCache>,
        local: LocalDevice,
        timing: TimingConfig,
    ) -> Self {
        Self {
            link,
            commands,
            cache,
            local,
            timing,
            invoke_id: 0,
            pending: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Run until shutdown; closes the link and hands it back
    pub fn run(mut self) -> Box<dyn DataLink> {
        tracing::info!(
            "MS/TP engine started (device {}, apdu timeout {:?})",
            self.local.object_identifier.instance,
            self.timing.apdu_timeout()
        );

        'run: loop {
            loop {
                match self.commands.try_recv() {
                    Ok(EngineCommand::Shutdown) => {
                        tracing::info!("MS/TP engine shutting down");
                        break 'run;
                    }
                    Ok(command) => self.handle_command(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        tracing::info!("Command channel disconnected, shutting down");
                        break 'run;
                    }
                }
            }

            self.poll_incoming(self.timing.poll_interval());
            self.check_timeouts(self.timing.apdu_timeout());
        }

        self.fail_all(TransactionFailure::EngineStopped);
        self.listeners.clear();
        self.link.close();
        tracing::info!("MS/TP engine stopped");
        self.link
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Announce => self.do_announce(),
            EngineCommand::Discover {
                listener,
                sender,
                destination,
                low_limit,
                high_limit,
            } => {
                self.listeners.insert(listener, sender);
                self.do_whois(destination, low_limit, high_limit);
            }
            EngineCommand::EndDiscovery { listener } => {
                self.listeners.remove(&listener);
            }
            EngineCommand::Confirmed {
                destination,
                request,
                responder,
            } => self.start_transaction(destination, request, responder),
            // Handled in the run loop
            EngineCommand::Shutdown => {}
        }
    }

    /// Broadcast the local I-Am
    fn do_announce(&mut self) {
        let request = UnconfirmedRequest::IAm(IAmPayload {
            device_identifier: self.local.object_identifier,
            max_apdu_length_accepted: self.local.max_apdu_length_accepted,
            segmentation: self.local.segmentation,
            vendor_id: self.local.vendor_identifier,
        });
        match self.link.send_unconfirmed(Destination::Broadcast, &request) {
            Ok(()) => tracing::debug!("Sent I-Am for device {}", self.local.object_identifier.instance),
            Err(e) => tracing::warn!("I-Am send failed: {}", e),
        }
    }

    /// Send a Who-Is
    fn do_whois(&mut self, destination: Destination, low_limit: Option<u32>, high_limit: Option<u32>) {
        let request = UnconfirmedRequest::WhoIs { low_limit, high_limit };
        match self.link.send_unconfirmed(destination, &request) {
            Ok(()) => tracing::debug!(
                "Sent Who-Is to {} (low={:?}, high={:?})",
                destination,
                low_limit,
                high_limit
            ),
            Err(e) => tracing::warn!("Who-Is send failed: {}", e),
        }
    }

    /// Allocate an invoke id and send a confirmed request
    fn start_transaction(&mut self, destination: Mac, request: ConfirmedRequest, responder: Responder) {
        let Some(invoke_id) = self.next_invoke_id() else {
            tracing::warn!("No free invoke id for {} to {}", request.service_name(), destination);
            self.complete(
                responder,
                Err(TransactionFailure::Link("no free invoke id".to_string())),
            );
            return;
        };

        if let Err(e) = self.link.send_confirmed(destination, invoke_id, &request) {
            tracing::warn!("{} to {} failed: {}", request.service_name(), destination, e);
            self.complete(responder, Err(TransactionFailure::Link(e.to_string())));
            return;
        }

        tracing::debug!(
            "Sent {} to {} (invoke_id={})",
            request.service_name(),
            destination,
            invoke_id
        );
        self.pending.insert(
            invoke_id,
            PendingTransaction {
                destination,
                service: request.service_name(),
                sent_at: Instant::now(),
                responder,
            },
        );
    }

    /// Deliver an outcome; walks continue with their next read
    fn complete(&mut self, responder: Responder, outcome: Result<Acknowledgement, TransactionFailure>) {
        match responder {
            Responder::Reply(reply) => {
                let _ = reply.send(outcome);
            }
            Responder::Walk(mut walk) => {
                if let Some(next) = walk.on_reply(outcome) {
                    let destination = walk.destination();
                    self.start_transaction(destination, next, Responder::Walk(walk));
                }
            }
        }
    }

    /// Poll the link for one indication
    fn poll_incoming(&mut self, timeout: Duration) {
        match self.link.receive(timeout) {
            Ok(Some(indication)) => self.handle_indication(indication),
            Ok(None) => {
                // Normal timeout, nothing to do
            }
            Err(e) => {
                tracing::trace!("Receive error: {}", e);
                thread::sleep(timeout);
            }
        }
    }

    fn handle_indication(&mut self, indication: Indication) {
        match indication {
            Indication::IAm { source, payload } => self.handle_iam(source, payload),
            Indication::Completion {
                source,
                invoke_id,
                outcome,
            } => self.handle_completion(source, invoke_id, outcome),
        }
    }

    /// Cache the announcing device and hand it to every open discovery
    fn handle_iam(&mut self, source: Option<Mac>, payload: IAmPayload) {
        // Only care about Device objects
        if payload.device_identifier.object_type != ObjectType::DEVICE {
            return;
        }

        let record = DeviceRecord {
            device_instance: payload.device_identifier.instance,
            max_apdu: payload.max_apdu_length_accepted,
            segmentation: payload.segmentation.to_string(),
            vendor_id: payload.vendor_id,
            source_mac: source,
        };
        tracing::debug!(
            "I-Am from device {} at {:?} (vendor={})",
            record.device_instance,
            source,
            record.vendor_id
        );
        self.cache.put(record.clone());

        self.listeners.retain(|listener, sender| match sender.try_send(record.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Discovery {} queue full, dropped I-Am from device {}",
                    listener,
                    record.device_instance
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn handle_completion(
        &mut self,
        source: Mac,
        invoke_id: InvokeId,
        outcome: Result<Acknowledgement, TransactionFailure>,
    ) {
        let matches = self
            .pending
            .get(&invoke_id)
            .map(|pending| pending.destination == source)
            .unwrap_or(false);
        if !matches {
            tracing::debug!("Received completion for unknown invoke_id {} from {}", invoke_id, source);
            return;
        }
        let Some(pending) = self.pending.remove(&invoke_id) else {
            return;
        };

        match &outcome {
            Ok(ack) => tracing::debug!(
                "{} from {} for {} (invoke_id={})",
                ack.kind(),
                source,
                pending.service,
                invoke_id
            ),
            Err(failure) => tracing::warn!(
                "{} to {} failed: {} (invoke_id={})",
                pending.service,
                source,
                failure,
                invoke_id
            ),
        }
        self.complete(pending.responder, outcome);
    }

    /// Fail transactions older than `timeout`
    fn check_timeouts(&mut self, timeout: Duration) {
        let now = Instant::now();
        let timed_out: Vec<InvokeId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.sent_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for invoke_id in timed_out {
            if let Some(pending) = self.pending.remove(&invoke_id) {
                tracing::warn!(
                    "Request timeout: invoke_id={}, destination={}, service={}",
                    invoke_id,
                    pending.destination,
                    pending.service
                );
                self.complete(pending.responder, Err(TransactionFailure::Timeout));
            }
        }
    }

    /// Fail everything in flight without continuing any walk
    fn fail_all(&mut self, failure: TransactionFailure) {
        for (_, pending) in self.pending.drain() {
            match pending.responder {
                Responder::Reply(reply) => {
                    let _ = reply.send(Err(failure.clone()));
                }
                Responder::Walk(mut walk) => walk.fail(failure.clone()),
            }
        }
    }

    /// Next unused invoke ID, round-robin
    fn next_invoke_id(&mut self) -> Option<InvokeId> {
        for _ in 0..=u8::MAX as usize {
            let id = self.invoke_id;
            self.invoke_id = self.invoke_id.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}
