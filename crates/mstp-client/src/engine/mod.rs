//! Protocol engine thread
//!
//! One dedicated thread owns the [`DataLink`](crate::link::DataLink): it
//! dispatches requests queued by caller threads, matches completions to their
//! pending transactions by invoke id, fans I-Am announcements out to active
//! discovery listeners and drives object-list walks. Callers talk to it through
//! a cloneable [`EngineHandle`].

mod walk;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::error::TransactionFailure;
use crate::link::{Acknowledgement, ConfirmedRequest};
use crate::types::{Destination, DeviceRecord, Mac};

pub(crate) use walk::{ObjectListWalk, WalkShared};
pub(crate) use worker::EngineWorker;

/// Identifies one discovery call's listener
pub(crate) type ListenerId = u64;

/// Where a transaction's outcome goes
#[derive(Debug)]
pub(crate) enum Responder {
    /// A blocked caller waiting on a single reply
    Reply(SyncSender<Result<Acknowledgement, TransactionFailure>>),
    /// An object-list walk continuing on the engine thread
    Walk(ObjectListWalk),
}

/// Commands sent from caller threads to the engine
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Broadcast the local device's I-Am
    Announce,
    /// Register a listener, then send Who-Is
    Discover {
        listener: ListenerId,
        sender: SyncSender<DeviceRecord>,
        destination: Destination,
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    },
    /// Drop a discovery listener
    EndDiscovery { listener: ListenerId },
    /// Start a confirmed transaction
    Confirmed {
        destination: Mac,
        request: ConfirmedRequest,
        responder: Responder,
    },
    /// Stop the run loop
    Shutdown,
}

/// Caller-side handle to a running engine
#[derive(Debug, Clone)]
pub(crate) struct EngineHandle {
    commands: Sender<EngineCommand>,
    next_listener: Arc<AtomicU64>,
    apdu_timeout: Duration,
    discovery_capacity: usize,
}

impl EngineHandle {
    pub fn new(commands: Sender<EngineCommand>, timing: &TimingConfig) -> Self {
        Self {
            commands,
            next_listener: Arc::new(AtomicU64::new(1)),
            apdu_timeout: timing.apdu_timeout(),
            discovery_capacity: timing.discovery_queue_capacity.max(1),
        }
    }

    /// Queue the local I-Am; true once queued
    pub fn announce(&self) -> bool {
        self.commands.send(EngineCommand::Announce).is_ok()
    }

    /// Open a discovery window and send Who-Is
    ///
    /// Returns `None` if the engine has stopped.
    pub fn start_discovery(
        &self,
        destination: Destination,
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    ) -> Option<(ListenerId, Receiver<DeviceRecord>)> {
        let listener = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::sync_channel(self.discovery_capacity);
        self.commands
            .send(EngineCommand::Discover {
                listener,
                sender,
                destination,
                low_limit,
                high_limit,
            })
            .ok()?;
        Some((listener, receiver))
    }

    pub fn end_discovery(&self, listener: ListenerId) {
        let _ = self.commands.send(EngineCommand::EndDiscovery { listener });
    }

    /// Run one confirmed transaction and block until it completes
    ///
    /// The engine fails the transaction after the APDU timeout; the wait here
    /// is bounded at twice that in case the engine itself stalls.
    pub fn transact(&self, destination: Mac, request: ConfirmedRequest) -> Result<Acknowledgement, TransactionFailure> {
        let (reply, outcome) = mpsc::sync_channel(1);
        self.commands
            .send(EngineCommand::Confirmed {
                destination,
                request,
                responder: Responder::Reply(reply),
            })
            .map_err(|_| TransactionFailure::EngineStopped)?;

        match outcome.recv_timeout(self.apdu_timeout * 2) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(TransactionFailure::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransactionFailure::EngineStopped),
        }
    }

    /// Start walking a device's object list
    pub fn start_walk(&self, destination: Mac, device_instance: u32) -> Result<Arc<WalkShared>, TransactionFailure> {
        let shared = Arc::new(WalkShared::default());
        let walk = ObjectListWalk::new(destination, device_instance, Arc::clone(&shared));
        let request = walk.first_request();
        self.commands
            .send(EngineCommand::Confirmed {
                destination,
                request,
                responder: Responder::Walk(walk),
            })
            .map_err(|_| TransactionFailure::EngineStopped)?;
        Ok(shared)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
    }
}
