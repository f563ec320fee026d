//! Session lifecycle
//!
//! A [`Session`] owns the local device identity, the device cache and the
//! engine thread. Starting is idempotent and safe under concurrent callers;
//! every other operation fails with `NotStarted` until the engine is running.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};

use crate::cache::DeviceCache;
use crate::config::{LocalDevice, SessionConfig, TimingConfig};
use crate::engine::{EngineHandle, EngineWorker};
use crate::error::{ClientError, ClientResult, SessionError};
use crate::link::DataLink;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    Running,
}

struct RunningEngine {
    handle: EngineHandle,
    thread: Option<JoinHandle<Box<dyn DataLink>>>,
    local: LocalDevice,
    timing: TimingConfig,
}

enum Lifecycle {
    NotStarted,
    Starting,
    Running(RunningEngine),
}

/// Client session over one MS/TP link
pub struct Session {
    cache: Arc<DeviceCache>,
    /// Serializes start/shutdown; holds the link while the engine is stopped
    link: Mutex<Option<Box<dyn DataLink>>>,
    lifecycle: RwLock<Lifecycle>,
}

impl Session {
    /// Create a stopped session over `link`
    pub fn new(link: impl DataLink) -> Self {
        Self::with_cache(link, Arc::new(DeviceCache::new()))
    }

    /// Create a stopped session sharing an existing device cache
    pub fn with_cache(link: impl DataLink, cache: Arc<DeviceCache>) -> Self {
        let link: Box<dyn DataLink> = Box::new(link);
        Self {
            cache,
            link: Mutex::new(Some(link)),
            lifecycle: RwLock::new(Lifecycle::NotStarted),
        }
    }

    /// Start the engine unless it is already running
    ///
    /// Only the first caller initializes; concurrent callers wait for it and
    /// then return. Once running, later configs are ignored.
    pub fn ensure_started(&self, config: &SessionConfig) -> Result<(), SessionError> {
        if self.state() == SessionState::Running {
            return Ok(());
        }

        let mut link_slot = self.link.lock();
        if self.state() == SessionState::Running {
            return Ok(());
        }

        let (params, local) = config.resolve()?;
        let mut link = link_slot
            .take()
            .ok_or_else(|| SessionError::EngineLaunch("link is no longer available".to_string()))?;
        *self.lifecycle.write() = Lifecycle::Starting;

        tracing::info!(
            "Starting MS/TP session on {} (mac={}, baud={}, device={})",
            params.interface,
            params.mac,
            params.baudrate,
            local.object_identifier.instance
        );

        if let Err(e) = link.open(&params) {
            tracing::warn!("Failed to open link: {}", e);
            *link_slot = Some(link);
            *self.lifecycle.write() = Lifecycle::NotStarted;
            return Err(SessionError::EngineLaunch(e.to_string()));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let handle = EngineHandle::new(cmd_tx, &config.timing);
        let worker = EngineWorker::new(link, cmd_rx, Arc::clone(&self.cache), local.clone(), config.timing.clone());

        let thread = thread::Builder::new()
            .name("mstp-engine".to_string())
            .spawn(move || worker.run());
        match thread {
            Ok(thread) => {
                *self.lifecycle.write() = Lifecycle::Running(RunningEngine {
                    handle,
                    thread: Some(thread),
                    local,
                    timing: config.timing.clone(),
                });
                tracing::info!("MS/TP session started");
                Ok(())
            }
            Err(e) => {
                *self.lifecycle.write() = Lifecycle::NotStarted;
                Err(SessionError::EngineLaunch(format!("Failed to spawn engine thread: {}", e)))
            }
        }
    }

    /// Stop the engine and close the link; no-op when not running
    ///
    /// The link is kept, so the session can be started again.
    pub fn shutdown(&self) {
        let mut link_slot = self.link.lock();
        let previous = std::mem::replace(&mut *self.lifecycle.write(), Lifecycle::NotStarted);
        let Lifecycle::Running(mut running) = previous else {
            return;
        };

        tracing::info!("Stopping MS/TP session");
        running.handle.shutdown();
        if let Some(thread) = running.thread.take() {
            match thread.join() {
                Ok(link) => *link_slot = Some(link),
                Err(_) => tracing::warn!("MS/TP engine thread panicked; link released"),
            }
        }
        tracing::info!("MS/TP session stopped");
    }

    pub fn state(&self) -> SessionState {
        match *self.lifecycle.read() {
            Lifecycle::NotStarted => SessionState::NotStarted,
            Lifecycle::Starting => SessionState::Starting,
            Lifecycle::Running(_) => SessionState::Running,
        }
    }

    /// Identity the running engine announces
    pub fn local_device(&self) -> Option<LocalDevice> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Some(running.local.clone()),
            _ => None,
        }
    }

    pub fn timing(&self) -> Option<TimingConfig> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Some(running.timing.clone()),
            _ => None,
        }
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.cache
    }

    /// Broadcast the local device's I-Am
    ///
    /// Returns true once the announcement is queued for sending; delivery is
    /// not confirmed.
    pub fn announce(&self) -> ClientResult<bool> {
        let queued = self.engine()?.announce();
        tracing::debug!("I-Am queued: {}", queued);
        Ok(queued)
    }

    pub(crate) fn engine(&self) -> ClientResult<EngineHandle> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Ok(running.handle.clone()),
            _ => Err(ClientError::NotStarted),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("cached_devices", &self.cache.len())
            .finish()
    }
}
