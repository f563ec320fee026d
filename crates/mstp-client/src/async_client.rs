//! Async facade
//!
//! Runs the blocking session operations on tokio's blocking pool so they can
//! be awaited from async code without stalling the runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;

use crate::client::PropertyReading;
use crate::config::SessionConfig;
use crate::enumerate::EnumerationResult;
use crate::error::{ClientError, ClientResult, SessionError};
use crate::session::Session;
use crate::types::{DeviceRecord, Mac};

fn task_error(e: JoinError) -> ClientError {
    ClientError::Task(e.to_string())
}

/// Cloneable async handle to a [`Session`]
#[derive(Debug, Clone)]
pub struct AsyncClient {
    session: Arc<Session>,
}

impl AsyncClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn ensure_started(&self, config: SessionConfig) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || session.ensure_started(&config))
            .await
            .map_err(|e| SessionError::EngineLaunch(format!("Task error: {}", e)))?
    }

    pub async fn shutdown(&self) {
        let session = Arc::clone(&self.session);
        if let Err(e) = tokio::task::spawn_blocking(move || session.shutdown()).await {
            tracing::warn!("Session shutdown task failed: {}", e);
        }
    }

    pub fn announce(&self) -> ClientResult<bool> {
        self.session.announce()
    }

    pub async fn discover_devices(
        &self,
        timeout: Duration,
        destination: Option<Mac>,
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    ) -> ClientResult<Vec<DeviceRecord>> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || session.discover_devices(timeout, destination, low_limit, high_limit))
            .await
            .map_err(task_error)?
    }

    pub async fn read_property(
        &self,
        address: Mac,
        object_type: &str,
        object_instance: u32,
        property: &str,
        index: Option<u32>,
    ) -> ClientResult<PropertyReading> {
        let session = Arc::clone(&self.session);
        let object_type = object_type.to_string();
        let property = property.to_string();
        tokio::task::spawn_blocking(move || {
            session.read_property(address, &object_type, object_instance, &property, index)
        })
        .await
        .map_err(task_error)?
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write_property(
        &self,
        address: Mac,
        object_type: &str,
        object_instance: u32,
        property: &str,
        value: &str,
        index: Option<u32>,
        priority: Option<u8>,
    ) -> ClientResult<()> {
        let session = Arc::clone(&self.session);
        let object_type = object_type.to_string();
        let property = property.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            session.write_property(address, &object_type, object_instance, &property, &value, index, priority)
        })
        .await
        .map_err(task_error)?
    }

    pub async fn enumerate_objects(&self, address: Mac, device_instance: u32, timeout: Duration) -> EnumerationResult {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || session.enumerate_objects(address, device_instance, timeout))
            .await
            .unwrap_or_else(|e| EnumerationResult {
                objects: Vec::new(),
                error: Some(task_error(e)),
            })
    }
}
