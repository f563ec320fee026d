//! Device discovery
//!
//! Who-Is / I-Am. Each call registers its own listener with the engine, so
//! concurrent discoveries never see each other's stale replies.

use std::collections::HashMap;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::error::ClientResult;
use crate::session::Session;
use crate::types::{Destination, DeviceRecord, Mac, BROADCAST_MAC, MAX_INSTANCE};

impl Session {
    /// Send Who-Is and collect I-Am replies until `timeout` elapses
    ///
    /// With `destination` the Who-Is goes to that station only, otherwise it
    /// is broadcast. When only one instance limit is given the other end of
    /// the range is opened up. Replies are deduplicated by device instance
    /// (the last reply wins) and returned sorted by instance; an empty list
    /// is a valid result.
    pub fn discover_devices(
        &self,
        timeout: Duration,
        destination: Option<Mac>,
        low_limit: Option<u32>,
        high_limit: Option<u32>,
    ) -> ClientResult<Vec<DeviceRecord>> {
        let engine = self.engine()?;
        let destination = match destination {
            Some(mac) if mac != BROADCAST_MAC => Destination::Station(mac),
            _ => Destination::Broadcast,
        };
        let (low_limit, high_limit) = instance_range(low_limit, high_limit);

        let deadline = Instant::now() + timeout;
        let Some((listener, replies)) = engine.start_discovery(destination, low_limit, high_limit) else {
            tracing::warn!("Engine stopped before discovery could start");
            return Ok(Vec::new());
        };
        tracing::info!(
            "Discovery window opened: destination={}, range={:?}..{:?}, timeout={:?}",
            destination,
            low_limit,
            high_limit,
            timeout
        );

        let mut found: HashMap<u32, DeviceRecord> = HashMap::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match replies.recv_timeout(remaining) {
                Ok(record) => {
                    tracing::debug!("Discovered device {} at {:?}", record.device_instance, record.source_mac);
                    found.insert(record.device_instance, record);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Engine stopped during discovery");
                    break;
                }
            }
        }
        engine.end_discovery(listener);

        let mut devices: Vec<DeviceRecord> = found.into_values().collect();
        devices.sort_by_key(|d| d.device_instance);
        tracing::info!("Discovery window closed: {} device(s)", devices.len());
        Ok(devices)
    }
}

/// Who-Is carries both limits or neither
fn instance_range(low: Option<u32>, high: Option<u32>) -> (Option<u32>, Option<u32>) {
    match (low, high) {
        (None, None) => (None, None),
        (low, high) => (
            Some(low.unwrap_or(0).min(MAX_INSTANCE)),
            Some(high.unwrap_or(MAX_INSTANCE).min(MAX_INSTANCE)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::error::ClientError;
    use crate::link::UnconfirmedRequest;
    use crate::testing::{ScriptedLink, Sent};
    use std::sync::Arc;
    use std::thread;

    fn started(link: &ScriptedLink) -> Session {
        let session = Session::new(link.clone());
        session.ensure_started(&SessionConfig::new(1, "/dev/ttyS1")).unwrap();
        session
    }

    fn instances(devices: &[DeviceRecord]) -> Vec<u32> {
        devices.iter().map(|d| d.device_instance).collect()
    }

    #[test]
    fn test_instance_range() {
        assert_eq!(instance_range(None, None), (None, None));
        assert_eq!(instance_range(Some(10), None), (Some(10), Some(MAX_INSTANCE)));
        assert_eq!(instance_range(None, Some(10)), (Some(0), Some(10)));
        assert_eq!(instance_range(Some(5), Some(u32::MAX)), (Some(5), Some(MAX_INSTANCE)));
    }

    #[test]
    fn test_discover_requires_started_session() {
        let session = Session::new(ScriptedLink::new());
        assert_eq!(
            session.discover_devices(Duration::from_millis(10), None, None, None),
            Err(ClientError::NotStarted)
        );
    }

    #[test]
    fn test_broadcast_discovery_finds_devices() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        link.add_device(7, 700, &[]);
        link.add_device(5, 500, &[]);
        let session = started(&link);

        let devices = session
            .discover_devices(Duration::from_millis(200), None, None, None)
            .unwrap();
        assert_eq!(instances(&devices), vec![300, 500, 700]);
        assert_eq!(devices[0].source_mac, Some(3));
        assert_eq!(devices[0].vendor_id, 260);
        assert_eq!(devices[0].segmentation, "noSegmentation");
        assert_eq!(session.cache().len(), 3);
        assert_eq!(session.cache().get_transport_address(700), Some(7));
    }

    #[test]
    fn test_duplicate_instances_collapse() {
        let link = ScriptedLink::new();
        link.add_device(3, 100, &[]);
        link.add_device(4, 100, &[]);
        let session = started(&link);

        let devices = session
            .discover_devices(Duration::from_millis(200), None, None, None)
            .unwrap();
        assert_eq!(devices.len(), 1);
        // Replies arrive in MAC order; the last one wins
        assert_eq!(devices[0].source_mac, Some(4));
    }

    #[test]
    fn test_discovery_respects_timeout() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        let session = started(&link);
        let timeout = Duration::from_millis(150);
        let poll = session.timing().unwrap().poll_interval();

        let started_at = Instant::now();
        session.discover_devices(timeout, None, None, None).unwrap();
        let elapsed = started_at.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + poll, "took {:?}", elapsed);
    }

    #[test]
    fn test_directed_and_ranged_discovery() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        link.add_device(5, 500, &[]);
        link.add_device(7, 700, &[]);
        let session = started(&link);

        let directed = session
            .discover_devices(Duration::from_millis(100), Some(5), None, None)
            .unwrap();
        assert_eq!(instances(&directed), vec![500]);

        let ranged = session
            .discover_devices(Duration::from_millis(100), None, Some(400), None)
            .unwrap();
        assert_eq!(instances(&ranged), vec![500, 700]);

        let who_is: Vec<_> = link
            .sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Unconfirmed {
                    destination,
                    request: UnconfirmedRequest::WhoIs { low_limit, high_limit },
                } => Some((destination, low_limit, high_limit)),
                _ => None,
            })
            .collect();
        assert_eq!(
            who_is,
            vec![
                (Destination::Station(5), None, None),
                (Destination::Broadcast, Some(400), Some(MAX_INSTANCE)),
            ]
        );
    }

    #[test]
    fn test_reply_between_windows_is_not_reported() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        let session = started(&link);

        let first = session
            .discover_devices(Duration::from_millis(100), None, None, None)
            .unwrap();
        assert_eq!(instances(&first), vec![300]);

        // Late I-Am with no discovery open; it only reaches the cache
        link.inject_iam(9, 900);
        let deadline = Instant::now() + Duration::from_secs(1);
        while session.cache().get(900).is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.cache().get_transport_address(900), Some(9));

        let second = session
            .discover_devices(Duration::from_millis(100), None, None, None)
            .unwrap();
        assert_eq!(instances(&second), vec![300]);
    }

    #[test]
    fn test_silent_segment_returns_empty() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        link.silence(3);
        let session = started(&link);

        let devices = session
            .discover_devices(Duration::from_millis(50), None, None, None)
            .unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_concurrent_discoveries_each_see_replies() {
        let link = ScriptedLink::new();
        link.add_device(3, 300, &[]);
        link.add_device(5, 500, &[]);
        let session = Arc::new(started(&link));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    session
                        .discover_devices(Duration::from_millis(200), None, None, None)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(instances(&handle.join().unwrap()), vec![300, 500]);
        }
    }
}
