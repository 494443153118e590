//! Registry of the service instances running on behalf of one session
//!
//! Each session owns its own manager, so instance ids are only unique within
//! a session. An id is free again as soon as its instance is stopped.

use burrow_proto::{Parameters, ReplyStatus, ServiceStatus};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::service::{Microservice, ServiceFactory};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("Unknown service type {0}")]
    UnknownServiceType(u32),

    #[error("Service failed to start: {0}")]
    StartFailed(String),

    #[error("Instance id {0} is already in use")]
    IdInUse(u32),
}

impl StartError {
    /// Status code reported to the peer
    pub fn status(&self) -> ReplyStatus {
        match self {
            StartError::UnknownServiceType(_) => ReplyStatus::UnknownServiceType,
            StartError::StartFailed(_) | StartError::IdInUse(_) => ReplyStatus::StartFailed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("Instance {0} not found")]
    NotFound(u32),
}

impl StopError {
    pub fn status(&self) -> ReplyStatus {
        match self {
            StopError::NotFound(_) => ReplyStatus::InstanceNotFound,
        }
    }
}

struct RunningService {
    service_type: u32,
    parameters: Parameters,
    service: Box<dyn Microservice>,
}

/// Starts, stops and reports the service instances of one session
pub struct ServiceLifecycleManager {
    factory: Arc<ServiceFactory>,
    instances: HashMap<u32, RunningService>,
    next_id: u32,
}

impl ServiceLifecycleManager {
    pub fn new(factory: Arc<ServiceFactory>) -> Self {
        Self {
            factory,
            instances: HashMap::new(),
            next_id: 1,
        }
    }

    /// Start a new instance under a freshly allocated id
    pub fn start(&mut self, service_type: u32, parameters: Parameters) -> Result<u32, StartError> {
        let instance_id = self
            .allocate_id()
            .ok_or_else(|| StartError::StartFailed("no free instance id".to_string()))?;
        self.start_with_id(instance_id, service_type, parameters)
    }

    /// Start a new instance under an id chosen by the caller
    ///
    /// Id 0 is reserved and never assigned.
    pub fn start_with_id(
        &mut self,
        instance_id: u32,
        service_type: u32,
        parameters: Parameters,
    ) -> Result<u32, StartError> {
        if instance_id == 0 {
            return Err(StartError::StartFailed("instance id 0 is reserved".to_string()));
        }
        if self.instances.contains_key(&instance_id) {
            warn!(instance_id, "Refusing to start service: id already in use");
            return Err(StartError::IdInUse(instance_id));
        }

        let mut service = self.factory.create(service_type, &parameters)?;
        if let Err(reason) = service.start() {
            warn!(instance_id, service_type, %reason, "Service failed to start");
            return Err(StartError::StartFailed(reason));
        }

        info!(instance_id, service_type, "Service started");
        self.instances.insert(
            instance_id,
            RunningService {
                service_type,
                parameters,
                service,
            },
        );
        Ok(instance_id)
    }

    /// Stop and remove an instance
    ///
    /// Stopping an unknown id (including a second stop of the same id) is an
    /// expected outcome and leaves the manager untouched.
    pub fn stop(&mut self, instance_id: u32) -> Result<(), StopError> {
        match self.instances.remove(&instance_id) {
            Some(mut running) => {
                running.service.stop();
                info!(
                    instance_id,
                    service_type = running.service_type,
                    "Service stopped"
                );
                Ok(())
            }
            None => {
                debug!(instance_id, "Stop requested for unknown instance");
                Err(StopError::NotFound(instance_id))
            }
        }
    }

    pub fn status(&self, instance_id: u32) -> Option<ServiceStatus> {
        self.instances
            .get(&instance_id)
            .map(|running| to_status(instance_id, running))
    }

    /// Status records of every running instance, ordered by id
    pub fn list(&self) -> Vec<ServiceStatus> {
        let mut ids: Vec<u32> = self.instances.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.status(id))
            .collect()
    }

    /// Stop every instance, e.g. when the owning session ends
    pub fn stop_all(&mut self) {
        if self.instances.is_empty() {
            return;
        }
        info!("Stopping {} service instance(s)", self.instances.len());
        for (_, mut running) in self.instances.drain() {
            running.service.stop();
        }
    }

    pub fn contains(&self, instance_id: u32) -> bool {
        self.instances.contains_key(&instance_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn allocate_id(&mut self) -> Option<u32> {
        let mut candidate = self.next_id;
        for _ in 0..=self.instances.len() {
            if candidate == 0 {
                candidate = 1;
            }
            if !self.instances.contains_key(&candidate) {
                self.next_id = candidate.wrapping_add(1);
                return Some(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
        None
    }
}

impl Drop for ServiceLifecycleManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn to_status(instance_id: u32, running: &RunningService) -> ServiceStatus {
    if !running.service.is_running() {
        debug!(instance_id, "Registered instance is no longer running");
    }
    ServiceStatus::new(
        instance_id,
        running.service_type,
        ReplyStatus::Success.code(),
        running.parameters.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts starts and stops so tests can observe effects
    struct Probe {
        running: bool,
        stops: Arc<AtomicUsize>,
    }

    impl Microservice for Probe {
        fn start(&mut self) -> Result<(), String> {
            self.running = true;
            Ok(())
        }
        fn stop(&mut self) {
            self.running = false;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn is_running(&self) -> bool {
            self.running
        }
    }

    struct Broken;

    impl Microservice for Broken {
        fn start(&mut self) -> Result<(), String> {
            Err("bind failed".to_string())
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    const PROBE: u32 = 1;
    const BROKEN: u32 = 2;

    fn manager() -> (ServiceLifecycleManager, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut factory = ServiceFactory::new();
        let counter = stops.clone();
        factory
            .register(PROBE, move |_| {
                Ok(Box::new(Probe {
                    running: false,
                    stops: counter.clone(),
                }) as Box<dyn Microservice>)
            })
            .unwrap();
        factory
            .register(BROKEN, |_| Ok(Box::new(Broken) as Box<dyn Microservice>))
            .unwrap();
        (ServiceLifecycleManager::new(Arc::new(factory)), stops)
    }

    #[test]
    fn test_start_allocates_distinct_ids() {
        let (mut manager, _) = manager();
        let a = manager.start(PROBE, Parameters::new()).unwrap();
        let b = manager.start(PROBE, Parameters::new()).unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_status_reports_type_and_parameters() {
        let (mut manager, _) = manager();
        let mut params = Parameters::new();
        params.insert("port".to_string(), "8080".to_string());

        let id = manager.start(PROBE, params.clone()).unwrap();
        let status = manager.status(id).unwrap();

        assert_eq!(status.instance_id, id);
        assert_eq!(status.service_type, PROBE);
        assert_eq!(status.status(), Some(ReplyStatus::Success));
        assert_eq!(status.parameters, params);
        assert!(manager.status(id + 1).is_none());
    }

    #[test]
    fn test_stop_never_started_is_not_found_and_idempotent() {
        let (mut manager, stops) = manager();
        manager.start(PROBE, Parameters::new()).unwrap();

        for _ in 0..3 {
            assert_eq!(manager.stop(42), Err(StopError::NotFound(42)));
        }
        assert_eq!(manager.len(), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_stop() {
        let (mut manager, stops) = manager();
        let id = manager.start(PROBE, Parameters::new()).unwrap();

        assert_eq!(manager.stop(id), Ok(()));
        assert_eq!(manager.stop(id), Err(StopError::NotFound(id)));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_start_with_id() {
        let (mut manager, _) = manager();

        assert_eq!(manager.start_with_id(7, PROBE, Parameters::new()), Ok(7));
        assert_eq!(
            manager.start_with_id(7, PROBE, Parameters::new()),
            Err(StartError::IdInUse(7))
        );
        assert!(manager.start_with_id(0, PROBE, Parameters::new()).is_err());

        manager.stop(7).unwrap();
        assert_eq!(manager.start_with_id(7, PROBE, Parameters::new()), Ok(7));
    }

    #[test]
    fn test_allocation_skips_ids_in_use() {
        let (mut manager, _) = manager();
        manager.start_with_id(1, PROBE, Parameters::new()).unwrap();
        manager.start_with_id(2, PROBE, Parameters::new()).unwrap();

        assert_eq!(manager.start(PROBE, Parameters::new()), Ok(3));
    }

    #[test]
    fn test_allocation_wraps_past_u32_max() {
        let (mut manager, _) = manager();
        manager.next_id = u32::MAX;

        assert_eq!(manager.start(PROBE, Parameters::new()), Ok(u32::MAX));
        assert_eq!(manager.start(PROBE, Parameters::new()), Ok(1));
    }

    #[test]
    fn test_start_failures() {
        let (mut manager, _) = manager();

        let unknown = manager.start(99, Parameters::new()).unwrap_err();
        assert_eq!(unknown, StartError::UnknownServiceType(99));
        assert_eq!(unknown.status(), ReplyStatus::UnknownServiceType);

        let broken = manager.start(BROKEN, Parameters::new()).unwrap_err();
        assert_eq!(broken, StartError::StartFailed("bind failed".to_string()));
        assert_eq!(broken.status(), ReplyStatus::StartFailed);

        assert!(manager.is_empty());
    }

    #[test]
    fn test_list_and_stop_all() {
        let (mut manager, stops) = manager();
        manager.start_with_id(5, PROBE, Parameters::new()).unwrap();
        manager.start_with_id(3, PROBE, Parameters::new()).unwrap();

        let ids: Vec<u32> = manager.list().iter().map(|s| s.instance_id).collect();
        assert_eq!(ids, vec![3, 5]);

        manager.stop_all();
        assert!(manager.is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_stops_instances() {
        let (mut manager, stops) = manager();
        manager.start(PROBE, Parameters::new()).unwrap();
        drop(manager);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
