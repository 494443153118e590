//! Interface to the microservices a session can start and stop
//!
//! The concrete services (proxies, forwarders, shells) live outside the
//! control plane. They plug in through a `ServiceFactory` built at startup.

use burrow_proto::Parameters;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::lifecycle::StartError;
use crate::registry::RegistryError;

/// A service instance that can be started and stopped remotely
pub trait Microservice: Send {
    fn start(&mut self) -> Result<(), String>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Builds a service instance from its parameters
pub type ServiceConstructor =
    Arc<dyn Fn(&Parameters) -> Result<Box<dyn Microservice>, String> + Send + Sync>;

/// Maps service type ids to constructors
///
/// Built once at startup and shared read-only by every session.
#[derive(Clone, Default)]
pub struct ServiceFactory {
    constructors: HashMap<u32, ServiceConstructor>,
}

impl ServiceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a service type
    ///
    /// # Errors
    ///
    /// Fails if the service type already has a constructor.
    pub fn register<F>(&mut self, service_type: u32, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn(&Parameters) -> Result<Box<dyn Microservice>, String> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(&service_type) {
            return Err(RegistryError::DuplicateServiceType(service_type));
        }
        self.constructors.insert(service_type, Arc::new(constructor));
        Ok(())
    }

    /// Construct (but do not start) an instance of `service_type`
    pub fn create(
        &self,
        service_type: u32,
        parameters: &Parameters,
    ) -> Result<Box<dyn Microservice>, StartError> {
        let constructor = self
            .constructors
            .get(&service_type)
            .ok_or(StartError::UnknownServiceType(service_type))?;
        constructor(parameters).map_err(StartError::StartFailed)
    }

    pub fn service_types(&self) -> Vec<u32> {
        let mut types: Vec<u32> = self.constructors.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("service_types", &self.service_types())
            .finish()
    }
}

/// A microservice backed by a spawned tokio task
///
/// Starting spawns the task, stopping aborts it.
pub struct TaskService {
    make_task: Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>,
    handle: Option<JoinHandle<()>>,
}

impl TaskService {
    pub fn new<F, Fut>(mut make_task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            make_task: Box::new(move || Box::pin(make_task())),
            handle: None,
        }
    }
}

impl Microservice for TaskService {
    fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("no async runtime to run the service on: {}", e))?;
        self.handle = Some(runtime.spawn((self.make_task)()));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Aborting service task");
            handle.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TaskService {
    fn drop(&mut self) {
        self.stop();
    }
}
