use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::{
    wait_for_status, AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver,
};
use crate::error::{WireError, WireResult};

struct CompositeState {
    service: AbstractService,
    dependencies: Vec<Arc<dyn Service>>,
    /// Children removed while still running. They are tracked until they
    /// terminate.
    removed: Vec<Arc<dyn Service>>,
}

impl CompositeState {
    fn all_dependencies_active(&self) -> bool {
        self.dependencies
            .iter()
            .all(|s| s.status() == ServiceStatus::Active)
    }

    fn all_children_terminated(&self) -> bool {
        self.removed.is_empty()
            && self
                .dependencies
                .iter()
                .all(|s| s.status() == ServiceStatus::Terminated)
    }
}

/// A service composed of child services. It is active once every child is
/// active and terminated once every child, including removed ones, has
/// terminated. When one child stops, all of its siblings are stopped.
pub struct CompositeService {
    weak: Weak<Self>,
    state: Mutex<CompositeState>,
}

impl CompositeService {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            state: Mutex::new(CompositeState {
                service: AbstractService::new(),
                dependencies: vec![],
                removed: vec![],
            }),
        })
    }

    /// Add children, starting them if this service has been started.
    pub fn add_services(&self, services: Vec<Arc<dyn Service>>) -> WireResult<()> {
        let mut state = self.state.lock();
        if state.service.status() >= ServiceStatus::Terminating {
            return Err(WireError::ServiceStopped);
        }
        for service in services {
            // Status updates of an already started child could be missed.
            if service.status() != ServiceStatus::Uninitialized {
                return Err(WireError::ChildServiceStarted);
            }
            service.add_status_change_receiver(state.service.handle(), self.child_receiver());
            if state.service.status() > ServiceStatus::Uninitialized {
                service.start();
            }
            state.dependencies.push(service);
        }
        Ok(())
    }

    /// Stop tracking a child as a dependency. It is still waited on if this
    /// service is shutting down.
    pub fn remove_service(&self, handle: ServiceHandle) {
        let mut state = self.state.lock();
        let Some(idx) = state.dependencies.iter().position(|s| s.handle() == handle) else {
            return;
        };
        let service = state.dependencies.remove(idx);
        if service.status() != ServiceStatus::Terminated {
            state.removed.push(service);
        }
    }

    /// Move to `target` and stop all children.
    pub fn initiate_shutdown(&self, target: ServiceStatus, err: Option<WireError>) {
        let mut state = self.state.lock();
        Self::shutdown_locked(&mut state, target, err);
    }

    fn shutdown_locked(state: &mut CompositeState, target: ServiceStatus, err: Option<WireError>) {
        if state.service.update_status(target, err) {
            debug!("Composite service {:?} shutting down", state.service.handle());
        }
        for service in &state.dependencies {
            service.stop();
        }
        if state.all_children_terminated() {
            state.service.update_status(ServiceStatus::Terminated, None);
        }
    }

    fn child_receiver(&self) -> StatusChangeReceiver {
        let weak = self.weak.clone();
        Arc::new(move |handle, status, err| {
            if let Some(composite) = weak.upgrade() {
                composite.on_child_status_change(handle, status, err);
            }
        })
    }

    fn on_child_status_change(
        &self,
        handle: ServiceHandle,
        status: ServiceStatus,
        err: Option<WireError>,
    ) {
        let mut state = self.state.lock();

        if let Some(idx) = state.removed.iter().position(|s| s.handle() == handle) {
            if status == ServiceStatus::Terminated {
                state.removed.remove(idx);
                if state.service.status() == ServiceStatus::Terminating
                    && state.all_children_terminated()
                {
                    state.service.update_status(ServiceStatus::Terminated, None);
                }
            }
            return;
        }
        if !state.dependencies.iter().any(|s| s.handle() == handle) {
            return;
        }

        match status {
            ServiceStatus::Active => {
                if state.service.status() == ServiceStatus::Starting
                    && state.all_dependencies_active()
                {
                    state.service.update_status(ServiceStatus::Active, None);
                }
            }
            ServiceStatus::Terminating => {
                Self::shutdown_locked(&mut state, ServiceStatus::Terminating, err);
            }
            ServiceStatus::Terminated => {
                if state.all_children_terminated() {
                    state.service.update_status(ServiceStatus::Terminated, err);
                } else {
                    Self::shutdown_locked(&mut state, ServiceStatus::Terminating, err);
                }
            }
            ServiceStatus::Uninitialized | ServiceStatus::Starting => {}
        }
    }

    pub fn watch(&self) -> watch::Receiver<ServiceStatus> {
        self.state.lock().service.watch()
    }

    /// Wait until every child is active. Returns the error if the service
    /// stopped first.
    pub async fn wait_started(&self) -> WireResult<()> {
        wait_for_status(self.watch(), ServiceStatus::Active).await;
        let state = self.state.lock();
        match (state.service.status(), state.service.error()) {
            (_, Some(err)) => Err(err),
            (ServiceStatus::Active, None) => Ok(()),
            _ => Err(WireError::ServiceStopped),
        }
    }

    /// Wait until every child has terminated, returning the first error.
    pub async fn wait_stopped(&self) -> WireResult<()> {
        wait_for_status(self.watch(), ServiceStatus::Terminated).await;
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn check_status(&self) -> WireResult<()> {
        self.state.lock().service.check_status()
    }
}

impl Service for CompositeService {
    fn start(&self) {
        let mut state = self.state.lock();
        if state.service.update_status(ServiceStatus::Starting, None) {
            for service in &state.dependencies {
                service.start();
            }
        }
    }

    fn stop(&self) {
        self.initiate_shutdown(ServiceStatus::Terminating, None);
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().service.status()
    }

    fn error(&self) -> Option<WireError> {
        self.state.lock().service.error()
    }

    fn handle(&self) -> ServiceHandle {
        self.state.lock().service.handle()
    }

    fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.state.lock().service.add_receiver(handle, receiver);
    }

    fn remove_status_change_receiver(&self, handle: ServiceHandle) {
        self.state.lock().service.remove_receiver(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    /// A child whose transitions are driven by the test.
    struct TestService {
        state: Mutex<AbstractService>,
    }

    impl TestService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(AbstractService::new()),
            })
        }

        fn update(&self, status: ServiceStatus, err: Option<WireError>) {
            self.state.lock().update_status(status, err);
        }
    }

    impl Service for TestService {
        fn start(&self) {
            self.update(ServiceStatus::Starting, None);
        }
        fn stop(&self) {
            self.update(ServiceStatus::Terminating, None);
        }
        fn status(&self) -> ServiceStatus {
            self.state.lock().status()
        }
        fn error(&self) -> Option<WireError> {
            self.state.lock().error()
        }
        fn handle(&self) -> ServiceHandle {
            self.state.lock().handle()
        }
        fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
            self.state.lock().add_receiver(handle, receiver)
        }
        fn remove_status_change_receiver(&self, handle: ServiceHandle) {
            self.state.lock().remove_receiver(handle)
        }
    }

    async fn wait(composite: &CompositeService, target: ServiceStatus) {
        timeout(Duration::from_secs(5), wait_for_status(composite.watch(), target))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_active_once_all_children_active() {
        let composite = CompositeService::new();
        let (a, b) = (TestService::new(), TestService::new());
        composite.add_services(vec![a.clone(), b.clone()]).unwrap();
        composite.start();
        assert_eq!(a.status(), ServiceStatus::Starting);
        assert_eq!(b.status(), ServiceStatus::Starting);

        a.update(ServiceStatus::Active, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(composite.status(), ServiceStatus::Starting);

        b.update(ServiceStatus::Active, None);
        composite.wait_started().await.unwrap();

        // children added later are started immediately
        let c = TestService::new();
        composite.add_services(vec![c.clone()]).unwrap();
        assert_eq!(c.status(), ServiceStatus::Starting);
    }

    #[tokio::test]
    async fn test_fail_together() {
        let composite = CompositeService::new();
        let (a, b) = (TestService::new(), TestService::new());
        composite.add_services(vec![a.clone(), b.clone()]).unwrap();
        composite.start();

        a.update(ServiceStatus::Terminated, Some(WireError::OutOfOrderMessages));
        wait(&composite, ServiceStatus::Terminating).await;
        // the sibling is asked to stop but may flush first
        assert_eq!(b.status(), ServiceStatus::Terminating);
        assert_eq!(composite.status(), ServiceStatus::Terminating);

        b.update(ServiceStatus::Terminated, None);
        let result = timeout(Duration::from_secs(5), composite.wait_stopped())
            .await
            .unwrap();
        assert_eq!(result, Err(WireError::OutOfOrderMessages));
        assert_eq!(
            composite.wait_started().await,
            Err(WireError::OutOfOrderMessages)
        );
    }

    #[tokio::test]
    async fn test_add_started_child() {
        let composite = CompositeService::new();
        let child = TestService::new();
        child.start();
        assert_eq!(
            composite.add_services(vec![child]),
            Err(WireError::ChildServiceStarted)
        );

        composite.stop();
        assert_eq!(composite.status(), ServiceStatus::Terminated);
        assert_eq!(
            composite.add_services(vec![TestService::new()]),
            Err(WireError::ServiceStopped)
        );
    }

    #[tokio::test]
    async fn test_removed_child_is_waited_on() {
        let composite = CompositeService::new();
        let (a, b) = (TestService::new(), TestService::new());
        composite.add_services(vec![a.clone(), b.clone()]).unwrap();
        composite.start();

        b.stop();
        composite.remove_service(b.handle());
        tokio::time::sleep(Duration::from_millis(20)).await;
        // removing a child must not fail its siblings
        assert_eq!(composite.status(), ServiceStatus::Starting);

        composite.stop();
        a.update(ServiceStatus::Terminated, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(composite.status(), ServiceStatus::Terminating);

        b.update(ServiceStatus::Terminated, None);
        wait(&composite, ServiceStatus::Terminated).await;
        assert_eq!(composite.wait_stopped().await, Ok(()));
    }
}
