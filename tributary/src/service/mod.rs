//! The lifecycle shared by every stream-owning component.
//!
//! A service moves forward through [ServiceStatus] and never back. The
//! first error recorded is kept, and every status change is announced to
//! registered receivers from a freshly spawned task, so a receiver that
//! takes its own lock can never deadlock the service that notified it.
//! [CompositeService] builds a tree of services on top of this.

mod composite;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub use composite::CompositeService;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{WireError, WireResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceStatus {
    Uninitialized,
    Starting,
    Active,
    Terminating,
    Terminated,
}

/// Identifies a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(u64);

impl ServiceHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub type StatusChangeReceiver =
    Arc<dyn Fn(ServiceHandle, ServiceStatus, Option<WireError>) + Send + Sync>;

/// Behaviour common to publishers, subscribers and their internals.
pub trait Service: Send + Sync + 'static {
    fn start(&self);
    fn stop(&self);
    fn status(&self) -> ServiceStatus;
    fn error(&self) -> Option<WireError>;
    fn handle(&self) -> ServiceHandle;
    fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver);
    fn remove_status_change_receiver(&self, handle: ServiceHandle);
}

/// Lifecycle state embedded in each service's own lock.
pub struct AbstractService {
    handle: ServiceHandle,
    status: ServiceStatus,
    error: Option<WireError>,
    receivers: Vec<(ServiceHandle, StatusChangeReceiver)>,
    watch: watch::Sender<ServiceStatus>,
}

impl Default for AbstractService {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractService {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(ServiceStatus::Uninitialized);
        Self {
            handle: ServiceHandle::next(),
            status: ServiceStatus::Uninitialized,
            error: None,
            receivers: vec![],
            watch,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn error(&self) -> Option<WireError> {
        self.error.clone()
    }

    pub fn add_receiver(&mut self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.receivers.push((handle, receiver));
    }

    pub fn remove_receiver(&mut self, handle: ServiceHandle) {
        self.receivers.retain(|(h, _)| *h != handle);
    }

    /// Subscribe to status changes, e.g. to wait for a target status.
    pub fn watch(&self) -> watch::Receiver<ServiceStatus> {
        self.watch.subscribe()
    }

    /// Whether the service can currently accept work.
    pub fn check_status(&self) -> WireResult<()> {
        match self.status {
            ServiceStatus::Uninitialized => Err(WireError::ServiceUninitialized),
            ServiceStatus::Starting => Err(WireError::ServiceStarting),
            ServiceStatus::Active => Ok(()),
            ServiceStatus::Terminating | ServiceStatus::Terminated => {
                Err(self.error.clone().unwrap_or(WireError::ServiceStopped))
            }
        }
    }

    /// Move forward to `target`, keeping the first error. Returns false if
    /// the service is already at or past `target`.
    pub fn update_status(&mut self, target: ServiceStatus, err: Option<WireError>) -> bool {
        if self.status >= target {
            return false;
        }
        if self.error.is_none() {
            self.error = err;
        }
        trace!("Service {:?} moved to {:?}", self.handle, target);
        self.status = target;
        self.watch.send_replace(target);
        for (handle, receiver) in &self.receivers {
            let receiver = Arc::clone(receiver);
            let handle = *handle;
            let error = self.error.clone();
            let service = self.handle;
            tokio::spawn(async move {
                trace!("Notifying {:?} of {:?}", handle, service);
                receiver(service, target, error)
            });
        }
        true
    }
}

/// Wait until the watched service reaches `target` (or the service is
/// dropped).
pub async fn wait_for_status(mut watch: watch::Receiver<ServiceStatus>, target: ServiceStatus) {
    loop {
        let status = *watch.borrow_and_update();
        if status >= target {
            return;
        }
        if watch.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    /// Records every status change a service announces.
    pub struct StatusRecorder {
        pub handle: ServiceHandle,
        rx: mpsc::UnboundedReceiver<(ServiceStatus, Option<WireError>)>,
    }

    impl StatusRecorder {
        pub fn attach(service: &dyn Service) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = ServiceHandle::next();
            service.add_status_change_receiver(
                handle,
                Arc::new(move |_, status, err| {
                    let _ = tx.send((status, err));
                }),
            );
            Self { handle, rx }
        }

        /// Wait for the service to reach `target`, returning its error.
        pub async fn wait_for(&mut self, target: ServiceStatus) -> Option<WireError> {
            loop {
                let next = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                    .await
                    .expect("timed out waiting for status")
                    .expect("status receiver closed");
                if next.0 >= target {
                    return next.1;
                }
            }
        }
    }
}
