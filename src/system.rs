use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::actor::{Actor, ActorId};
use crate::address::{Address, Mailbox, SupervisorId};
use crate::backend::{Backend, PumpHandle};
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorCore};

/// Root holder of the runtime: creates supervisors and keeps a registry so
/// they can unregister when they shut down.
pub struct SystemContext {
    inner: Arc<SystemInner>,
}

pub(crate) struct SystemInner {
    supervisors: Mutex<HashMap<SupervisorId, Weak<Mutex<SupervisorCore>>>>,
}

impl SystemInner {
    pub(crate) fn unregister(&self, id: SupervisorId) {
        self.supervisors.lock().remove(&id);
    }
}

impl SystemContext {
    pub fn new() -> Self {
        SystemContext {
            inner: Arc::new(SystemInner {
                supervisors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a supervisor with a no-op root actor.
    pub fn create_supervisor(
        &self,
        config: SupervisorConfig,
        backend: Arc<dyn Backend>,
    ) -> Supervisor {
        self.create_supervisor_with((), config, backend)
    }

    /// Creates a supervisor whose own cell wraps `root`, letting the caller
    /// hook the supervisor's lifecycle the same way actors do.
    pub fn create_supervisor_with<S: Actor>(
        &self,
        root: S,
        config: SupervisorConfig,
        backend: Arc<dyn Backend>,
    ) -> Supervisor {
        let mailbox = match &config.locality {
            Some(locality) => locality.mailbox.clone(),
            None => Mailbox::new(),
        };
        let id = SupervisorId::next();
        let address = Address::new(id, mailbox.clone(), None);
        let own_id = ActorId::next();
        let core = Arc::new(Mutex::new(SupervisorCore::new(
            id,
            address.clone(),
            mailbox.clone(),
            config,
            backend.clone(),
            Arc::downgrade(&self.inner),
            own_id,
        )));
        mailbox.register_member(id, Arc::downgrade(&core));
        self.inner
            .supervisors
            .lock()
            .insert(id, Arc::downgrade(&core));
        core.lock().install_self(Box::new(root));
        backend.attach(PumpHandle::new(
            mailbox.clone(),
            address.clone(),
            Arc::downgrade(&core),
        ));
        backend.wake();
        Supervisor::from_parts(core, mailbox, address, backend)
    }

    /// Number of live supervisors still registered.
    pub fn supervisor_count(&self) -> usize {
        self.inner.supervisors.lock().len()
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}
