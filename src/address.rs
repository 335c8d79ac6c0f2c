use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::message::{AnyMessage, Payload};
use crate::supervisor::SupervisorCore;

static NEXT_ADDRESS_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUPERVISOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressId(u64);

impl AddressId {
    pub(crate) fn next() -> Self {
        AddressId(NEXT_ADDRESS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Process-unique identity of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupervisorId(u64);

impl SupervisorId {
    pub(crate) fn next() -> Self {
        SupervisorId(NEXT_SUPERVISOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wake side of a backend: invoked whenever work lands in the queue so the
/// backend can schedule a pump run. Installed once per leader mailbox.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// FIFO intake shared by every supervisor of a locality. The queue lock is
/// the only synchronization crossed by a send; dispatch state stays private
/// to each member supervisor.
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<AnyMessage>>,
    members: Mutex<HashMap<SupervisorId, Weak<Mutex<SupervisorCore>>>>,
    waker: Mutex<Option<Weak<dyn Wake>>>,
}

impl Mailbox {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Mailbox {
            queue: Mutex::new(VecDeque::new()),
            members: Mutex::new(HashMap::new()),
            waker: Mutex::new(None),
        })
    }

    pub(crate) fn push(&self, message: AnyMessage) {
        self.queue.lock().push_back(message);
    }

    pub(crate) fn pop(&self) -> Option<AnyMessage> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn register_member(&self, id: SupervisorId, core: Weak<Mutex<SupervisorCore>>) {
        self.members.lock().insert(id, core);
    }

    pub(crate) fn remove_member(&self, id: SupervisorId) {
        self.members.lock().remove(&id);
    }

    pub(crate) fn member(&self, id: SupervisorId) -> Option<Arc<Mutex<SupervisorCore>>> {
        self.members.lock().get(&id).and_then(Weak::upgrade)
    }

    /// First backend to attach wins; co-located members pump through the
    /// leader's backend.
    pub(crate) fn set_waker(&self, waker: Weak<dyn Wake>) {
        let mut slot = self.waker.lock();
        if slot.is_none() {
            *slot = Some(waker);
        }
    }

    pub(crate) fn wake(&self) {
        let waker = self.waker.lock().as_ref().and_then(Weak::upgrade);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

struct AddressInner {
    id: AddressId,
    owner: SupervisorId,
    intake: Arc<Mailbox>,
    /// `None` on a supervisor's primary address, which is its own routing
    /// point for framework control messages.
    supervisor_address: Option<Address>,
}

/// Routing identity owned by a supervisor.
///
/// Addresses are reference-counted and compare by identity, not content.
/// An address outlives its subscriptions but not its owning supervisor:
/// once the supervisor shuts down, deliveries to the address are dropped.
#[derive(Clone)]
pub struct Address {
    inner: Arc<AddressInner>,
}

impl Address {
    pub(crate) fn new(
        owner: SupervisorId,
        intake: Arc<Mailbox>,
        supervisor_address: Option<Address>,
    ) -> Self {
        Address {
            inner: Arc::new(AddressInner {
                id: AddressId::next(),
                owner,
                intake,
                supervisor_address,
            }),
        }
    }

    pub fn id(&self) -> AddressId {
        self.inner.id
    }

    pub(crate) fn owner(&self) -> SupervisorId {
        self.inner.owner
    }

    /// The primary address of the supervisor owning this address.
    pub fn supervisor(&self) -> Address {
        match &self.inner.supervisor_address {
            Some(address) => address.clone(),
            None => self.clone(),
        }
    }

    pub(crate) fn intake(&self) -> &Arc<Mailbox> {
        &self.inner.intake
    }

    pub(crate) fn intake_is(&self, mailbox: &Arc<Mailbox>) -> bool {
        Arc::ptr_eq(&self.inner.intake, mailbox)
    }

    /// Enqueue `payload` onto the owning supervisor's queue and wake its
    /// backend. Delivery happens when that supervisor next pumps.
    pub fn send<P: Payload>(&self, payload: P) {
        self.post(AnyMessage::new(self.clone(), payload));
    }

    pub(crate) fn post(&self, message: AnyMessage) {
        self.inner.intake.push(message);
        self.inner.intake.wake();
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .finish()
    }
}
