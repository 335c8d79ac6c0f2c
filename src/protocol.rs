//! Payload types the framework reserves for its own protocols: actor
//! initialization and start, the shutdown handshake, the asynchronous
//! subscription/unsubscription round-trips, state introspection, and timer
//! delivery.

use parking_lot::Mutex;

use crate::actor::State;
use crate::address::Address;
use crate::backend::TimerId;
use crate::handler::HandlerRef;
use crate::message::{RequestPayload, Requested, Responded};

/// Asks an actor to run its initialization sequence. The response confirms
/// the actor reached `Initialized` and carries its primary address.
pub struct InitializeActor;

impl RequestPayload for InitializeActor {
    type Reply = Address;
}

/// The init request as delivered on an actor's address.
pub type InitRequest = Requested<InitializeActor>;

/// The init confirmation a supervisor receives back.
pub type InitConfirmation = Responded<InitializeActor>;

/// Switches an initialized actor to `Operational`.
pub struct StartActor;

/// Asks an actor to run its shutdown sequence. The response confirms every
/// subscription was released and the actor reached `ShuttedDown`.
pub struct ShutdownRequest;

impl RequestPayload for ShutdownRequest {
    type Reply = Address;
}

/// The shutdown confirmation a supervisor receives back.
pub type ShutdownConfirmation = Responded<ShutdownRequest>;

/// Asks a supervisor to issue a proper shutdown request to `target`. The
/// indirection keeps shutdown supervisor-initiated even when the actor asks
/// for it itself; a trigger delivered on a plain actor's own address is
/// forwarded to that actor's supervisor.
pub struct ShutdownTrigger {
    pub target: Address,
}

/// Confirms a handler was recorded in the owner's subscription map.
pub struct SubscriptionConfirmation {
    pub target: Address,
    pub handler: HandlerRef,
}

/// Optional hook attached to an unsubscription; fires when the confirmation
/// message is destroyed.
pub struct UnsubscribeCallback(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl UnsubscribeCallback {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        UnsubscribeCallback(Mutex::new(Some(Box::new(f))))
    }
}

impl Drop for UnsubscribeCallback {
    fn drop(&mut self) {
        if let Some(f) = self.0.lock().take() {
            f();
        }
    }
}

/// Tells an actor its handler is no longer subscribed to `target`.
pub struct UnsubscriptionConfirmation {
    pub target: Address,
    pub handler: HandlerRef,
    pub callback: Option<UnsubscribeCallback>,
}

/// Asks the supervisor owning `target` to record `handler` in its map.
pub struct ExternalSubscription {
    pub target: Address,
    pub handler: HandlerRef,
}

/// Asks the supervisor owning `target` to drop `handler` from its map.
pub struct ExternalUnsubscription {
    pub target: Address,
    pub handler: HandlerRef,
}

/// Tells the subscriber's supervisor that the owner dropped its map entry,
/// so the actor-side record can be completed.
pub struct CommitUnsubscription {
    pub target: Address,
    pub handler: HandlerRef,
}

/// Asks a supervisor for the lifecycle state of the actor behind `subject`.
pub struct StateRequest {
    pub subject: Address,
}

impl RequestPayload for StateRequest {
    type Reply = State;
}

/// The state answer: the subject's current lifecycle state, or
/// `UnknownAddress` when no live actor sits behind the subject.
pub type StateResponse = Responded<StateRequest>;

/// Posted to the supervisor's queue by its backend when a timer elapses.
/// Timer callbacks always run on the supervisor's executor, never inline
/// from the timer source.
pub struct TimerTrigger {
    pub id: TimerId,
}
