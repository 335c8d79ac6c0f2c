use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::actor::{ActorId, AnyActor, Context};
use crate::address::{Address, Mailbox, SupervisorId};
use crate::message::{AnyMessage, Payload};

/// Identity of a registered handler: the `TypeId` of the fn item or closure
/// type passed to `subscribe`. Stable for the lifetime of the process, so
/// unsubscribing with the same method reference finds the original entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey(TypeId);

impl HandlerKey {
    pub(crate) fn of<F: 'static>() -> Self {
        HandlerKey(TypeId::of::<F>())
    }
}

pub(crate) type Invoker =
    Box<dyn Fn(&mut dyn AnyActor, &AnyMessage, &mut Context<'_>) + Send + Sync>;

pub(crate) struct HandlerEntry {
    key: HandlerKey,
    message_key: TypeId,
    message_type: &'static str,
    actor: ActorId,
    /// The subscribing actor's primary address; confirmations are routed here.
    owner_address: Address,
    home: SupervisorId,
    home_intake: Arc<Mailbox>,
    hash: u64,
    invoke: Invoker,
}

/// Shared reference to a subscribed handler: the binding of one actor method
/// (or closure) to one message type. Two handlers are equal iff they carry
/// the same handler key and refer to the same actor instance.
#[derive(Clone)]
pub struct HandlerRef(Arc<HandlerEntry>);

impl HandlerRef {
    pub(crate) fn from_parts(
        key: HandlerKey,
        message_key: TypeId,
        message_type: &'static str,
        actor: ActorId,
        owner_address: Address,
        invoke: Invoker,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        actor.hash(&mut hasher);
        let hash = hasher.finish();
        let home = owner_address.owner();
        let home_intake = owner_address.intake().clone();
        HandlerRef(Arc::new(HandlerEntry {
            key,
            message_key,
            message_type,
            actor,
            owner_address,
            home,
            home_intake,
            hash,
            invoke,
        }))
    }

    pub fn key(&self) -> HandlerKey {
        self.0.key
    }

    pub fn message_key(&self) -> TypeId {
        self.0.message_key
    }

    pub fn message_type(&self) -> &'static str {
        self.0.message_type
    }

    pub(crate) fn actor(&self) -> ActorId {
        self.0.actor
    }

    pub(crate) fn owner_address(&self) -> &Address {
        &self.0.owner_address
    }

    pub(crate) fn home(&self) -> SupervisorId {
        self.0.home
    }

    pub(crate) fn home_intake(&self) -> &Arc<Mailbox> {
        &self.0.home_intake
    }

    pub(crate) fn invoke(&self, actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
        (self.0.invoke)(actor, message, ctx);
    }
}

/// Builds a handler for a typed method or closure of a concrete actor type.
/// The invoker double-checks both downcasts; a mismatch skips silently.
pub(crate) fn typed<A, P, F>(f: F, actor: ActorId, owner_address: Address) -> HandlerRef
where
    A: crate::actor::Actor,
    P: Payload,
    F: Fn(&mut A, &P, &mut Context<'_>) + Send + Sync + 'static,
{
    let invoke: Invoker = Box::new(move |actor, message, ctx| {
        let Some(payload) = message.downcast_ref::<P>() else {
            return;
        };
        let Some(actor) = actor.as_any_mut().downcast_mut::<A>() else {
            return;
        };
        f(actor, payload, ctx);
    });
    HandlerRef::from_parts(
        HandlerKey::of::<F>(),
        TypeId::of::<P>(),
        type_name::<P>(),
        actor,
        owner_address,
        invoke,
    )
}

/// Builds an infrastructure handler operating on the type-erased actor.
pub(crate) fn infra<F>(
    f: F,
    message_key: TypeId,
    message_type: &'static str,
    actor: ActorId,
    owner_address: Address,
) -> HandlerRef
where
    F: Fn(&mut dyn AnyActor, &AnyMessage, &mut Context<'_>) + Send + Sync + 'static,
{
    HandlerRef::from_parts(
        HandlerKey::of::<F>(),
        message_key,
        message_type,
        actor,
        owner_address,
        Box::new(f),
    )
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key && self.0.actor == other.0.actor
    }
}

impl Eq for HandlerRef {}

impl Hash for HandlerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("message", &self.0.message_type)
            .field("actor", &self.0.actor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::address::SupervisorId;

    struct Probe;

    struct Dummy;

    impl Actor for Dummy {}

    fn method_a(_: &mut Dummy, _: &Probe, _: &mut Context<'_>) {}

    fn method_b(_: &mut Dummy, _: &Probe, _: &mut Context<'_>) {}

    fn test_address() -> Address {
        Address::new(SupervisorId::next(), Mailbox::new(), None)
    }

    #[test]
    fn handlers_compare_by_key_and_actor() {
        let address = test_address();
        let actor = ActorId::next();
        let other = ActorId::next();

        let first = typed::<Dummy, Probe, _>(method_a, actor, address.clone());
        let again = typed::<Dummy, Probe, _>(method_a, actor, address.clone());
        let different_method = typed::<Dummy, Probe, _>(method_b, actor, address.clone());
        let different_actor = typed::<Dummy, Probe, _>(method_a, other, address.clone());

        assert_eq!(first, again);
        assert_ne!(first, different_method);
        assert_ne!(first, different_actor);
    }

    #[test]
    fn message_key_matches_the_payload_type() {
        let address = test_address();
        let handler = typed::<Dummy, Probe, _>(method_a, ActorId::next(), address);
        assert_eq!(handler.message_key(), TypeId::of::<Probe>());
    }
}
