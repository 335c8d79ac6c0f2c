use std::collections::HashMap;

use crate::actor::ActorId;
use crate::address::{Address, AddressId};
use crate::handler::HandlerRef;

/// A (handler, address) pair recorded on an actor once its subscription
/// confirmation round-trips. Paired invariantly with an entry in the owning
/// supervisor's subscription map.
#[derive(Clone)]
pub struct SubscriptionPoint {
    pub handler: HandlerRef,
    pub address: Address,
    /// Set once an unsubscription for this point is in flight, so a later
    /// sweep does not issue the protocol twice.
    pub(crate) unsubscribing: bool,
}

impl SubscriptionPoint {
    pub(crate) fn new(handler: HandlerRef, address: Address) -> Self {
        SubscriptionPoint {
            handler,
            address,
            unsubscribing: false,
        }
    }
}

/// Per-supervisor dispatch table: address → handlers, in subscription order.
#[derive(Default)]
pub(crate) struct SubscriptionMap {
    entries: HashMap<AddressId, Vec<HandlerRef>>,
}

impl SubscriptionMap {
    pub fn insert(&mut self, address: AddressId, handler: HandlerRef) {
        self.entries.entry(address).or_default().push(handler);
    }

    /// Removes one handler entry; returns false when nothing matched.
    pub fn remove(&mut self, address: AddressId, handler: &HandlerRef) -> bool {
        let Some(handlers) = self.entries.get_mut(&address) else {
            return false;
        };
        let Some(index) = handlers.iter().position(|h| h == handler) else {
            return false;
        };
        handlers.remove(index);
        if handlers.is_empty() {
            self.entries.remove(&address);
        }
        true
    }

    pub fn get(&self, address: AddressId) -> Option<&[HandlerRef]> {
        self.entries.get(&address).map(Vec::as_slice)
    }

    /// Drops every entry referencing `actor`; used when an actor is forcibly
    /// destroyed so no map entry outlives it.
    pub fn purge_actor(&mut self, actor: ActorId) {
        self.entries
            .retain(|_, handlers| {
                handlers.retain(|h| h.actor() != actor);
                !handlers.is_empty()
            });
    }

    /// Total number of handler entries across all addresses.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorId, Context};
    use crate::address::{Mailbox, SupervisorId};
    use crate::handler;

    struct Probe;

    struct Dummy;

    impl Actor for Dummy {}

    fn handler_a(_: &mut Dummy, _: &Probe, _: &mut Context<'_>) {}

    fn handler_b(_: &mut Dummy, _: &Probe, _: &mut Context<'_>) {}

    fn test_address() -> Address {
        Address::new(SupervisorId::next(), Mailbox::new(), None)
    }

    #[test]
    fn entries_keep_subscription_order() {
        let mut map = SubscriptionMap::default();
        let address = test_address();
        let actor = ActorId::next();
        let a = handler::typed::<Dummy, Probe, _>(handler_a, actor, address.clone());
        let b = handler::typed::<Dummy, Probe, _>(handler_b, actor, address.clone());

        map.insert(address.id(), a.clone());
        map.insert(address.id(), b.clone());

        let listed = map.get(address.id()).unwrap();
        assert_eq!(listed, &[a, b]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn remove_drops_exactly_one_entry() {
        let mut map = SubscriptionMap::default();
        let address = test_address();
        let actor = ActorId::next();
        let a = handler::typed::<Dummy, Probe, _>(handler_a, actor, address.clone());
        let b = handler::typed::<Dummy, Probe, _>(handler_b, actor, address.clone());
        map.insert(address.id(), a.clone());
        map.insert(address.id(), b.clone());

        assert!(map.remove(address.id(), &a));
        assert_eq!(map.get(address.id()).unwrap(), &[b]);
        assert!(!map.remove(address.id(), &a));
    }

    #[test]
    fn purge_drops_every_entry_of_an_actor() {
        let mut map = SubscriptionMap::default();
        let address = test_address();
        let doomed = ActorId::next();
        let kept = ActorId::next();
        map.insert(
            address.id(),
            handler::typed::<Dummy, Probe, _>(handler_a, doomed, address.clone()),
        );
        let survivor = handler::typed::<Dummy, Probe, _>(handler_b, kept, address.clone());
        map.insert(address.id(), survivor.clone());

        map.purge_actor(doomed);

        assert_eq!(map.get(address.id()).unwrap(), &[survivor]);
        assert_eq!(map.len(), 1);
    }
}
