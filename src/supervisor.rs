#[cfg(test)]
#[path = "supervisor.test.rs"]
mod supervisor_test;

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::actor::{
    self, ActorCell, ActorId, ActorRecord, Actor, AnyActor, Context, State,
};
use crate::address::{Address, Mailbox, SupervisorId};
use crate::backend::{Backend, TimerId};
use crate::behavior::BehaviorKind;
use crate::error::ErrorCode;
use crate::handler::{self, HandlerRef};
use crate::message::{AnyMessage, RequestId, Requested, Responded};
use crate::protocol::{
    CommitUnsubscription, ExternalSubscription, ExternalUnsubscription, InitializeActor,
    ShutdownRequest, ShutdownTrigger, StartActor, StateRequest, SubscriptionConfirmation,
    TimerTrigger, UnsubscriptionConfirmation,
};
use crate::subscription::SubscriptionMap;
use crate::system::SystemInner;

/// Opaque token grouping supervisors that share one queue pump. Members post
/// into the leader's queue, so the pump of any member drains all of them and
/// no synchronization is needed between co-located supervisors.
#[derive(Clone)]
pub struct Locality {
    pub(crate) mailbox: Arc<Mailbox>,
}

impl Locality {
    pub fn new() -> Self {
        Locality {
            mailbox: Mailbox::new(),
        }
    }
}

impl Default for Locality {
    fn default() -> Self {
        Self::new()
    }
}

/// Supervisor construction options.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Duration after which a shutdown is forced and stuck actors are
    /// destroyed.
    pub shutdown_timeout: Duration,
    /// Share another supervisor's queue pump instead of owning one.
    pub locality: Option<Locality>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            shutdown_timeout: Duration::from_millis(250),
            locality: None,
        }
    }
}

/// Handle to an actor created under a supervisor.
#[derive(Clone, Debug)]
pub struct ActorHandle {
    pub(crate) id: ActorId,
    address: Address,
}

impl ActorHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// What a pending timer is for.
pub(crate) enum TimerPurpose {
    /// The collective deadline for a supervisor-wide shutdown.
    Shutdown,
    /// A request timeout; firing synthesizes an error response.
    Request {
        actor: ActorId,
        request: RequestId,
        synth: Box<dyn FnOnce() -> AnyMessage + Send>,
    },
}

/// Dispatch state of one supervisor: its subscription map, actors, child
/// registry, and timer table. Private to the supervisor's executor; the core
/// mutex is the serialization point for backends that run on several
/// threads.
pub(crate) struct SupervisorCore {
    id: SupervisorId,
    address: Address,
    mailbox: Arc<Mailbox>,
    config: SupervisorConfig,
    backend: Arc<dyn Backend>,
    system: Weak<SystemInner>,
    subscriptions: SubscriptionMap,
    actors: HashMap<ActorId, Option<ActorCell>>,
    children: HashMap<ActorId, Address>,
    own_id: ActorId,
    own_init: Option<RequestId>,
    pending_init: HashMap<RequestId, ActorId>,
    pending_shutdown: HashMap<RequestId, ActorId>,
    shutdown_timer: Option<TimerId>,
    pub(crate) timers: HashMap<TimerId, TimerPurpose>,
}

impl SupervisorCore {
    pub(crate) fn new(
        id: SupervisorId,
        address: Address,
        mailbox: Arc<Mailbox>,
        config: SupervisorConfig,
        backend: Arc<dyn Backend>,
        system: Weak<SystemInner>,
        own_id: ActorId,
    ) -> Self {
        SupervisorCore {
            id,
            address,
            mailbox,
            config,
            backend,
            system,
            subscriptions: SubscriptionMap::default(),
            actors: HashMap::new(),
            children: HashMap::new(),
            own_id,
            own_init: None,
            pending_init: HashMap::new(),
            pending_shutdown: HashMap::new(),
            shutdown_timer: None,
            timers: HashMap::new(),
        }
    }

    pub(crate) fn id(&self) -> SupervisorId {
        self.id
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub(crate) fn make_address(&self) -> Address {
        Address::new(self.id, self.mailbox.clone(), Some(self.address.clone()))
    }

    pub(crate) fn own_state(&self) -> Option<State> {
        self.actors
            .get(&self.own_id)
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.record.state)
    }

    pub(crate) fn own_points(&self) -> usize {
        self.actors
            .get(&self.own_id)
            .and_then(|slot| slot.as_ref())
            .map_or(0, |cell| cell.record.points.len())
    }

    /// Installs the supervisor's own cell and kicks off its init round-trip.
    pub(crate) fn install_self(&mut self, root: Box<dyn AnyActor>) {
        let mut record = ActorRecord::new(self.own_id, self.address.clone(), BehaviorKind::Supervisor);
        self.install_infra(&mut record, true);
        record.state = State::Initializing;
        self.actors
            .insert(self.own_id, Some(ActorCell { record, actor: root }));
        let address = self.address.clone();
        let request = self.untimed_request_from_self(&address, InitializeActor);
        self.own_init = Some(request);
        tracing::debug!(supervisor = ?self.id, "supervisor created");
    }

    /// Creates an actor cell, installs its infrastructure handlers, and
    /// requests its initialization.
    pub(crate) fn spawn_actor(&mut self, actor: Box<dyn AnyActor>) -> ActorHandle {
        let id = ActorId::next();
        let address = self.make_address();
        let mut record = ActorRecord::new(id, address.clone(), BehaviorKind::Actor);
        self.install_infra(&mut record, false);
        record.state = State::Initializing;
        self.actors.insert(id, Some(ActorCell { record, actor }));
        self.children.insert(id, address.clone());
        let request = self.untimed_request_from_self(&address, InitializeActor);
        self.pending_init.insert(request, id);
        tracing::debug!(supervisor = ?self.id, actor = ?id, "actor created");
        ActorHandle { id, address }
    }

    fn untimed_request_from_self<P: crate::message::RequestPayload>(
        &mut self,
        dest: &Address,
        payload: P,
    ) -> RequestId {
        let id = RequestId::next();
        if let Some(Some(cell)) = self.actors.get_mut(&self.own_id) {
            cell.record.requests.insert(id, None);
        }
        dest.post(AnyMessage::request(
            dest.clone(),
            id,
            self.address.clone(),
            payload,
        ));
        id
    }

    fn install<F>(&mut self, record: &mut ActorRecord, f: F, key: TypeId, name: &'static str)
    where
        F: Fn(&mut dyn AnyActor, &AnyMessage, &mut Context<'_>) + Send + Sync + 'static,
    {
        let handler = handler::infra(f, key, name, record.id, record.address.clone());
        record.pending_confirmations += 1;
        let address = record.address.clone();
        self.subscribe(&address, handler);
    }

    fn install_infra(&mut self, record: &mut ActorRecord, supervisor_level: bool) {
        self.install(
            record,
            actor::on_unsubscription,
            TypeId::of::<UnsubscriptionConfirmation>(),
            type_name::<UnsubscriptionConfirmation>(),
        );
        self.install(
            record,
            actor::on_initialize,
            TypeId::of::<Requested<InitializeActor>>(),
            type_name::<Requested<InitializeActor>>(),
        );
        self.install(
            record,
            actor::on_start,
            TypeId::of::<StartActor>(),
            type_name::<StartActor>(),
        );
        self.install(
            record,
            actor::on_shutdown,
            TypeId::of::<Requested<ShutdownRequest>>(),
            type_name::<Requested<ShutdownRequest>>(),
        );
        if supervisor_level {
            self.install(
                record,
                on_shutdown_trigger,
                TypeId::of::<ShutdownTrigger>(),
                type_name::<ShutdownTrigger>(),
            );
            self.install(
                record,
                on_external_subscription,
                TypeId::of::<ExternalSubscription>(),
                type_name::<ExternalSubscription>(),
            );
            self.install(
                record,
                on_external_unsubscription,
                TypeId::of::<ExternalUnsubscription>(),
                type_name::<ExternalUnsubscription>(),
            );
            self.install(
                record,
                on_commit_unsubscription,
                TypeId::of::<CommitUnsubscription>(),
                type_name::<CommitUnsubscription>(),
            );
            self.install(
                record,
                on_state_request,
                TypeId::of::<Requested<StateRequest>>(),
                type_name::<Requested<StateRequest>>(),
            );
            self.install(
                record,
                on_timer_trigger,
                TypeId::of::<TimerTrigger>(),
                type_name::<TimerTrigger>(),
            );
            self.install(
                record,
                on_init_confirm,
                TypeId::of::<Responded<InitializeActor>>(),
                type_name::<Responded<InitializeActor>>(),
            );
            self.install(
                record,
                on_shutdown_confirm,
                TypeId::of::<Responded<ShutdownRequest>>(),
                type_name::<Responded<ShutdownRequest>>(),
            );
        } else {
            self.install(
                record,
                actor::on_shutdown_trigger,
                TypeId::of::<ShutdownTrigger>(),
                type_name::<ShutdownTrigger>(),
            );
        }
        self.install(
            record,
            actor::on_subscription,
            TypeId::of::<SubscriptionConfirmation>(),
            type_name::<SubscriptionConfirmation>(),
        );
    }

    /// Records the handler when the address is local, otherwise forwards the
    /// subscription to the owning supervisor. The confirmation round-trips
    /// through the queue either way.
    pub(crate) fn subscribe(&mut self, address: &Address, handler: HandlerRef) {
        if address.owner() == self.id {
            self.subscriptions.insert(address.id(), handler.clone());
            let owner_address = handler.owner_address().clone();
            owner_address.send(SubscriptionConfirmation {
                target: address.clone(),
                handler,
            });
        } else {
            address.supervisor().send(ExternalSubscription {
                target: address.clone(),
                handler,
            });
        }
    }

    /// Drops a map entry whose unsubscription the actor just processed.
    pub(crate) fn commit_unsubscription(&mut self, address: &Address, handler: &HandlerRef) {
        if !self.subscriptions.remove(address.id(), handler) {
            debug_assert!(false, "commit_unsubscription: no matching map entry");
            tracing::error!(
                code = %ErrorCode::SubscriptionMissing,
                address = ?address,
                "unsubscription without a matching map entry"
            );
        }
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn children_len(&self) -> usize {
        self.children.len()
    }

    /// Sends `start_actor` to every child that has confirmed initialization.
    pub(crate) fn start_initialized_children(&mut self) {
        let targets: Vec<Address> = self
            .children
            .iter()
            .filter(|(id, _)| {
                self.actors
                    .get(*id)
                    .and_then(|slot| slot.as_ref())
                    .map_or(false, |cell| cell.record.state == State::Initialized)
            })
            .map(|(_, address)| address.clone())
            .collect();
        for address in targets {
            address.send(StartActor);
        }
    }

    /// Final teardown once the supervisor's own cell reached `ShuttedDown`:
    /// leave the locality, unregister from the system context, and let the
    /// backend observe the terminal state.
    pub(crate) fn finish_supervisor_shutdown(&mut self) {
        if let Some(system) = self.system.upgrade() {
            system.unregister(self.id);
        }
        self.mailbox.remove_member(self.id);
        self.backend.wake();
        tracing::debug!(supervisor = ?self.id, "supervisor shut down");
    }

    fn destroy_actor(&mut self, id: ActorId) {
        self.actors.remove(&id);
        self.children.remove(&id);
        self.subscriptions.purge_actor(id);
    }

    /// Delivers one message: looks up the destination's handler list and
    /// invokes every type-matching handler in subscription order. Handlers
    /// homed under another supervisor get the envelope re-posted to run on
    /// their own executor.
    pub(crate) fn deliver(&mut self, message: AnyMessage) {
        if let Some(handler) = message.direct().cloned() {
            self.invoke_handler(&handler, &message);
            return;
        }
        let Some(handlers) = self.subscriptions.get(message.dest().id()) else {
            tracing::trace!(
                message = message.type_name(),
                dest = ?message.dest(),
                "no subscribers"
            );
            return;
        };
        let matching: Vec<HandlerRef> = handlers
            .iter()
            .filter(|h| h.message_key() == message.key())
            .cloned()
            .collect();
        for handler in matching {
            if handler.home() == self.id {
                self.invoke_handler(&handler, &message);
            } else {
                let envelope = message.with_direct(handler.clone());
                handler.home_intake().push(envelope);
                handler.home_intake().wake();
            }
        }
    }

    fn invoke_handler(&mut self, handler: &HandlerRef, message: &AnyMessage) {
        let Some(slot) = self.actors.get_mut(&handler.actor()) else {
            return;
        };
        let Some(mut cell) = slot.take() else {
            return;
        };
        if let Some(correlation) = message.correlation() {
            // Late or duplicate responses are dropped: the table entry is
            // consumed by the first delivery or by the timeout.
            match cell.record.requests.remove(&correlation) {
                Some(Some(timer)) => {
                    self.timers.remove(&timer);
                    self.backend.cancel_timer(timer);
                }
                Some(None) => {}
                None => {
                    tracing::trace!(message = message.type_name(), "dropping late response");
                    if let Some(slot) = self.actors.get_mut(&handler.actor()) {
                        *slot = Some(cell);
                    }
                    return;
                }
            }
        }
        tracing::trace!(
            message = message.type_name(),
            actor = ?handler.actor(),
            "dispatch"
        );
        {
            let mut ctx = Context {
                core: self,
                record: &mut cell.record,
            };
            handler.invoke(cell.actor.as_mut(), message, &mut ctx);
            actor::advance_lifecycle(cell.actor.as_mut(), &mut ctx);
        }
        if let Some(slot) = self.actors.get_mut(&handler.actor()) {
            *slot = Some(cell);
        }
    }
}

/// The pump: pop the head message, deliver it through the destination
/// member's dispatch state, repeat until the queue drains. Runs to
/// quiescence on the caller's thread and never re-enters a member that is
/// already dispatching.
pub(crate) fn drain(mailbox: &Arc<Mailbox>) {
    while let Some(message) = mailbox.pop() {
        let target = message
            .direct()
            .map(|h| h.home())
            .unwrap_or_else(|| message.dest().owner());
        match mailbox.member(target) {
            Some(core) => core.lock().deliver(message),
            None => {
                if message.direct().is_some() || message.dest().intake_is(mailbox) {
                    tracing::trace!(
                        message = message.type_name(),
                        code = %ErrorCode::UnknownAddress,
                        "dropping message for unknown address"
                    );
                } else {
                    // A different locality owns the destination: forward to
                    // its queue; delivery happens at its next pump.
                    let dest = message.dest().clone();
                    dest.post(message);
                }
            }
        }
    }
}

// Supervisor-level infrastructure handlers.

/// Starts the supervisor's own shutdown sequence: ask every live child to
/// shut down, arm the collective deadline, and only then release the
/// supervisor's own subscriptions.
pub(crate) fn begin_supervisor_shutdown(actor: &mut dyn AnyActor, ctx: &mut Context<'_>) {
    if ctx.record.state >= State::ShuttingDown {
        return;
    }
    ctx.record.state = State::ShuttingDown;
    ctx.record.behavior.begin_stopping_children();
    tracing::debug!(supervisor = ?ctx.core.id(), "supervisor shutting down");
    actor.shutdown_start(ctx);
    let targets: Vec<(ActorId, Address)> = ctx
        .core
        .children
        .iter()
        .map(|(id, address)| (*id, address.clone()))
        .collect();
    for (child, address) in targets {
        let state = ctx
            .core
            .actors
            .get(&child)
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.record.state);
        let already_asked = ctx.core.pending_shutdown.values().any(|c| *c == child);
        if already_asked || state.map_or(true, |s| s >= State::ShuttingDown) {
            // already asked through the single-actor path, or already gone
            continue;
        }
        let request = ctx.request(&address, ShutdownRequest).send_untimed();
        ctx.core.pending_shutdown.insert(request, child);
    }
    if ctx.core.pending_shutdown.is_empty() {
        continue_supervisor_shutdown(ctx);
    } else {
        let timer = TimerId::next();
        ctx.core.timers.insert(timer, TimerPurpose::Shutdown);
        ctx.core.shutdown_timer = Some(timer);
        let timeout = ctx.core.config.shutdown_timeout;
        ctx.core.backend().start_timer(timeout, timer);
    }
}

/// Children are gone; release the supervisor's own subscriptions. Shutdown
/// completes when the confirmations drain the point list.
fn continue_supervisor_shutdown(ctx: &mut Context<'_>) {
    ctx.record.behavior.begin_unsubscribing();
    // Reverse subscription order: the unsubscription-confirmation handler
    // was subscribed first and must stay deliverable until the end.
    let points: Vec<crate::subscription::SubscriptionPoint> = ctx
        .record
        .points
        .iter()
        .rev()
        .filter(|p| !p.unsubscribing)
        .cloned()
        .collect();
    for point in points {
        ctx.unsubscribe_handler(&point.handler, &point.address, None);
    }
}

fn forget_child(ctx: &mut Context<'_>, child: ActorId) {
    ctx.core.destroy_actor(child);
    let orphaned: Vec<RequestId> = ctx
        .core
        .pending_init
        .iter()
        .filter(|(_, actor)| **actor == child)
        .map(|(request, _)| *request)
        .collect();
    for request in orphaned {
        ctx.core.pending_init.remove(&request);
        ctx.record.requests.remove(&request);
    }
}

fn on_shutdown_trigger(actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(trigger) = message.downcast_ref::<ShutdownTrigger>() else {
        return;
    };
    if trigger.target == ctx.record.address {
        begin_supervisor_shutdown(actor, ctx);
        return;
    }
    let Some(child) = ctx
        .core
        .children
        .iter()
        .find(|(_, address)| **address == trigger.target)
        .map(|(id, _)| *id)
    else {
        tracing::trace!(target = ?trigger.target, "shutdown trigger for unknown actor");
        return;
    };
    let state = ctx
        .core
        .actors
        .get(&child)
        .and_then(|slot| slot.as_ref())
        .map(|cell| cell.record.state);
    let already_asked = ctx.core.pending_shutdown.values().any(|c| *c == child);
    if already_asked || state.map_or(true, |s| s >= State::ShuttingDown) {
        // repeated do_shutdown calls collapse to the first
        return;
    }
    let timeout = ctx.core.config.shutdown_timeout;
    let request = ctx.request(&trigger.target, ShutdownRequest).send(timeout);
    ctx.core.pending_shutdown.insert(request, child);
}

fn on_external_subscription(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(subscription) = message.downcast_ref::<ExternalSubscription>() else {
        return;
    };
    if subscription.target.owner() != ctx.core.id() {
        tracing::trace!(target = ?subscription.target, "external subscription for foreign address");
        return;
    }
    ctx.core
        .subscriptions
        .insert(subscription.target.id(), subscription.handler.clone());
    subscription
        .handler
        .owner_address()
        .send(SubscriptionConfirmation {
            target: subscription.target.clone(),
            handler: subscription.handler.clone(),
        });
}

fn on_external_unsubscription(
    _actor: &mut dyn AnyActor,
    message: &AnyMessage,
    ctx: &mut Context<'_>,
) {
    let Some(unsubscription) = message.downcast_ref::<ExternalUnsubscription>() else {
        return;
    };
    ctx.core
        .commit_unsubscription(&unsubscription.target, &unsubscription.handler);
    unsubscription
        .handler
        .owner_address()
        .supervisor()
        .send(CommitUnsubscription {
            target: unsubscription.target.clone(),
            handler: unsubscription.handler.clone(),
        });
}

fn on_commit_unsubscription(
    _actor: &mut dyn AnyActor,
    message: &AnyMessage,
    _ctx: &mut Context<'_>,
) {
    let Some(commit) = message.downcast_ref::<CommitUnsubscription>() else {
        return;
    };
    commit
        .handler
        .owner_address()
        .send(UnsubscriptionConfirmation {
            target: commit.target.clone(),
            handler: commit.handler.clone(),
            callback: None,
        });
}

fn on_state_request(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(request) = message.downcast_ref::<Requested<StateRequest>>() else {
        return;
    };
    let state = if request.subject == ctx.record.address {
        Some(ctx.record.state)
    } else {
        ctx.core
            .children
            .iter()
            .find(|(_, address)| **address == request.subject)
            .map(|(id, _)| *id)
            .and_then(|id| ctx.core.actors.get(&id))
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.record.state)
    };
    match state {
        Some(state) => ctx.reply_to(request, state),
        None => ctx.reply_with_error(request, ErrorCode::UnknownAddress),
    }
}

fn on_timer_trigger(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(trigger) = message.downcast_ref::<TimerTrigger>() else {
        return;
    };
    match ctx.core.timers.remove(&trigger.id) {
        None => {} // cancelled while the trigger was in flight
        Some(TimerPurpose::Shutdown) => {
            ctx.core.shutdown_timer = None;
            let stuck: Vec<(RequestId, ActorId)> = ctx.core.pending_shutdown.drain().collect();
            for (request, child) in stuck {
                tracing::warn!(
                    code = %ErrorCode::ActorMisbehaved,
                    actor = ?child,
                    "destroying actor that missed the shutdown deadline"
                );
                ctx.record.requests.remove(&request);
                forget_child(ctx, child);
            }
            if ctx.record.state == State::ShuttingDown {
                continue_supervisor_shutdown(ctx);
            }
        }
        Some(TimerPurpose::Request {
            actor,
            request,
            synth,
        }) => {
            if actor == ctx.record.id {
                ctx.record.requests.remove(&request);
            } else if let Some(Some(cell)) = ctx.core.actors.get_mut(&actor) {
                cell.record.requests.remove(&request);
            }
            tracing::debug!(request = ?request, "request timed out");
            let response = synth();
            let dest = response.dest().clone();
            dest.post(response);
        }
    }
}

fn on_init_confirm(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(response) = message.downcast_ref::<Responded<InitializeActor>>() else {
        return;
    };
    if ctx.core.own_init == Some(response.id) {
        ctx.core.own_init = None;
        ctx.record.address.send(StartActor);
        return;
    }
    let Some(child) = ctx.core.pending_init.remove(&response.id) else {
        return;
    };
    match &response.result {
        Ok(_) => {
            if ctx.record.state == State::Operational {
                if let Some(address) = ctx.core.children.get(&child).cloned() {
                    address.send(StartActor);
                }
            }
        }
        Err(code) => {
            tracing::warn!(actor = ?child, code = %code, "actor failed to initialize");
        }
    }
}

fn on_shutdown_confirm(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(response) = message.downcast_ref::<Responded<ShutdownRequest>>() else {
        return;
    };
    let Some(child) = ctx.core.pending_shutdown.remove(&response.id) else {
        return;
    };
    if let Err(code) = &response.result {
        tracing::warn!(
            code = %code,
            actor = ?child,
            "shutdown not confirmed; destroying actor"
        );
    }
    forget_child(ctx, child);
    if ctx.record.state == State::ShuttingDown && ctx.core.pending_shutdown.is_empty() {
        if let Some(timer) = ctx.core.shutdown_timer.take() {
            ctx.core.timers.remove(&timer);
            ctx.core.backend().cancel_timer(timer);
        }
        continue_supervisor_shutdown(ctx);
    }
}

/// Handle to a supervisor: the actor that owns other actors, the queue, and
/// the subscription map. Cloning the handle shares the same supervisor.
#[derive(Clone)]
pub struct Supervisor {
    core: Arc<Mutex<SupervisorCore>>,
    mailbox: Arc<Mailbox>,
    address: Address,
    backend: Arc<dyn Backend>,
}

impl Supervisor {
    pub(crate) fn from_parts(
        core: Arc<Mutex<SupervisorCore>>,
        mailbox: Arc<Mailbox>,
        address: Address,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Supervisor {
            core,
            mailbox,
            address,
            backend,
        }
    }

    /// The supervisor's primary address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Token other supervisors can be created with to share this
    /// supervisor's queue pump.
    pub fn locality(&self) -> Locality {
        Locality {
            mailbox: self.mailbox.clone(),
        }
    }

    /// Creates an actor owned by this supervisor and immediately starts its
    /// initialization protocol.
    pub fn create_actor<A: Actor>(&self, actor: A) -> ActorHandle {
        self.core.lock().spawn_actor(Box::new(actor))
    }

    /// Nudges the backend to pump; on a manual backend this is a no-op and
    /// the caller drives [`process`](Supervisor::process) itself.
    pub fn start(&self) {
        self.backend.wake();
    }

    /// Asks the supervisor to shut down: every child is requested to shut
    /// down, stragglers are destroyed after `shutdown_timeout`.
    pub fn shutdown(&self) {
        self.address.send(ShutdownTrigger {
            target: self.address.clone(),
        });
    }

    /// Drains the queue to quiescence on the caller's thread.
    pub fn process(&self) {
        drain(&self.mailbox);
    }

    pub fn state(&self) -> State {
        self.core.lock().own_state().unwrap_or(State::ShuttedDown)
    }

    pub fn queue_len(&self) -> usize {
        self.mailbox.len()
    }

    /// Total handler entries in the subscription map.
    pub fn subscription_count(&self) -> usize {
        self.core.lock().subscription_count()
    }

    /// Number of live child actors.
    pub fn actor_count(&self) -> usize {
        self.core.lock().children_len()
    }

    /// Subscription points recorded on the supervisor's own cell.
    pub fn supervisor_points(&self) -> usize {
        self.core.lock().own_points()
    }

    /// Subscription points recorded on a child actor, if it is still alive.
    pub fn point_count(&self, handle: &ActorHandle) -> Option<usize> {
        let core = self.core.lock();
        core.actors
            .get(&handle.id)
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.record.points.len())
    }

    /// Runs `f` against the actor behind `handle`. Returns `None` when the
    /// actor is gone or `A` is not its concrete type.
    pub fn inspect<A: Actor, R>(&self, handle: &ActorHandle, f: impl FnOnce(&A) -> R) -> Option<R> {
        let core = self.core.lock();
        let cell = core.actors.get(&handle.id)?.as_ref()?;
        let actor = cell.actor.as_any().downcast_ref::<A>()?;
        Some(f(actor))
    }

    /// Mutable counterpart of [`inspect`](Supervisor::inspect); meant for
    /// wiring actors together before the supervisor starts.
    pub fn with_actor_mut<A: Actor, R>(
        &self,
        handle: &ActorHandle,
        f: impl FnOnce(&mut A) -> R,
    ) -> Option<R> {
        let mut core = self.core.lock();
        let cell = core.actors.get_mut(&handle.id)?.as_mut()?;
        let actor = cell.actor.as_any_mut().downcast_mut::<A>()?;
        Some(f(actor))
    }
}
