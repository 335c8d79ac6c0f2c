use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::Address;
use crate::backend::TimerId;
use crate::behavior::{Behavior, BehaviorKind, Phase};
use crate::error::ErrorCode;
use crate::handler::{self, HandlerKey, HandlerRef};
use crate::message::{AnyMessage, Payload, RequestId, RequestPayload, Requested};
use crate::protocol::{
    ExternalUnsubscription, InitializeActor, ShutdownRequest, ShutdownTrigger,
    SubscriptionConfirmation, UnsubscribeCallback, UnsubscriptionConfirmation,
};
use crate::request::RequestBuilder;
use crate::subscription::SubscriptionPoint;
use crate::supervisor::SupervisorCore;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle states shared by actors and supervisors. The state only ever
/// advances through this enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    New,
    Initializing,
    Initialized,
    Operational,
    ShuttingDown,
    ShuttedDown,
}

/// Process-unique identity of an actor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The unit of state and handlers. An actor's only public surface is
/// receiving messages; the hooks below customize its initialization and
/// shutdown sequencing.
///
/// All hooks run on the owning supervisor's executor and must not block;
/// waiting for anything is expressed as sending a message now and handling
/// the reply later.
pub trait Actor: Send + 'static {
    /// Called when the init request has been recorded. The default completes
    /// initialization immediately; an override that acquires resources
    /// asynchronously must call [`Context::init_finish`] once done.
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.init_finish();
    }

    /// Called after the actor becomes operational.
    fn on_start(&mut self, _ctx: &mut Context<'_>) {}

    /// Called when a shutdown request has been recorded. The default releases
    /// every subscription; an override that must tear down resources first
    /// calls [`Context::unsubscribe_all`] when ready.
    fn shutdown_start(&mut self, ctx: &mut Context<'_>) {
        ctx.unsubscribe_all();
    }

    /// Called exactly once, after all subscriptions are removed. The last
    /// framework call the actor receives.
    fn shutdown_finish(&mut self, _ctx: &mut Context<'_>) {}
}

/// A no-op actor; handy as a supervisor root when no lifecycle hooks are
/// needed.
impl Actor for () {}

/// Object-safe shim over [`Actor`] so cells and handlers can hold actors of
/// different concrete types.
pub(crate) trait AnyActor: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn init_start(&mut self, ctx: &mut Context<'_>);
    fn on_start(&mut self, ctx: &mut Context<'_>);
    fn shutdown_start(&mut self, ctx: &mut Context<'_>);
    fn shutdown_finish(&mut self, ctx: &mut Context<'_>);
}

impl<T: Actor> AnyActor for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn init_start(&mut self, ctx: &mut Context<'_>) {
        Actor::init_start(self, ctx);
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        Actor::on_start(self, ctx);
    }

    fn shutdown_start(&mut self, ctx: &mut Context<'_>) {
        Actor::shutdown_start(self, ctx);
    }

    fn shutdown_finish(&mut self, ctx: &mut Context<'_>) {
        Actor::shutdown_finish(self, ctx);
    }
}

/// Framework-side record of one actor: lifecycle state, subscription points,
/// suspended init/shutdown requests, and the request correlation table.
pub(crate) struct ActorRecord {
    pub id: ActorId,
    pub state: State,
    pub address: Address,
    pub points: Vec<SubscriptionPoint>,
    pub behavior: Behavior,
    /// Subscription confirmations issued but not yet delivered back.
    pub pending_confirmations: u32,
    pub init_request: Option<(RequestId, Address)>,
    pub shutdown_request: Option<(RequestId, Address)>,
    /// request id → timer armed for it (None for untimed framework requests).
    pub requests: HashMap<RequestId, Option<TimerId>>,
}

impl ActorRecord {
    pub fn new(id: ActorId, address: Address, kind: BehaviorKind) -> Self {
        ActorRecord {
            id,
            state: State::New,
            address,
            points: Vec::new(),
            behavior: Behavior::new(kind),
            pending_confirmations: 0,
            init_request: None,
            shutdown_request: None,
            requests: HashMap::new(),
        }
    }
}

pub(crate) struct ActorCell {
    pub record: ActorRecord,
    pub actor: Box<dyn AnyActor>,
}

/// Capabilities handed to an actor while one of its handlers runs: sending,
/// subscription management, requests, and the lifecycle controls.
pub struct Context<'a> {
    pub(crate) core: &'a mut SupervisorCore,
    pub(crate) record: &'a mut ActorRecord,
}

impl<'a> Context<'a> {
    /// The actor's primary address.
    pub fn address(&self) -> &Address {
        &self.record.address
    }

    /// The primary address of the actor's supervisor.
    pub fn supervisor_address(&self) -> Address {
        self.record.address.supervisor()
    }

    pub fn state(&self) -> State {
        self.record.state
    }

    /// Mints a secondary ("virtual") address owned by the actor's supervisor.
    pub fn create_address(&mut self) -> Address {
        self.core.make_address()
    }

    /// Sends `payload` to `dest`; it lands on the destination supervisor's
    /// queue and is delivered at its next pump.
    pub fn send<P: Payload>(&self, dest: &Address, payload: P) {
        dest.send(payload);
    }

    /// Subscribes a handler on the actor's primary address. The subscription
    /// is complete once the confirmation round-trips.
    pub fn subscribe<A, P, F>(&mut self, f: F) -> HandlerRef
    where
        A: Actor,
        P: Payload,
        F: Fn(&mut A, &P, &mut Context<'_>) + Send + Sync + 'static,
    {
        let address = self.record.address.clone();
        self.subscribe_to(f, &address)
    }

    /// Subscribes a handler on the given address, which may be owned by a
    /// different supervisor.
    pub fn subscribe_to<A, P, F>(&mut self, f: F, address: &Address) -> HandlerRef
    where
        A: Actor,
        P: Payload,
        F: Fn(&mut A, &P, &mut Context<'_>) + Send + Sync + 'static,
    {
        let handler = handler::typed::<A, P, F>(f, self.record.id, self.record.address.clone());
        self.record.pending_confirmations += 1;
        self.core.subscribe(address, handler.clone());
        handler
    }

    /// Unsubscribes the handler registered with `f` from the primary address.
    pub fn unsubscribe<A, P, F>(&mut self, f: F)
    where
        A: Actor,
        P: Payload,
        F: Fn(&mut A, &P, &mut Context<'_>) + Send + Sync + 'static,
    {
        let address = self.record.address.clone();
        self.unsubscribe_from(f, &address);
    }

    /// Unsubscribes the handler registered with `f` from `address`.
    pub fn unsubscribe_from<A, P, F>(&mut self, _f: F, address: &Address)
    where
        A: Actor,
        P: Payload,
        F: Fn(&mut A, &P, &mut Context<'_>) + Send + Sync + 'static,
    {
        let key = HandlerKey::of::<F>();
        let found = self
            .record
            .points
            .iter()
            .find(|p| !p.unsubscribing && p.handler.key() == key && p.address == *address)
            .map(|p| p.handler.clone());
        match found {
            Some(handler) => self.unsubscribe_handler(&handler, address, None),
            None => {
                debug_assert!(false, "unsubscribe: no matching subscription point");
                tracing::error!(
                    code = %ErrorCode::SubscriptionMissing,
                    address = ?address,
                    "unsubscribe referenced an unknown subscription"
                );
            }
        }
    }

    /// Initiates unsubscription of `handler` from `address`. Local addresses
    /// confirm through the owner's queue; external ones run the
    /// external-unsubscription handshake. The optional callback fires when
    /// the confirmation message is destroyed.
    pub fn unsubscribe_handler(
        &mut self,
        handler: &HandlerRef,
        address: &Address,
        callback: Option<UnsubscribeCallback>,
    ) {
        if let Some(point) = self
            .record
            .points
            .iter_mut()
            .find(|p| p.handler == *handler && p.address == *address)
        {
            if point.unsubscribing {
                return;
            }
            point.unsubscribing = true;
        }
        if address.owner() == self.core.id() {
            handler.owner_address().send(UnsubscriptionConfirmation {
                target: address.clone(),
                handler: handler.clone(),
                callback,
            });
        } else {
            debug_assert!(callback.is_none(), "callbacks only attach to local unsubscriptions");
            address.supervisor().send(ExternalUnsubscription {
                target: address.clone(),
                handler: handler.clone(),
            });
        }
    }

    /// Releases every subscription point; shutdown completes once the last
    /// confirmation arrives. On a supervisor still waiting for its children
    /// this is a no-op; the supervisor sequence unsubscribes by itself once
    /// the children are gone.
    pub fn unsubscribe_all(&mut self) {
        if self.record.behavior.kind == BehaviorKind::Supervisor
            && self.record.behavior.phase == Phase::StoppingChildren
        {
            return;
        }
        self.record.behavior.begin_unsubscribing();
        // Reverse subscription order: the unsubscription-confirmation handler
        // was subscribed first and must stay deliverable until the end.
        let points: Vec<SubscriptionPoint> = self
            .record
            .points
            .iter()
            .rev()
            .filter(|p| !p.unsubscribing)
            .cloned()
            .collect();
        for point in points {
            self.unsubscribe_handler(&point.handler, &point.address, None);
        }
    }

    /// Completes initialization: answers the pending init request and moves
    /// the actor to `Initialized` once every subscription confirmation
    /// issued so far has arrived. No-op unless init is pending.
    pub fn init_finish(&mut self) {
        if !self.record.behavior.request_init_finish() {
            return;
        }
        if self.record.pending_confirmations == 0 {
            complete_init(self);
        }
    }

    /// Asks the supervisor to shut this actor down. The supervisor answers
    /// with a proper shutdown request, so shutdown is always
    /// supervisor-initiated.
    pub fn do_shutdown(&mut self) {
        let supervisor = self.record.address.supervisor();
        supervisor.send(ShutdownTrigger {
            target: self.record.address.clone(),
        });
    }

    /// Builds a request to `dest` replying to the actor's primary address.
    /// Nothing is sent until [`RequestBuilder::send`] arms the timeout.
    pub fn request<'c, P: RequestPayload>(
        &'c mut self,
        dest: &Address,
        payload: P,
    ) -> RequestBuilder<'c, 'a, P> {
        let reply_to = self.record.address.clone();
        RequestBuilder::new(self, dest.clone(), reply_to, payload)
    }

    /// Builds a request whose response goes to `reply_to`, which is assumed
    /// to belong to this actor. Useful when the same response type needs a
    /// different handler per request.
    pub fn request_via<'c, P: RequestPayload>(
        &'c mut self,
        dest: &Address,
        reply_to: &Address,
        payload: P,
    ) -> RequestBuilder<'c, 'a, P> {
        RequestBuilder::new(self, dest.clone(), reply_to.clone(), payload)
    }

    /// Answers `request` with a value.
    pub fn reply_to<P: RequestPayload>(&self, request: &Requested<P>, reply: P::Reply) {
        let message =
            AnyMessage::response::<P>(request.reply_to.clone(), request.id, Ok(reply));
        request.reply_to.post(message);
    }

    /// Answers `request` with an error code.
    pub fn reply_with_error<P: RequestPayload>(&self, request: &Requested<P>, code: ErrorCode) {
        let message =
            AnyMessage::response::<P>(request.reply_to.clone(), request.id, Err(code));
        request.reply_to.post(message);
    }
}

/// Runs after every handler invocation: completes a deferred init once all
/// confirmations arrived, and completes shutdown once the last subscription
/// point is gone.
pub(crate) fn advance_lifecycle(actor: &mut dyn AnyActor, ctx: &mut Context<'_>) {
    if ctx.record.behavior.init_complete() && ctx.record.pending_confirmations == 0 {
        complete_init(ctx);
    }

    if ctx.record.state == State::ShuttingDown
        && ctx.record.behavior.is_unsubscribing()
        && ctx.record.points.is_empty()
    {
        ctx.record.behavior.finish();
        actor.shutdown_finish(ctx);
        if let Some((id, reply_to)) = ctx.record.shutdown_request.take() {
            let message = AnyMessage::response::<ShutdownRequest>(
                reply_to.clone(),
                id,
                Ok(ctx.record.address.clone()),
            );
            reply_to.post(message);
        }
        ctx.record.state = State::ShuttedDown;
        tracing::debug!(actor = ?ctx.record.id, "actor shut down");
        if ctx.record.behavior.kind == BehaviorKind::Supervisor {
            ctx.core.finish_supervisor_shutdown();
        }
    }
}

fn complete_init(ctx: &mut Context<'_>) {
    ctx.record.behavior.phase = Phase::Ready;
    if let Some((id, reply_to)) = ctx.record.init_request.take() {
        let message = AnyMessage::response::<InitializeActor>(
            reply_to.clone(),
            id,
            Ok(ctx.record.address.clone()),
        );
        reply_to.post(message);
    }
    ctx.record.state = State::Initialized;
    tracing::debug!(actor = ?ctx.record.id, "actor initialized");
}

fn remove_point(ctx: &mut Context<'_>, address: &Address, handler: &HandlerRef) {
    match ctx
        .record
        .points
        .iter()
        .position(|p| p.address == *address && p.handler == *handler)
    {
        Some(index) => {
            ctx.record.points.remove(index);
        }
        None => {
            debug_assert!(false, "no subscription point found for removal");
            tracing::error!(
                code = %ErrorCode::SubscriptionMissing,
                address = ?address,
                "unsubscription confirmation without a matching point"
            );
        }
    }
}

// Infrastructure handlers installed on every actor at do_initialize.

pub(crate) fn on_subscription(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(confirmation) = message.downcast_ref::<SubscriptionConfirmation>() else {
        return;
    };
    tracing::trace!(
        actor = ?ctx.record.id,
        handler = ?confirmation.handler,
        "subscription confirmed"
    );
    ctx.record.points.push(SubscriptionPoint::new(
        confirmation.handler.clone(),
        confirmation.target.clone(),
    ));
    ctx.record.pending_confirmations = ctx.record.pending_confirmations.saturating_sub(1);
}

pub(crate) fn on_unsubscription(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(confirmation) = message.downcast_ref::<UnsubscriptionConfirmation>() else {
        return;
    };
    remove_point(ctx, &confirmation.target, &confirmation.handler);
    if confirmation.target.owner() == ctx.core.id() {
        ctx.core
            .commit_unsubscription(&confirmation.target, &confirmation.handler);
    }
}

pub(crate) fn on_initialize(actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(request) = message.downcast_ref::<Requested<InitializeActor>>() else {
        return;
    };
    ctx.record.init_request = Some((request.id, request.reply_to.clone()));
    ctx.record.behavior.on_start_init();
    actor.init_start(ctx);
}

pub(crate) fn on_start(actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    if message.downcast_ref::<crate::protocol::StartActor>().is_none() {
        return;
    }
    if ctx.record.state != State::Initialized {
        return;
    }
    ctx.record.state = State::Operational;
    tracing::debug!(actor = ?ctx.record.id, "actor operational");
    actor.on_start(ctx);
    if ctx.record.behavior.kind == BehaviorKind::Supervisor {
        ctx.core.start_initialized_children();
    }
}

pub(crate) fn on_shutdown(actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    let Some(request) = message.downcast_ref::<Requested<ShutdownRequest>>() else {
        return;
    };
    if ctx.record.state >= State::ShuttingDown {
        return;
    }
    ctx.record.shutdown_request = Some((request.id, request.reply_to.clone()));
    if ctx.record.behavior.kind == BehaviorKind::Supervisor {
        crate::supervisor::begin_supervisor_shutdown(actor, ctx);
    } else {
        ctx.record.state = State::ShuttingDown;
        actor.shutdown_start(ctx);
    }
}

pub(crate) fn on_shutdown_trigger(_actor: &mut dyn AnyActor, message: &AnyMessage, ctx: &mut Context<'_>) {
    if message.downcast_ref::<ShutdownTrigger>().is_none() {
        return;
    }
    ctx.do_shutdown();
}
