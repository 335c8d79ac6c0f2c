use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use crate::*;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pump_both(a: &Supervisor, b: &Supervisor) {
    loop {
        a.process();
        b.process();
        if a.queue_len() == 0 && b.queue_len() == 0 {
            break;
        }
    }
}

struct Ping;
struct Pong;

#[derive(Default)]
struct PingPongCounters {
    ping_sent: AtomicU32,
    ping_received: AtomicU32,
    pong_sent: AtomicU32,
    pong_received: AtomicU32,
}

struct Pinger {
    ponger: Address,
    counters: Arc<PingPongCounters>,
}

impl Pinger {
    fn on_pong(&mut self, _msg: &Pong, _ctx: &mut Context<'_>) {
        self.counters.pong_received.fetch_add(1, Ordering::SeqCst);
    }
}

impl Actor for Pinger {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Pinger::on_pong);
        ctx.init_finish();
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        self.counters.ping_sent.fetch_add(1, Ordering::SeqCst);
        ctx.send(&self.ponger, Ping);
    }
}

struct Ponger {
    pinger: Option<Address>,
    counters: Arc<PingPongCounters>,
}

impl Ponger {
    fn on_ping(&mut self, _msg: &Ping, ctx: &mut Context<'_>) {
        self.counters.ping_received.fetch_add(1, Ordering::SeqCst);
        if let Some(pinger) = &self.pinger {
            ctx.send(pinger, Pong);
            self.counters.pong_sent.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Actor for Ponger {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Ponger::on_ping);
        ctx.init_finish();
    }
}

#[test]
fn ping_pong_on_one_supervisor() {
    init_tracing();
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend.clone());
    let counters = Arc::new(PingPongCounters::default());

    let ponger = sup.create_actor(Ponger {
        pinger: None,
        counters: counters.clone(),
    });
    let pinger = sup.create_actor(Pinger {
        ponger: ponger.address().clone(),
        counters: counters.clone(),
    });
    sup.with_actor_mut(&ponger, |p: &mut Ponger| {
        p.pinger = Some(pinger.address().clone());
    })
    .unwrap();

    sup.start();
    sup.process();

    assert_eq!(counters.ping_sent.load(Ordering::SeqCst), 1);
    assert_eq!(counters.ping_received.load(Ordering::SeqCst), 1);
    assert_eq!(counters.pong_sent.load(Ordering::SeqCst), 1);
    assert_eq!(counters.pong_received.load(Ordering::SeqCst), 1);
    assert_matches!(sup.state(), State::Operational);

    sup.shutdown();
    sup.process();

    assert_matches!(sup.state(), State::ShuttedDown);
    assert_eq!(sup.queue_len(), 0);
    assert_eq!(sup.subscription_count(), 0);
    assert_eq!(sup.actor_count(), 0);
    assert_eq!(sup.supervisor_points(), 0);
    assert_eq!(backend.timer_count(), 0);
    assert_eq!(system.supervisor_count(), 0);
}

struct SampleActor;

impl Actor for SampleActor {}

struct Observer {
    observable: Option<Address>,
    events: Arc<AtomicU32>,
}

impl Observer {
    fn on_sample_initialize(&mut self, _msg: &InitRequest, _ctx: &mut Context<'_>) {
        self.events.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sample_start(&mut self, _msg: &StartActor, _ctx: &mut Context<'_>) {
        self.events.fetch_add(2, Ordering::SeqCst);
    }

    fn on_sample_shutdown(&mut self, _msg: &Requested<ShutdownRequest>, _ctx: &mut Context<'_>) {
        self.events.fetch_add(4, Ordering::SeqCst);
    }
}

impl Actor for Observer {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        if let Some(observable) = self.observable.clone() {
            ctx.subscribe_to(Observer::on_sample_initialize, &observable);
            ctx.subscribe_to(Observer::on_sample_start, &observable);
            ctx.subscribe_to(Observer::on_sample_shutdown, &observable);
        }
        ctx.init_finish();
    }
}

#[test]
fn lifecycle_observer_sees_init_start_and_shutdown() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend);
    let events = Arc::new(AtomicU32::new(0));

    let observer = sup.create_actor(Observer {
        observable: None,
        events: events.clone(),
    });
    let sample = sup.create_actor(SampleActor);
    sup.with_actor_mut(&observer, |o: &mut Observer| {
        o.observable = Some(sample.address().clone());
    })
    .unwrap();

    sup.start();
    sup.process();
    assert_eq!(events.load(Ordering::SeqCst), 3);

    sup.shutdown();
    sup.process();
    assert_eq!(events.load(Ordering::SeqCst), 7);

    assert_matches!(sup.state(), State::ShuttedDown);
    assert_eq!(sup.queue_len(), 0);
    assert_eq!(sup.supervisor_points(), 0);
    assert_eq!(sup.subscription_count(), 0);
}

struct Tick;

struct Collector {
    seen: Arc<AtomicU32>,
}

impl Collector {
    fn on_tick(&mut self, _msg: &Tick, _ctx: &mut Context<'_>) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

impl Actor for Collector {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Collector::on_tick);
        ctx.init_finish();
    }
}

#[test]
fn every_send_is_delivered_exactly_once() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend);
    let seen = Arc::new(AtomicU32::new(0));
    let collector = sup.create_actor(Collector { seen: seen.clone() });

    sup.process();
    for _ in 0..5 {
        collector.address().send(Tick);
    }
    sup.process();

    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[derive(Clone)]
struct Probe;

impl RequestPayload for Probe {
    type Reply = u32;
}

struct Poke;

/// Records probe requests without answering; replies only when poked.
struct Mute {
    held: Option<Requested<Probe>>,
}

impl Mute {
    fn on_probe(&mut self, msg: &Requested<Probe>, _ctx: &mut Context<'_>) {
        self.held = Some(msg.clone());
    }

    fn on_poke(&mut self, _msg: &Poke, ctx: &mut Context<'_>) {
        if let Some(request) = self.held.take() {
            ctx.reply_to(&request, 7);
        }
    }
}

impl Actor for Mute {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Mute::on_probe);
        ctx.subscribe(Mute::on_poke);
        ctx.init_finish();
    }
}

struct Requester {
    target: Address,
    timeout: Duration,
    timeouts: Arc<AtomicU32>,
    replies: Arc<AtomicU32>,
}

impl Requester {
    fn on_probe_response(&mut self, msg: &Responded<Probe>, _ctx: &mut Context<'_>) {
        match &msg.result {
            Ok(_) => {
                self.replies.fetch_add(1, Ordering::SeqCst);
            }
            Err(ErrorCode::RequestTimeout) => {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {}
        }
    }
}

impl Actor for Requester {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Requester::on_probe_response);
        ctx.init_finish();
    }

    fn on_start(&mut self, ctx: &mut Context<'_>) {
        let target = self.target.clone();
        ctx.request(&target, Probe).send(self.timeout);
    }
}

#[test]
fn request_without_reply_times_out_exactly_once() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend.clone());
    let timeouts = Arc::new(AtomicU32::new(0));
    let replies = Arc::new(AtomicU32::new(0));

    let mute = sup.create_actor(Mute { held: None });
    sup.create_actor(Requester {
        target: mute.address().clone(),
        timeout: Duration::from_millis(5),
        timeouts: timeouts.clone(),
        replies: replies.clone(),
    });

    sup.start();
    sup.process();
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert_eq!(backend.timer_count(), 1);

    backend.fire_next().unwrap();
    sup.process();
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(replies.load(Ordering::SeqCst), 0);
    assert_eq!(backend.timer_count(), 0);

    // a reply arriving after the timeout is dropped, not delivered twice
    mute.address().send(Poke);
    sup.process();
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(replies.load(Ordering::SeqCst), 0);
}

#[test]
fn answered_request_cancels_its_timer() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend.clone());
    let timeouts = Arc::new(AtomicU32::new(0));
    let replies = Arc::new(AtomicU32::new(0));

    let mute = sup.create_actor(Mute { held: None });
    sup.create_actor(Requester {
        target: mute.address().clone(),
        timeout: Duration::from_secs(1),
        timeouts: timeouts.clone(),
        replies: replies.clone(),
    });

    sup.start();
    sup.process();
    mute.address().send(Poke);
    sup.process();

    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert_eq!(backend.timer_count(), 0);
}

struct Go;

struct ViaProbe {
    target: Address,
    via_replies: Arc<AtomicU32>,
}

impl ViaProbe {
    fn on_go(&mut self, _msg: &Go, ctx: &mut Context<'_>) {
        let side = ctx.create_address();
        ctx.subscribe_to(ViaProbe::on_side_response, &side);
        let target = self.target.clone();
        ctx.request_via(&target, &side, Probe)
            .send(Duration::from_secs(1));
    }

    fn on_side_response(&mut self, msg: &Responded<Probe>, _ctx: &mut Context<'_>) {
        if msg.result.is_ok() {
            self.via_replies.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Actor for ViaProbe {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(ViaProbe::on_go);
        ctx.init_finish();
    }
}

#[test]
fn request_via_routes_the_response_to_a_virtual_address() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let via_replies = Arc::new(AtomicU32::new(0));

    let mute = sup.create_actor(Mute { held: None });
    let probe = sup.create_actor(ViaProbe {
        target: mute.address().clone(),
        via_replies: via_replies.clone(),
    });

    sup.start();
    sup.process();
    probe.address().send(Go);
    sup.process();
    mute.address().send(Poke);
    sup.process();

    assert_eq!(via_replies.load(Ordering::SeqCst), 1);
}

struct Unsub;

struct Watcher {
    target: Address,
    seen: Arc<AtomicU32>,
}

struct Evt;

impl Watcher {
    fn on_evt(&mut self, _msg: &Evt, _ctx: &mut Context<'_>) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unsub(&mut self, _msg: &Unsub, ctx: &mut Context<'_>) {
        let target = self.target.clone();
        ctx.unsubscribe_from(Watcher::on_evt, &target);
    }
}

impl Actor for Watcher {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        let target = self.target.clone();
        ctx.subscribe_to(Watcher::on_evt, &target);
        ctx.subscribe(Watcher::on_unsub);
        ctx.init_finish();
    }
}

#[test]
fn cross_supervisor_subscribe_and_unsubscribe() {
    let system = SystemContext::new();
    let s1 = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let s2 = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let seen = Arc::new(AtomicU32::new(0));

    let holder = s2.create_actor(SampleActor);
    let watcher = s1.create_actor(Watcher {
        target: holder.address().clone(),
        seen: seen.clone(),
    });
    pump_both(&s1, &s2);

    let subscribed = s2.subscription_count();
    let points = s1.point_count(&watcher).unwrap();

    // the handler runs on the watcher's own supervisor
    holder.address().send(Evt);
    pump_both(&s1, &s2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    watcher.address().send(Unsub);
    pump_both(&s1, &s2);
    assert_eq!(s2.subscription_count(), subscribed - 1);
    assert_eq!(s1.point_count(&watcher).unwrap(), points - 1);

    // deliveries after the unsubscribe no longer reach the handler
    holder.address().send(Evt);
    pump_both(&s1, &s2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

struct SelfDestruct;

struct Quitter {
    down: Arc<AtomicU32>,
}

impl Quitter {
    fn on_self_destruct(&mut self, _msg: &SelfDestruct, ctx: &mut Context<'_>) {
        // repeated calls collapse to a single shutdown
        ctx.do_shutdown();
        ctx.do_shutdown();
    }
}

impl Actor for Quitter {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(Quitter::on_self_destruct);
        ctx.init_finish();
    }

    fn shutdown_finish(&mut self, _ctx: &mut Context<'_>) {
        self.down.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn shutdown_trigger_on_the_actor_address_forwards_to_the_supervisor() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend.clone());
    let down = Arc::new(AtomicU32::new(0));
    let quitter = sup.create_actor(Quitter { down: down.clone() });

    sup.start();
    sup.process();
    assert_eq!(sup.actor_count(), 1);

    // a trigger delivered on the actor's own address is forwarded to its
    // supervisor, which answers with a proper shutdown request
    let target = quitter.address().clone();
    target.send(ShutdownTrigger {
        target: target.clone(),
    });
    sup.process();

    assert_eq!(down.load(Ordering::SeqCst), 1);
    assert_eq!(sup.actor_count(), 0);
    assert_eq!(sup.queue_len(), 0);
    assert_eq!(backend.timer_count(), 0);
    assert_matches!(sup.state(), State::Operational);
}

#[test]
fn repeated_do_shutdown_collapses_to_one() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), backend.clone());
    let down = Arc::new(AtomicU32::new(0));
    let quitter = sup.create_actor(Quitter { down: down.clone() });

    sup.start();
    sup.process();
    assert_eq!(sup.actor_count(), 1);

    quitter.address().send(SelfDestruct);
    sup.process();

    assert_eq!(down.load(Ordering::SeqCst), 1);
    assert_eq!(sup.actor_count(), 0);
    assert_eq!(sup.queue_len(), 0);
    assert_eq!(backend.timer_count(), 0);
    // the supervisor itself keeps running
    assert_matches!(sup.state(), State::Operational);
}

struct DropEvt;

struct CallbackActor {
    handler: Option<HandlerRef>,
    fired: Arc<AtomicU32>,
}

struct Detach;

impl CallbackActor {
    fn on_drop_evt(&mut self, _msg: &DropEvt, _ctx: &mut Context<'_>) {}

    fn on_detach(&mut self, _msg: &Detach, ctx: &mut Context<'_>) {
        if let Some(handler) = self.handler.take() {
            let fired = self.fired.clone();
            let address = ctx.address().clone();
            ctx.unsubscribe_handler(
                &handler,
                &address,
                Some(UnsubscribeCallback::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
    }
}

impl Actor for CallbackActor {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        self.handler = Some(ctx.subscribe(CallbackActor::on_drop_evt));
        ctx.subscribe(CallbackActor::on_detach);
        ctx.init_finish();
    }
}

#[test]
fn unsubscription_callback_fires_on_confirmation_drop() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let fired = Arc::new(AtomicU32::new(0));
    let actor = sup.create_actor(CallbackActor {
        handler: None,
        fired: fired.clone(),
    });

    sup.process();
    let points = sup.point_count(&actor).unwrap();

    actor.address().send(Detach);
    sup.process();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(sup.point_count(&actor).unwrap(), points - 1);
}

struct Query;

struct StateProbe {
    subject: Address,
    observed: Arc<parking_lot::Mutex<Vec<Result<State, ErrorCode>>>>,
}

impl StateProbe {
    fn on_query(&mut self, _msg: &Query, ctx: &mut Context<'_>) {
        let supervisor = ctx.supervisor_address();
        let subject = self.subject.clone();
        ctx.request(&supervisor, StateRequest { subject })
            .send(Duration::from_secs(1));
    }

    fn on_state(&mut self, msg: &StateResponse, _ctx: &mut Context<'_>) {
        self.observed.lock().push(msg.result);
    }
}

impl Actor for StateProbe {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(StateProbe::on_query);
        ctx.subscribe(StateProbe::on_state);
        ctx.init_finish();
    }
}

#[test]
fn state_request_reports_the_subject_state() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let subject = sup.create_actor(SampleActor);
    let probe = sup.create_actor(StateProbe {
        subject: subject.address().clone(),
        observed: observed.clone(),
    });
    sup.start();
    sup.process();

    probe.address().send(Query);
    sup.process();

    assert_eq!(observed.lock().as_slice(), &[Ok(State::Operational)]);
}

#[test]
fn state_request_for_a_foreign_address_reports_unknown() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let other = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let probe = sup.create_actor(StateProbe {
        subject: other.address().clone(),
        observed: observed.clone(),
    });
    sup.start();
    sup.process();

    probe.address().send(Query);
    sup.process();

    assert_eq!(
        observed.lock().as_slice(),
        &[Err(ErrorCode::UnknownAddress)]
    );
}

#[test]
fn co_located_supervisors_share_one_pump() {
    let system = SystemContext::new();
    let s1 = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let config = SupervisorConfig {
        locality: Some(s1.locality()),
        ..SupervisorConfig::default()
    };
    let s2 = system.create_supervisor(config, ManualBackend::new());
    let seen = Arc::new(AtomicU32::new(0));
    let collector = s2.create_actor(Collector { seen: seen.clone() });

    // one pump drains both supervisors
    s1.process();
    assert_matches!(s2.state(), State::Operational);

    collector.address().send(Tick);
    s1.process();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    s2.shutdown();
    s1.process();
    assert_matches!(s2.state(), State::ShuttedDown);
    assert_matches!(s1.state(), State::Operational);

    // deliveries to a shut-down member are silently dropped
    collector.address().send(Tick);
    s1.process();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(s1.queue_len(), 0);
}

#[test]
fn subscribe_then_unsubscribe_leaves_no_residue() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    let seen = Arc::new(AtomicU32::new(0));

    let holder = sup.create_actor(SampleActor);
    let watcher = sup.create_actor(Watcher {
        target: holder.address().clone(),
        seen: seen.clone(),
    });
    sup.process();

    let subscribed = sup.subscription_count();
    let points = sup.point_count(&watcher).unwrap();

    watcher.address().send(Unsub);
    sup.process();

    assert_eq!(sup.subscription_count(), subscribed - 1);
    assert_eq!(sup.point_count(&watcher).unwrap(), points - 1);
    assert_eq!(sup.queue_len(), 0);
}
