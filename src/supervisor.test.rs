use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use crate::*;

#[derive(Default)]
struct LifecycleCounts {
    init_started: AtomicU32,
    started: AtomicU32,
    shutdown_started: AtomicU32,
    shutdown_finished: AtomicU32,
}

struct RootProbe {
    counts: Arc<LifecycleCounts>,
}

impl Actor for RootProbe {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        self.counts.init_started.fetch_add(1, Ordering::SeqCst);
        ctx.init_finish();
    }

    fn on_start(&mut self, _ctx: &mut Context<'_>) {
        self.counts.started.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown_start(&mut self, ctx: &mut Context<'_>) {
        self.counts.shutdown_started.fetch_add(1, Ordering::SeqCst);
        ctx.unsubscribe_all();
    }

    fn shutdown_finish(&mut self, _ctx: &mut Context<'_>) {
        self.counts.shutdown_finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn supervisor_initializes_starts_and_shuts_down() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let counts = Arc::new(LifecycleCounts::default());
    let sup = system.create_supervisor_with(
        RootProbe {
            counts: counts.clone(),
        },
        SupervisorConfig::default(),
        backend.clone(),
    );

    assert_matches!(sup.state(), State::Initializing);

    sup.process();
    assert_eq!(counts.init_started.load(Ordering::SeqCst), 1);
    assert_eq!(counts.started.load(Ordering::SeqCst), 1);
    assert_eq!(counts.shutdown_started.load(Ordering::SeqCst), 0);
    assert_matches!(sup.state(), State::Operational);
    assert_eq!(backend.timer_count(), 0);

    sup.shutdown();
    sup.process();
    assert_eq!(counts.shutdown_started.load(Ordering::SeqCst), 1);
    assert_eq!(counts.shutdown_finished.load(Ordering::SeqCst), 1);
    assert_matches!(sup.state(), State::ShuttedDown);
    assert_eq!(backend.timer_count(), 0);

    assert_eq!(sup.queue_len(), 0);
    assert_eq!(sup.supervisor_points(), 0);
    assert_eq!(sup.subscription_count(), 0);
    assert_eq!(system.supervisor_count(), 0);
}

#[test]
fn repeated_supervisor_shutdown_is_a_no_op() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let counts = Arc::new(LifecycleCounts::default());
    let sup = system.create_supervisor_with(
        RootProbe {
            counts: counts.clone(),
        },
        SupervisorConfig::default(),
        backend,
    );

    sup.process();
    sup.shutdown();
    sup.shutdown();
    sup.process();
    sup.shutdown();
    sup.process();

    assert_eq!(counts.shutdown_started.load(Ordering::SeqCst), 1);
    assert_eq!(counts.shutdown_finished.load(Ordering::SeqCst), 1);
    assert_matches!(sup.state(), State::ShuttedDown);
}

/// Stalls its shutdown forever: never releases a single subscription.
struct Stubborn;

impl Actor for Stubborn {
    fn shutdown_start(&mut self, _ctx: &mut Context<'_>) {}
}

#[test]
fn shutdown_timeout_escalates_and_destroys_stragglers() {
    let system = SystemContext::new();
    let backend = ManualBackend::new();
    let config = SupervisorConfig {
        shutdown_timeout: Duration::from_millis(10),
        ..SupervisorConfig::default()
    };
    let sup = system.create_supervisor(config, backend.clone());
    sup.create_actor(Stubborn);

    sup.start();
    sup.process();
    assert_eq!(sup.actor_count(), 1);

    sup.shutdown();
    sup.process();
    // the straggler holds the supervisor in ShuttingDown until the deadline
    assert_matches!(sup.state(), State::ShuttingDown);
    assert_eq!(sup.actor_count(), 1);
    assert_eq!(backend.timer_count(), 1);

    backend.fire_next().unwrap();
    sup.process();

    assert_matches!(sup.state(), State::ShuttedDown);
    assert_eq!(sup.actor_count(), 0);
    assert_eq!(sup.subscription_count(), 0);
    assert_eq!(sup.supervisor_points(), 0);
    assert_eq!(sup.queue_len(), 0);
}

#[test]
fn children_created_after_start_become_operational() {
    let system = SystemContext::new();
    let sup = system.create_supervisor(SupervisorConfig::default(), ManualBackend::new());
    sup.process();
    assert_matches!(sup.state(), State::Operational);

    let late = sup.create_actor(Stubborn);
    sup.process();

    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let probe = sup.create_actor(StatusAsker {
        subject: late.address().clone(),
        observed: observed.clone(),
    });
    sup.process();
    probe.address().send(Ask);
    sup.process();

    assert_eq!(observed.lock().as_slice(), &[Ok(State::Operational)]);
}

struct Ask;

struct StatusAsker {
    subject: Address,
    observed: Arc<parking_lot::Mutex<Vec<Result<State, ErrorCode>>>>,
}

impl StatusAsker {
    fn on_ask(&mut self, _msg: &Ask, ctx: &mut Context<'_>) {
        let supervisor = ctx.supervisor_address();
        let subject = self.subject.clone();
        ctx.request(&supervisor, StateRequest { subject })
            .send(Duration::from_secs(1));
    }

    fn on_state(&mut self, msg: &StateResponse, _ctx: &mut Context<'_>) {
        self.observed.lock().push(msg.result);
    }
}

impl Actor for StatusAsker {
    fn init_start(&mut self, ctx: &mut Context<'_>) {
        ctx.subscribe(StatusAsker::on_ask);
        ctx.subscribe(StatusAsker::on_state);
        ctx.init_finish();
    }
}
