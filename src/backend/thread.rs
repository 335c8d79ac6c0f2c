use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Backend, Job, PumpHandle, TimerId};
use crate::address::Wake;

/// Dedicated-thread adapter: one OS thread per supervisor, parked on a
/// condvar until work or a timer deadline arrives. The worker thread is the
/// serializing executor; it exits on its own once the supervisor reaches
/// `ShuttedDown`.
pub struct ThreadBackend {
    inner: Arc<ThreadInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ThreadInner {
    state: Mutex<ThreadState>,
    available: Condvar,
}

#[derive(Default)]
struct ThreadState {
    pump: Option<PumpHandle>,
    timers: BinaryHeap<TimerEntry>,
    cancelled: HashSet<TimerId>,
    jobs: Vec<Job>,
    woken: bool,
    stop: bool,
}

struct TimerEntry {
    at: Instant,
    id: TimerId,
}

// BinaryHeap is a max-heap; order entries so the earliest deadline wins.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl Wake for ThreadInner {
    fn wake(&self) {
        let mut state = self.state.lock();
        state.woken = true;
        self.available.notify_one();
    }
}

impl ThreadBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(ThreadBackend {
            inner: Arc::new(ThreadInner {
                state: Mutex::new(ThreadState::default()),
                available: Condvar::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Blocks until the worker thread exits, which happens once the
    /// supervisor shuts down (or [`stop`](ThreadBackend::stop) is called).
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.stop = true;
        self.inner.available.notify_one();
    }
}

impl Backend for ThreadBackend {
    fn attach(&self, pump: PumpHandle) {
        let inner_dyn: Arc<dyn Wake> = self.inner.clone();
        let waker: Weak<dyn Wake> = Arc::downgrade(&inner_dyn);
        pump.mailbox().set_waker(waker);
        {
            let mut state = self.inner.state.lock();
            state.pump = Some(pump);
            state.woken = true;
        }
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || run(inner));
        *self.worker.lock() = Some(handle);
    }

    fn post(&self, job: Job) {
        let mut state = self.inner.state.lock();
        state.jobs.push(job);
        state.woken = true;
        self.inner.available.notify_one();
    }

    fn start_timer(&self, duration: Duration, id: TimerId) {
        let mut state = self.inner.state.lock();
        state.cancelled.remove(&id);
        state.timers.push(TimerEntry {
            at: Instant::now() + duration,
            id,
        });
        self.inner.available.notify_one();
    }

    fn cancel_timer(&self, id: TimerId) {
        let mut state = self.inner.state.lock();
        state.cancelled.insert(id);
        self.inner.available.notify_one();
    }

    fn wake(&self) {
        let mut state = self.inner.state.lock();
        state.woken = true;
        self.inner.available.notify_one();
    }
}

fn run(inner: Arc<ThreadInner>) {
    loop {
        let (due, jobs, pump) = {
            let mut state = inner.state.lock();
            if state.stop {
                break;
            }
            let now = Instant::now();
            let mut due = Vec::new();
            while state.timers.peek().map_or(false, |entry| entry.at <= now) {
                if let Some(entry) = state.timers.pop() {
                    if !state.cancelled.remove(&entry.id) {
                        due.push(entry.id);
                    }
                }
            }
            let jobs = std::mem::take(&mut state.jobs);
            let woken = std::mem::replace(&mut state.woken, false);
            if due.is_empty() && jobs.is_empty() && !woken {
                match state.timers.peek().map(|entry| entry.at) {
                    Some(at) => {
                        inner.available.wait_until(&mut state, at);
                    }
                    None => inner.available.wait(&mut state),
                }
                continue;
            }
            (due, jobs, state.pump.clone())
        };
        let Some(pump) = pump else {
            continue;
        };
        for id in due {
            pump.fire_timer(id);
        }
        for job in jobs {
            job();
        }
        pump.process();
        if pump.is_shutdown() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::*;

    struct Ping {
        from: Address,
    }

    struct Pong;

    #[derive(Default)]
    struct Counters {
        ping_sent: AtomicU32,
        ping_received: AtomicU32,
        pong_sent: AtomicU32,
        pong_received: AtomicU32,
    }

    /// Waits until the ponger is operational (polling its supervisor with
    /// state requests), then sends a single ping and shuts both
    /// supervisors down on the pong.
    struct Pinger {
        ponger: Address,
        counters: Arc<Counters>,
        attempts: u32,
    }

    impl Pinger {
        fn request_status(&mut self, ctx: &mut Context<'_>) {
            self.attempts += 1;
            let supervisor = self.ponger.supervisor();
            let subject = self.ponger.clone();
            ctx.request(&supervisor, StateRequest { subject })
                .send(Duration::from_secs(1));
        }

        fn on_ponger_start(&mut self, _msg: &StartActor, ctx: &mut Context<'_>) {
            if ctx.state() == State::Initializing {
                ctx.init_finish();
            }
        }

        fn on_state(&mut self, msg: &StateResponse, ctx: &mut Context<'_>) {
            if ctx.state() != State::Initializing {
                return;
            }
            match msg.result {
                Ok(State::Operational) => ctx.init_finish(),
                _ => {
                    if self.attempts > 64 {
                        ctx.do_shutdown();
                    } else {
                        self.request_status(ctx);
                    }
                }
            }
        }

        fn on_pong(&mut self, _msg: &Pong, ctx: &mut Context<'_>) {
            self.counters.pong_received.fetch_add(1, Ordering::SeqCst);
            let own = ctx.supervisor_address();
            ctx.send(
                &own,
                ShutdownTrigger {
                    target: own.clone(),
                },
            );
            let peer = self.ponger.supervisor();
            ctx.send(
                &peer,
                ShutdownTrigger {
                    target: peer.clone(),
                },
            );
        }
    }

    impl Actor for Pinger {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Pinger::on_pong);
            let ponger = self.ponger.clone();
            ctx.subscribe_to(Pinger::on_ponger_start, &ponger);
            ctx.subscribe(Pinger::on_state);
            self.request_status(ctx);
        }

        fn on_start(&mut self, ctx: &mut Context<'_>) {
            let ponger = self.ponger.clone();
            ctx.unsubscribe_from(Pinger::on_ponger_start, &ponger);
            ctx.unsubscribe(Pinger::on_state);
            self.counters.ping_sent.fetch_add(1, Ordering::SeqCst);
            let from = ctx.address().clone();
            ctx.send(&self.ponger, Ping { from });
        }
    }

    struct Ponger {
        counters: Arc<Counters>,
    }

    impl Ponger {
        fn on_ping(&mut self, msg: &Ping, ctx: &mut Context<'_>) {
            self.counters.ping_received.fetch_add(1, Ordering::SeqCst);
            ctx.send(&msg.from, Pong);
            self.counters.pong_sent.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Actor for Ponger {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Ponger::on_ping);
            ctx.init_finish();
        }
    }

    #[test]
    fn ping_pong_across_two_threads() {
        crate::lib_test::init_tracing();
        let system = SystemContext::new();
        let b1 = ThreadBackend::new();
        let b2 = ThreadBackend::new();
        let s1 = system.create_supervisor(SupervisorConfig::default(), b1.clone());
        let s2 = system.create_supervisor(SupervisorConfig::default(), b2.clone());
        let counters = Arc::new(Counters::default());

        let ponger = s2.create_actor(Ponger {
            counters: counters.clone(),
        });
        s1.create_actor(Pinger {
            ponger: ponger.address().clone(),
            counters: counters.clone(),
            attempts: 0,
        });

        s1.start();
        s2.start();
        b1.join();
        b2.join();

        assert_eq!(counters.ping_sent.load(Ordering::SeqCst), 1);
        assert_eq!(counters.ping_received.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pong_sent.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pong_received.load(Ordering::SeqCst), 1);

        assert_eq!(s1.state(), State::ShuttedDown);
        assert_eq!(s2.state(), State::ShuttedDown);
        assert_eq!(s1.queue_len(), 0);
        assert_eq!(s2.queue_len(), 0);
        assert_eq!(s1.subscription_count(), 0);
        assert_eq!(s2.subscription_count(), 0);
        assert_eq!(s1.supervisor_points(), 0);
        assert_eq!(s2.supervisor_points(), 0);
    }

    struct Stall;

    impl Actor for Stall {
        fn shutdown_start(&mut self, _ctx: &mut Context<'_>) {}
    }

    #[test]
    fn shutdown_deadline_is_enforced_in_real_time() {
        let system = SystemContext::new();
        let backend = ThreadBackend::new();
        let config = SupervisorConfig {
            shutdown_timeout: Duration::from_millis(10),
            ..SupervisorConfig::default()
        };
        let sup = system.create_supervisor(config, backend.clone());
        sup.create_actor(Stall);

        sup.start();
        sup.shutdown();
        backend.join();

        assert_eq!(sup.state(), State::ShuttedDown);
        assert_eq!(sup.actor_count(), 0);
        assert_eq!(sup.subscription_count(), 0);
    }
}
