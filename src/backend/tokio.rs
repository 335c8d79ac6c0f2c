use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Backend, Job, PumpHandle, TimerId};
use crate::address::Wake;

/// Event-loop adapter. A dedicated task per supervisor waits on a [`Notify`]
/// and pumps the queue; that task is the serializing executor, so on a
/// multi-thread runtime several supervisors run in parallel while each one
/// stays single-threaded. On a current-thread runtime the same adapter is a
/// cooperative single-threaded loop.
///
/// Must be created and attached inside a tokio runtime.
pub struct TokioBackend {
    inner: Arc<TokioInner>,
}

struct TokioInner {
    notify: Notify,
    cancel: CancellationToken,
    pump: Mutex<Option<PumpHandle>>,
    timers: Mutex<HashMap<TimerId, CancellationToken>>,
    jobs: Mutex<Vec<Job>>,
}

impl Wake for TokioInner {
    fn wake(&self) {
        self.notify.notify_one();
    }
}

impl TokioBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(TokioBackend {
            inner: Arc::new(TokioInner {
                notify: Notify::new(),
                cancel: CancellationToken::new(),
                pump: Mutex::new(None),
                timers: Mutex::new(HashMap::new()),
                jobs: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Cancels the pump task and every pending timer. The normal exit path
    /// is the supervisor reaching `ShuttedDown`; this is for tearing down a
    /// supervisor that never will.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }
}

impl Backend for TokioBackend {
    fn attach(&self, pump: PumpHandle) {
        let inner_dyn: Arc<dyn Wake> = self.inner.clone();
        let waker: Weak<dyn Wake> = Arc::downgrade(&inner_dyn);
        pump.mailbox().set_waker(waker);
        *self.inner.pump.lock() = Some(pump.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = inner.notify.notified() => {}
                }
                let jobs = std::mem::take(&mut *inner.jobs.lock());
                for job in jobs {
                    job();
                }
                pump.process();
                if pump.is_shutdown() {
                    break;
                }
            }
        });
    }

    fn post(&self, job: Job) {
        self.inner.jobs.lock().push(job);
        self.inner.notify.notify_one();
    }

    fn start_timer(&self, duration: Duration, id: TimerId) {
        let token = self.inner.cancel.child_token();
        self.inner.timers.lock().insert(id, token.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    inner.timers.lock().remove(&id);
                    let pump = inner.pump.lock().clone();
                    if let Some(pump) = pump {
                        pump.fire_timer(id);
                    }
                }
            }
        });
    }

    fn cancel_timer(&self, id: TimerId) {
        if let Some(token) = self.inner.timers.lock().remove(&id) {
            token.cancel();
        }
    }

    fn wake(&self) {
        self.inner.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::*;

    async fn until_shut_down(sup: &Supervisor) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sup.state() != State::ShuttedDown {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("supervisor did not shut down in time");
    }

    struct Ping {
        from: Address,
    }

    struct Pong;

    struct Pinger {
        ponger: Address,
        pongs: Arc<AtomicU32>,
    }

    impl Pinger {
        fn on_pong(&mut self, _msg: &Pong, ctx: &mut Context<'_>) {
            self.pongs.fetch_add(1, Ordering::SeqCst);
            let own = ctx.supervisor_address();
            ctx.send(
                &own,
                ShutdownTrigger {
                    target: own.clone(),
                },
            );
        }
    }

    impl Actor for Pinger {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Pinger::on_pong);
            ctx.init_finish();
        }

        fn on_start(&mut self, ctx: &mut Context<'_>) {
            let from = ctx.address().clone();
            ctx.send(&self.ponger, Ping { from });
        }
    }

    struct Ponger;

    impl Ponger {
        fn on_ping(&mut self, msg: &Ping, ctx: &mut Context<'_>) {
            ctx.send(&msg.from, Pong);
        }
    }

    impl Actor for Ponger {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Ponger::on_ping);
            ctx.init_finish();
        }
    }

    #[tokio::test]
    async fn ping_pong_on_a_cooperative_loop() {
        let system = SystemContext::new();
        let backend = TokioBackend::new();
        let sup = system.create_supervisor(SupervisorConfig::default(), backend);
        let pongs = Arc::new(AtomicU32::new(0));

        let ponger = sup.create_actor(Ponger);
        sup.create_actor(Pinger {
            ponger: ponger.address().clone(),
            pongs: pongs.clone(),
        });

        sup.start();
        until_shut_down(&sup).await;

        assert_eq!(pongs.load(Ordering::SeqCst), 1);
        assert_eq!(sup.queue_len(), 0);
        assert_eq!(sup.subscription_count(), 0);
        assert_eq!(sup.actor_count(), 0);
    }

    #[derive(Clone)]
    struct Probe;

    impl RequestPayload for Probe {
        type Reply = u32;
    }

    struct Mute;

    impl Mute {
        fn on_probe(&mut self, _msg: &Requested<Probe>, _ctx: &mut Context<'_>) {}
    }

    impl Actor for Mute {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Mute::on_probe);
            ctx.init_finish();
        }
    }

    struct Requester {
        target: Address,
        timeouts: Arc<AtomicU32>,
    }

    impl Requester {
        fn on_probe_response(&mut self, msg: &Responded<Probe>, ctx: &mut Context<'_>) {
            if msg.result == Err(ErrorCode::RequestTimeout) {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
            }
            let own = ctx.supervisor_address();
            ctx.send(
                &own,
                ShutdownTrigger {
                    target: own.clone(),
                },
            );
        }
    }

    impl Actor for Requester {
        fn init_start(&mut self, ctx: &mut Context<'_>) {
            ctx.subscribe(Requester::on_probe_response);
            ctx.init_finish();
        }

        fn on_start(&mut self, ctx: &mut Context<'_>) {
            let target = self.target.clone();
            ctx.request(&target, Probe).send(Duration::from_millis(20));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_timeout_fires_through_the_event_loop() {
        let system = SystemContext::new();
        let s1 = system.create_supervisor(SupervisorConfig::default(), TokioBackend::new());
        let s2 = system.create_supervisor(SupervisorConfig::default(), TokioBackend::new());
        let timeouts = Arc::new(AtomicU32::new(0));

        let mute = s2.create_actor(Mute);
        s1.create_actor(Requester {
            target: mute.address().clone(),
            timeouts: timeouts.clone(),
        });

        s1.start();
        s2.start();
        until_shut_down(&s1).await;

        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        s2.shutdown();
        until_shut_down(&s2).await;
    }
}
