//! The only place concrete scheduling and timer primitives appear. The core
//! talks to a [`Backend`] through this contract; adapters bind it to a
//! manual test pump, a cooperative event loop, or a dedicated thread.

mod manual;
mod thread;
#[path = "tokio.rs"]
mod tokio_loop;

pub use manual::ManualBackend;
pub use thread::ThreadBackend;
pub use tokio_loop::TokioBackend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::actor::State;
use crate::address::{Address, Mailbox};
use crate::protocol::TimerTrigger;
use crate::supervisor::{self, SupervisorCore};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn next() -> Self {
        TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A callable posted onto a supervisor's executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// The contract a scheduling/timer provider implements for one supervisor.
///
/// All methods must be safe to call from any thread. Timer fire never runs
/// core code inline: it posts a `timer_trigger` message through
/// [`PumpHandle::fire_timer`] and lets the supervisor's executor deliver it.
pub trait Backend: Send + Sync + 'static {
    /// Binds the supervisor's pump. Called once at supervisor creation,
    /// before any timer is started.
    fn attach(&self, pump: PumpHandle);

    /// Enqueues `job` to run on this supervisor's executor.
    fn post(&self, job: Job);

    /// Fires once after `duration` unless cancelled first.
    fn start_timer(&self, duration: Duration, id: TimerId);

    fn cancel_timer(&self, id: TimerId);

    /// Ensures the pump runs soon; called when work was posted from outside
    /// the supervisor's executor.
    fn wake(&self);
}

/// What a backend drives a supervisor with: pumping the queue, delivering
/// timer triggers, and observing the terminal state.
#[derive(Clone)]
pub struct PumpHandle {
    mailbox: Arc<Mailbox>,
    supervisor: Address,
    core: Weak<Mutex<SupervisorCore>>,
}

impl PumpHandle {
    pub(crate) fn new(
        mailbox: Arc<Mailbox>,
        supervisor: Address,
        core: Weak<Mutex<SupervisorCore>>,
    ) -> Self {
        PumpHandle {
            mailbox,
            supervisor,
            core,
        }
    }

    pub(crate) fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Drains the supervisor's queue to quiescence.
    pub fn process(&self) {
        supervisor::drain(&self.mailbox);
    }

    /// Delivers an elapsed timer as a `timer_trigger` message on the
    /// supervisor's queue.
    pub fn fire_timer(&self, id: TimerId) {
        self.supervisor.send(TimerTrigger { id });
    }

    /// True once the supervisor reached `ShuttedDown` (or is gone); backends
    /// use this to stop their loops.
    pub fn is_shutdown(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => core
                .lock()
                .own_state()
                .map_or(true, |state| state == State::ShuttedDown),
            None => true,
        }
    }
}
