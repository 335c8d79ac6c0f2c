use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Backend, Job, PumpHandle, TimerId};

/// Test backend: nothing runs until the caller pumps. Timers are recorded
/// with their durations and fire only when the test says so, which makes
/// timeout paths deterministic.
pub struct ManualBackend {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    pump: Option<PumpHandle>,
    timers: Vec<(TimerId, Duration)>,
    jobs: Vec<Job>,
}

impl ManualBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualBackend {
            state: Mutex::new(ManualState::default()),
        })
    }

    /// Timers currently armed, in start order.
    pub fn active_timers(&self) -> Vec<TimerId> {
        self.state.lock().timers.iter().map(|(id, _)| *id).collect()
    }

    pub fn timer_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Fires one armed timer: posts its trigger onto the supervisor's queue.
    /// The caller pumps afterwards to observe the effect.
    pub fn fire(&self, id: TimerId) {
        let pump = {
            let mut state = self.state.lock();
            let Some(index) = state.timers.iter().position(|(t, _)| *t == id) else {
                return;
            };
            state.timers.remove(index);
            state.pump.clone()
        };
        if let Some(pump) = pump {
            pump.fire_timer(id);
        }
    }

    /// Fires the earliest armed timer, if any.
    pub fn fire_next(&self) -> Option<TimerId> {
        let id = self.state.lock().timers.first().map(|(id, _)| *id)?;
        self.fire(id);
        Some(id)
    }

    /// Runs every posted job on the caller's thread.
    pub fn run_posted(&self) {
        let jobs = std::mem::take(&mut self.state.lock().jobs);
        for job in jobs {
            job();
        }
    }
}

impl Backend for ManualBackend {
    fn attach(&self, pump: PumpHandle) {
        self.state.lock().pump = Some(pump);
    }

    fn post(&self, job: Job) {
        self.state.lock().jobs.push(job);
    }

    fn start_timer(&self, duration: Duration, id: TimerId) {
        self.state.lock().timers.push((id, duration));
    }

    fn cancel_timer(&self, id: TimerId) {
        let mut state = self.state.lock();
        state.timers.retain(|(t, _)| *t != id);
    }

    fn wake(&self) {}
}
