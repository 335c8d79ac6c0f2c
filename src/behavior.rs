//! Init and shutdown sequencing, kept apart from the public actor state.
//!
//! A single public state such as `Initializing` covers several internal
//! substeps (waiting for subscription acks, waiting for a deferred
//! `init_finish`). Keeping the substeps in their own little machine is what
//! makes both protocols resumable across asynchronous confirmations.

/// Which completion rules apply to the cell: a plain actor finishes shutdown
/// once its points drain; a supervisor first waits for its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BehaviorKind {
    Actor,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Before the init request arrived.
    Idle,
    /// Init request recorded; waiting for `init_finish` and for every
    /// subscription confirmation issued so far.
    InitPending { finish_requested: bool },
    /// Init confirmed; normal operation.
    Ready,
    /// Supervisor only: shutdown requests sent, children not yet confirmed.
    StoppingChildren,
    /// Unsubscription of every point is in flight.
    Unsubscribing,
    /// Shutdown confirmed; no further framework calls reach the actor.
    Done,
}

#[derive(Debug)]
pub(crate) struct Behavior {
    pub kind: BehaviorKind,
    pub phase: Phase,
}

impl Behavior {
    pub fn new(kind: BehaviorKind) -> Self {
        Behavior {
            kind,
            phase: Phase::Idle,
        }
    }

    /// Init request recorded; the actor's `init_start` hook runs next.
    pub fn on_start_init(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::InitPending {
                finish_requested: false,
            };
        }
    }

    /// `init_finish` was called; returns false when init is not pending
    /// (already complete, or shutdown took over).
    pub fn request_init_finish(&mut self) -> bool {
        match self.phase {
            Phase::InitPending { .. } => {
                self.phase = Phase::InitPending {
                    finish_requested: true,
                };
                true
            }
            _ => false,
        }
    }

    pub fn init_complete(&self) -> bool {
        matches!(
            self.phase,
            Phase::InitPending {
                finish_requested: true
            }
        )
    }

    pub fn begin_stopping_children(&mut self) {
        self.phase = Phase::StoppingChildren;
    }

    pub fn begin_unsubscribing(&mut self) {
        self.phase = Phase::Unsubscribing;
    }

    pub fn is_unsubscribing(&self) -> bool {
        self.phase == Phase::Unsubscribing
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Done;
    }
}
