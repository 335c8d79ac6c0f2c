//! `gyre` is an in-process actor runtime: concurrent computation expressed
//! as a graph of actors that communicate exclusively by asynchronous
//! messages.
//!
//! An actor holds private state, subscribes typed handlers to addresses, and
//! reacts to delivered messages by mutating state, sending further messages,
//! or triggering side effects. Actors are grouped under supervisors that own
//! the message queue and the actors, drive their lifecycle, and pump
//! delivery on behalf of an execution [`backend`]. The same actor code runs
//! against a manual test pump, a cooperative event loop, or a dedicated
//! thread per supervisor.
//!
//! Handlers execute to completion on the owning supervisor's executor;
//! anything that looks like waiting is a message out now and a reply
//! handled later. See [`Actor`], [`Context`], and [`Supervisor`] for the
//! main surface.

mod actor;
mod address;
pub mod backend;
mod behavior;
mod error;
mod handler;
mod message;
mod protocol;
mod request;
mod subscription;
mod supervisor;
mod system;

pub use actor::{Actor, Context, State};
pub use address::{Address, AddressId};
pub use backend::{Backend, Job, ManualBackend, PumpHandle, ThreadBackend, TimerId, TokioBackend};
pub use error::ErrorCode;
pub use handler::{HandlerKey, HandlerRef};
pub use message::{AnyMessage, Payload, RequestId, RequestPayload, Requested, Responded};
pub use protocol::{
    CommitUnsubscription, ExternalSubscription, ExternalUnsubscription, InitConfirmation,
    InitRequest, InitializeActor, ShutdownConfirmation, ShutdownRequest, ShutdownTrigger,
    StartActor, StateRequest, StateResponse, SubscriptionConfirmation, TimerTrigger,
    UnsubscribeCallback, UnsubscriptionConfirmation,
};
pub use request::RequestBuilder;
pub use subscription::SubscriptionPoint;
pub use supervisor::{ActorHandle, Locality, Supervisor, SupervisorConfig};
pub use system::SystemContext;

#[cfg(test)]
#[path = "lib.test.rs"]
mod lib_test;
