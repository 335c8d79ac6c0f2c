use thiserror::Error;

/// Error kinds surfaced by the runtime.
///
/// Errors tied to a request travel back inside the response payload as
/// `Result<_, ErrorCode>`. Everything else is logged; the pump never unwinds
/// into the backend.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A request did not receive a response before its timer expired.
    #[error("request timed out before a response arrived")]
    RequestTimeout,

    /// Delivery targeted an address that is no longer registered.
    #[error("destination address is not registered with any live supervisor")]
    UnknownAddress,

    /// An actor failed to confirm shutdown within the supervisor's timeout
    /// and was forcibly destroyed.
    #[error("actor failed to confirm shutdown in time")]
    ActorMisbehaved,

    /// An unsubscription referenced a subscription that does not exist.
    #[error("no matching subscription found")]
    SubscriptionMissing,
}
