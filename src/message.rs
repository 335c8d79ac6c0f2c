use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::address::Address;
use crate::error::ErrorCode;
use crate::handler::HandlerRef;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Marker for anything that can ride a message envelope.
pub trait Payload: Any + Send + Sync {}

impl<T: Any + Send + Sync> Payload for T {}

/// Correlation identifier pairing a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A payload that expects an answer. The associated type fixes the response
/// wrapping rule: a request of `P` is answered by a [`Responded<P>`] carrying
/// `Result<P::Reply, ErrorCode>`.
pub trait RequestPayload: Payload {
    type Reply: Send + Sync + 'static;
}

/// Request envelope payload: the inner payload plus correlation id and the
/// address the response must go to.
#[derive(Clone)]
pub struct Requested<P: RequestPayload> {
    pub id: RequestId,
    pub reply_to: Address,
    pub payload: P,
}

impl<P: RequestPayload> Deref for Requested<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.payload
    }
}

/// Response envelope payload: the originating request id and a
/// value-or-error.
pub struct Responded<P: RequestPayload> {
    pub id: RequestId,
    pub result: Result<P::Reply, ErrorCode>,
}

/// Type-erased message envelope: (type key, destination, payload).
///
/// The type key is the `TypeId` of the payload type; handlers whose key does
/// not match skip the message silently. The payload is shared by refcount so
/// cross-supervisor redelivery never copies it.
pub struct AnyMessage {
    dest: Address,
    key: TypeId,
    type_name: &'static str,
    correlation: Option<RequestId>,
    direct: Option<HandlerRef>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl AnyMessage {
    pub fn new<P: Payload>(dest: Address, payload: P) -> Self {
        AnyMessage {
            dest,
            key: TypeId::of::<P>(),
            type_name: type_name::<P>(),
            correlation: None,
            direct: None,
            payload: Arc::new(payload),
        }
    }

    pub(crate) fn request<P: RequestPayload>(
        dest: Address,
        id: RequestId,
        reply_to: Address,
        payload: P,
    ) -> Self {
        AnyMessage::new(
            dest,
            Requested {
                id,
                reply_to,
                payload,
            },
        )
    }

    pub(crate) fn response<P: RequestPayload>(
        dest: Address,
        id: RequestId,
        result: Result<P::Reply, ErrorCode>,
    ) -> Self {
        let mut message = AnyMessage::new(dest, Responded::<P> { id, result });
        message.correlation = Some(id);
        message
    }

    /// Synthetic response built when a request timer fires. It carries no
    /// correlation id so it bypasses the late-response gate and reaches the
    /// requester's handler exactly once.
    pub(crate) fn timeout_response<P: RequestPayload>(dest: Address, id: RequestId) -> Self {
        AnyMessage::new(
            dest,
            Responded::<P> {
                id,
                result: Err(ErrorCode::RequestTimeout),
            },
        )
    }

    pub fn dest(&self) -> &Address {
        &self.dest
    }

    pub fn key(&self) -> TypeId {
        self.key
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn correlation(&self) -> Option<RequestId> {
        self.correlation
    }

    pub(crate) fn direct(&self) -> Option<&HandlerRef> {
        self.direct.as_ref()
    }

    /// Re-envelope for one specific handler living under another supervisor;
    /// the payload is shared, not copied.
    pub(crate) fn with_direct(&self, handler: HandlerRef) -> AnyMessage {
        AnyMessage {
            dest: self.dest.clone(),
            key: self.key,
            type_name: self.type_name,
            correlation: self.correlation,
            direct: Some(handler),
            payload: Arc::clone(&self.payload),
        }
    }

    /// Checked downcast against the type key.
    pub fn downcast_ref<P: Payload>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type", &self.type_name)
            .field("dest", &self.dest)
            .field("correlation", &self.correlation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Mailbox, SupervisorId};

    fn test_address() -> Address {
        Address::new(SupervisorId::next(), Mailbox::new(), None)
    }

    #[test]
    fn downcast_is_checked_against_the_type_key() {
        let message = AnyMessage::new(test_address(), 42u32);
        assert_eq!(message.downcast_ref::<u32>(), Some(&42));
        assert!(message.downcast_ref::<u64>().is_none());
    }

    #[test]
    fn responses_carry_their_correlation_id() {
        #[derive(Clone)]
        struct Probe;
        impl RequestPayload for Probe {
            type Reply = u32;
        }

        let id = RequestId::next();
        let real = AnyMessage::response::<Probe>(test_address(), id, Ok(1));
        assert_eq!(real.correlation(), Some(id));

        let synthetic = AnyMessage::timeout_response::<Probe>(test_address(), id);
        assert_eq!(synthetic.correlation(), None);
    }
}
