use std::time::Duration;

use crate::actor::Context;
use crate::address::Address;
use crate::backend::TimerId;
use crate::message::{AnyMessage, RequestId, RequestPayload};
use crate::supervisor::TimerPurpose;

/// Builder returned by [`Context::request`]. The request is not sent until
/// [`send`](RequestBuilder::send) arms the timeout; if no response arrives in
/// time, the same response handler receives a synthetic reply carrying
/// [`ErrorCode::RequestTimeout`](crate::ErrorCode::RequestTimeout).
pub struct RequestBuilder<'c, 'a, P: RequestPayload> {
    ctx: &'c mut Context<'a>,
    dest: Address,
    reply_to: Address,
    payload: P,
}

impl<'c, 'a, P: RequestPayload> RequestBuilder<'c, 'a, P> {
    pub(crate) fn new(
        ctx: &'c mut Context<'a>,
        dest: Address,
        reply_to: Address,
        payload: P,
    ) -> Self {
        RequestBuilder {
            ctx,
            dest,
            reply_to,
            payload,
        }
    }

    /// Enqueues the request and schedules its timeout timer.
    pub fn send(self, timeout: Duration) -> RequestId {
        let id = RequestId::next();
        let timer = TimerId::next();
        let reply_to = self.reply_to.clone();
        let synth_reply = self.reply_to.clone();
        self.ctx.core.timers.insert(
            timer,
            TimerPurpose::Request {
                actor: self.ctx.record.id,
                request: id,
                synth: Box::new(move || AnyMessage::timeout_response::<P>(synth_reply, id)),
            },
        );
        self.ctx.core.backend().start_timer(timeout, timer);
        self.ctx.record.requests.insert(id, Some(timer));
        self.dest
            .post(AnyMessage::request(self.dest.clone(), id, reply_to, self.payload));
        tracing::trace!(request = ?id, dest = ?self.dest, "request sent");
        id
    }

    /// Enqueues the request without a dedicated timer. Used by the
    /// supervisor's own init and mass-shutdown requests, whose deadline is
    /// collective rather than per-request.
    pub(crate) fn send_untimed(self) -> RequestId {
        let id = RequestId::next();
        self.ctx.record.requests.insert(id, None);
        self.dest.post(AnyMessage::request(
            self.dest.clone(),
            id,
            self.reply_to,
            self.payload,
        ));
        id
    }
}
