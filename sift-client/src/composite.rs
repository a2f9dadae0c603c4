//! Fan-out of one event to an ordered set of member handlers.
//!
//! The composite is itself a [`FilterHandler`], so the dispatcher cannot
//! tell one filter from many. Members are invoked strictly in registration
//! order, never concurrently, against the shared session context; the
//! verdict that survives is the maximum of everything the members set.
//! A failing member stops the fan-out for that event; containment happens
//! one layer up, in the dispatcher.

use std::net::SocketAddr;

use async_trait::async_trait;

use sift_common::status::Status;

use crate::{
    context::SessionContext,
    handler::{FilterHandler, HandlerResult},
    negotiate::{MacroRequests, NegotiationOption},
    stage::{Stage, StageSet},
};

/// Fold step for verdict arbitration: most severe wins, first opinion
/// seeds the fold.
fn resolve(best: Option<Status>, current: Status) -> Status {
    match best {
        None => current,
        Some(best) => best.max(current),
    }
}

/// Run one stage across all members that implement it, arbitrating the
/// shared context's status, and restore the winning verdict at the end.
macro_rules! fan_out {
    ($self:ident, $ctx:ident, $stage:expr, |$member:ident| $call:expr) => {{
        let mut best: Option<Status> = None;
        for $member in &mut $self.members {
            if !$member.stages().contains_stage($stage) {
                continue;
            }
            $call?;
            best = Some(resolve(best, $ctx.status()));
        }
        $ctx.set_status(best.unwrap_or(Status::Continue));
        Ok(())
    }};
}

/// An ordered sequence of member handlers behaving as one.
#[derive(Default)]
pub struct CompositeHandler {
    members: Vec<Box<dyn FilterHandler + Send>>,
}

impl CompositeHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member. Registration order is invocation order.
    pub fn register(&mut self, member: Box<dyn FilterHandler + Send>) {
        self.members.push(member);
    }

    #[must_use]
    pub fn with(mut self, member: Box<dyn FilterHandler + Send>) -> Self {
        self.register(member);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl FilterHandler for CompositeHandler {
    fn stages(&self) -> StageSet {
        self.members
            .iter()
            .fold(StageSet::empty(), |stages, member| {
                stages | member.stages()
            })
    }

    fn reset(&mut self) {
        for member in &mut self.members {
            member.reset();
        }
    }

    fn need_header_value_with_leading_space(&self) -> bool {
        self.members
            .iter()
            .any(|member| member.need_header_value_with_leading_space())
    }

    /// Every member negotiates against the same option, cumulatively: a
    /// suppression survives only if no member cleared it. With no members
    /// the verdict stays `Reject`: an empty filter refuses negotiation
    /// rather than silently passing mail.
    async fn negotiate(
        &mut self,
        ctx: &mut SessionContext,
        option: &mut NegotiationOption,
        macro_requests: &mut MacroRequests,
    ) -> HandlerResult {
        let mut best: Option<Status> = None;
        for member in &mut self.members {
            member.negotiate(ctx, option, macro_requests).await?;
            best = Some(resolve(best, ctx.status()));
        }
        ctx.set_status(best.unwrap_or(Status::Reject));
        Ok(())
    }

    async fn connect(
        &mut self,
        ctx: &mut SessionContext,
        host: &str,
        address: SocketAddr,
    ) -> HandlerResult {
        fan_out!(self, ctx, Stage::Connect, |member| member
            .connect(ctx, host, address)
            .await)
    }

    async fn helo(&mut self, ctx: &mut SessionContext, fqdn: &str) -> HandlerResult {
        fan_out!(self, ctx, Stage::Helo, |member| member.helo(ctx, fqdn).await)
    }

    async fn envelope_from(&mut self, ctx: &mut SessionContext, address: &str) -> HandlerResult {
        fan_out!(self, ctx, Stage::EnvelopeFrom, |member| member
            .envelope_from(ctx, address)
            .await)
    }

    async fn envelope_recipient(
        &mut self,
        ctx: &mut SessionContext,
        address: &str,
    ) -> HandlerResult {
        fan_out!(self, ctx, Stage::EnvelopeRecipient, |member| member
            .envelope_recipient(ctx, address)
            .await)
    }

    async fn data(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        fan_out!(self, ctx, Stage::Data, |member| member.data(ctx).await)
    }

    async fn unknown(&mut self, ctx: &mut SessionContext, command: &str) -> HandlerResult {
        fan_out!(self, ctx, Stage::Unknown, |member| member
            .unknown(ctx, command)
            .await)
    }

    async fn header(&mut self, ctx: &mut SessionContext, name: &str, value: &str) -> HandlerResult {
        fan_out!(self, ctx, Stage::Header, |member| member
            .header(ctx, name, value)
            .await)
    }

    async fn end_of_header(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        fan_out!(self, ctx, Stage::EndOfHeader, |member| member
            .end_of_header(ctx)
            .await)
    }

    async fn body(&mut self, ctx: &mut SessionContext, chunk: &[u8]) -> HandlerResult {
        fan_out!(self, ctx, Stage::Body, |member| member.body(ctx, chunk).await)
    }

    async fn end_of_message(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        fan_out!(self, ctx, Stage::EndOfMessage, |member| member
            .end_of_message(ctx)
            .await)
    }

    async fn abort(&mut self, ctx: &mut SessionContext, state: Stage) -> HandlerResult {
        fan_out!(self, ctx, Stage::Abort, |member| member
            .abort(ctx, state)
            .await)
    }

    async fn finished(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        fan_out!(self, ctx, Stage::Finished, |member| member.finished(ctx).await)
    }
}
