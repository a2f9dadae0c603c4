//! The pluggable filter handler contract.
//!
//! A handler is one unit of user-supplied filtering logic, constructed
//! fresh for every connection. It declares the stages it implements once,
//! at construction, through [`FilterHandler::stages`]; the dispatcher never
//! calls a stage method outside that set, so every stage method can carry a
//! no-op default and absence simply reads as "no opinion".

use std::net::SocketAddr;

use async_trait::async_trait;

use sift_common::{reply::Reply, status::Status};

use crate::{
    context::SessionContext,
    error::HandlerError,
    negotiate::{MacroRequests, NegotiationOption, StepFlags},
    stage::{Stage, StageSet},
};

pub type HandlerResult = Result<(), HandlerError>;

#[async_trait]
pub trait FilterHandler: Send {
    /// The stages this handler implements. Computed once per handler; the
    /// dispatcher and the negotiation default both consult it.
    fn stages(&self) -> StageSet;

    /// Drop transaction-scoped state.
    ///
    /// Invoked by the verdict helpers on transaction-terminal verdicts and
    /// unconditionally on abort. Handlers carrying per-transaction state
    /// override this; the default holds none.
    fn reset(&mut self) {}

    /// Whether header values should keep their leading space.
    fn need_header_value_with_leading_space(&self) -> bool {
        false
    }

    /// Negotiate capabilities for this connection.
    ///
    /// The default clears the `NO_<stage>` suppression for every stage in
    /// [`FilterHandler::stages`], keeps leading header whitespace only when
    /// asked to, clears the no-reply mask so every verdict is answered, and
    /// continues. Overriders wanting the stock behaviour plus extra macro
    /// requests should do their own bookkeeping first and finish with the
    /// same steps.
    async fn negotiate(
        &mut self,
        ctx: &mut SessionContext,
        option: &mut NegotiationOption,
        macro_requests: &mut MacroRequests,
    ) -> HandlerResult {
        let _ = macro_requests;

        for stage in Stage::SUPPRESSIBLE {
            if self.stages().contains_stage(stage)
                && let Some(flag) = StepFlags::no_event_flag(stage)
            {
                option.remove_step(flag);
            }
        }

        if !self.need_header_value_with_leading_space() {
            option.remove_step(StepFlags::HEADER_VALUE_WITH_LEADING_SPACE);
        }
        option.remove_step(StepFlags::NO_REPLY_MASK);

        self.continue_processing(ctx);
        Ok(())
    }

    async fn connect(
        &mut self,
        ctx: &mut SessionContext,
        host: &str,
        address: SocketAddr,
    ) -> HandlerResult {
        let _ = (ctx, host, address);
        Ok(())
    }

    async fn helo(&mut self, ctx: &mut SessionContext, fqdn: &str) -> HandlerResult {
        let _ = (ctx, fqdn);
        Ok(())
    }

    async fn envelope_from(&mut self, ctx: &mut SessionContext, address: &str) -> HandlerResult {
        let _ = (ctx, address);
        Ok(())
    }

    async fn envelope_recipient(
        &mut self,
        ctx: &mut SessionContext,
        address: &str,
    ) -> HandlerResult {
        let _ = (ctx, address);
        Ok(())
    }

    async fn data(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    async fn unknown(&mut self, ctx: &mut SessionContext, command: &str) -> HandlerResult {
        let _ = (ctx, command);
        Ok(())
    }

    async fn header(&mut self, ctx: &mut SessionContext, name: &str, value: &str) -> HandlerResult {
        let _ = (ctx, name, value);
        Ok(())
    }

    async fn end_of_header(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    async fn body(&mut self, ctx: &mut SessionContext, chunk: &[u8]) -> HandlerResult {
        let _ = (ctx, chunk);
        Ok(())
    }

    async fn end_of_message(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    /// The MTA abandoned the transaction at `state`. The dispatcher calls
    /// [`FilterHandler::reset`] afterwards whether or not this is
    /// implemented or succeeds.
    async fn abort(&mut self, ctx: &mut SessionContext, state: Stage) -> HandlerResult {
        let _ = (ctx, state);
        Ok(())
    }

    /// The connection is being torn down.
    async fn finished(&mut self, ctx: &mut SessionContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    // Verdict helpers. These encode the stage-specific reset policy and are
    // not meant to be overridden.

    /// Accept the message. Transaction-terminal: resets.
    fn accept(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Accept);
        self.reset();
    }

    /// Silently drop the message. Transaction-terminal: resets.
    fn discard(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Discard);
        self.reset();
    }

    /// Keep going; deliver the next event. Never resets.
    fn continue_processing(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Continue);
    }

    /// Hold the response open while work continues. Never resets.
    fn progress(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Progress);
    }

    /// Stop delivering the remaining chunks of the current body. Never
    /// resets.
    fn skip(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Skip);
    }

    /// Refuse permanently with the stock reply.
    ///
    /// Resets unless the session is in the envelope-recipient stage: an
    /// SMTP transaction may offer several recipients in sequence, each
    /// independently refusable, and transaction state must survive for the
    /// ones still to come.
    fn reject(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::Reject);
        if ctx.stage() != Stage::EnvelopeRecipient {
            self.reset();
        }
    }

    /// Refuse permanently with an explicit reply, sent to the MTA verbatim.
    /// Same reset rule as [`FilterHandler::reject`].
    fn reject_with(&mut self, ctx: &mut SessionContext, reply: Reply) {
        ctx.set_reply(reply);
        if ctx.stage() != Stage::EnvelopeRecipient {
            self.reset();
        }
    }

    /// Refuse transiently with the stock reply. Same reset rule as
    /// [`FilterHandler::reject`].
    fn temporary_failure(&mut self, ctx: &mut SessionContext) {
        ctx.set_status(Status::TemporaryFailure);
        if ctx.stage() != Stage::EnvelopeRecipient {
            self.reset();
        }
    }

    /// Refuse transiently with an explicit reply. Same reset rule as
    /// [`FilterHandler::reject`].
    fn temporary_failure_with(&mut self, ctx: &mut SessionContext, reply: Reply) {
        ctx.set_reply(reply);
        if ctx.stage() != Stage::EnvelopeRecipient {
            self.reset();
        }
    }

    /// Ask the runtime to quarantine the message. On success this behaves
    /// as [`FilterHandler::accept`] and reports `true`; on refusal the
    /// verdict is left untouched and the caller decides what happens next.
    fn quarantine(&mut self, ctx: &mut SessionContext, reason: &str) -> bool {
        if ctx.quarantine(reason) {
            self.accept(ctx);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::sync::Arc;

    use crate::runtime::{RecordingRuntime, SessionRuntime};

    use super::*;

    /// Greylist-flavoured test handler carrying transaction state.
    #[derive(Default)]
    struct Greylist {
        resets: usize,
        seen_recipients: usize,
    }

    #[async_trait]
    impl FilterHandler for Greylist {
        fn stages(&self) -> StageSet {
            StageSet::ENVELOPE_FROM | StageSet::ENVELOPE_RECIPIENT
        }

        fn reset(&mut self) {
            self.resets += 1;
            self.seen_recipients = 0;
        }
    }

    fn context(runtime: &Arc<RecordingRuntime>) -> SessionContext {
        SessionContext::new(Arc::clone(runtime) as Arc<dyn SessionRuntime>)
    }

    #[test]
    fn accept_and_discard_always_reset() {
        let runtime = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&runtime);
        let mut handler = Greylist::default();

        handler.accept(&mut ctx);
        assert_eq!(ctx.status(), Status::Accept);
        assert_eq!(handler.resets, 1);

        handler.discard(&mut ctx);
        assert_eq!(ctx.status(), Status::Discard);
        assert_eq!(handler.resets, 2);
    }

    #[test]
    fn reject_skips_reset_during_the_recipient_loop() {
        let runtime = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&runtime);
        let mut handler = Greylist::default();

        ctx.set_stage(Stage::EnvelopeRecipient);
        handler.reject(&mut ctx);
        assert_eq!(ctx.status(), Status::Reject);
        assert_eq!(handler.resets, 0);

        handler.temporary_failure(&mut ctx);
        assert_eq!(ctx.status(), Status::TemporaryFailure);
        assert_eq!(handler.resets, 0);

        ctx.set_stage(Stage::EnvelopeFrom);
        handler.reject(&mut ctx);
        assert_eq!(handler.resets, 1);

        ctx.set_stage(Stage::EndOfMessage);
        handler.temporary_failure(&mut ctx);
        assert_eq!(handler.resets, 2);
    }

    #[test]
    fn explicit_replies_are_recorded_verbatim() {
        let runtime = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&runtime);
        let mut handler = Greylist::default();

        ctx.set_stage(Stage::EnvelopeFrom);
        handler.temporary_failure_with(
            &mut ctx,
            Reply::temporary_failure().with_reason("Greylisted, try again later"),
        );

        assert_eq!(ctx.status(), Status::TemporaryFailure);
        assert_eq!(handler.resets, 1);
        assert_eq!(
            runtime.replies()[0].to_string(),
            "451 4.7.1 Greylisted, try again later"
        );

        handler.reject_with(&mut ctx, Reply::rejection());
        assert_eq!(ctx.status(), Status::Reject);
        assert_eq!(runtime.replies()[1].to_string(), "550 5.7.1 Command rejected");
    }

    #[test]
    fn continue_and_progress_never_reset() {
        let runtime = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&runtime);
        let mut handler = Greylist::default();

        handler.continue_processing(&mut ctx);
        assert_eq!(ctx.status(), Status::Continue);
        handler.progress(&mut ctx);
        assert_eq!(ctx.status(), Status::Progress);
        handler.skip(&mut ctx);
        assert_eq!(ctx.status(), Status::Skip);
        assert_eq!(handler.resets, 0);
    }

    #[test]
    fn quarantine_follows_the_runtime() {
        let granted = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&granted);
        let mut handler = Greylist::default();

        assert!(handler.quarantine(&mut ctx, "virus"));
        assert_eq!(ctx.status(), Status::Accept);
        assert_eq!(handler.resets, 1);
        assert_eq!(granted.quarantines(), ["virus"]);

        let denied = Arc::new(RecordingRuntime::without_quarantine());
        let mut ctx = context(&denied);
        let mut handler = Greylist::default();

        assert!(!handler.quarantine(&mut ctx, "virus"));
        assert_eq!(ctx.status(), Status::Default);
        assert_eq!(handler.resets, 0);
    }

    #[tokio::test]
    async fn default_negotiate_clears_implemented_suppressions() {
        let runtime = Arc::new(RecordingRuntime::new());
        let mut ctx = context(&runtime);
        let mut handler = Greylist::default();

        let mut option = NegotiationOption::default();
        let mut macro_requests = MacroRequests::default();
        handler
            .negotiate(&mut ctx, &mut option, &mut macro_requests)
            .await
            .unwrap();

        assert!(!option.suppresses(Stage::EnvelopeFrom));
        assert!(!option.suppresses(Stage::EnvelopeRecipient));
        assert!(option.suppresses(Stage::Connect));
        assert!(option.suppresses(Stage::Body));
        assert!(option.steps().intersection(StepFlags::NO_REPLY_MASK).is_empty());
        assert!(
            !option
                .steps()
                .contains(StepFlags::HEADER_VALUE_WITH_LEADING_SPACE)
        );
        assert_eq!(ctx.status(), Status::Continue);
        assert!(macro_requests.is_empty());
    }
}
