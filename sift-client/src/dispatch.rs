//! Connection-scoped dispatch.
//!
//! The dispatcher owns the map from live connections to their handler and
//! session context, drives every protocol event through the guarded
//! invocation procedure, and manages session birth and death. It is the
//! only layer allowed to clear the session context, and the only layer
//! that contains handler failures: anything user stage code raises is
//! logged, reported through the error hook, and converted into the
//! configured fallback verdict for that one event.
//!
//! One dispatcher serves one worker. Within a worker, events for a given
//! connection are processed to completion in protocol order; nothing here
//! is shared across workers.

use core::fmt::{self, Display, Formatter};
use std::{collections::VecDeque, panic::AssertUnwindSafe, sync::Arc};

use ahash::AHashMap;
use futures_util::FutureExt;
use serde::Serialize;

use sift_common::{config::FilterConfig, internal, protocol, status::Status};

use crate::{
    context::SessionContext,
    error::{DispatchError, HandlerFailure},
    event::Event,
    handler::{FilterHandler, HandlerResult},
    negotiate::NegotiationOption,
    runtime::SessionRuntime,
    stage::Stage,
};

/// Identity the runtime assigns to one MTA connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// The arbitrated verdict for the event.
    pub status: Status,
    /// The mutated negotiation option; present for negotiate events only.
    pub negotiated: Option<NegotiationOption>,
}

impl Verdict {
    const fn of(status: Status) -> Self {
        Self {
            status,
            negotiated: None,
        }
    }
}

/// Bookkeeping record kept for a recently finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishedSession {
    pub connection: ConnectionId,
    /// Events processed for the session; stages skipped as unimplemented
    /// are not counted.
    pub events: u64,
    /// Contained handler failures over the session's lifetime.
    pub failures: u64,
    /// Verdict of the finished event itself.
    pub last_status: Status,
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn FilterHandler + Send> + Send>;
type ErrorHook = Box<dyn Fn(ConnectionId, &HandlerFailure) + Send>;
type FinishedHook = Box<dyn Fn(&FinishedSession) + Send>;

#[derive(Default)]
struct Hooks {
    on_error: Option<ErrorHook>,
    on_finished: Option<FinishedHook>,
}

struct Session {
    handler: Box<dyn FilterHandler + Send>,
    context: SessionContext,
    events: u64,
    failures: u64,
}

/// Per-worker dispatch engine.
pub struct Dispatcher {
    factory: HandlerFactory,
    sessions: AHashMap<ConnectionId, Session>,
    fallback_status: Status,
    finished_retention: usize,
    finished: VecDeque<FinishedSession>,
    hooks: Hooks,
}

impl Dispatcher {
    /// Create a dispatcher for one worker, registering the handler factory
    /// invoked once per connection. The fallback status is threaded in
    /// through `config`; there is no ambient default.
    #[must_use]
    pub fn new(
        config: &FilterConfig,
        factory: impl Fn() -> Box<dyn FilterHandler + Send> + Send + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            sessions: AHashMap::new(),
            fallback_status: config.fallback_status,
            finished_retention: config.finished_session_retention,
            finished: VecDeque::new(),
            hooks: Hooks::default(),
        }
    }

    /// Install a hook invoked for every contained handler failure.
    #[must_use]
    pub fn on_error(
        mut self,
        hook: impl Fn(ConnectionId, &HandlerFailure) + Send + 'static,
    ) -> Self {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }

    /// Install a hook invoked whenever a session finishes.
    #[must_use]
    pub fn on_finished(mut self, hook: impl Fn(&FinishedSession) + Send + 'static) -> Self {
        self.hooks.on_finished = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub const fn fallback_status(&self) -> Status {
        self.fallback_status
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Recently finished session records, oldest first, bounded by the
    /// configured retention cap.
    pub fn finished_sessions(&self) -> impl Iterator<Item = &FinishedSession> {
        self.finished.iter()
    }

    /// The option a live connection agreed to during negotiation.
    #[must_use]
    pub fn negotiated(&self, connection: ConnectionId) -> Option<&NegotiationOption> {
        self.sessions.get(&connection)?.context.negotiated()
    }

    /// Construct a fresh handler and session context for a new connection
    /// and record the mapping.
    ///
    /// Handler instances are never shared across connections and never
    /// reused once their connection finishes.
    ///
    /// # Errors
    /// Fails if the connection already has a live session.
    pub fn connection_established(
        &mut self,
        connection: ConnectionId,
        runtime: Arc<dyn SessionRuntime>,
    ) -> Result<(), DispatchError> {
        if self.sessions.contains_key(&connection) {
            return Err(DispatchError::DuplicateConnection(connection));
        }

        internal!("connection {connection} established");
        self.sessions.insert(
            connection,
            Session {
                handler: (self.factory)(),
                context: SessionContext::new(runtime),
                events: 0,
                failures: 0,
            },
        );

        Ok(())
    }

    /// Deliver one protocol event to a connection's handler and return the
    /// arbitrated verdict.
    ///
    /// Stages the handler does not implement are skipped outright and read
    /// as an implicit `Continue`. Everything else runs guarded: a stage
    /// method that returns an error or panics degrades to the fallback
    /// verdict for this one event, and the connection stays healthy.
    ///
    /// # Errors
    /// Only engine-level failures surface here: dispatching to a
    /// connection that was never established (or already finished). Those
    /// are the caller's bugs and are never masked by the per-event guard.
    pub async fn dispatch(
        &mut self,
        connection: ConnectionId,
        mut event: Event,
    ) -> Result<Verdict, DispatchError> {
        let Self {
            sessions,
            fallback_status,
            finished_retention,
            finished,
            hooks,
            ..
        } = self;
        let fallback = *fallback_status;

        let stage = event.stage();
        let session = sessions
            .get_mut(&connection)
            .ok_or(DispatchError::UnknownConnection(connection))?;

        session.context.set_stage(stage);

        let implemented = session.handler.stages().contains_stage(stage);
        let lifecycle = matches!(stage, Stage::Negotiate | Stage::Abort | Stage::Finished);
        if !lifecycle && !implemented {
            protocol!("{connection} {stage}: not implemented, continuing");
            return Ok(Verdict::of(Status::Continue));
        }

        session.events += 1;

        // Negotiate always runs: the provided default carries the
        // capability merge. Abort and finished only deliver to handlers
        // that asked for them, but their lifecycle work below runs either
        // way.
        let deliver = match stage {
            Stage::Negotiate => true,
            Stage::Abort | Stage::Finished => implemented,
            _ => true,
        };

        let outcome = if deliver {
            invoke(session.handler.as_mut(), &mut session.context, &mut event).await
        } else {
            Ok(())
        };
        if let Err(failure) = outcome {
            contain(session, connection, stage, &failure, fallback, hooks);
        }

        // Abort terminates the transaction no matter what the handler did,
        // under the same guard as the stage method itself.
        if stage == Stage::Abort {
            let reset = std::panic::catch_unwind(AssertUnwindSafe(|| session.handler.reset()));
            if let Err(payload) = reset {
                let failure = HandlerFailure::Panic(panic_message(payload.as_ref()));
                contain(session, connection, stage, &failure, fallback, hooks);
            }
        }

        // The status is read exactly once per event, then the context is
        // cleared so nothing leaks into the next event.
        let status = session.context.status();
        let negotiated = if let Event::Negotiate { option, .. } = &event {
            tracing::debug!("connection {connection} negotiated {option:?}");
            session.context.set_negotiated(option.clone());
            Some(option.clone())
        } else {
            None
        };
        session.context.clear();

        protocol!("{connection} {stage}: {status}");

        if stage == Stage::Finished {
            let record = FinishedSession {
                connection,
                events: session.events,
                failures: session.failures,
                last_status: status,
            };
            sessions.remove(&connection);

            if let Some(on_finished) = &hooks.on_finished {
                on_finished(&record);
            }

            finished.push_back(record);
            while finished.len() > *finished_retention {
                finished.pop_front();
            }

            internal!("connection {connection} finished, {} active", sessions.len());
        }

        Ok(Verdict { status, negotiated })
    }
}

/// Call the stage method matching `event`.
async fn deliver_event(
    handler: &mut (dyn FilterHandler + Send),
    ctx: &mut SessionContext,
    event: &mut Event,
) -> HandlerResult {
    match event {
        Event::Negotiate {
            option,
            macro_requests,
        } => handler.negotiate(ctx, option, macro_requests).await,
        Event::Connect { host, address } => handler.connect(ctx, host, *address).await,
        Event::Helo { fqdn } => handler.helo(ctx, fqdn).await,
        Event::EnvelopeFrom { address } => handler.envelope_from(ctx, address).await,
        Event::EnvelopeRecipient { address } => handler.envelope_recipient(ctx, address).await,
        Event::Data => handler.data(ctx).await,
        Event::Unknown { command } => handler.unknown(ctx, command).await,
        Event::Header { name, value } => handler.header(ctx, name, value).await,
        Event::EndOfHeader => handler.end_of_header(ctx).await,
        Event::Body { chunk } => handler.body(ctx, chunk).await,
        Event::EndOfMessage => handler.end_of_message(ctx).await,
        Event::Abort { state } => handler.abort(ctx, *state).await,
        Event::Finished => handler.finished(ctx).await,
    }
}

/// Guarded invocation: both returned errors and panics come back as a
/// [`HandlerFailure`] instead of escaping. An escaping failure here would
/// hang the MTA transaction, so this guard is load-bearing, not cosmetic.
async fn invoke(
    handler: &mut (dyn FilterHandler + Send),
    ctx: &mut SessionContext,
    event: &mut Event,
) -> Result<(), HandlerFailure> {
    match AssertUnwindSafe(deliver_event(handler, ctx, event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(HandlerFailure::Error(error)),
        Err(payload) => Err(HandlerFailure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "opaque panic payload".to_string())
        },
        ToString::to_string,
    )
}

/// Convert a contained failure into the fallback verdict for this event.
fn contain(
    session: &mut Session,
    connection: ConnectionId,
    stage: Stage,
    failure: &HandlerFailure,
    fallback: Status,
    hooks: &Hooks,
) {
    internal!(
        level = ERROR,
        "connection {connection} {stage}: {failure}; falling back to {fallback}"
    );

    session.failures += 1;
    if let Some(on_error) = &hooks.on_error {
        on_error(connection, failure);
    }
    session.context.set_status(fallback);
}
