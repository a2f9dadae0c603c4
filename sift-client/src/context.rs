use std::sync::Arc;

use ahash::AHashMap;
use sift_common::{error::StatusError, reply::Reply, status::Status};

use crate::{negotiate::NegotiationOption, runtime::SessionRuntime, stage::Stage};

/// Per-connection mutable state exposed to handler code.
///
/// The verdict and the macro cache live exactly one event: the dispatcher
/// reads the status once per event and then clears the context, so nothing
/// a handler sets leaks into the next event unless it sets it again. The
/// negotiated option is connection-scoped and survives clears.
#[derive(Debug)]
pub struct SessionContext {
    runtime: Arc<dyn SessionRuntime>,
    status: Option<Status>,
    macros: Option<AHashMap<String, String>>,
    negotiated: Option<NegotiationOption>,
    stage: Stage,
}

impl SessionContext {
    #[must_use]
    pub fn new(runtime: Arc<dyn SessionRuntime>) -> Self {
        Self {
            runtime,
            status: None,
            macros: None,
            negotiated: None,
            stage: Stage::Negotiate,
        }
    }

    /// Current verdict; [`Status::Default`] when no handler has set one.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.unwrap_or_default()
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    /// Resolve `name` through the alias-normalising lookup and set the
    /// verdict.
    ///
    /// # Errors
    /// Unknown names are a contract violation, surfaced as
    /// [`StatusError::InvalidStatusName`] with the verdict untouched.
    pub fn set_status_name(&mut self, name: &str) -> Result<(), StatusError> {
        self.status = Some(Status::from_name(name)?);
        Ok(())
    }

    /// Withdraw the current verdict; [`SessionContext::status`] reads as
    /// [`Status::Default`] again.
    pub fn clear_status(&mut self) {
        self.status = None;
    }

    /// Record `reply` with the runtime and derive the matching verdict
    /// (4xx maps to a temporary failure, 5xx to a rejection).
    pub fn set_reply(&mut self, reply: Reply) {
        self.runtime.record_reply(&reply);
        self.set_status(reply.status());
    }

    /// Value of macro `name`.
    ///
    /// The full macro set is fetched from the runtime on first access and
    /// cached until the next clear.
    pub fn macro_value(&mut self, name: &str) -> Option<&str> {
        if self.macros.is_none() {
            self.macros = Some(self.runtime.available_macros().unwrap_or_default());
        }

        self.macros
            .as_ref()
            .and_then(|macros| macros.get(name))
            .map(String::as_str)
    }

    /// Ask the runtime to quarantine the message in flight.
    #[must_use]
    pub fn quarantine(&self, reason: &str) -> bool {
        self.runtime.quarantine(reason)
    }

    /// The option agreed during negotiation, once negotiation has run.
    #[must_use]
    pub fn negotiated(&self) -> Option<&NegotiationOption> {
        self.negotiated.as_ref()
    }

    pub(crate) fn set_negotiated(&mut self, option: NegotiationOption) {
        self.negotiated = Some(option);
    }

    /// Stage of the event currently being dispatched.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) const fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Invalidate the macro cache and drop the verdict.
    ///
    /// Called by the dispatcher between events; handlers never call this.
    pub(crate) fn clear(&mut self) {
        self.macros = None;
        self.status = None;
    }
}
