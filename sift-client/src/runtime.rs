//! The runtime collaborator boundary.
//!
//! Everything the engine needs from the MTA-facing transport for one
//! connection goes through [`SessionRuntime`]: macro lookup, recording a
//! formatted reply, and quarantine. Sockets, timers and the wire codec
//! stay on the runtime's side of this trait.

use std::sync::Mutex;

use ahash::AHashMap;
use sift_common::reply::Reply;

pub trait SessionRuntime: Send + Sync + std::fmt::Debug {
    /// Full macro set currently visible on the connection, if any.
    /// Fetched at most once per clear-epoch by the session context.
    fn available_macros(&self) -> Option<AHashMap<String, String>>;

    /// Record a formatted reply for the MTA to receive verbatim.
    fn record_reply(&self, reply: &Reply);

    /// Attempt to quarantine the message in flight. Returns whether the
    /// runtime honoured the request.
    fn quarantine(&self, reason: &str) -> bool;
}

/// Recording implementation of [`SessionRuntime`] for tests and examples.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    macros: Mutex<AHashMap<String, String>>,
    macro_fetches: Mutex<usize>,
    replies: Mutex<Vec<Reply>>,
    quarantines: Mutex<Vec<String>>,
    deny_quarantine: bool,
}

impl RecordingRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime that refuses quarantine requests.
    #[must_use]
    pub fn without_quarantine() -> Self {
        Self {
            deny_quarantine: true,
            ..Self::default()
        }
    }

    /// # Panics
    /// Panics if the macro mutex is poisoned.
    pub fn insert_macro(&self, name: impl Into<String>, value: impl Into<String>) {
        self.macros
            .lock()
            .expect("RecordingRuntime macros mutex poisoned")
            .insert(name.into(), value.into());
    }

    /// How many times the macro set has been fetched.
    ///
    /// # Panics
    /// Panics if the fetch-counter mutex is poisoned.
    #[must_use]
    pub fn macro_fetches(&self) -> usize {
        *self
            .macro_fetches
            .lock()
            .expect("RecordingRuntime fetch counter mutex poisoned")
    }

    /// All replies recorded so far.
    ///
    /// # Panics
    /// Panics if the reply mutex is poisoned.
    #[must_use]
    pub fn replies(&self) -> Vec<Reply> {
        self.replies
            .lock()
            .expect("RecordingRuntime replies mutex poisoned")
            .clone()
    }

    /// All quarantine reasons requested so far, granted or not.
    ///
    /// # Panics
    /// Panics if the quarantine mutex is poisoned.
    #[must_use]
    pub fn quarantines(&self) -> Vec<String> {
        self.quarantines
            .lock()
            .expect("RecordingRuntime quarantines mutex poisoned")
            .clone()
    }
}

impl SessionRuntime for RecordingRuntime {
    fn available_macros(&self) -> Option<AHashMap<String, String>> {
        let mut fetches = self
            .macro_fetches
            .lock()
            .expect("RecordingRuntime fetch counter mutex poisoned");
        *fetches += 1;

        Some(
            self.macros
                .lock()
                .expect("RecordingRuntime macros mutex poisoned")
                .clone(),
        )
    }

    fn record_reply(&self, reply: &Reply) {
        self.replies
            .lock()
            .expect("RecordingRuntime replies mutex poisoned")
            .push(reply.clone());
    }

    fn quarantine(&self, reason: &str) -> bool {
        self.quarantines
            .lock()
            .expect("RecordingRuntime quarantines mutex poisoned")
            .push(reason.to_string());

        !self.deny_quarantine
    }
}
