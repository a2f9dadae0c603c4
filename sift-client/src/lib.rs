//! Session dispatch and status arbitration for mail filters.
//!
//! An MTA runtime decodes wire packets into typed [`event::Event`]s and
//! feeds them to a [`dispatch::Dispatcher`], which fans each one out to
//! the connection's [`handler::FilterHandler`] (or a
//! [`composite::CompositeHandler`] of several), arbitrates the verdicts
//! under the total order of [`sift_common::status::Status`], and contains
//! anything user stage code raises.

pub mod composite;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod negotiate;
pub mod runtime;
pub mod stage;
pub mod worker;

pub use composite::CompositeHandler;
pub use context::SessionContext;
pub use dispatch::{ConnectionId, Dispatcher, FinishedSession, Verdict};
pub use error::{DispatchError, HandlerError, HandlerFailure};
pub use event::Event;
pub use handler::{FilterHandler, HandlerResult};
pub use negotiate::{MacroRequests, NegotiationOption, StepFlags};
pub use runtime::SessionRuntime;
pub use stage::{Stage, StageSet};
