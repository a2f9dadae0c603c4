//! Capability negotiation.
//!
//! The first event on every connection carries the MTA's offered step
//! flags. Handlers cumulatively *remove* the `NO_<stage>` flags for the
//! stages they implement; whatever survives tells the MTA which events it
//! may skip sending for the rest of the connection.

use ahash::AHashMap;
use bitflags::bitflags;

use crate::stage::Stage;

bitflags! {
    /// Step flags exchanged during negotiation.
    ///
    /// A set `NO_<stage>` flag means the MTA will not deliver that stage's
    /// events. The `NO_REPLY_*` flags spare the filter from answering
    /// stages it has no verdict for; the engine always clears them so
    /// every verdict reaches the MTA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StepFlags: u32 {
        const NO_CONNECT = 0x0000_0001;
        const NO_HELO = 0x0000_0002;
        const NO_ENVELOPE_FROM = 0x0000_0004;
        const NO_ENVELOPE_RECIPIENT = 0x0000_0008;
        const NO_BODY = 0x0000_0010;
        const NO_HEADERS = 0x0000_0020;
        const NO_END_OF_HEADER = 0x0000_0040;
        const NO_REPLY_HEADER = 0x0000_0080;
        const NO_UNKNOWN = 0x0000_0100;
        const NO_DATA = 0x0000_0200;
        const SKIP = 0x0000_0400;
        const ENVELOPE_RECIPIENT_REJECTED = 0x0000_0800;
        const NO_REPLY_CONNECT = 0x0000_1000;
        const NO_REPLY_HELO = 0x0000_2000;
        const NO_REPLY_ENVELOPE_FROM = 0x0000_4000;
        const NO_REPLY_ENVELOPE_RECIPIENT = 0x0000_8000;
        const NO_REPLY_DATA = 0x0001_0000;
        const NO_REPLY_UNKNOWN = 0x0002_0000;
        const NO_REPLY_END_OF_HEADER = 0x0004_0000;
        const NO_REPLY_BODY = 0x0008_0000;
        const HEADER_VALUE_WITH_LEADING_SPACE = 0x0010_0000;

        const NO_EVENT_MASK = Self::NO_CONNECT.bits()
            | Self::NO_HELO.bits()
            | Self::NO_ENVELOPE_FROM.bits()
            | Self::NO_ENVELOPE_RECIPIENT.bits()
            | Self::NO_BODY.bits()
            | Self::NO_HEADERS.bits()
            | Self::NO_END_OF_HEADER.bits()
            | Self::NO_UNKNOWN.bits()
            | Self::NO_DATA.bits();

        const NO_REPLY_MASK = Self::NO_REPLY_CONNECT.bits()
            | Self::NO_REPLY_HELO.bits()
            | Self::NO_REPLY_ENVELOPE_FROM.bits()
            | Self::NO_REPLY_ENVELOPE_RECIPIENT.bits()
            | Self::NO_REPLY_DATA.bits()
            | Self::NO_REPLY_HEADER.bits()
            | Self::NO_REPLY_UNKNOWN.bits()
            | Self::NO_REPLY_END_OF_HEADER.bits()
            | Self::NO_REPLY_BODY.bits();
    }
}

impl StepFlags {
    /// The flag that suppresses delivery of `stage`'s events, if one exists.
    #[must_use]
    pub const fn no_event_flag(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Connect => Some(Self::NO_CONNECT),
            Stage::Helo => Some(Self::NO_HELO),
            Stage::EnvelopeFrom => Some(Self::NO_ENVELOPE_FROM),
            Stage::EnvelopeRecipient => Some(Self::NO_ENVELOPE_RECIPIENT),
            Stage::Body => Some(Self::NO_BODY),
            Stage::Header => Some(Self::NO_HEADERS),
            Stage::EndOfHeader => Some(Self::NO_END_OF_HEADER),
            Stage::Data => Some(Self::NO_DATA),
            Stage::Unknown => Some(Self::NO_UNKNOWN),
            _ => None,
        }
    }
}

/// Protocol version offered when nothing else is known.
pub const PROTOCOL_VERSION: u32 = 6;

/// Capabilities under negotiation for one connection.
///
/// Every handler on the connection mutates the same option, so a
/// suppression survives only if no handler removed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOption {
    version: u32,
    steps: StepFlags,
}

impl Default for NegotiationOption {
    /// An MTA offering every suppression it knows about.
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            steps: StepFlags::NO_EVENT_MASK
                | StepFlags::NO_REPLY_MASK
                | StepFlags::HEADER_VALUE_WITH_LEADING_SPACE,
        }
    }
}

impl NegotiationOption {
    #[must_use]
    pub const fn new(version: u32, steps: StepFlags) -> Self {
        Self { version, steps }
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub const fn steps(&self) -> StepFlags {
        self.steps
    }

    pub fn remove_step(&mut self, step: StepFlags) {
        self.steps.remove(step);
    }

    /// Whether the negotiated flags still suppress delivery of `stage`.
    #[must_use]
    pub fn suppresses(&self, stage: Stage) -> bool {
        StepFlags::no_event_flag(stage).is_some_and(|flag| self.steps.contains(flag))
    }
}

/// Macro names handlers want the MTA to deliver, keyed by the stage they
/// should arrive with. Requests from composite members accumulate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroRequests {
    requests: AHashMap<Stage, Vec<String>>,
}

impl MacroRequests {
    pub fn request(&mut self, stage: Stage, name: impl Into<String>) {
        let name = name.into();
        let names = self.requests.entry(stage).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    #[must_use]
    pub fn names(&self, stage: Stage) -> &[String] {
        self.requests.get(&stage).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
