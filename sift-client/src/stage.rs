use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Protocol stages an MTA drives a filter connection through.
///
/// For a single connection the runtime delivers stages strictly in this
/// order, with the envelope-recipient stage repeatable once per recipient
/// and `Abort` deliverable at any point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Negotiate,
    Connect,
    Helo,
    EnvelopeFrom,
    EnvelopeRecipient,
    Data,
    Header,
    EndOfHeader,
    Body,
    EndOfMessage,
    Unknown,
    Abort,
    Finished,
}

impl Stage {
    /// Stages whose delivery can be suppressed during negotiation.
    pub const SUPPRESSIBLE: [Self; 9] = [
        Self::Connect,
        Self::Helo,
        Self::EnvelopeFrom,
        Self::EnvelopeRecipient,
        Self::Data,
        Self::Header,
        Self::EndOfHeader,
        Self::Body,
        Self::Unknown,
    ];

    /// The single-stage [`StageSet`] for this stage.
    #[must_use]
    pub const fn flag(self) -> StageSet {
        match self {
            Self::Negotiate => StageSet::NEGOTIATE,
            Self::Connect => StageSet::CONNECT,
            Self::Helo => StageSet::HELO,
            Self::EnvelopeFrom => StageSet::ENVELOPE_FROM,
            Self::EnvelopeRecipient => StageSet::ENVELOPE_RECIPIENT,
            Self::Data => StageSet::DATA,
            Self::Header => StageSet::HEADER,
            Self::EndOfHeader => StageSet::END_OF_HEADER,
            Self::Body => StageSet::BODY,
            Self::EndOfMessage => StageSet::END_OF_MESSAGE,
            Self::Unknown => StageSet::UNKNOWN,
            Self::Abort => StageSet::ABORT,
            Self::Finished => StageSet::FINISHED,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Negotiate => "negotiate",
            Self::Connect => "connect",
            Self::Helo => "helo",
            Self::EnvelopeFrom => "envelope-from",
            Self::EnvelopeRecipient => "envelope-recipient",
            Self::Data => "data",
            Self::Header => "header",
            Self::EndOfHeader => "end-of-header",
            Self::Body => "body",
            Self::EndOfMessage => "end-of-message",
            Self::Unknown => "unknown",
            Self::Abort => "abort",
            Self::Finished => "finished",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(self.name())
    }
}

bitflags! {
    /// Explicit capability set a handler declares once at construction.
    ///
    /// The dispatcher consults this before every invocation: a stage that
    /// is not in the set is never called, which reads as "no opinion".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StageSet: u16 {
        const NEGOTIATE = 1 << 0;
        const CONNECT = 1 << 1;
        const HELO = 1 << 2;
        const ENVELOPE_FROM = 1 << 3;
        const ENVELOPE_RECIPIENT = 1 << 4;
        const DATA = 1 << 5;
        const HEADER = 1 << 6;
        const END_OF_HEADER = 1 << 7;
        const BODY = 1 << 8;
        const END_OF_MESSAGE = 1 << 9;
        const UNKNOWN = 1 << 10;
        const ABORT = 1 << 11;
        const FINISHED = 1 << 12;
    }
}

impl StageSet {
    #[must_use]
    pub const fn contains_stage(self, stage: Stage) -> bool {
        self.contains(stage.flag())
    }
}
