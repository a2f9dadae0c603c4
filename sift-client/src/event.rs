use std::net::SocketAddr;

use crate::{
    negotiate::{MacroRequests, NegotiationOption},
    stage::Stage,
};

/// One typed protocol event for one connection, as decoded by the external
/// wire codec. The engine never sees bytes; it sees these.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Capability negotiation; always the first event on a connection.
    Negotiate {
        option: NegotiationOption,
        macro_requests: MacroRequests,
    },
    /// The SMTP client connected to the MTA.
    Connect { host: String, address: SocketAddr },
    /// HELO/EHLO.
    Helo { fqdn: String },
    /// MAIL FROM.
    EnvelopeFrom { address: String },
    /// RCPT TO. May repeat once per recipient within one transaction.
    EnvelopeRecipient { address: String },
    /// DATA.
    Data,
    /// A command the MTA did not recognise.
    Unknown { command: String },
    /// One message header.
    Header { name: String, value: String },
    /// The blank line terminating the header block.
    EndOfHeader,
    /// One chunk of the message body.
    Body { chunk: Vec<u8> },
    /// The end-of-data marker; the last chance to issue a verdict.
    EndOfMessage,
    /// The MTA abandoned the current transaction. `state` names the stage
    /// the connection was in when it did.
    Abort { state: Stage },
    /// The connection is gone; the session is being torn down.
    Finished,
}

impl Event {
    /// The protocol stage this event belongs to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Negotiate { .. } => Stage::Negotiate,
            Self::Connect { .. } => Stage::Connect,
            Self::Helo { .. } => Stage::Helo,
            Self::EnvelopeFrom { .. } => Stage::EnvelopeFrom,
            Self::EnvelopeRecipient { .. } => Stage::EnvelopeRecipient,
            Self::Data => Stage::Data,
            Self::Unknown { .. } => Stage::Unknown,
            Self::Header { .. } => Stage::Header,
            Self::EndOfHeader => Stage::EndOfHeader,
            Self::Body { .. } => Stage::Body,
            Self::EndOfMessage => Stage::EndOfMessage,
            Self::Abort { .. } => Stage::Abort,
            Self::Finished => Stage::Finished,
        }
    }
}
