use core::fmt::{self, Display, Formatter};

use crate::{error::ReplyError, status::Status};

/// Map a numeric reply code into the verdict domain.
///
/// Only the rejection classes translate: 4xx is a temporary failure, 5xx a
/// permanent rejection.
///
/// # Errors
/// Any other code is an input-validation error, not a guess.
pub fn status_for_code(code: u16) -> Result<Status, ReplyError> {
    match code {
        400..=499 => Ok(Status::TemporaryFailure),
        500..=599 => Ok(Status::Reject),
        other => Err(ReplyError::InvalidCode(other)),
    }
}

/// A formatted SMTP-style reply a handler wants the MTA to send verbatim,
/// e.g. `451 4.7.1 Greylisted, try again later`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    extended_code: Option<String>,
    reason: String,
}

impl Reply {
    /// Build a reply, validating that `code` is in a rejection class.
    ///
    /// # Errors
    /// Fails with [`ReplyError::InvalidCode`] for codes outside 4xx/5xx.
    pub fn new(
        code: u16,
        extended_code: Option<impl Into<String>>,
        reason: impl Into<String>,
    ) -> Result<Self, ReplyError> {
        status_for_code(code)?;

        Ok(Self {
            code,
            extended_code: extended_code.map(Into::into),
            reason: reason.into(),
        })
    }

    /// The stock permanent rejection: `550 5.7.1 Command rejected`.
    #[must_use]
    pub fn rejection() -> Self {
        Self {
            code: 550,
            extended_code: Some("5.7.1".to_string()),
            reason: "Command rejected".to_string(),
        }
    }

    /// The stock transient refusal:
    /// `451 4.7.1 Service unavailable - try again later`.
    #[must_use]
    pub fn temporary_failure() -> Self {
        Self {
            code: 451,
            extended_code: Some("4.7.1".to_string()),
            reason: "Service unavailable - try again later".to_string(),
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_extended_code(mut self, extended_code: impl Into<String>) -> Self {
        self.extended_code = Some(extended_code.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub fn extended_code(&self) -> Option<&str> {
        self.extended_code.as_deref()
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The verdict this reply maps to. Infallible: the code was validated
    /// at construction.
    #[must_use]
    pub const fn status(&self) -> Status {
        if self.code < 500 {
            Status::TemporaryFailure
        } else {
            Status::Reject
        }
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.extended_code {
            Some(extended_code) => {
                write!(fmt, "{} {} {}", self.code, extended_code, self.reason)
            }
            None => write!(fmt, "{} {}", self.code, self.reason),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn rejection_classes_translate() {
        assert_eq!(status_for_code(451).unwrap(), Status::TemporaryFailure);
        assert_eq!(status_for_code(550).unwrap(), Status::Reject);
    }

    #[test]
    fn positive_codes_are_rejected() {
        assert_eq!(status_for_code(250).unwrap_err(), ReplyError::InvalidCode(250));
        assert_eq!(status_for_code(354).unwrap_err(), ReplyError::InvalidCode(354));
        assert_eq!(status_for_code(600).unwrap_err(), ReplyError::InvalidCode(600));
    }

    #[test]
    fn reply_carries_its_status() {
        let reply = Reply::new(451, Some("4.7.1"), "try later").unwrap();
        assert_eq!(reply.status(), Status::TemporaryFailure);

        let reply = Reply::new(550, Some("5.7.1"), "rejected").unwrap();
        assert_eq!(reply.status(), Status::Reject);

        assert!(Reply::new(250, Some("2.0.0"), "ok").is_err());
    }

    #[test]
    fn stock_replies() {
        let reply = Reply::rejection();
        assert_eq!(reply.to_string(), "550 5.7.1 Command rejected");

        let reply = Reply::temporary_failure();
        assert_eq!(
            reply.to_string(),
            "451 4.7.1 Service unavailable - try again later"
        );
    }

    #[test]
    fn overrides_keep_defaults_for_the_rest() {
        let reply = Reply::rejection().with_reason("No spam please");
        assert_eq!(reply.code(), 550);
        assert_eq!(reply.extended_code(), Some("5.7.1"));
        assert_eq!(reply.to_string(), "550 5.7.1 No spam please");
    }

    #[test]
    fn formatting_without_extended_code() {
        let reply = Reply::new(550, None::<String>, "go away").unwrap();
        assert_eq!(reply.to_string(), "550 go away");
    }
}
