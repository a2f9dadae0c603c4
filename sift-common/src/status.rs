use core::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Verdict issued by filter handlers and arbitrated by the engine.
///
/// The declaration order is the arbitration order: when several handlers
/// respond to the same event, the largest status wins. `Discard` outranks
/// everything, `Reject` everything but `Discard`, and `Continue` outranks
/// `Accept` and `Skip`: a handler that still wants events has to keep the
/// event stream alive even if another handler would already accept the
/// message.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    /// No verdict has been issued yet.
    #[default]
    Default,
    /// Explicit "still working" marker, used to hold a response open.
    Progress,
    /// Accept the message; no further events are wanted for it.
    Accept,
    /// Stop delivering the remaining chunks of the current body.
    Skip,
    /// Keep going; deliver the next event.
    Continue,
    /// Refuse with a transient 4xx-class failure.
    TemporaryFailure,
    /// Refuse with a permanent 5xx-class failure.
    Reject,
    /// Silently drop the message while telling the sender nothing.
    Discard,
}

impl Status {
    /// Canonical name, also accepted by [`Status::from_name`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Progress => "progress",
            Self::Accept => "accept",
            Self::Skip => "skip",
            Self::Continue => "continue",
            Self::TemporaryFailure => "temporary-failure",
            Self::Reject => "reject",
            Self::Discard => "discard",
        }
    }

    /// Case-insensitive alias lookup; `-` and `_` are interchangeable.
    ///
    /// # Errors
    /// Unknown names fail with [`StatusError::InvalidStatusName`]; they are
    /// never coerced to a default.
    pub fn from_name(name: &str) -> Result<Self, StatusError> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "progress" => Ok(Self::Progress),
            "accept" => Ok(Self::Accept),
            "skip" => Ok(Self::Skip),
            "continue" => Ok(Self::Continue),
            "temporary_failure" => Ok(Self::TemporaryFailure),
            "reject" => Ok(Self::Reject),
            "discard" => Ok(Self::Discard),
            _ => Err(StatusError::InvalidStatusName(name.to_string())),
        }
    }

    /// Total-order comparison used wherever verdicts are merged.
    ///
    /// `Ordering::Less` means `other` wins arbitration over `self`.
    #[must_use]
    pub fn compare(self, other: Self) -> Ordering {
        self.cmp(&other)
    }

    /// Whether this verdict closes the current transaction for the message.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Accept | Self::Discard | Self::TemporaryFailure | Self::Reject
        )
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = StatusError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::from_name(name)
    }
}

impl TryFrom<String> for Status {
    type Error = StatusError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(&name)
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.name().to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    const ALL: [Status; 8] = [
        Status::Default,
        Status::Progress,
        Status::Accept,
        Status::Skip,
        Status::Continue,
        Status::TemporaryFailure,
        Status::Reject,
        Status::Discard,
    ];

    #[test]
    fn arbitration_order() {
        for pair in ALL.windows(2) {
            assert_eq!(pair[0].compare(pair[1]), Ordering::Less, "{pair:?}");
        }

        // A member that still wants events outranks one that would accept.
        assert_eq!(Status::Continue.max(Status::Accept), Status::Continue);
        assert_eq!(Status::Skip.max(Status::Accept), Status::Skip);
        assert_eq!(Status::Continue.max(Status::Skip), Status::Continue);
    }

    #[test]
    fn arbitration_is_permutation_independent() {
        let verdicts = [Status::Accept, Status::Reject, Status::Continue];
        let permutations = [
            [verdicts[0], verdicts[1], verdicts[2]],
            [verdicts[1], verdicts[2], verdicts[0]],
            [verdicts[2], verdicts[0], verdicts[1]],
            [verdicts[2], verdicts[1], verdicts[0]],
        ];

        for permutation in permutations {
            let best = permutation
                .into_iter()
                .fold(Status::Default, |best, verdict| best.max(verdict));
            assert_eq!(best, Status::Reject);
        }
    }

    #[test]
    fn alias_lookup() {
        assert_eq!(
            Status::from_name("temporary-failure").unwrap(),
            Status::TemporaryFailure
        );
        assert_eq!(
            Status::from_name("TEMPORARY_FAILURE").unwrap(),
            Status::TemporaryFailure
        );
        assert_eq!(
            Status::from_name("Temporary-Failure").unwrap(),
            Status::TemporaryFailure
        );
        assert_eq!("continue".parse::<Status>().unwrap(), Status::Continue);
    }

    #[test]
    fn unknown_alias_is_an_error() {
        let error = Status::from_name("temporally-failure").unwrap_err();
        assert_eq!(
            error,
            StatusError::InvalidStatusName("temporally-failure".to_string())
        );
    }

    #[test]
    fn names_round_trip() {
        for status in ALL {
            assert_eq!(Status::from_name(status.name()).unwrap(), status);
            assert_eq!(status.to_string(), status.name());
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Accept.is_terminal());
        assert!(Status::Discard.is_terminal());
        assert!(Status::Reject.is_terminal());
        assert!(Status::TemporaryFailure.is_terminal());
        assert!(!Status::Continue.is_terminal());
        assert!(!Status::Progress.is_terminal());
        assert!(!Status::Skip.is_terminal());
        assert!(!Status::Default.is_terminal());
    }
}
