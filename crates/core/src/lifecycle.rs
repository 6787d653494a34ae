//! Status lifecycles with an explicit transition table.
//!
//! Each status enum lists the statuses it normally moves to. A requested change
//! outside that table is either applied and flagged (`Permissive`) or rejected
//! (`Strict`), depending on the configured [`TransitionPolicy`].

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// How off-table status transitions are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Apply the change, but mark it as flagged.
    #[default]
    Permissive,
    /// Reject the change with `InvalidState`.
    Strict,
}

impl FromStr for TransitionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            other => Err(DomainError::validation(format!(
                "unknown transition policy '{other}' (expected permissive or strict)"
            ))),
        }
    }
}

/// A status enum with an enumerable transition table.
pub trait Lifecycle: Copy + Eq + core::fmt::Debug + 'static {
    /// Wire name, e.g. `PENDING`.
    fn label(self) -> &'static str;

    /// Statuses reachable from `self` through a listed transition.
    fn successors(self) -> &'static [Self];

    fn allows(self, next: Self) -> bool {
        self.successors().contains(&next)
    }
}

/// Outcome of a checked status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange<S> {
    pub from: S,
    pub to: S,
    /// The transition is not in the table and was let through by a permissive policy.
    pub flagged: bool,
}

/// Check `from -> to` against the table under `policy`.
pub fn check_transition<S: Lifecycle>(
    from: S,
    to: S,
    policy: TransitionPolicy,
) -> DomainResult<StatusChange<S>> {
    if from.allows(to) {
        return Ok(StatusChange {
            from,
            to,
            flagged: false,
        });
    }

    match policy {
        TransitionPolicy::Permissive => Ok(StatusChange {
            from,
            to,
            flagged: true,
        }),
        TransitionPolicy::Strict => Err(DomainError::invalid_state(format!(
            "transition {} -> {} is not allowed",
            from.label(),
            to.label()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
    }

    impl Lifecycle for Light {
        fn label(self) -> &'static str {
            match self {
                Light::Red => "RED",
                Light::Green => "GREEN",
            }
        }

        fn successors(self) -> &'static [Self] {
            match self {
                Light::Red => &[Light::Green],
                Light::Green => &[],
            }
        }
    }

    #[test]
    fn listed_transition_is_not_flagged() {
        let change = check_transition(Light::Red, Light::Green, TransitionPolicy::Strict).unwrap();
        assert!(!change.flagged);
    }

    #[test]
    fn permissive_policy_flags_unlisted_transition() {
        let change =
            check_transition(Light::Green, Light::Red, TransitionPolicy::Permissive).unwrap();
        assert!(change.flagged);
        assert_eq!(change.to, Light::Red);
    }

    #[test]
    fn strict_policy_rejects_unlisted_transition() {
        let err = check_transition(Light::Green, Light::Red, TransitionPolicy::Strict).unwrap_err();
        match err {
            DomainError::InvalidState(msg) => assert!(msg.contains("GREEN -> RED")),
            _ => panic!("Expected InvalidState"),
        }
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<TransitionPolicy>().unwrap(), TransitionPolicy::Strict);
        assert!("lenient".parse::<TransitionPolicy>().is_err());
    }
}
