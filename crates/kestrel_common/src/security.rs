//! Role model and the security policy decision function.
//!
//! The policy is passed explicitly into every check — there is no
//! process-wide mutable policy object, so tests can install an isolated
//! policy per case.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named role held by a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleName(pub String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The administrator role bypasses all policy checks.
pub const ROLE_ADMINISTRATOR: &str = "administrator";

pub fn role_administrator() -> RoleName {
    RoleName::new(ROLE_ADMINISTRATOR)
}

/// The acting subject of a request: the set of roles the session holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub roles: BTreeSet<RoleName>,
}

impl Subject {
    pub fn new(roles: BTreeSet<RoleName>) -> Self {
        Self { roles }
    }

    pub fn of_roles<I: IntoIterator<Item = RoleName>>(roles: I) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.roles.contains(&role_administrator())
    }

    /// Whether the subject already holds every one of the given roles.
    /// Used by the role assignment/revocation rule: a non-administrator
    /// may only grant or revoke roles it holds itself.
    pub fn holds_all<'a, I: IntoIterator<Item = &'a RoleName>>(&self, roles: I) -> bool {
        roles.into_iter().all(|r| self.roles.contains(r))
    }
}

/// One allow rule: subjects holding `role` may perform `action` on
/// `object`. `"*"` matches any object or action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: RoleName,
    pub object: String,
    pub action: String,
}

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied { object: String, action: String },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

/// An explicit allow-list policy. Deny is the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    rules: Vec<PolicyRule>,
}

impl SecurityPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// An empty policy: only administrators pass any check.
    pub fn deny_all() -> Self {
        Self { rules: Vec::new() }
    }

    /// Check whether `subject` may perform `action` on `object`.
    /// Administrators always pass.
    pub fn check(&self, subject: &Subject, object: &str, action: &str) -> PolicyDecision {
        if subject.is_administrator() {
            return PolicyDecision::Allowed;
        }
        for rule in &self.rules {
            if !subject.roles.contains(&rule.role) {
                continue;
            }
            let object_matches = rule.object == "*" || rule.object == object;
            let action_matches = rule.action == "*" || rule.action == action;
            if object_matches && action_matches {
                return PolicyDecision::Allowed;
            }
        }
        PolicyDecision::Denied {
            object: object.to_string(),
            action: action.to_string(),
        }
    }
}
