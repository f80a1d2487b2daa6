//! Branch protection rules.

use serde::{Deserialize, Serialize};

/// Protection settings attached to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionRules {
    /// Allow the branch to be deleted.
    pub allow_deletion: bool,
    /// Reject direct commits; changes must arrive through a pull request.
    pub require_pull_request: bool,
    /// Minimum approving reviews before a pull request may merge.
    pub required_approvals: u32,
}

impl Default for ProtectionRules {
    fn default() -> Self {
        Self {
            allow_deletion: true,
            require_pull_request: false,
            required_approvals: 0,
        }
    }
}

impl ProtectionRules {
    /// Rules for a branch that only changes through reviewed pull requests.
    pub fn protected(required_approvals: u32) -> Self {
        Self {
            allow_deletion: false,
            require_pull_request: true,
            required_approvals,
        }
    }

    /// Check if a direct commit is allowed.
    pub fn allows_direct_commit(&self) -> bool {
        !self.require_pull_request
    }

    /// Check if branch deletion is allowed.
    pub fn allows_deletion(&self) -> bool {
        self.allow_deletion
    }

    /// Check if enough approvals were given.
    pub fn check_approvals(&self, approvals: u32) -> bool {
        approvals >= self.required_approvals
    }
}

/// Rules applied to every branch whose name matches a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRule {
    /// Branch pattern (e.g., "main", "release/*").
    pub pattern: String,
    /// Rules to apply.
    pub rules: ProtectionRules,
}

impl ProtectionRule {
    /// Create a rule for a pattern.
    pub fn new(pattern: impl Into<String>, rules: ProtectionRules) -> Self {
        Self {
            pattern: pattern.into(),
            rules,
        }
    }

    /// Check if this rule matches a branch name.
    pub fn matches(&self, branch: &str) -> bool {
        let parts: Vec<&str> = self.pattern.split('*').collect();
        match parts.as_slice() {
            [exact] => branch == *exact,
            [prefix, suffix] => {
                branch.len() >= prefix.len() + suffix.len()
                    && branch.starts_with(prefix)
                    && branch.ends_with(suffix)
            }
            // Multiple wildcards - simplify to prefix match
            [prefix, ..] => branch.starts_with(prefix),
            [] => false,
        }
    }
}
