//! access
//!
//! Repository descriptors and pushing principals.
//!
//! The hosting server's repository/identity manager resolves an
//! authenticated session into these records and hands them to the
//! pipeline at construction. The pipeline never consults a global user
//! registry; everything it may ask about the pusher is already resolved
//! here.

use serde::{Deserialize, Serialize};

use crate::core::types::BranchName;

/// How tightly access to a repository is restricted.
///
/// Ordering matters: `restriction >= Push` means pushes are gated on
/// authentication, which is the precondition for committer verification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum AccessRestriction {
    /// Anonymous view, clone, and push.
    None,
    /// Authenticated push.
    Push,
    /// Authenticated clone and push.
    Clone,
    /// Authenticated view, clone, and push.
    View,
}

/// Integration strategy for merging accepted patchsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeType {
    /// Only fast-forward merges are accepted.
    FastForwardOnly,
    /// Fast-forward when possible, merge commit otherwise.
    MergeIfNecessary,
    /// Always create a merge commit.
    MergeAlways,
}

/// Repository metadata the pipeline needs to screen a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Repository name, e.g. `project/demo.git`.
    pub name: String,
    /// Bare repositories have no working tree; only bare repositories
    /// accept pushes.
    pub is_bare: bool,
    /// Frozen repositories reject all pushes.
    pub is_frozen: bool,
    /// Mirrors are updated by the mirror service, never by pushes.
    pub is_mirror: bool,
    pub access_restriction: AccessRestriction,
    /// When set, the first-parent chain of every pushed command must be
    /// committed by the pushing identity.
    pub verify_committer: bool,
    pub merge_type: MergeType,
    /// Usernames of repository owners.
    pub owners: Vec<String>,
    /// Default integration branch when neither the push ref nor the
    /// ticket names one.
    pub default_branch: BranchName,
}

impl RepositoryDescriptor {
    pub fn is_owner(&self, username: &str) -> bool {
        self.owners
            .iter()
            .any(|o| o.eq_ignore_ascii_case(username))
    }
}

/// The authenticated identity performing a push, with its rights on the
/// target repository already resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub display_name: String,
    /// Verified email address; required for committer verification.
    pub email: Option<String>,
    /// True for the anonymous pseudo-identity.
    pub is_anonymous: bool,
    pub can_push: bool,
    pub can_create_ref: bool,
    pub can_delete_ref: bool,
    pub can_rewind_ref: bool,
    pub can_admin: bool,
    /// Clone + propose rights; sufficient for a first patchset.
    pub can_propose: bool,
}

impl Principal {
    /// True if a commit's committer identity belongs to this principal.
    ///
    /// The name may match either the account name or the display name;
    /// the email must match the account email. All comparisons are
    /// case-insensitive.
    pub fn is_committer(&self, name: &str, email: &str) -> bool {
        let name_matches = self.username.eq_ignore_ascii_case(name)
            || self.display_name.eq_ignore_ascii_case(name);
        let email_matches = self
            .email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(email));
        name_matches && email_matches
    }

    /// Human-facing identity string used in rejection messages.
    pub fn describe(&self) -> String {
        format!(
            "{} ({}) <{}>",
            self.display_name,
            self.username,
            self.email.as_deref().unwrap_or("?")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal {
            username: "alice".into(),
            display_name: "Alice Cooper".into(),
            email: Some("alice@example.com".into()),
            is_anonymous: false,
            can_push: true,
            can_create_ref: true,
            can_delete_ref: true,
            can_rewind_ref: false,
            can_admin: false,
            can_propose: true,
        }
    }

    #[test]
    fn restriction_ordering() {
        assert!(AccessRestriction::Push >= AccessRestriction::Push);
        assert!(AccessRestriction::Clone >= AccessRestriction::Push);
        assert!(AccessRestriction::None < AccessRestriction::Push);
    }

    #[test]
    fn committer_match_accepts_username_or_display_name() {
        let p = alice();
        assert!(p.is_committer("alice", "ALICE@example.com"));
        assert!(p.is_committer("Alice Cooper", "alice@example.com"));
        assert!(!p.is_committer("alice", "other@example.com"));
        assert!(!p.is_committer("bob", "alice@example.com"));
    }

    #[test]
    fn committer_match_requires_email_on_account() {
        let mut p = alice();
        p.email = None;
        assert!(!p.is_committer("alice", "alice@example.com"));
    }
}
