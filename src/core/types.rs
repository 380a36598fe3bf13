//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Oid`] - Git object identifier (SHA)
//! - [`BranchName`] - Validated Git branch name
//! - [`RefName`] - Validated, fully-qualified Git reference name
//! - [`TicketId`] - Server-assigned ticket number
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use cairn::core::types::{BranchName, Oid, TicketId};
//!
//! let branch = BranchName::new("feature/parser").unwrap();
//! let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! let ticket = TicketId::new(42).unwrap();
//! assert_eq!(ticket.shard(), 42);
//!
//! assert!(BranchName::new("invalid..name").is_err());
//! assert!(Oid::new("not-a-sha").is_err());
//! assert!(TicketId::new(0).is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid ticket id: {0}")]
    InvalidTicketId(String),
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see
/// `git check-ref-format`):
/// - Cannot be empty
/// - Cannot start with `.` or `-`
/// - Cannot end with `.lock` or `/`
/// - Cannot contain `..`, `@{`, `//`, or ASCII control characters
/// - Cannot contain spaces, `~`, `^`, `:`, `\`, `?`, `*`, `[`
/// - Cannot be exactly `@`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's
    /// refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Validate a branch name against Git's refname rules.
    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }

        if name == "@" {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be '@' (reserved)".into(),
            ));
        }

        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot start with '.' or '-'".into(),
            ));
        }

        if name.ends_with(".lock") {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot end with '.lock'".into(),
            ));
        }
        if name.ends_with('/') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot end with '/'".into(),
            ));
        }

        for needle in ["..", "@{", "//"] {
            if name.contains(needle) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{needle}'"
                )));
            }
        }

        const INVALID_CHARS: [char; 9] = [' ', '~', '^', ':', '\\', '?', '*', '[', '%'];
        for c in INVALID_CHARS {
            if name.contains(c) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{c}'"
                )));
            }
        }

        for c in name.chars() {
            if c.is_ascii_control() {
                return Err(TypeError::InvalidBranchName(
                    "branch name cannot contain control characters".into(),
                ));
            }
        }

        for component in name.split('/') {
            if component.is_empty() {
                continue;
            }
            if component.starts_with('.') {
                return Err(TypeError::InvalidBranchName(
                    "path component cannot start with '.'".into(),
                ));
            }
            if component.ends_with(".lock") {
                return Err(TypeError::InvalidBranchName(
                    "path component cannot end with '.lock'".into(),
                ));
            }
        }

        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fully-qualified ref for this branch (`refs/heads/<name>`).
    pub fn to_ref(&self) -> RefName {
        RefName(format!("refs/heads/{}", self.0))
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Git object identifier (SHA-1 or SHA-256).
///
/// OIDs are normalized to lowercase for consistency.
///
/// # Example
///
/// ```
/// use cairn::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
///
/// let zero = Oid::zero();
/// assert!(zero.is_zero());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// The zero OID (40 zeros for SHA-1).
    const ZERO_SHA1: &'static str = "0000000000000000000000000000000000000000";

    /// Create a new validated OID from a hex string.
    ///
    /// Accepts 40-character (SHA-1) or 64-character (SHA-256) hex strings
    /// and normalizes them to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not valid hex of
    /// the expected length.
    pub fn new(hex: impl Into<String>) -> Result<Self, TypeError> {
        let hex = hex.into().to_lowercase();
        if hex.len() != 40 && hex.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                hex.len()
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid("non-hex characters".into()));
        }
        Ok(Self(hex))
    }

    /// The zero OID, used to mark ref creation and deletion.
    pub fn zero() -> Self {
        Self(Self::ZERO_SHA1.to_string())
    }

    /// True if this is the zero OID.
    pub fn is_zero(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }

    /// Get the OID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviate to the first `len` characters.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated, fully-qualified Git reference name.
///
/// Must start with `refs/`. An optional `%opt=val,...` suffix (used by
/// the propose and ticket namespaces) is permitted and retained verbatim;
/// [`crate::core::refspec`] parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name does not start
    /// with `refs/` or contains whitespace/control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if !name.starts_with("refs/") {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' must start with refs/"
            )));
        }
        if name
            .chars()
            .any(|c| c.is_ascii_control() || c.is_whitespace())
        {
            return Err(TypeError::InvalidRefName(
                "ref name cannot contain whitespace or control characters".into(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the ref name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this ref is in the branch namespace (`refs/heads/`).
    pub fn is_branch(&self) -> bool {
        self.0.starts_with("refs/heads/")
    }

    /// The short name with standard prefixes removed, mirroring
    /// `git rev-parse --abbrev-ref`.
    pub fn shorten(&self) -> &str {
        for prefix in ["refs/heads/", "refs/tags/", "refs/remotes/"] {
            if let Some(rest) = self.0.strip_prefix(prefix) {
                return rest;
            }
        }
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A server-assigned ticket number.
///
/// Ticket ids are positive; zero is reserved as the "no ticket" sentinel
/// in ref parsing and never constructs successfully.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TicketId(u64);

impl TicketId {
    /// Create a new ticket id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidTicketId` for zero.
    pub fn new(id: u64) -> Result<Self, TypeError> {
        if id == 0 {
            return Err(TypeError::InvalidTicketId(
                "ticket ids start at 1".into(),
            ));
        }
        Ok(Self(id))
    }

    /// The numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The two-digit storage shard for this ticket (`id % 100`).
    pub fn shard(&self) -> u64 {
        self.0 % 100
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_accepts_valid_names() {
        for name in ["main", "feature/parser", "user@feature", "v1.2-rc"] {
            assert!(BranchName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn branch_name_rejects_invalid_names() {
        for name in [
            "", "@", ".hidden", "-flag", "a..b", "end/", "has space", "x.lock",
            "a//b", "opt%val",
        ] {
            assert!(BranchName::new(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn oid_normalizes_and_abbreviates() {
        let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
        assert_eq!(oid.short(6), "abc123");
        assert!(!oid.is_zero());
        assert!(Oid::zero().is_zero());
    }

    #[test]
    fn oid_rejects_bad_input() {
        assert!(Oid::new("short").is_err());
        assert!(Oid::new("g".repeat(40)).is_err());
    }

    #[test]
    fn refname_requires_refs_prefix() {
        assert!(RefName::new("refs/heads/main").is_ok());
        assert!(RefName::new("main").is_err());
        assert!(RefName::new("refs/heads/a b").is_err());
    }

    #[test]
    fn refname_shortens_known_prefixes() {
        let r = RefName::new("refs/heads/develop").unwrap();
        assert_eq!(r.shorten(), "develop");
        assert!(r.is_branch());

        let t = RefName::new("refs/tickets/7").unwrap();
        assert_eq!(t.shorten(), "refs/tickets/7");
        assert!(!t.is_branch());
    }

    #[test]
    fn ticket_id_shard_wraps_at_100() {
        assert_eq!(TicketId::new(7).unwrap().shard(), 7);
        assert_eq!(TicketId::new(100).unwrap().shard(), 0);
        assert_eq!(TicketId::new(12345).unwrap().shard(), 45);
        assert!(TicketId::new(0).is_err());
    }
}
