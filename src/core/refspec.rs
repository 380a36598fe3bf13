//! core::refspec
//!
//! The ref-name conventions of the review workflow. These formats are
//! part of the wire contract with every pushing client and must be
//! preserved exactly:
//!
//! - propose namespace: `refs/for/<ticket-or-branch-or-"default">[%opt=val,...]`
//! - direct ticket namespace: `refs/tickets/<ticketId>[%opt=val,...]`
//! - patchset storage: `refs/tickets/patchsets/<shard>/<ticketId>/<number>`
//!   where shard is `ticketId % 100` zero-padded to two digits
//! - per-ticket current ref: `refs/tickets/<ticketId>`
//!
//! Ref-name options are comma-separated `key=value` tokens appended
//! after a literal `%`: `t=` topic, `r=` responsible, `cc=` watcher
//! (repeatable), `m=` milestone.
//!
//! # Example
//!
//! ```
//! use cairn::core::refspec::{parse_push_ref, PushTarget};
//! use cairn::core::types::TicketId;
//!
//! let push = parse_push_ref("refs/for/default%t=parser,cc=bob").unwrap();
//! assert_eq!(push.target, PushTarget::Default);
//! assert_eq!(push.options.topic.as_deref(), Some("parser"));
//!
//! let push = parse_push_ref("refs/tickets/42").unwrap();
//! assert_eq!(push.target, PushTarget::Ticket(TicketId::new(42).unwrap()));
//! ```

use thiserror::Error;

use super::types::{RefName, TicketId};

/// Branch namespace prefix.
pub const R_HEADS: &str = "refs/heads/";

/// Propose namespace prefix.
pub const R_FOR: &str = "refs/for/";

/// Ticket namespace prefix (direct pushes and current refs).
pub const R_TICKETS: &str = "refs/tickets/";

/// Protected patchset storage namespace prefix.
pub const R_PATCHSETS: &str = "refs/tickets/patchsets/";

/// The ticket-metadata ref; only admins and repository owners may push
/// to it directly.
pub const TICKET_METADATA_REF: &str = "refs/meta/tickets";

/// Errors from parsing push refs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefspecError {
    #[error("'{0}' is not a patchset push ref")]
    NotAPatchsetRef(String),

    #[error("invalid ticket number in '{0}'")]
    InvalidTicketNumber(String),

    #[error("empty target in '{0}'")]
    EmptyTarget(String),
}

/// Where a patchset push is aimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTarget {
    /// An existing ticket, referenced by number.
    Ticket(TicketId),
    /// An explicit integration branch for a new proposal.
    Branch(String),
    /// The repository default branch (`refs/for/default` or
    /// `refs/for/new`).
    Default,
}

/// Options encoded in the push ref after `%`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub topic: Option<String>,
    pub responsible: Option<String>,
    pub milestone: Option<String>,
    pub watchers: Vec<String>,
}

impl PushOptions {
    /// Parse the `%`-suffix of a push ref. Unknown keys are ignored so
    /// newer clients degrade gracefully against older servers.
    fn parse(suffix: &str) -> Self {
        let mut options = PushOptions::default();
        for token in suffix.split(',') {
            if let Some(val) = token.strip_prefix("t=") {
                if !val.is_empty() {
                    options.topic = Some(val.to_string());
                }
            } else if let Some(val) = token.strip_prefix("r=") {
                if !val.is_empty() {
                    options.responsible = Some(val.to_string());
                }
            } else if let Some(val) = token.strip_prefix("m=") {
                if !val.is_empty() {
                    options.milestone = Some(val.to_string());
                }
            } else if let Some(val) = token.strip_prefix("cc=") {
                if !val.is_empty() {
                    options.watchers.push(val.to_string());
                }
            }
        }
        options
    }
}

/// A parsed patchset push ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRef {
    pub target: PushTarget,
    pub options: PushOptions,
}

/// True if `ref_name` is in the propose or direct ticket namespace.
///
/// Patchset storage refs are excluded: clients may never push into them
/// directly.
pub fn is_patchset_ref(ref_name: &str) -> bool {
    if is_patchset_storage_ref(ref_name) {
        return false;
    }
    ref_name.starts_with(R_FOR) || ref_name.starts_with(R_TICKETS)
}

/// True if `ref_name` is in the protected patchset storage namespace.
pub fn is_patchset_storage_ref(ref_name: &str) -> bool {
    ref_name.starts_with(R_PATCHSETS)
}

/// Parse a propose (`refs/for/...`) or direct ticket
/// (`refs/tickets/<n>`) push ref into its target and options.
pub fn parse_push_ref(ref_name: &str) -> Result<PushRef, RefspecError> {
    let (spec, options) = match ref_name.split_once('%') {
        Some((spec, suffix)) => (spec, PushOptions::parse(suffix)),
        None => (ref_name, PushOptions::default()),
    };

    if let Some(target) = spec.strip_prefix(R_FOR) {
        if target.is_empty() {
            return Err(RefspecError::EmptyTarget(ref_name.to_string()));
        }
        if target.eq_ignore_ascii_case("default") || target.eq_ignore_ascii_case("new") {
            return Ok(PushRef {
                target: PushTarget::Default,
                options,
            });
        }
        if let Ok(number) = target.parse::<u64>() {
            let id = TicketId::new(number)
                .map_err(|_| RefspecError::InvalidTicketNumber(ref_name.to_string()))?;
            return Ok(PushRef {
                target: PushTarget::Ticket(id),
                options,
            });
        }
        return Ok(PushRef {
            target: PushTarget::Branch(target.to_string()),
            options,
        });
    }

    if is_patchset_storage_ref(spec) {
        return Err(RefspecError::NotAPatchsetRef(ref_name.to_string()));
    }

    if let Some(target) = spec.strip_prefix(R_TICKETS) {
        // the direct namespace accepts only ticket numbers
        let number = target
            .parse::<u64>()
            .map_err(|_| RefspecError::InvalidTicketNumber(ref_name.to_string()))?;
        let id = TicketId::new(number)
            .map_err(|_| RefspecError::InvalidTicketNumber(ref_name.to_string()))?;
        return Ok(PushRef {
            target: PushTarget::Ticket(id),
            options,
        });
    }

    Err(RefspecError::NotAPatchsetRef(ref_name.to_string()))
}

/// The per-ticket "current" ref: `refs/tickets/<ticketId>`.
pub fn current_ticket_ref(ticket: TicketId) -> RefName {
    RefName::new(format!("{R_TICKETS}{ticket}")).expect("ticket ref is always valid")
}

/// The storage ref for one patchset:
/// `refs/tickets/patchsets/<shard>/<ticketId>/<number>`.
pub fn patchset_storage_ref(ticket: TicketId, patchset_number: u32) -> RefName {
    RefName::new(format!(
        "{R_PATCHSETS}{:02}/{}/{}",
        ticket.shard(),
        ticket,
        patchset_number
    ))
    .expect("patchset ref is always valid")
}

/// Extract a ticket number from a current ref or a patchset storage
/// ref. Returns `None` for anything else.
pub fn ticket_number_from_ref(ref_name: &str) -> Option<TicketId> {
    if let Some(rest) = ref_name.strip_prefix(R_PATCHSETS) {
        // shard/ticket/number
        let mut parts = rest.split('/');
        let _shard = parts.next()?;
        let ticket = parts.next()?.parse::<u64>().ok()?;
        return TicketId::new(ticket).ok();
    }
    if let Some(rest) = ref_name.strip_prefix(R_TICKETS) {
        let ticket = rest.parse::<u64>().ok()?;
        return TicketId::new(ticket).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(n: u64) -> TicketId {
        TicketId::new(n).unwrap()
    }

    #[test]
    fn storage_ref_is_sharded_and_zero_padded() {
        assert_eq!(
            patchset_storage_ref(ticket(5), 1).as_str(),
            "refs/tickets/patchsets/05/5/1"
        );
        assert_eq!(
            patchset_storage_ref(ticket(123), 4).as_str(),
            "refs/tickets/patchsets/23/123/4"
        );
        assert_eq!(
            patchset_storage_ref(ticket(200), 2).as_str(),
            "refs/tickets/patchsets/00/200/2"
        );
    }

    #[test]
    fn current_ref_format() {
        assert_eq!(current_ticket_ref(ticket(42)).as_str(), "refs/tickets/42");
    }

    #[test]
    fn ticket_number_roundtrips_through_refs() {
        assert_eq!(ticket_number_from_ref("refs/tickets/42"), Some(ticket(42)));
        assert_eq!(
            ticket_number_from_ref("refs/tickets/patchsets/23/123/4"),
            Some(ticket(123))
        );
        assert_eq!(ticket_number_from_ref("refs/heads/main"), None);
        assert_eq!(ticket_number_from_ref("refs/tickets/not-a-number"), None);
    }

    #[test]
    fn parse_default_target_with_options() {
        let push = parse_push_ref("refs/for/default%t=parser,r=carol,cc=bob,cc=eve,m=1.0")
            .unwrap();
        assert_eq!(push.target, PushTarget::Default);
        assert_eq!(push.options.topic.as_deref(), Some("parser"));
        assert_eq!(push.options.responsible.as_deref(), Some("carol"));
        assert_eq!(push.options.milestone.as_deref(), Some("1.0"));
        assert_eq!(push.options.watchers, vec!["bob", "eve"]);
    }

    #[test]
    fn parse_ticket_targets() {
        let push = parse_push_ref("refs/for/7").unwrap();
        assert_eq!(push.target, PushTarget::Ticket(ticket(7)));

        let push = parse_push_ref("refs/tickets/7%cc=bob").unwrap();
        assert_eq!(push.target, PushTarget::Ticket(ticket(7)));
        assert_eq!(push.options.watchers, vec!["bob"]);
    }

    #[test]
    fn parse_branch_target() {
        let push = parse_push_ref("refs/for/release-1.4").unwrap();
        assert_eq!(push.target, PushTarget::Branch("release-1.4".into()));
    }

    #[test]
    fn parse_rejects_non_patchset_and_storage_refs() {
        assert!(parse_push_ref("refs/heads/main").is_err());
        assert!(parse_push_ref("refs/tickets/patchsets/05/5/1").is_err());
        assert!(parse_push_ref("refs/tickets/0").is_err());
        assert!(parse_push_ref("refs/for/").is_err());
    }

    #[test]
    fn patchset_ref_detection_excludes_storage() {
        assert!(is_patchset_ref("refs/for/default"));
        assert!(is_patchset_ref("refs/tickets/9"));
        assert!(!is_patchset_ref("refs/tickets/patchsets/09/9/1"));
        assert!(!is_patchset_ref("refs/heads/main"));
        assert!(is_patchset_storage_ref("refs/tickets/patchsets/09/9/1"));
    }

    #[test]
    fn unknown_option_keys_are_ignored() {
        let push = parse_push_ref("refs/for/default%x=1,t=ok").unwrap();
        assert_eq!(push.options.topic.as_deref(), Some("ok"));
    }
}
