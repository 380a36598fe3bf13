//! receive::command
//!
//! Value types for requested ref updates.
//!
//! A [`ReceiveCommand`] is one requested ref mutation from a push. Its
//! result starts as `NotAttempted`, is set exactly once by the validator
//! or the executor, and is immutable from then on - later writers
//! cannot overwrite an earlier rejection.
//!
//! A [`PatchsetCommand`] is the derived ref update for an accepted
//! patchset: it targets the patchset storage ref and additionally
//! carries the ticket [`Change`] to append.

use crate::core::refspec;
use crate::core::ticket::{Change, Patchset};
use crate::core::types::{Oid, TicketId};

/// The kind of ref mutation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Update,
    UpdateNonFastForward,
    Delete,
}

/// The disposition of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    NotAttempted,
    Ok,
    Rejected(String),
    LockFailure(String),
}

impl CommandResult {
    /// True once the command can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandResult::NotAttempted)
    }
}

/// A requested ref mutation.
#[derive(Debug, Clone)]
pub struct ReceiveCommand {
    ref_name: String,
    old_id: Oid,
    new_id: Oid,
    kind: CommandKind,
    result: CommandResult,
}

impl ReceiveCommand {
    /// Create a command, deriving the kind from the old/new ids.
    ///
    /// Updates start as plain `Update`; the validator upgrades them to
    /// `UpdateNonFastForward` after the ancestry test.
    pub fn new(old_id: Oid, new_id: Oid, ref_name: impl Into<String>) -> Self {
        let kind = if old_id.is_zero() {
            CommandKind::Create
        } else if new_id.is_zero() {
            CommandKind::Delete
        } else {
            CommandKind::Update
        };
        Self {
            ref_name: ref_name.into(),
            old_id,
            new_id,
            kind,
            result: CommandResult::NotAttempted,
        }
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    pub fn old_id(&self) -> &Oid {
        &self.old_id
    }

    pub fn new_id(&self) -> &Oid {
        &self.new_id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    pub fn is_pending(&self) -> bool {
        self.result == CommandResult::NotAttempted
    }

    pub fn is_ok(&self) -> bool {
        self.result == CommandResult::Ok
    }

    /// Mark an update as non-fast-forward. Only meaningful for
    /// `Update` commands.
    pub fn mark_non_fast_forward(&mut self) {
        if self.kind == CommandKind::Update {
            self.kind = CommandKind::UpdateNonFastForward;
        }
    }

    /// Set the result. The first terminal result wins; subsequent
    /// writes are ignored.
    pub fn set_result(&mut self, result: CommandResult) {
        if self.result.is_terminal() {
            return;
        }
        self.result = result;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.set_result(CommandResult::Rejected(reason.into()));
    }

    pub fn fail_lock(&mut self, reason: impl Into<String>) {
        self.set_result(CommandResult::LockFailure(reason.into()));
    }

    /// True if the ref is a standard branch.
    pub fn is_branch(&self) -> bool {
        self.ref_name.starts_with(refspec::R_HEADS)
    }

    /// True if the ref is in the propose or direct ticket namespace.
    pub fn is_patchset_ref(&self) -> bool {
        refspec::is_patchset_ref(&self.ref_name)
    }
}

/// A derived ref update carrying the review payload for an accepted
/// patchset.
///
/// The target ref is the patchset storage ref; for fast-forwards the
/// expected old value is the previous tip, otherwise the update is a
/// forced create/rewrite of the numbered ref.
#[derive(Debug, Clone)]
pub struct PatchsetCommand {
    ticket: TicketId,
    is_new_ticket: bool,
    change: Change,
    result: CommandResult,
}

impl PatchsetCommand {
    /// Wrap a classified patchset into a command for an existing ticket.
    pub fn update(ticket: TicketId, change: Change) -> Self {
        debug_assert!(change.patchset.is_some());
        Self {
            ticket,
            is_new_ticket: false,
            change,
            result: CommandResult::NotAttempted,
        }
    }

    /// Wrap a classified patchset into a command creating a new ticket.
    pub fn create(ticket: TicketId, change: Change) -> Self {
        debug_assert!(change.patchset.is_some());
        Self {
            ticket,
            is_new_ticket: true,
            change,
            result: CommandResult::NotAttempted,
        }
    }

    pub fn ticket(&self) -> TicketId {
        self.ticket
    }

    pub fn is_new_ticket(&self) -> bool {
        self.is_new_ticket
    }

    pub fn into_change(self) -> Change {
        self.change
    }

    pub fn patchset(&self) -> &Patchset {
        self.change
            .patchset
            .as_ref()
            .expect("patchset command always carries a patchset")
    }

    /// The storage ref this command writes:
    /// `refs/tickets/patchsets/<shard>/<ticket>/<number>`.
    pub fn ref_name(&self) -> String {
        refspec::patchset_storage_ref(self.ticket, self.patchset().number)
            .as_str()
            .to_string()
    }

    /// The expected old value for the CAS update: the previous tip for
    /// fast-forwards, zero otherwise.
    pub fn old_id(&self) -> Oid {
        match &self.patchset().parent {
            Some(parent) => parent.clone(),
            None => Oid::zero(),
        }
    }

    pub fn new_id(&self) -> Oid {
        self.patchset().tip.clone()
    }

    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    pub fn set_result(&mut self, result: CommandResult) {
        if self.result.is_terminal() {
            return;
        }
        self.result = result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Oid {
        Oid::new(format!("{:040x}", n)).unwrap()
    }

    #[test]
    fn kind_derivation() {
        let create = ReceiveCommand::new(Oid::zero(), oid(1), "refs/heads/main");
        assert_eq!(create.kind(), CommandKind::Create);

        let delete = ReceiveCommand::new(oid(1), Oid::zero(), "refs/heads/main");
        assert_eq!(delete.kind(), CommandKind::Delete);

        let update = ReceiveCommand::new(oid(1), oid(2), "refs/heads/main");
        assert_eq!(update.kind(), CommandKind::Update);
    }

    #[test]
    fn first_terminal_result_wins() {
        let mut cmd = ReceiveCommand::new(oid(1), oid(2), "refs/heads/main");
        cmd.reject("frozen");
        cmd.set_result(CommandResult::Ok);
        assert_eq!(cmd.result(), &CommandResult::Rejected("frozen".into()));
    }

    #[test]
    fn non_fast_forward_upgrade_only_applies_to_updates() {
        let mut create = ReceiveCommand::new(Oid::zero(), oid(1), "refs/heads/main");
        create.mark_non_fast_forward();
        assert_eq!(create.kind(), CommandKind::Create);

        let mut update = ReceiveCommand::new(oid(1), oid(2), "refs/heads/main");
        update.mark_non_fast_forward();
        assert_eq!(update.kind(), CommandKind::UpdateNonFastForward);
    }

    #[test]
    fn patchset_command_targets_storage_ref() {
        use crate::core::ticket::{Patchset, PatchsetType};

        let mut change = Change::new("alice");
        change.patchset = Some(Patchset {
            number: 2,
            rev: 1,
            kind: PatchsetType::Amend,
            tip: oid(5),
            base: oid(1),
            parent: None,
            commits: 1,
            added: None,
            insertions: 1,
            deletions: 0,
        });
        let cmd = PatchsetCommand::update(TicketId::new(123).unwrap(), change);
        assert_eq!(cmd.ref_name(), "refs/tickets/patchsets/23/123/2");
        assert!(cmd.old_id().is_zero());
        assert_eq!(cmd.new_id(), oid(5));
    }
}
