//! receive::executor
//!
//! Atomic application of the accepted batch.
//!
//! Every ref moves under compare-and-swap against the value the push
//! negotiated. A lost race surfaces as a lock failure on that command
//! and fans out to every not-yet-applied command in the batch, so a ref
//! either moved to exactly the new id or did not move at all - nothing
//! partially applied is left ambiguous.
//!
//! Patchset storage refs are forced past the ancestry check on purpose:
//! a rewrite preserves the ticket number while the history underneath
//! changes, so the new tip is legitimately not a descendant of the old
//! one. The CAS precondition still guards against racing pushes.

use tracing::{info, warn};

use crate::access::Principal;
use crate::core::refspec;
use crate::core::types::Oid;
use crate::git::{CommitCache, Git, GitError, RefUpdateOutcome};

use super::command::{CommandKind, CommandResult, PatchsetCommand, ReceiveCommand};
use super::pack::MessageSink;

/// Applies accepted ref updates against the ref store.
pub struct BatchExecutor<'a> {
    git: &'a Git,
    repository: &'a str,
    principal: &'a Principal,
    cache: &'a CommitCache,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        git: &'a Git,
        repository: &'a str,
        principal: &'a Principal,
        cache: &'a CommitCache,
    ) -> Self {
        Self {
            git,
            repository,
            principal,
            cache,
        }
    }

    fn reflog_message(&self) -> String {
        format!("push: {}", self.principal.username)
    }

    /// Apply every pending standard command, in order.
    ///
    /// Patchset refs are virtual and never applied here; their real
    /// writes go through [`Self::execute_patchset`]. The first lock
    /// failure fans out: all later pending commands fail with the same
    /// lock reason rather than applying half a batch.
    pub fn execute(
        &self,
        commands: &mut [ReceiveCommand],
        sink: &mut dyn MessageSink,
    ) -> Result<(), GitError> {
        let mut poisoned: Option<String> = None;
        for cmd in commands.iter_mut() {
            if !cmd.is_pending() || cmd.is_patchset_ref() {
                continue;
            }
            if let Some(reason) = &poisoned {
                cmd.fail_lock(reason.clone());
                continue;
            }
            match self.apply_command(cmd)? {
                RefUpdateOutcome::Applied => {
                    self.log_ref_change(cmd);
                    if cmd.is_branch() {
                        match cmd.kind() {
                            CommandKind::Delete => {
                                self.cache.invalidate(self.repository, cmd.ref_name())
                            }
                            _ => self.cache.record(
                                self.repository,
                                cmd.ref_name(),
                                cmd.new_id().clone(),
                            ),
                        }
                    }
                    cmd.set_result(CommandResult::Ok);
                }
                RefUpdateOutcome::Locked(reason) => {
                    sink.error(&reason);
                    cmd.fail_lock(reason.clone());
                    poisoned = Some(reason);
                }
            }
        }
        Ok(())
    }

    /// Apply the patchset command: move the numbered storage ref, then
    /// the ticket's current ref.
    ///
    /// The storage ref CAS is the serialization point between racing
    /// pushes to the same ticket; the current ref follows the winner.
    pub fn execute_patchset(
        &self,
        patchset: &mut PatchsetCommand,
        sink: &mut dyn MessageSink,
    ) -> Result<(), GitError> {
        let storage_ref = patchset.ref_name();
        let expected = patchset.old_id();
        let tip = patchset.new_id();

        match self.update(&storage_ref, Some(&expected), &tip)? {
            RefUpdateOutcome::Applied => {}
            RefUpdateOutcome::Locked(reason) => {
                sink.error(&reason);
                patchset.set_result(CommandResult::LockFailure(reason));
                return Ok(());
            }
        }

        let current_ref = refspec::current_ticket_ref(patchset.ticket());
        let current = self.git.try_resolve_ref(current_ref.as_str())?;
        match self.update(current_ref.as_str(), current.as_ref(), &tip)? {
            RefUpdateOutcome::Applied => {
                info!(
                    repository = %self.repository,
                    refname = %current_ref,
                    old = current.as_ref().map(|o| o.as_str()).unwrap_or("(none)"),
                    new = tip.as_str(),
                    user = %self.principal.username,
                    "ref updated"
                );
                patchset.set_result(CommandResult::Ok);
            }
            RefUpdateOutcome::Locked(reason) => {
                sink.error(&reason);
                patchset.set_result(CommandResult::LockFailure(reason));
            }
        }
        Ok(())
    }

    fn apply_command(&self, cmd: &ReceiveCommand) -> Result<RefUpdateOutcome, GitError> {
        match cmd.kind() {
            CommandKind::Delete => self.delete(cmd.ref_name(), cmd.old_id()),
            CommandKind::Create => self.update(cmd.ref_name(), None, cmd.new_id()),
            CommandKind::Update | CommandKind::UpdateNonFastForward => {
                self.update(cmd.ref_name(), Some(cmd.old_id()), cmd.new_id())
            }
        }
    }

    fn update(
        &self,
        refname: &str,
        expected: Option<&Oid>,
        new: &Oid,
    ) -> Result<RefUpdateOutcome, GitError> {
        match self
            .git
            .update_ref_cas(refname, expected, new, &self.reflog_message())
        {
            Ok(()) => Ok(RefUpdateOutcome::Applied),
            Err(e @ (GitError::CasFailed { .. } | GitError::LockFailure { .. })) => {
                warn!(repository = %self.repository, refname, error = %e, "ref update lost race");
                Ok(RefUpdateOutcome::Locked(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, refname: &str, expected: &Oid) -> Result<RefUpdateOutcome, GitError> {
        match self.git.delete_ref_cas(refname, expected) {
            Ok(()) => Ok(RefUpdateOutcome::Applied),
            Err(e @ (GitError::CasFailed { .. } | GitError::LockFailure { .. })) => {
                warn!(repository = %self.repository, refname, error = %e, "ref delete lost race");
                Ok(RefUpdateOutcome::Locked(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn log_ref_change(&self, cmd: &ReceiveCommand) {
        info!(
            repository = %self.repository,
            refname = cmd.ref_name(),
            old = cmd.old_id().as_str(),
            new = cmd.new_id().as_str(),
            kind = ?cmd.kind(),
            user = %self.principal.username,
            "ref updated"
        );
    }
}
