//! receive::validator
//!
//! Pre-receive screening.
//!
//! The validator runs before any ref moves. It applies batch-level
//! policy first (mirror, frozen, working tree, permissions), then
//! committer verification, then per-ref guards. Every failure is
//! recorded as a rejection on the command; the validator never returns
//! an error for policy.
//!
//! # Check order
//!
//! 1. empty batch
//! 2. mirror / frozen / non-bare repository
//! 3. pusher has neither push nor propose rights
//! 4. committer verification over each standard command's first-parent
//!    range, skipped unless the repository restricts pushes to
//!    authenticated users
//! 5. per-ref: storage-namespace writes, push permission for standard
//!    refs, ticket metadata ref, create/delete/rewind permissions,
//!    commit-cache invalidation

use tracing::{debug, info};

use crate::access::{AccessRestriction, Principal, RepositoryDescriptor};
use crate::core::refspec;
use crate::git::{CommitCache, CommitGraph, Git, GitError};

use super::command::{CommandKind, ReceiveCommand};
use super::pack::MessageSink;

/// Screens a push batch against repository policy.
pub struct Validator<'a> {
    git: &'a Git,
    repository: &'a RepositoryDescriptor,
    principal: &'a Principal,
    cache: &'a CommitCache,
}

impl<'a> Validator<'a> {
    pub fn new(
        git: &'a Git,
        repository: &'a RepositoryDescriptor,
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

    /// Run the full pre-receive screen over the batch.
    ///
    /// Commands that fail a check carry a `Rejected` result afterwards;
    /// an infrastructure failure (unreadable repository) is the only
    /// error path.
    pub fn pre_receive(
        &self,
        commands: &mut [ReceiveCommand],
        sink: &mut dyn MessageSink,
    ) -> Result<(), GitError> {
        if commands.is_empty() {
            return Ok(());
        }

        if let Some(reason) = self.batch_rejection() {
            sink.error(&reason);
            for cmd in commands.iter_mut() {
                cmd.reject(reason.clone());
            }
            return Ok(());
        }

        // committer verification presumes an authenticated pusher; below
        // the Push restriction the check does not apply
        if self.repository.verify_committer
            && self.repository.access_restriction >= AccessRestriction::Push
        {
            self.verify_committers(commands, sink)?;
        }

        for cmd in commands.iter_mut() {
            if !cmd.is_pending() {
                continue;
            }
            self.screen_command(cmd, sink)?;
        }

        let rejected = commands.iter().filter(|c| !c.is_pending()).count();
        debug!(
            repository = %self.repository.name,
            user = %self.principal.username,
            commands = commands.len(),
            rejected,
            "pre-receive screen complete"
        );
        Ok(())
    }

    /// A reason to reject the entire batch, if any.
    fn batch_rejection(&self) -> Option<String> {
        if self.repository.is_mirror {
            return Some(format!(
                "{} is a mirror and cannot receive pushes",
                self.repository.name
            ));
        }
        if self.repository.is_frozen {
            return Some(format!("{} is frozen", self.repository.name));
        }
        if !self.repository.is_bare {
            return Some(format!(
                "{} has a working tree and cannot receive pushes",
                self.repository.name
            ));
        }
        if !self.principal.can_push && !self.principal.can_propose {
            return Some(format!(
                "{} does not have push permission for {}",
                self.principal.username, self.repository.name
            ));
        }
        None
    }

    /// Reject each command whose first-parent chain contains a commit
    /// not committed by the pushing identity.
    ///
    /// The chain stops at the first offending commit; side branches
    /// brought in by a merge are exempt, only the chain the pusher is
    /// vouching for is checked. Patchset commands are exempt entirely:
    /// a proposal legitimately builds on history authored by others,
    /// and review ownership is decided while the patchset is prepared.
    fn verify_committers(
        &self,
        commands: &mut [ReceiveCommand],
        sink: &mut dyn MessageSink,
    ) -> Result<(), GitError> {
        if self.principal.is_anonymous || self.principal.email.is_none() {
            let reason = format!(
                "{} has no verified email address; committer verification failed",
                self.principal.username
            );
            sink.error(&reason);
            for cmd in commands.iter_mut() {
                cmd.reject(reason.clone());
            }
            return Ok(());
        }

        for cmd in commands.iter_mut() {
            if !cmd.is_pending() || cmd.kind() == CommandKind::Delete || cmd.is_patchset_ref()
            {
                continue;
            }
            let chain = self.git.first_parent_chain(cmd.old_id(), cmd.new_id())?;
            for commit in &chain {
                if self
                    .principal
                    .is_committer(&commit.committer.name, &commit.committer.email)
                {
                    continue;
                }
                let reason = format!(
                    "{} is not the committer of {}: expected {}, found {} <{}>",
                    self.principal.username,
                    commit.oid.short(8),
                    self.principal.describe(),
                    commit.committer.name,
                    commit.committer.email,
                );
                sink.error(&reason);
                cmd.reject(reason);
                break;
            }
        }
        Ok(())
    }

    fn screen_command(
        &self,
        cmd: &mut ReceiveCommand,
        sink: &mut dyn MessageSink,
    ) -> Result<(), GitError> {
        // writes into the numbered storage namespace are server-internal
        if refspec::is_patchset_storage_ref(cmd.ref_name()) {
            let reason = format!(
                "{} is managed by the ticket service and cannot be pushed",
                cmd.ref_name()
            );
            sink.error(&reason);
            cmd.reject(reason);
            return Ok(());
        }

        if cmd.is_patchset_ref() {
            if cmd.kind() == CommandKind::Delete {
                let reason = format!("{} cannot be deleted", cmd.ref_name());
                sink.error(&reason);
                cmd.reject(reason);
            }
            // proposal authorization is decided per-ticket while the
            // patchset command is prepared
            return Ok(());
        }

        // everything past this point moves a standard ref; propose-only
        // principals are confined to the patchset namespace
        if !self.principal.can_push {
            let reason = format!(
                "{} does not have push permission for {}",
                self.principal.username,
                cmd.ref_name()
            );
            sink.error(&reason);
            cmd.reject(reason);
            return Ok(());
        }

        if cmd.ref_name() == refspec::TICKET_METADATA_REF {
            if self.principal.can_admin || self.repository.is_owner(&self.principal.username) {
                return Ok(());
            }
            let reason = format!(
                "only administrators and owners may modify {}",
                refspec::TICKET_METADATA_REF
            );
            sink.error(&reason);
            cmd.reject(reason);
            return Ok(());
        }

        match cmd.kind() {
            CommandKind::Create => {
                if !self.principal.can_create_ref {
                    let reason = format!(
                        "{} may not create {}",
                        self.principal.username,
                        cmd.ref_name()
                    );
                    sink.error(&reason);
                    cmd.reject(reason);
                }
            }
            CommandKind::Delete => {
                if !self.principal.can_delete_ref {
                    let reason = format!(
                        "{} may not delete {}",
                        self.principal.username,
                        cmd.ref_name()
                    );
                    sink.error(&reason);
                    cmd.reject(reason);
                    return Ok(());
                }
                self.cache.invalidate(&self.repository.name, cmd.ref_name());
                info!(
                    repository = %self.repository.name,
                    refname = cmd.ref_name(),
                    "commit cache invalidated for deleted ref"
                );
            }
            CommandKind::Update | CommandKind::UpdateNonFastForward => {
                let fast_forward = self.git.is_ancestor(cmd.old_id(), cmd.new_id())?;
                if !fast_forward {
                    cmd.mark_non_fast_forward();
                    if !self.principal.can_rewind_ref {
                        let reason = format!(
                            "{} may not rewind {}",
                            self.principal.username,
                            cmd.ref_name()
                        );
                        sink.error(&reason);
                        cmd.reject(reason);
                        return Ok(());
                    }
                    self.cache.invalidate(&self.repository.name, cmd.ref_name());
                    info!(
                        repository = %self.repository.name,
                        refname = cmd.ref_name(),
                        "commit cache invalidated for rewound ref"
                    );
                }
            }
        }
        Ok(())
    }
}
