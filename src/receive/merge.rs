//! receive::merge
//!
//! Integration of an accepted patchset into its target branch.
//!
//! Failure modes are data: [`MergeStatus`] tells the caller whether the
//! ticket was merged, was already merged, or cannot merge, and the
//! caller decides whether a human or an automated process hears about
//! it.

use tracing::{info, warn};

use crate::access::{MergeType, Principal, RepositoryDescriptor};
use crate::core::settings::Settings;
use crate::core::ticket::{Change, Status, Ticket};
use crate::core::types::Oid;
use crate::git::{CommitCache, CommitGraph, Git, GitError, Identity};
use crate::tickets::{Notifier, TicketService};

/// Outcome of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// The integration branch now contains the patchset.
    Merged { sha: Oid },
    /// The patchset tip was already reachable from the branch.
    AlreadyMerged,
    /// The merge cannot apply: conflicts, or a non-fast-forward under a
    /// fast-forward-only policy.
    NotMergeable(String),
    /// The ticket has no integration branch to merge into.
    MissingIntegrationBranch,
    /// Transient failure (lost ref race); retry is reasonable.
    Failed(String),
}

/// Merges accepted patchsets using the repository's configured
/// strategy.
pub struct MergeEngine<'a> {
    git: &'a Git,
    repository: &'a RepositoryDescriptor,
    principal: &'a Principal,
    settings: &'a Settings,
    tickets: &'a dyn TicketService,
    notifier: &'a dyn Notifier,
    cache: &'a CommitCache,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        git: &'a Git,
        repository: &'a RepositoryDescriptor,
        principal: &'a Principal,
        settings: &'a Settings,
        tickets: &'a dyn TicketService,
        notifier: &'a dyn Notifier,
        cache: &'a CommitCache,
    ) -> Self {
        Self {
            git,
            repository,
            principal,
            settings,
            tickets,
            notifier,
            cache,
        }
    }

    /// Merge the ticket's current patchset into its integration branch.
    ///
    /// `reviewers` are appended as `Signed-off-by` trailers when the
    /// server is configured for it and the strategy produces a merge
    /// commit.
    pub fn merge(
        &self,
        ticket: &Ticket,
        reviewers: &[Identity],
    ) -> Result<MergeStatus, GitError> {
        let Some(patchset) = ticket.current_patchset() else {
            return Ok(MergeStatus::NotMergeable(format!(
                "ticket {} has no patchset",
                ticket.number
            )));
        };
        let branch = ticket
            .merge_to
            .clone()
            .unwrap_or_else(|| self.repository.default_branch.clone());
        let branch_ref = branch.to_ref();
        let Some(branch_tip) = self.git.try_resolve_ref(branch_ref.as_str())? else {
            return Ok(MergeStatus::MissingIntegrationBranch);
        };

        if ticket.is_merged() || self.git.is_ancestor(&patchset.tip, &branch_tip)? {
            return Ok(MergeStatus::AlreadyMerged);
        }

        let fast_forwardable = self.git.is_ancestor(&branch_tip, &patchset.tip)?;
        let merge_sha = match self.repository.merge_type {
            MergeType::FastForwardOnly => {
                if !fast_forwardable {
                    return Ok(MergeStatus::NotMergeable(format!(
                        "ticket {} is not a fast-forward of {} and the repository \
                         only accepts fast-forward merges",
                        ticket.number,
                        branch.as_str()
                    )));
                }
                patchset.tip.clone()
            }
            MergeType::MergeIfNecessary if fast_forwardable => patchset.tip.clone(),
            MergeType::MergeIfNecessary | MergeType::MergeAlways => {
                if !self.git.can_merge_clean(&branch_tip, &patchset.tip)? {
                    return Ok(MergeStatus::NotMergeable(format!(
                        "ticket {} has conflicts with {}",
                        ticket.number,
                        branch.as_str()
                    )));
                }
                let message = self.merge_message(ticket, branch.as_str(), reviewers);
                self.git.create_merge_commit(
                    &branch_tip,
                    &patchset.tip,
                    &self.principal.display_name,
                    self.principal.email.as_deref().unwrap_or(""),
                    &message,
                )?
            }
        };

        if let Err(e) = self.git.update_ref_cas(
            branch_ref.as_str(),
            Some(&branch_tip),
            &merge_sha,
            &format!("merge ticket {}: {}", ticket.number, self.principal.username),
        ) {
            match e {
                GitError::CasFailed { .. } | GitError::LockFailure { .. } => {
                    warn!(
                        repository = %self.repository.name,
                        ticket = %ticket.number,
                        error = %e,
                        "merge lost ref race"
                    );
                    return Ok(MergeStatus::Failed(e.to_string()));
                }
                other => return Err(other),
            }
        }
        self.cache
            .record(&self.repository.name, branch_ref.as_str(), merge_sha.clone());

        let mut change = Change::new(&self.principal.username);
        change.fields.status = Some(Status::Merged);
        change.fields.merge_sha = Some(merge_sha.clone());
        change.comment = Some(format!(
            "merged to {} as {}",
            branch.as_str(),
            merge_sha.short(self.settings.short_commit_id_length)
        ));
        if ticket.responsible.is_none() {
            change.fields.responsible = Some(self.principal.username.clone());
        }
        if let Err(e) = self
            .tickets
            .update_ticket(&self.repository.name, ticket.number, change)
        {
            warn!(
                repository = %self.repository.name,
                ticket = %ticket.number,
                error = %e,
                "merged but failed to record merge change"
            );
        } else {
            self.notifier.queue(&self.repository.name, ticket.number);
        }
        info!(
            repository = %self.repository.name,
            ticket = %ticket.number,
            sha = merge_sha.short(self.settings.short_commit_id_length),
            branch = branch.as_str(),
            "ticket merged"
        );
        Ok(MergeStatus::Merged { sha: merge_sha })
    }

    fn merge_message(
        &self,
        ticket: &Ticket,
        branch: &str,
        reviewers: &[Identity],
    ) -> String {
        let patchset = ticket
            .current_patchset()
            .map(|ps| ps.to_string())
            .unwrap_or_default();
        let mut message = format!(
            "Merge ticket {} {} into {}\n\n{}",
            ticket.number, patchset, branch, ticket.title
        );
        if self.settings.signoff_reviewers && !reviewers.is_empty() {
            message.push_str("\n\n");
            for reviewer in reviewers {
                message.push_str(&format!(
                    "Signed-off-by: {} <{}>\n",
                    reviewer.name, reviewer.email
                ));
            }
        }
        message
    }
}
