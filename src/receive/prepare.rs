//! receive::prepare
//!
//! Patchset command preparation.
//!
//! Takes one accepted push into the propose or ticket namespace and
//! turns it into a [`PatchsetCommand`]: resolve the integration branch,
//! apply the proposal rules, authorize the pusher, classify the tip,
//! and populate the ticket [`Change`] from the commit and the ref-name
//! options.
//!
//! Rejections land on the originating command; `prepare` returns
//! `Ok(None)` in that case and the batch continues without the
//! patchset.

use tracing::{debug, info};

use crate::access::{Principal, RepositoryDescriptor};
use crate::core::refspec::{self, PushOptions, PushTarget};
use crate::core::settings::Settings;
use crate::core::ticket::{Change, Status, Ticket};
use crate::core::types::{BranchName, Oid, RefName};
use crate::git::{CommitCache, CommitGraph, CommitInfo, Git, GitError};
use crate::tickets::TicketService;

use super::classify::Classifier;
use super::command::{PatchsetCommand, ReceiveCommand};
use super::pack::MessageSink;

/// Builds the patchset command for a push into the review namespaces.
pub struct PatchsetPreparer<'a> {
    git: &'a Git,
    repository: &'a RepositoryDescriptor,
    principal: &'a Principal,
    settings: &'a Settings,
    tickets: &'a dyn TicketService,
    cache: &'a CommitCache,
}

impl<'a> PatchsetPreparer<'a> {
    pub fn new(
        git: &'a Git,
        repository: &'a RepositoryDescriptor,
        principal: &'a Principal,
        settings: &'a Settings,
        tickets: &'a dyn TicketService,
        cache: &'a CommitCache,
    ) -> Self {
        Self {
            git,
            repository,
            principal,
            settings,
            tickets,
            cache,
        }
    }

    /// Prepare the patchset command for one propose/ticket ref update.
    ///
    /// On rejection the reason is recorded on `cmd` and sent through the
    /// sink; `Ok(None)` is returned.
    pub fn prepare(
        &self,
        cmd: &mut ReceiveCommand,
        sink: &mut dyn MessageSink,
    ) -> Result<Option<PatchsetCommand>, GitError> {
        let push = match refspec::parse_push_ref(cmd.ref_name()) {
            Ok(push) => push,
            Err(err) => {
                let reason = err.to_string();
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        };

        let ticket = match &push.target {
            PushTarget::Ticket(id) => match self.tickets.get_ticket(&self.repository.name, *id) {
                Some(ticket) => Some(ticket),
                None => {
                    let reason = format!("ticket {} does not exist", id);
                    sink.error(&reason);
                    cmd.reject(reason);
                    return Ok(None);
                }
            },
            PushTarget::Branch(_) | PushTarget::Default => None,
        };

        if let Some(ticket) = &ticket {
            if ticket.is_merged() {
                let reason = format!("ticket {} is already merged", ticket.number);
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        }

        let branch = match self.integration_branch(&push.target, ticket.as_ref()) {
            Ok(branch) => branch,
            Err(reason) => {
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        };
        let branch_ref = branch.to_ref();
        let integration_tip = match self.branch_tip(&branch_ref)? {
            Some(tip) => tip,
            None => {
                let reason = format!(
                    "integration branch {} does not exist",
                    branch.as_str()
                );
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        };

        let tip = cmd.new_id().clone();
        let merge_base = match self.git.merge_base(&tip, &integration_tip)? {
            Some(base) => base,
            None => {
                let reason = format!(
                    "{} has no common ancestry with {}",
                    tip.short(self.settings.short_commit_id_length),
                    branch.as_str()
                );
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        };

        if let Some(ticket) = &ticket {
            if ticket.has_patchset_tip(&tip) {
                let reason = format!("ticket {}: everything up-to-date", ticket.number);
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        }

        if let Some(reason) = self.authorization_failure(ticket.as_ref()) {
            sink.error(&reason);
            cmd.reject(reason);
            return Ok(None);
        }

        let tip_info = self.git.commit_info(&tip)?;
        if ticket.is_none() {
            if let Some(reason) = self.proposal_failure(&merge_base, &tip, &tip_info, &branch)? {
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        }

        let is_new_ticket = ticket.is_none();
        if is_new_ticket || self.settings.require_mergeable {
            if !self.git.can_merge_clean(&integration_tip, &tip)? {
                let reason = format!(
                    "{} does not merge cleanly into {}",
                    tip.short(self.settings.short_commit_id_length),
                    branch.as_str()
                );
                sink.error(&reason);
                cmd.reject(reason);
                return Ok(None);
            }
        }

        let patchset = Classifier::new(self.git).classify(
            ticket.as_ref().and_then(|t| t.current_patchset()),
            &merge_base,
            &tip,
            &integration_tip,
        )?;
        debug!(
            repository = %self.repository.name,
            refname = cmd.ref_name(),
            kind = %patchset.kind,
            patchset = %patchset,
            "patchset classified"
        );

        let change = self.build_change(ticket.as_ref(), &tip_info, &branch, &push.options, patchset);

        let command = match &ticket {
            Some(ticket) => PatchsetCommand::update(ticket.number, change),
            None => {
                let id = self
                    .tickets
                    .assign_new_id(&self.repository.name)
                    .map_err(|e| GitError::Internal {
                        message: e.to_string(),
                    })?;
                info!(
                    repository = %self.repository.name,
                    ticket = %id,
                    user = %self.principal.username,
                    "new ticket proposed"
                );
                PatchsetCommand::create(id, change)
            }
        };
        Ok(Some(command))
    }

    /// The integration branch tip, served from the commit cache when the
    /// entry is warm. Misses are recorded so repeated pushes against the
    /// same branch skip the ref store. The validator and executor keep
    /// the entry honest when the branch itself moves.
    fn branch_tip(&self, branch_ref: &RefName) -> Result<Option<Oid>, GitError> {
        if let Some(tip) = self.cache.tip(&self.repository.name, branch_ref.as_str()) {
            return Ok(Some(tip));
        }
        let Some(tip) = self.git.try_resolve_ref(branch_ref.as_str())? else {
            return Ok(None);
        };
        self.cache
            .record(&self.repository.name, branch_ref.as_str(), tip.clone());
        Ok(Some(tip))
    }

    /// Resolve the integration branch: explicit in the ref, recorded on
    /// the ticket, or the repository default.
    fn integration_branch(
        &self,
        target: &PushTarget,
        ticket: Option<&Ticket>,
    ) -> Result<BranchName, String> {
        match target {
            PushTarget::Branch(name) => BranchName::new(name.clone())
                .map_err(|_| format!("'{}' is not a valid branch name", name)),
            PushTarget::Ticket(_) | PushTarget::Default => Ok(ticket
                .and_then(|t| t.merge_to.clone())
                .unwrap_or_else(|| self.repository.default_branch.clone())),
        }
    }

    /// Patchset authorization. The first patchset only needs propose
    /// rights; revisions require an established relationship to the
    /// ticket or general push rights.
    fn authorization_failure(&self, ticket: Option<&Ticket>) -> Option<String> {
        match ticket {
            None => (!self.principal.can_propose).then(|| {
                format!(
                    "{} may not propose patchsets in {}",
                    self.principal.username, self.repository.name
                )
            }),
            Some(ticket) => {
                let authorized = self.principal.can_push
                    || ticket.is_author(&self.principal.username)
                    || ticket.is_patchset_author(&self.principal.username)
                    || ticket.is_responsible(&self.principal.username);
                (!authorized).then(|| {
                    format!(
                        "{} may not push a patchset to ticket {}",
                        self.principal.username, ticket.number
                    )
                })
            }
        }
    }

    /// Rules specific to brand-new proposals: exactly one commit above
    /// the merge base, with a title inside the configured bounds.
    fn proposal_failure(
        &self,
        merge_base: &Oid,
        tip: &Oid,
        tip_info: &CommitInfo,
        branch: &BranchName,
    ) -> Result<Option<String>, GitError> {
        let commits = self.git.commit_count(merge_base, tip)?;
        if commits != 1 {
            let short = self.settings.short_commit_id_length;
            return Ok(Some(format!(
                "a proposal must be a single commit, but {}..{} spans {} commits \
                 against {}; squash your branch or push to refs/for/<branch> for a \
                 different integration branch",
                merge_base.short(short),
                tip.short(short),
                commits,
                branch.as_str(),
            )));
        }
        let title_len = tip_info.title.chars().count();
        if title_len < self.settings.min_title_length {
            return Ok(Some(format!(
                "commit title is too short ({} characters, minimum {})",
                title_len, self.settings.min_title_length
            )));
        }
        if title_len > self.settings.max_title_length {
            return Ok(Some(format!(
                "commit title is too long ({} characters, maximum {})",
                title_len, self.settings.max_title_length
            )));
        }
        Ok(None)
    }

    /// Populate the ticket change for the classified patchset.
    fn build_change(
        &self,
        ticket: Option<&Ticket>,
        tip_info: &CommitInfo,
        branch: &BranchName,
        options: &PushOptions,
        patchset: crate::core::ticket::Patchset,
    ) -> Change {
        let mut change = Change::new(&self.principal.username);

        match ticket {
            None => {
                change.fields.title = Some(tip_info.title.clone());
                let body = tip_info.body();
                if !body.is_empty() {
                    change.fields.body = Some(body);
                }
                change.fields.status = Some(Status::New);
                change.fields.merge_to = Some(branch.clone());
            }
            Some(ticket) => {
                // a rewritten single-commit patchset carries the commit
                // message forward onto the ticket
                if patchset.kind.is_rewrite() && patchset.commits == 1 {
                    if ticket.title != tip_info.title {
                        change.fields.title = Some(tip_info.title.clone());
                    }
                    let body = tip_info.body();
                    if !body.is_empty() && ticket.body != body {
                        change.fields.body = Some(body);
                    }
                }
                if ticket.is_closed() && !ticket.is_merged() {
                    change.fields.status = Some(Status::Open);
                }
                if ticket.merge_to.is_none() {
                    change.fields.merge_to = Some(branch.clone());
                }
            }
        }

        if let Some(topic) = &options.topic {
            change.fields.topic = Some(topic.clone());
        }
        if let Some(responsible) = &options.responsible {
            change.fields.responsible = Some(responsible.clone());
        }
        if let Some(milestone) = &options.milestone {
            change.fields.milestone = Some(milestone.clone());
        }
        change.watch(options.watchers.iter().cloned());
        change.watch([self.principal.username.clone()]);
        change.patchset = Some(patchset);
        change
    }
}
