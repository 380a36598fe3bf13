//! receive::links
//!
//! Ticket references in commit messages.
//!
//! After the batch lands, every successfully-applied standard branch
//! update is walked for ticket references. Two actions exist:
//!
//! - `fixes #7` / `closes #7` closes the ticket, valid only while the
//!   ticket is open and only on its integration branch
//! - a bare `#7` records an informational reference on any branch
//!
//! Closing a commit that is already a known patchset tip reuses that
//! patchset; anything else synthesizes a patchset as if it had been
//! pushed directly, moving the ticket refs under their own CAS outside
//! the main batch.
//!
//! A rewind or delete feeds corrections back: links whose commits are
//! no longer reachable are re-recorded with `is_delete` set, grouped
//! into one correcting change per ticket.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{info, warn};

use crate::access::Principal;
use crate::core::refspec::{self, R_HEADS};
use crate::core::ticket::{Change, LinkAction, Status, Ticket, TicketLink};
use crate::core::types::{Oid, TicketId};
use crate::git::{CommitInfo, Git, GitError};
use crate::tickets::{Notifier, TicketService};

use super::classify::Classifier;
use super::command::{CommandKind, ReceiveCommand};

/// Extracts ticket references from commit messages.
pub struct LinkScanner {
    close: Regex,
    mention: Regex,
}

impl Default for LinkScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkScanner {
    pub fn new() -> Self {
        Self {
            close: Regex::new(r"(?i)(?:fixes|closes)[\s-]+#?(\d+)")
                .expect("close pattern is valid"),
            mention: Regex::new(r"#(\d+)").expect("mention pattern is valid"),
        }
    }

    /// Scan one commit message. Each ticket yields at most one action;
    /// a close outranks a plain mention of the same ticket.
    pub fn scan(&self, message: &str) -> Vec<(TicketId, LinkAction)> {
        let mut actions: BTreeMap<TicketId, LinkAction> = BTreeMap::new();
        for capture in self.mention.captures_iter(message) {
            if let Some(id) = parse_id(&capture[1]) {
                actions.entry(id).or_insert(LinkAction::Commit);
            }
        }
        for capture in self.close.captures_iter(message) {
            if let Some(id) = parse_id(&capture[1]) {
                actions.insert(id, LinkAction::Close);
            }
        }
        actions.into_iter().collect()
    }
}

fn parse_id(digits: &str) -> Option<TicketId> {
    digits.parse::<u64>().ok().and_then(|n| TicketId::new(n).ok())
}

/// Processes applied branch updates for ticket references and closures.
pub struct TicketLinkProcessor<'a> {
    git: &'a Git,
    repository: &'a str,
    principal: &'a Principal,
    tickets: &'a dyn TicketService,
    notifier: &'a dyn Notifier,
    scanner: LinkScanner,
}

impl<'a> TicketLinkProcessor<'a> {
    pub fn new(
        git: &'a Git,
        repository: &'a str,
        principal: &'a Principal,
        tickets: &'a dyn TicketService,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            git,
            repository,
            principal,
            tickets,
            notifier,
            scanner: LinkScanner::new(),
        }
    }

    /// Process one successfully-applied standard branch command.
    pub fn process(&self, cmd: &ReceiveCommand) -> Result<(), GitError> {
        if !cmd.is_ok() || !cmd.is_branch() {
            return Ok(());
        }
        match cmd.kind() {
            CommandKind::Create | CommandKind::Update => {
                let added = self.git.rev_list(cmd.old_id(), cmd.new_id())?;
                self.record_references(cmd, &added)
            }
            CommandKind::UpdateNonFastForward => {
                // the rewind first invalidates what the rewound history
                // claimed, then records what the new history claims
                let removed = self.git.rev_list(cmd.new_id(), cmd.old_id())?;
                self.invalidate_references(&removed)?;
                let added = self.git.rev_list(cmd.old_id(), cmd.new_id())?;
                self.record_references(cmd, &added)
            }
            CommandKind::Delete => {
                let survivors: Vec<Oid> = self
                    .git
                    .list_refs_by_prefix(R_HEADS)?
                    .into_iter()
                    .filter(|r| r.name != cmd.ref_name())
                    .map(|r| r.oid)
                    .collect();
                let removed = self.git.rev_list_excluding(cmd.old_id(), &survivors)?;
                self.invalidate_references(&removed)
            }
        }
    }

    /// Record references and closures for newly reachable commits.
    fn record_references(
        &self,
        cmd: &ReceiveCommand,
        commits: &[CommitInfo],
    ) -> Result<(), GitError> {
        let branch = cmd.ref_name().strip_prefix(R_HEADS).unwrap_or("");
        for commit in commits {
            for (id, action) in self.scanner.scan(&commit.message) {
                let Some(ticket) = self.tickets.get_ticket(self.repository, id) else {
                    continue;
                };
                if has_link(&ticket, &commit.oid, action) {
                    continue;
                }
                match action {
                    LinkAction::Commit => self.record_mention(&ticket, commit),
                    LinkAction::Close => {
                        self.close_ticket(&ticket, commit, branch, cmd.new_id())?
                    }
                }
            }
        }
        Ok(())
    }

    fn record_mention(&self, ticket: &Ticket, commit: &CommitInfo) {
        let mut change = Change::new(&self.principal.username);
        change
            .pending_links
            .push(TicketLink::new(ticket.number, LinkAction::Commit, commit.oid.clone()));
        if let Err(e) = self
            .tickets
            .update_ticket(self.repository, ticket.number, change)
        {
            warn!(
                repository = self.repository,
                ticket = %ticket.number,
                error = %e,
                "failed to record commit reference"
            );
            return;
        }
        self.notifier.queue(self.repository, ticket.number);
    }

    /// Close a ticket referenced with `fixes`/`closes`.
    ///
    /// Valid only while the ticket is open, and only on the ticket's
    /// integration branch when one is recorded.
    fn close_ticket(
        &self,
        ticket: &Ticket,
        commit: &CommitInfo,
        branch: &str,
        branch_tip: &Oid,
    ) -> Result<(), GitError> {
        if ticket.is_closed() {
            return Ok(());
        }
        if let Some(merge_to) = &ticket.merge_to {
            if merge_to.as_str() != branch {
                return Ok(());
            }
        }

        let mut change = Change::new(&self.principal.username);
        if !ticket.has_patchset_tip(&commit.oid) {
            // the closing commit was never pushed as a patchset; commit
            // one now so the merge SHA resolves to ticket history
            let Some(base) = self.git.merge_base(&commit.oid, branch_tip)? else {
                return Ok(());
            };
            let patchset = Classifier::new(self.git).classify(
                ticket.current_patchset(),
                &base,
                &commit.oid,
                branch_tip,
            )?;
            let storage_ref =
                refspec::patchset_storage_ref(ticket.number, patchset.number);
            let expected = patchset.parent.clone().unwrap_or_else(Oid::zero);
            if let Err(e) = self.git.update_ref_cas(
                storage_ref.as_str(),
                Some(&expected),
                &commit.oid,
                &format!("merged via {}", branch),
            ) {
                warn!(
                    repository = self.repository,
                    ticket = %ticket.number,
                    error = %e,
                    "lost race recording synthesized patchset"
                );
                return Ok(());
            }
            let current_ref = refspec::current_ticket_ref(ticket.number);
            let current = self.git.try_resolve_ref(current_ref.as_str())?;
            if let Err(e) = self.git.update_ref_cas(
                current_ref.as_str(),
                current.as_ref(),
                &commit.oid,
                &format!("merged via {}", branch),
            ) {
                warn!(
                    repository = self.repository,
                    ticket = %ticket.number,
                    error = %e,
                    "lost race updating ticket ref"
                );
                return Ok(());
            }
            change.patchset = Some(patchset);
        }

        change.fields.status = Some(Status::Merged);
        change.fields.merge_sha = Some(commit.oid.clone());
        change.comment = Some(format!("merged to {} by commit {}", branch, commit.oid.short(8)));
        if ticket.responsible.is_none() {
            change.fields.responsible = Some(self.principal.username.clone());
        }
        change
            .pending_links
            .push(TicketLink::new(ticket.number, LinkAction::Close, commit.oid.clone()));

        match self
            .tickets
            .update_ticket(self.repository, ticket.number, change)
        {
            Ok(_) => {
                info!(
                    repository = self.repository,
                    ticket = %ticket.number,
                    commit = commit.oid.short(8),
                    branch,
                    "ticket closed by commit"
                );
                self.notifier.queue(self.repository, ticket.number);
            }
            Err(e) => warn!(
                repository = self.repository,
                ticket = %ticket.number,
                error = %e,
                "failed to close ticket"
            ),
        }
        Ok(())
    }

    /// Retroactively delete links whose commits are gone, one correcting
    /// change per affected ticket.
    fn invalidate_references(&self, removed: &[CommitInfo]) -> Result<(), GitError> {
        let mut corrections: BTreeMap<TicketId, Vec<TicketLink>> = BTreeMap::new();
        for commit in removed {
            for (id, action) in self.scanner.scan(&commit.message) {
                let Some(ticket) = self.tickets.get_ticket(self.repository, id) else {
                    continue;
                };
                if !has_link(&ticket, &commit.oid, action) {
                    continue;
                }
                corrections.entry(id).or_default().push(
                    TicketLink::new(id, action, commit.oid.clone()).deleted(),
                );
            }
        }
        for (id, links) in corrections {
            let mut change = Change::new(&self.principal.username);
            change.pending_links = links;
            match self.tickets.update_ticket(self.repository, id, change) {
                Ok(_) => {
                    info!(
                        repository = self.repository,
                        ticket = %id,
                        "ticket links invalidated by rewind"
                    );
                    self.notifier.queue(self.repository, id);
                }
                Err(e) => warn!(
                    repository = self.repository,
                    ticket = %id,
                    error = %e,
                    "failed to invalidate ticket links"
                ),
            }
        }
        Ok(())
    }
}

fn has_link(ticket: &Ticket, hash: &Oid, action: LinkAction) -> bool {
    ticket
        .links
        .iter()
        .any(|l| &l.hash == hash && l.action == action && !l.is_delete)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(scans: Vec<(TicketId, LinkAction)>) -> Vec<(u64, LinkAction)> {
        scans.into_iter().map(|(id, a)| (id.get(), a)).collect()
    }

    #[test]
    fn scan_finds_mentions_and_closures() {
        let scanner = LinkScanner::new();
        let message = "Refine retry loop\n\nSee #12 for background.\nFixes #7";
        assert_eq!(
            ids(scanner.scan(message)),
            vec![(7, LinkAction::Close), (12, LinkAction::Commit)]
        );
    }

    #[test]
    fn close_outranks_mention_of_same_ticket() {
        let scanner = LinkScanner::new();
        let message = "Closes #7\n\nReverts part of #7.";
        assert_eq!(ids(scanner.scan(message)), vec![(7, LinkAction::Close)]);
    }

    #[test]
    fn close_keyword_variants() {
        let scanner = LinkScanner::new();
        assert_eq!(
            ids(scanner.scan("fixes #3")),
            vec![(3, LinkAction::Close)]
        );
        assert_eq!(
            ids(scanner.scan("FIXES-#3")),
            vec![(3, LinkAction::Close)]
        );
        assert_eq!(
            ids(scanner.scan("closes 3")),
            vec![(3, LinkAction::Close)]
        );
    }

    #[test]
    fn zero_and_plain_text_are_ignored() {
        let scanner = LinkScanner::new();
        assert!(scanner.scan("no references here").is_empty());
        assert!(scanner.scan("ticket #0 is not a ticket").is_empty());
    }
}
