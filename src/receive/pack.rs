//! receive::pack
//!
//! The push orchestrator.
//!
//! One [`ReceivePack`] handles one push end to end: validate, run
//! pre-receive hooks, prepare the patchset command, execute the batch,
//! process ticket links, run post-receive hooks, flush notifications.
//! Collaborators are injected at construction; nothing here reaches for
//! process-wide state.

use tracing::{info, warn};

use crate::access::{Principal, RepositoryDescriptor};
use crate::core::settings::Settings;
use crate::core::types::TicketId;
use crate::git::{CommitCache, Git, GitError};
use crate::tickets::{Notifier, TicketService};

use super::command::{CommandResult, PatchsetCommand, ReceiveCommand};
use super::executor::BatchExecutor;
use super::hooks::{HookContext, HookDispatcher};
use super::links::TicketLinkProcessor;
use super::prepare::PatchsetPreparer;
use super::validator::Validator;

/// Receives the human-readable protocol lines sent back to the pushing
/// client over the sideband.
pub trait MessageSink {
    fn send(&mut self, line: &str);

    /// An advisory line: what the push did.
    fn info(&mut self, line: &str) {
        self.send(line);
    }

    /// A rejection line, prefixed the way git itself reports them.
    fn error(&mut self, line: &str) {
        self.send(&format!("error: {line}"));
    }
}

/// A sink that collects lines; the transport drains them afterwards.
#[derive(Debug, Default)]
pub struct VecSink {
    lines: Vec<String>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl MessageSink for VecSink {
    fn send(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// What one push did.
#[derive(Debug)]
pub struct ReceiveSummary {
    /// Every command with its final result, in push order.
    pub commands: Vec<ReceiveCommand>,
    pub applied: usize,
    pub rejected: usize,
    /// Ticket created by this push, if any.
    pub created_ticket: Option<TicketId>,
    /// Ticket that received a new patchset, if any.
    pub updated_ticket: Option<TicketId>,
}

/// The push-reception pipeline for one repository.
pub struct ReceivePack<'a> {
    git: &'a Git,
    repository: &'a RepositoryDescriptor,
    principal: &'a Principal,
    settings: &'a Settings,
    tickets: &'a dyn TicketService,
    notifier: &'a dyn Notifier,
    hooks: &'a HookDispatcher,
    cache: &'a CommitCache,
}

impl<'a> ReceivePack<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        git: &'a Git,
        repository: &'a RepositoryDescriptor,
        principal: &'a Principal,
        settings: &'a Settings,
        tickets: &'a dyn TicketService,
        notifier: &'a dyn Notifier,
        hooks: &'a HookDispatcher,
        cache: &'a CommitCache,
    ) -> Self {
        Self {
            git,
            repository,
            principal,
            settings,
            tickets,
            notifier,
            hooks,
            cache,
        }
    }

    /// Drive one push through the full lifecycle.
    ///
    /// Policy failures land on the commands; `Err` means the repository
    /// itself failed (I/O, corrupt history) and the transport should
    /// report the push as erred without touching any command result.
    pub fn receive(
        &self,
        mut commands: Vec<ReceiveCommand>,
        sink: &mut dyn MessageSink,
    ) -> Result<ReceiveSummary, GitError> {
        Validator::new(self.git, self.repository, self.principal, self.cache)
            .pre_receive(&mut commands, sink)?;

        self.run_pre_receive_hooks(&mut commands, sink);

        let mut patchset = self.prepare_patchset(&mut commands, sink)?;

        let executor =
            BatchExecutor::new(self.git, &self.repository.name, self.principal, self.cache);
        executor.execute(&mut commands, sink)?;

        let mut created_ticket = None;
        let mut updated_ticket = None;
        if let Some(ps) = patchset.as_mut() {
            executor.execute_patchset(ps, sink)?;
            self.mirror_patchset_result(ps, &mut commands, sink);
            match ps.result() {
                CommandResult::Ok if ps.is_new_ticket() => created_ticket = Some(ps.ticket()),
                CommandResult::Ok => updated_ticket = Some(ps.ticket()),
                _ => {}
            }
        }
        if let Some(ps) = patchset {
            if ps.result() == &CommandResult::Ok {
                self.record_patchset(ps, sink);
            }
        }

        let processor = TicketLinkProcessor::new(
            self.git,
            &self.repository.name,
            self.principal,
            self.tickets,
            self.notifier,
        );
        for cmd in &commands {
            processor.process(cmd)?;
        }

        let ctx = HookContext {
            repository: self.repository,
            principal: self.principal,
            commands: &commands,
        };
        self.hooks.post_receive(&ctx, self.git.git_dir());

        self.notifier.flush();

        let applied = commands.iter().filter(|c| c.is_ok()).count();
        let rejected = commands.len() - applied;
        info!(
            repository = %self.repository.name,
            user = %self.principal.username,
            applied,
            rejected,
            "push received"
        );
        Ok(ReceiveSummary {
            commands,
            applied,
            rejected,
            created_ticket,
            updated_ticket,
        })
    }

    fn run_pre_receive_hooks(&self, commands: &mut [ReceiveCommand], sink: &mut dyn MessageSink) {
        if commands.iter().all(|c| !c.is_pending()) {
            return;
        }
        let ctx = HookContext {
            repository: self.repository,
            principal: self.principal,
            commands,
        };
        if let Err(e) = self.hooks.pre_receive(&ctx, self.git.git_dir()) {
            let reason = e.to_string();
            sink.error(&reason);
            for cmd in commands.iter_mut() {
                cmd.reject(reason.clone());
            }
        }
    }

    /// Prepare the patchset command for the push's propose/ticket ref.
    /// A push may carry at most one; later ones are rejected.
    fn prepare_patchset(
        &self,
        commands: &mut [ReceiveCommand],
        sink: &mut dyn MessageSink,
    ) -> Result<Option<PatchsetCommand>, GitError> {
        let preparer = PatchsetPreparer::new(
            self.git,
            self.repository,
            self.principal,
            self.settings,
            self.tickets,
            self.cache,
        );
        let mut patchset = None;
        for cmd in commands.iter_mut() {
            if !cmd.is_pending() || !cmd.is_patchset_ref() {
                continue;
            }
            if patchset.is_some() {
                let reason = "only one patchset may be pushed at a time".to_string();
                sink.error(&reason);
                cmd.reject(reason);
                continue;
            }
            patchset = preparer.prepare(cmd, sink)?;
        }
        Ok(patchset)
    }

    /// Copy the patchset command's result onto the originating
    /// propose/ticket ref so the client sees accept/reject per ref.
    fn mirror_patchset_result(
        &self,
        patchset: &PatchsetCommand,
        commands: &mut [ReceiveCommand],
        sink: &mut dyn MessageSink,
    ) {
        let result = patchset.result().clone();
        for cmd in commands.iter_mut() {
            if cmd.is_pending() && cmd.is_patchset_ref() {
                cmd.set_result(result.clone());
            }
        }
        if result == CommandResult::Ok {
            sink.info(&format!(
                "ticket {}: recorded patchset {}",
                patchset.ticket(),
                patchset.patchset()
            ));
        }
    }

    /// Hand the accepted patchset's change to the ticket store.
    fn record_patchset(&self, patchset: PatchsetCommand, sink: &mut dyn MessageSink) {
        let ticket = patchset.ticket();
        let is_new = patchset.is_new_ticket();
        let result = if is_new {
            self.tickets
                .create_ticket(&self.repository.name, ticket, patchset.into_change())
        } else {
            self.tickets
                .update_ticket(&self.repository.name, ticket, patchset.into_change())
        };
        match result {
            Ok(_) => {
                if is_new {
                    sink.info(&format!("created ticket {}", ticket));
                }
                self.notifier.queue(&self.repository.name, ticket);
            }
            Err(e) => {
                // the refs moved; the journal entry is what failed
                warn!(
                    repository = %self.repository.name,
                    ticket = %ticket,
                    error = %e,
                    "patchset applied but ticket store update failed"
                );
                sink.send(&format!("warning: ticket {} could not be updated", ticket));
            }
        }
    }
}
