//! receive
//!
//! The push-reception pipeline.
//!
//! A push arrives as a set of [`command::ReceiveCommand`]s. The
//! [`ReceivePack`] orchestrator drives them through a fixed lifecycle:
//!
//! 1. **pre-receive** - [`validator`] screens the batch (policy,
//!    identity, per-ref guards), then pre-receive [`hooks`] may reject
//! 2. **execute** - patchset commands are separated from standard ref
//!    commands, [`prepare`] builds the patchset command using
//!    [`classify`], and [`executor`] applies everything atomically
//! 3. **post-process** - [`links`] scans merged/referenced tickets on
//!    standard branches, the ticket store is updated, post-receive
//!    [`hooks`] run, and queued notifications flush
//!
//! Rejection is data on the command plus a human-readable sideband
//! message; the pipeline never throws for policy.

pub mod classify;
pub mod command;
pub mod executor;
pub mod hooks;
pub mod links;
pub mod merge;
pub mod prepare;
pub mod validator;

mod pack;

pub use classify::Classifier;
pub use command::{CommandKind, CommandResult, PatchsetCommand, ReceiveCommand};
pub use hooks::{HookContext, HookDispatcher, HookError, ReceiveHook};
pub use merge::{MergeEngine, MergeStatus};
pub use pack::{MessageSink, ReceivePack, ReceiveSummary, VecSink};
