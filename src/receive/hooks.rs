//! receive::hooks
//!
//! Pre/post-receive extension points.
//!
//! Two hook variants satisfy one interface: compiled hooks registered
//! with the server, and user-supplied scripts run as external
//! processes. The dispatcher invokes compiled hooks first, then scripts
//! in their declared order.
//!
//! Only the pre-receive phase can prevent refs from moving: a failure
//! there halts the remaining scripts and rejects the pending commands.
//! Post-receive is best-effort; a failure halts the remaining scripts
//! in the phase but already-applied refs stay applied.
//!
//! Scripts speak the standard git hook protocol: one
//! `<old> <new> <refname>` line per command on stdin, with the push
//! context in `CAIRN_*` environment variables.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

use crate::access::{Principal, RepositoryDescriptor};
use crate::core::settings::Settings;

use super::command::ReceiveCommand;

/// Errors from hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// A hook rejected the push with a reason for the client.
    #[error("{0}")]
    Rejected(String),

    /// A script exited non-zero.
    #[error("hook script {script} failed with {status}")]
    Script { script: String, status: String },

    /// A script could not be spawned or fed.
    #[error("hook script {script} failed: {source}")]
    Io {
        script: String,
        #[source]
        source: std::io::Error,
    },
}

/// What every hook sees.
pub struct HookContext<'a> {
    pub repository: &'a RepositoryDescriptor,
    pub principal: &'a Principal,
    pub commands: &'a [ReceiveCommand],
}

/// A compiled hook registered with the server.
///
/// Both phases default to no-ops so implementations override only the
/// phase they care about.
pub trait ReceiveHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_pre_receive(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_post_receive(&self, _ctx: &HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Invokes compiled hooks and script hooks in order around the batch.
pub struct HookDispatcher {
    compiled: Vec<Box<dyn ReceiveHook>>,
    hooks_dir: Option<PathBuf>,
    pre_receive: Vec<String>,
    post_receive: Vec<String>,
}

impl HookDispatcher {
    pub fn new(compiled: Vec<Box<dyn ReceiveHook>>, settings: &Settings) -> Self {
        Self {
            compiled,
            hooks_dir: settings.hooks_dir.clone(),
            pre_receive: settings.hooks.pre_receive.clone(),
            post_receive: settings.hooks.post_receive.clone(),
        }
    }

    /// Run the pre-receive phase. The first failure aborts the
    /// remaining hooks and is returned so the caller can reject the
    /// pending commands.
    pub fn pre_receive(&self, ctx: &HookContext<'_>, git_dir: &Path) -> Result<(), HookError> {
        for hook in &self.compiled {
            debug!(hook = hook.name(), "pre-receive hook");
            hook.on_pre_receive(ctx)?;
        }
        for script in &self.pre_receive {
            self.run_script(script, ctx, git_dir)?;
        }
        Ok(())
    }

    /// Run the post-receive phase. Compiled hook failures are logged
    /// and skipped; the first script failure halts the remaining
    /// scripts. Nothing here can unapply a ref.
    pub fn post_receive(&self, ctx: &HookContext<'_>, git_dir: &Path) {
        for hook in &self.compiled {
            debug!(hook = hook.name(), "post-receive hook");
            if let Err(e) = hook.on_post_receive(ctx) {
                warn!(hook = hook.name(), error = %e, "post-receive hook failed");
            }
        }
        for script in &self.post_receive {
            if let Err(e) = self.run_script(script, ctx, git_dir) {
                warn!(script, error = %e, "post-receive script failed");
                break;
            }
        }
    }

    fn run_script(
        &self,
        script: &str,
        ctx: &HookContext<'_>,
        git_dir: &Path,
    ) -> Result<(), HookError> {
        let path = match &self.hooks_dir {
            Some(dir) => dir.join(script),
            None => PathBuf::from(script),
        };
        if !path.exists() {
            warn!(script, "hook script not found, skipping");
            return Ok(());
        }

        let mut child = Command::new(&path)
            .current_dir(git_dir)
            .env("CAIRN_REPOSITORY", &ctx.repository.name)
            .env("CAIRN_USER", &ctx.principal.username)
            .env(
                "CAIRN_USER_EMAIL",
                ctx.principal.email.as_deref().unwrap_or(""),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HookError::Io {
                script: script.to_string(),
                source: e,
            })?;

        {
            let stdin = child.stdin.as_mut().ok_or_else(|| HookError::Io {
                script: script.to_string(),
                source: std::io::Error::other("stdin not piped"),
            })?;
            for cmd in ctx.commands {
                writeln!(
                    stdin,
                    "{} {} {}",
                    cmd.old_id(),
                    cmd.new_id(),
                    cmd.ref_name()
                )
                .map_err(|e| HookError::Io {
                    script: script.to_string(),
                    source: e,
                })?;
            }
        }

        let status = child.wait().map_err(|e| HookError::Io {
            script: script.to_string(),
            source: e,
        })?;
        if !status.success() {
            return Err(HookError::Script {
                script: script.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
