//! Command execution under the caller's identity.
//!
//! The command line is split with [`words::split`] (no shell is involved),
//! then the program is spawned with the caller's uid and gid and an
//! environment whose `HOME`, `USER` and `LOGNAME` describe the caller. Its
//! stdout and stderr are collected together in arrival order.

pub mod words;

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use futures::StreamExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::gateway::identity::ResolvedIdentity;
use crate::gateway::proto::CommandResponse;

pub use words::TokenizeError;

/// Exit code reported when the command line cannot be run at all.
pub const REJECTED_EXIT_CODE: i32 = 255;

/// Exit code reported when the process could not be started, or ended by a
/// signal.
pub const NO_EXIT_CODE: i32 = -1;

/// Runs command lines for resolved identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    /// Run `command` as `identity` and wait for it to finish.
    ///
    /// Failures of the command itself are reported in the response:
    ///
    /// - an empty or unparsable command line gives exit code 255 and the
    ///   reason in `stderr`, and nothing is spawned;
    /// - a program that cannot be started gives exit code -1 and the spawn
    ///   error in `stderr`;
    /// - otherwise `stdout` holds the combined output and `stderr` is empty
    ///   on success or describes the exit status.
    pub async fn run(&self, identity: &ResolvedIdentity, command: &str) -> CommandResponse {
        let env = identity.environment();
        let args = match words::split(command, |name| env.lookup(name)) {
            Ok(args) => args,
            Err(e) => return rejected(e.to_string()),
        };
        let Some((program, rest)) = args.split_first() else {
            return rejected("command is empty".to_string());
        };
        debug!(
            "Running {:?} as {} (uid={}, gid={})",
            args, identity.username, identity.uid, identity.gid
        );

        let mut child = match Command::new(program)
            .args(rest)
            .env_clear()
            .envs(env.child_vars())
            .uid(identity.uid)
            .gid(identity.gid)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to start {}: {}", program, e);
                return not_started(e.to_string());
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return not_started("child output pipes unavailable".to_string());
        };
        let mut output = Vec::new();
        let mut merged = futures::stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr));
        while let Some(chunk) = merged.next().await {
            match chunk {
                Ok(bytes) => output.extend_from_slice(&bytes),
                Err(e) => {
                    warn!("Error reading output of {}: {}", program, e);
                    break;
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => return not_started(e.to_string()),
        };
        debug!("{} finished with {}", program, status);

        CommandResponse {
            exit_code: status.code().unwrap_or(NO_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output).into_owned(),
            stderr: describe_failure(status),
        }
    }
}

fn rejected(reason: String) -> CommandResponse {
    CommandResponse {
        exit_code: REJECTED_EXIT_CODE,
        stdout: String::new(),
        stderr: reason,
    }
}

fn not_started(reason: String) -> CommandResponse {
    CommandResponse {
        exit_code: NO_EXIT_CODE,
        stdout: String::new(),
        stderr: reason,
    }
}

/// Empty for a clean exit, else `exit status N` or `signal: N`.
fn describe_failure(status: ExitStatus) -> String {
    if status.success() {
        return String::new();
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {code}"),
        (None, Some(signal)) => format!("signal: {signal}"),
        (None, None) => status.to_string(),
    }
}
