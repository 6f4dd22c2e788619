use itertools::Itertools;
use std::{
    ffi::{OsStr, OsString},
    io::Read,
    process::{Command, Stdio},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};
use wait_timeout::ChildExt;


#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("Failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` ran into a timeout after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Captured result of an external tool
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// A single invocation of an external tool
///
/// With `verbose` set, the literal command line is logged at info level before it runs.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: OsString,
    args: Vec<OsString>,
    verbose: bool,
}

impl ExternalCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            verbose: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .join(" ")
    }

    fn announce(&self) {
        if self.verbose {
            info!("{}", self.command_line());
        } else {
            debug!(command = %self.command_line(), "Running external command");
        }
    }

    /// run to completion, blocking without a deadline
    pub fn run(&self) -> Result<CommandOutput, CommandError> {
        self.announce();

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: self.command_line(),
                source,
            })?;

        let output = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(status = ?output.code, "External command finished");

        Ok(output)
    }

    /// run with a deadline, the child is killed once `timeout` passes
    pub fn run_with_timeout(&self, timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.announce();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: self.command_line(),
                source,
            })?;

        let wait_error = |source| CommandError::Wait {
            command: self.command_line(),
            source,
        };

        let status = match child.wait_timeout(timeout).map_err(wait_error)? {
            Some(status) => status,
            None => {
                // child hasn't exited yet
                child.kill().map_err(wait_error)?;
                child.wait().map_err(wait_error)?;

                return Err(CommandError::Timeout {
                    command: self.command_line(),
                    timeout,
                });
            }
        };

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout).map_err(wait_error)?;
        }
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).map_err(wait_error)?;
        }

        debug!(status = ?status.code(), "External command finished");

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }
}
