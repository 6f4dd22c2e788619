use crate::{
    command::{CommandError, ExternalCommand},
    flush::DatasetId,
    nodeset::NodeSet,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScavengeError {
    #[error("Failed to run scavenge")]
    Command(#[from] CommandError),
    #[error("Scavenge of dataset {id} failed (exit code {code:?})")]
    Failed { id: DatasetId, code: Option<i32> },
}

/// Everything the transfer engine needs to copy one dataset out of the node caches
#[derive(Debug, Clone)]
pub struct ScavengeRequest<'a> {
    pub id: DatasetId,
    pub control_dir: &'a Path,
    pub prefix: &'a Path,
    pub job_nodes: &'a NodeSet,
    pub up: &'a NodeSet,
    pub down: &'a NodeSet,
}

/// Copies and repairs dataset files from node-local cache into the shared store
pub trait ScavengeEngine {
    fn scavenge(&self, request: &ScavengeRequest<'_>) -> Result<(), ScavengeError>;
}

/// `ScavengeEngine` backed by the `scr_scavenge` tool
#[derive(Debug, Clone)]
pub struct CommandScavenge {
    tool: PathBuf,
    use_containers: bool,
    verbose: bool,
}

impl CommandScavenge {
    pub fn new(bindir: &Path, use_containers: bool, verbose: bool) -> Self {
        Self {
            tool: bindir.join("scr_scavenge"),
            use_containers,
            verbose,
        }
    }

    pub fn command(&self, request: &ScavengeRequest<'_>) -> ExternalCommand {
        let mut command = ExternalCommand::new(&self.tool).verbose(self.verbose);

        if self.verbose {
            command = command.arg("--verbose");
        }

        command = command
            .arg("--id")
            .arg(request.id.to_string())
            .arg("--from")
            .arg(request.control_dir)
            .arg("--to")
            .arg(request.prefix)
            .arg("--jobset")
            .arg(request.job_nodes.to_string())
            .arg("--up")
            .arg(request.up.to_string());

        if !request.down.is_empty() {
            command = command.arg("--down").arg(request.down.to_string());
        }

        if self.use_containers {
            command = command.arg("--containers");
        }

        command
    }
}

impl ScavengeEngine for CommandScavenge {
    fn scavenge(&self, request: &ScavengeRequest<'_>) -> Result<(), ScavengeError> {
        let output = self.command(request).run()?;

        if output.success {
            Ok(())
        } else {
            Err(ScavengeError::Failed {
                id: request.id,
                code: output.code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandScavenge, ScavengeRequest};
    use crate::{flush::DatasetId, nodeset::NodeSet};
    use std::path::Path;

    #[test]
    fn scavenge_command_line() {
        let job: NodeSet = "n[1-4]".parse().unwrap();
        let down: NodeSet = "n2".parse().unwrap();
        let up = job.difference(&down);
        let request = ScavengeRequest {
            id: DatasetId(6),
            control_dir: Path::new("/dev/shm/alice/scr.99"),
            prefix: Path::new("/p/lustre"),
            job_nodes: &job,
            up: &up,
            down: &down,
        };

        assert_eq!(
            CommandScavenge::new(Path::new("/opt/scr"), true, true)
                .command(&request)
                .command_line(),
            "/opt/scr/scr_scavenge --verbose --id 6 --from /dev/shm/alice/scr.99 --to /p/lustre --jobset n[1-4] --up n[1,3-4] --down n2 --containers"
        );
    }

    #[test]
    fn scavenge_command_without_down_nodes() {
        let job: NodeSet = "n1".parse().unwrap();
        let none = NodeSet::new();
        let request = ScavengeRequest {
            id: DatasetId(1),
            control_dir: Path::new("/cntl"),
            prefix: Path::new("/p"),
            job_nodes: &job,
            up: &job,
            down: &none,
        };

        assert_eq!(
            CommandScavenge::new(Path::new("/opt/scr"), false, false)
                .command(&request)
                .command_line(),
            "/opt/scr/scr_scavenge --id 1 --from /cntl --to /p --jobset n1 --up n1"
        );
    }
}
