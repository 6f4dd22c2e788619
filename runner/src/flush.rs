use crate::command::{CommandError, ExternalCommand};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::debug;


/// location reported for a dataset while it is being written to the shared store
pub const FLUSHING_LOCATION: &str = "SYNC_FLUSHING";

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("Failed to query the flush state")]
    Command(#[from] CommandError),
    #[error("Name of dataset {0} not found")]
    NameNotFound(DatasetId),
    #[error("Invalid dataset id `{0}`")]
    InvalidId(String),
    #[error("Failed to update current marker to {0}")]
    SetCurrent(String),
}

/// Identifier of a dataset, later datasets have larger ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = FlushError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .trim()
            .parse()
            .map(DatasetId)
            .map_err(|_| FlushError::InvalidId(input.to_string()))
    }
}

/// Where the latest dataset currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationTag {
    /// being written to the shared store
    Flushing,
    Other(String),
}

impl LocationTag {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "" => None,
            FLUSHING_LOCATION => Some(Self::Flushing),
            other => Some(Self::Other(other.to_string())),
        }
    }
}

impl fmt::Display for LocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flushing => f.write_str(FLUSHING_LOCATION),
            Self::Other(location) => f.write_str(location),
        }
    }
}

/// Latest checkpointing activity as seen by the watchdog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub latest: Option<DatasetId>,
    pub location: Option<LocationTag>,
}

impl Sample {
    pub fn is_flushing(&self) -> bool {
        matches!(self.location, Some(LocationTag::Flushing))
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.latest, &self.location) {
            (Some(id), Some(location)) => write!(f, "{id}@{location}"),
            (Some(id), None) => write!(f, "{id}"),
            _ => f.write_str("<none>"),
        }
    }
}

/// Persisted flush records of the datasets below a shared store prefix
pub trait FlushState {
    /// output sets in ascending order
    fn output_dataset_ids(&self) -> Result<Vec<DatasetId>, FlushError>;
    fn needs_flush(&self, id: DatasetId) -> Result<bool, FlushError>;
    fn dataset_name(&self, id: DatasetId) -> Result<String, FlushError>;
    /// checkpoints strictly before `before` (all if `None`), most recent first
    fn checkpoint_dataset_ids(
        &self,
        before: Option<DatasetId>,
    ) -> Result<Vec<DatasetId>, FlushError>;
    fn latest_sample(&self) -> Result<Sample, FlushError>;
}

/// Index of the datasets in the shared store
pub trait DatasetIndex {
    /// verify the dataset in the shared store is complete
    fn build(&self, id: DatasetId) -> Result<bool, FlushError>;
    /// point restart tooling at `name`
    fn set_current(&self, name: &str) -> Result<(), FlushError>;
}

/// parse a list of ids separated by newlines, commas or whitespace
pub fn parse_ids(input: &str) -> Result<Vec<DatasetId>, FlushError> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::parse)
        .collect()
}

/// path below the prefix where a recovered dataset is materialized
pub fn dataset_dir(prefix: &Path, id: DatasetId) -> PathBuf {
    prefix.join(".scr").join(format!("scr.dataset.{id}"))
}

/// `FlushState` backed by the `scr_flush_file` tool
#[derive(Debug, Clone)]
pub struct FlushFile {
    tool: PathBuf,
    prefix: PathBuf,
    verbose: bool,
}

impl FlushFile {
    pub fn new(bindir: &Path, prefix: &Path, verbose: bool) -> Self {
        Self {
            tool: bindir.join("scr_flush_file"),
            prefix: prefix.to_path_buf(),
            verbose,
        }
    }

    fn command(&self) -> ExternalCommand {
        ExternalCommand::new(&self.tool)
            .arg("--dir")
            .arg(&self.prefix)
            .verbose(self.verbose)
    }
}

impl FlushState for FlushFile {
    fn output_dataset_ids(&self) -> Result<Vec<DatasetId>, FlushError> {
        let output = self.command().arg("--list-output").run()?;

        if !output.success {
            debug!("scr_flush_file reported no output sets");
            return Ok(Vec::new());
        }

        let mut ids = parse_ids(&output.stdout)?;
        ids.sort_unstable();

        Ok(ids)
    }

    fn needs_flush(&self, id: DatasetId) -> Result<bool, FlushError> {
        Ok(self
            .command()
            .arg("--need-flush")
            .arg(id.to_string())
            .run()?
            .success)
    }

    fn dataset_name(&self, id: DatasetId) -> Result<String, FlushError> {
        let output = self.command().arg("--name").arg(id.to_string()).run()?;

        match output.stdout_trimmed() {
            name if output.success && !name.is_empty() => Ok(name.to_string()),
            _ => Err(FlushError::NameNotFound(id)),
        }
    }

    fn checkpoint_dataset_ids(
        &self,
        before: Option<DatasetId>,
    ) -> Result<Vec<DatasetId>, FlushError> {
        let mut command = self.command().arg("--list-ckpt");

        if let Some(before) = before {
            command = command.arg("--before").arg(before.to_string());
        }

        let output = command.run()?;

        if !output.success {
            debug!("scr_flush_file reported no checkpoints");
            return Ok(Vec::new());
        }

        let mut ids = parse_ids(&output.stdout)?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        Ok(ids)
    }

    fn latest_sample(&self) -> Result<Sample, FlushError> {
        let output = self.command().arg("-l").run()?;
        let latest = match output.stdout_trimmed().split_whitespace().next() {
            Some(token) if output.success => Some(token.parse::<DatasetId>()?),
            _ => None,
        };

        let location = match latest {
            Some(id) => {
                let output = self.command().arg("-L").arg(id.to_string()).run()?;

                if output.success {
                    LocationTag::parse(&output.stdout)
                } else {
                    None
                }
            }
            None => None,
        };

        Ok(Sample { latest, location })
    }
}

/// `DatasetIndex` backed by the `scr_index` tool
#[derive(Debug, Clone)]
pub struct ScrIndex {
    tool: PathBuf,
    prefix: PathBuf,
    verbose: bool,
}

impl ScrIndex {
    pub fn new(bindir: &Path, prefix: &Path, verbose: bool) -> Self {
        Self {
            tool: bindir.join("scr_index"),
            prefix: prefix.to_path_buf(),
            verbose,
        }
    }

    fn command(&self) -> ExternalCommand {
        ExternalCommand::new(&self.tool)
            .arg("--prefix")
            .arg(&self.prefix)
            .verbose(self.verbose)
    }
}

impl DatasetIndex for ScrIndex {
    fn build(&self, id: DatasetId) -> Result<bool, FlushError> {
        Ok(self
            .command()
            .arg("--build")
            .arg(id.to_string())
            .run()?
            .success)
    }

    fn set_current(&self, name: &str) -> Result<(), FlushError> {
        if self.command().arg("--current").arg(name).run()?.success {
            Ok(())
        } else {
            Err(FlushError::SetCurrent(name.to_string()))
        }
    }
}
