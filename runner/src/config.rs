use crate::{
    nodeset::{NodeSet, NodeSetError},
    resmgr::ResourceManager,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};


/// directory holding scr_flush_file, scr_index, scr_scavenge and scr_check_node
pub static DEFAULT_BINDIR: Lazy<PathBuf> = Lazy::new(|| PathBuf::from("/usr/local/libexec/scr"));

pub static DEFAULT_CONTROL_BASE: Lazy<PathBuf> = Lazy::new(|| PathBuf::from("/dev/shm"));

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}: {source}")]
    FileNotReadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config file is not valid YAML")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("{key} must be {expected}, got `{value}`")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("Resource manager not supported")]
    UnsupportedResourceManager(String),
    #[error("Invalid node list")]
    InvalidNodeSet(#[from] NodeSetError),
    #[error("Necessary settings not set: SCR_WATCHDOG_TIMEOUT and SCR_WATCHDOG_TIMEOUT_PFS")]
    MissingTimeouts,
    #[error("Shared store prefix could not be resolved")]
    MissingPrefix,
    #[error("Could not identify the node set of the job")]
    MissingNodeSet,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ScrConfig {
    // master switch, SCR_ENABLE=0 turns every tool into a no-op
    pub enabled: bool,
    // shared store prefix, falls back to the current working directory
    pub prefix: Option<PathBuf>,
    // node set of the job allocation, asked from the resource manager if unset
    pub nodelist: Option<NodeSet>,
    // name of the resource manager adapter, detected from the job environment if unset
    pub resource_manager: Option<String>,
    pub control_base: PathBuf,
    pub bindir: PathBuf,
    // nodes which must never be used to scavenge from
    pub exclude_nodes: NodeSet,
    // seconds between watchdog polls under normal circumstances
    pub watchdog_timeout: Option<u64>,
    // seconds between watchdog polls while flushing to the shared store
    pub watchdog_timeout_pfs: Option<u64>,
    pub use_containers: bool,
    // seconds to wait for a ping reply before a node is considered unreachable
    pub ping_timeout: u64,
    pub check_capacity: bool,
    pub user: Option<String>,
    pub job_id: Option<String>,
}

impl Default for ScrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: None,
            nodelist: None,
            resource_manager: None,
            control_base: DEFAULT_CONTROL_BASE.clone(),
            bindir: DEFAULT_BINDIR.clone(),
            exclude_nodes: NodeSet::new(),
            watchdog_timeout: None,
            watchdog_timeout_pfs: None,
            use_containers: true,
            ping_timeout: 2,
            check_capacity: true,
            user: None,
            job_id: None,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigErrors> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Ok(true),
        "0" | "false" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(ConfigErrors::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a boolean (0/1, true/false, enabled/disabled)",
        }),
    }
}

/// the master switch only turns off on an explicit "off" value, anything else keeps SCR enabled
fn is_switched_off(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off" | "disabled"
    )
}

fn parse_positive_seconds(key: &'static str, value: &str) -> Result<u64, ConfigErrors> {
    match parse_seconds(key, value)? {
        0 => Err(ConfigErrors::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a positive number of seconds",
        }),
        seconds => Ok(seconds),
    }
}

fn parse_seconds(key: &'static str, value: &str) -> Result<u64, ConfigErrors> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigErrors::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a number of seconds",
        })
}

impl ScrConfig {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::FileNotReadable {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    /// load the config file (explicit path or SCR_CONF_FILE), then apply the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let lookup = |key: &str| env::var(key).ok();
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| lookup("SCR_CONF_FILE").map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!(path = ?path, "Loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.overlay(lookup)?;

        Ok(config)
    }

    /// apply environment style key/value settings on top of the current values
    pub fn overlay<F>(&mut self, lookup: F) -> Result<(), ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SCR_ENABLE") {
            self.enabled = !is_switched_off(&value);
        }
        if let Some(value) = lookup("SCR_PREFIX").filter(|value| !value.is_empty()) {
            self.prefix = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("SCR_NODELIST").filter(|value| !value.is_empty()) {
            self.nodelist = Some(value.parse()?);
        }
        if let Some(value) = lookup("SCR_RESOURCE_MANAGER") {
            self.resource_manager = Some(value.to_lowercase());
        }
        if let Some(value) = lookup("SCR_CNTL_BASE") {
            self.control_base = PathBuf::from(value);
        }
        if let Some(value) = lookup("SCR_BINDIR") {
            self.bindir = PathBuf::from(value);
        }
        if let Some(value) = lookup("SCR_EXCLUDE_NODES") {
            self.exclude_nodes = value.parse()?;
        }
        if let Some(value) = lookup("SCR_WATCHDOG_TIMEOUT") {
            self.watchdog_timeout = Some(parse_seconds("SCR_WATCHDOG_TIMEOUT", &value)?);
        }
        if let Some(value) = lookup("SCR_WATCHDOG_TIMEOUT_PFS") {
            self.watchdog_timeout_pfs = Some(parse_seconds("SCR_WATCHDOG_TIMEOUT_PFS", &value)?);
        }
        if let Some(value) = lookup("SCR_USE_CONTAINERS") {
            self.use_containers = parse_bool("SCR_USE_CONTAINERS", &value)?;
        }
        if let Some(value) = lookup("SCR_PING_TIMEOUT") {
            self.ping_timeout = parse_positive_seconds("SCR_PING_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("SCR_CHECK_CAPACITY") {
            self.check_capacity = parse_bool("SCR_CHECK_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("USER") {
            self.user.get_or_insert(value);
        }

        // detect the scheduler from its job environment
        if let Some(job_id) = lookup("SLURM_JOBID") {
            self.resource_manager.get_or_insert_with(|| "slurm".into());
            self.job_id.get_or_insert(job_id);
        } else if let Some(job_id) = lookup("PBS_JOBID") {
            self.resource_manager.get_or_insert_with(|| "pbsalps".into());
            self.job_id.get_or_insert(job_id);
        }

        Ok(())
    }

    pub fn resource_manager_name(&self) -> &str {
        self.resource_manager.as_deref().unwrap_or("local")
    }

    /// both watchdog timeouts, there are deliberately no defaults
    pub fn watchdog_timeouts(&self) -> Result<(Duration, Duration), ConfigErrors> {
        match (self.watchdog_timeout, self.watchdog_timeout_pfs) {
            (Some(0), _) => Err(ConfigErrors::InvalidValue {
                key: "SCR_WATCHDOG_TIMEOUT",
                value: "0".into(),
                expected: "a positive number of seconds",
            }),
            (_, Some(0)) => Err(ConfigErrors::InvalidValue {
                key: "SCR_WATCHDOG_TIMEOUT_PFS",
                value: "0".into(),
                expected: "a positive number of seconds",
            }),
            (Some(normal), Some(pfs)) => {
                Ok((Duration::from_secs(normal), Duration::from_secs(pfs)))
            }
            _ => Err(ConfigErrors::MissingTimeouts),
        }
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    /// explicit override first, then the configured prefix, then the working directory
    pub fn resolve_prefix(&self, explicit: Option<&Path>) -> Result<PathBuf, ConfigErrors> {
        let prefix = match explicit.or(self.prefix.as_deref()) {
            Some(prefix) => prefix.to_path_buf(),
            None => env::current_dir().map_err(|_| ConfigErrors::MissingPrefix)?,
        };

        if prefix.as_os_str().is_empty() {
            Err(ConfigErrors::MissingPrefix)
        } else {
            Ok(prefix)
        }
    }

    /// node set of the job, asked from the resource manager once and cached afterwards
    pub fn resolve_nodelist(
        &mut self,
        resource_manager: &dyn ResourceManager,
    ) -> Result<NodeSet, ConfigErrors> {
        if let Some(nodes) = self.nodelist.as_ref().filter(|nodes| !nodes.is_empty()) {
            return Ok(nodes.clone());
        }

        match resource_manager.job_nodes() {
            Ok(Some(nodes)) if !nodes.is_empty() => {
                debug!(nodes = %nodes, "Caching node set reported by {}", resource_manager.name());
                self.nodelist = Some(nodes.clone());

                Ok(nodes)
            }
            Ok(_) => Err(ConfigErrors::MissingNodeSet),
            Err(error) => {
                error!("Failed to ask {} for the job nodes: {error}", resource_manager.name());

                Err(ConfigErrors::MissingNodeSet)
            }
        }
    }

    pub fn current_user(&self) -> String {
        self.user.clone().unwrap_or_else(|| {
            nix::unistd::User::from_uid(nix::unistd::getuid())
                .ok()
                .flatten()
                .map(|user| user.name)
                .unwrap_or_else(|| nix::unistd::getuid().to_string())
        })
    }

    /// node-local control directory, `<control_base>/<user>/scr.<job_id>`
    pub fn control_dir(&self, job_id: Option<&str>) -> PathBuf {
        let mut dir = self.control_base.join(self.current_user());

        if let Some(job_id) = job_id.or(self.job_id.as_deref()) {
            dir.push(format!("scr.{job_id}"));
        }

        dir
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.bindir.join(name)
    }

    /// log every problem found in the configuration and report if any was found
    pub fn preflight_checks(&self) -> bool {
        // report every problem, not just the first
        let mut contains_error = false;

        if !self.bindir.is_dir() {
            error!(
                "SCR_BINDIR {} is not a directory, the SCR tools can't be found",
                self.bindir.to_string_lossy()
            );
            contains_error = true;
        } else {
            let check_node = self.check_capacity.then_some("scr_check_node");

            for tool in ["scr_flush_file", "scr_index", "scr_scavenge"].into_iter().chain(check_node) {
                if !self.tool(tool).is_file() {
                    error!("Failed to find {tool} in {}", self.bindir.to_string_lossy());
                    contains_error = true;
                }
            }
        }

        if let Some(prefix) = &self.prefix {
            if !prefix.is_dir() {
                error!(
                    "SCR_PREFIX {} is not a directory",
                    prefix.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if let (Some(normal), Some(pfs)) = (self.watchdog_timeout, self.watchdog_timeout_pfs) {
            if pfs < normal {
                warn!("SCR_WATCHDOG_TIMEOUT_PFS ({pfs}s) is shorter than SCR_WATCHDOG_TIMEOUT ({normal}s), flushes might be mistaken for hangs");
            }
        }

        if self.ping_timeout == 0 {
            error!("SCR_PING_TIMEOUT must be at least one second");
            contains_error = true;
        }

        contains_error
    }
}
