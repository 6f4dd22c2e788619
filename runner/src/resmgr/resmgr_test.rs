use super::{
    pbsalps::{is_down_in_xtprocadmin, parse_nid_output},
    LocalManager, ResourceManager, ResourceManagerError, ResourceManagers, SlurmManager,
};
use crate::config::{ConfigErrors, ScrConfig};
use std::process::Command;

#[test]
pub fn load_by_name() {
    let mut config = ScrConfig::default();

    config.resource_manager = Some("slurm".into());
    assert!(matches!(
        ResourceManagers::load(&config, false),
        Ok(ResourceManagers::Slurm(_))
    ));

    config.resource_manager = Some("pbsalps".into());
    assert!(matches!(
        ResourceManagers::load(&config, false),
        Ok(ResourceManagers::PbsAlps(_))
    ));

    config.resource_manager = None;
    assert!(matches!(
        ResourceManagers::load(&config, false),
        Ok(ResourceManagers::Local(_))
    ));
}

#[test]
pub fn unsupported_resource_manager() {
    let config = ScrConfig {
        resource_manager: Some("lsf".into()),
        ..ScrConfig::default()
    };

    assert!(matches!(
        ResourceManagers::load(&config, false),
        Err(ConfigErrors::UnsupportedResourceManager(name)) if name == "lsf"
    ));
}

#[test]
pub fn slurm_nodes_from_allocation() {
    let manager = SlurmManager::new(Some("12".into()), Some("cn[01-04]".into()), false);

    assert_eq!(manager.job_id().as_deref(), Some("12"));
    assert_eq!(manager.job_nodes().unwrap().map(|nodes| nodes.len()), Some(4));
    assert!(SlurmManager::new(None, None, false)
        .job_nodes()
        .unwrap()
        .is_none());
}

#[test]
pub fn nid_output_drops_aprun_summary() {
    let nodes = parse_nid_output("12\n13\n\nApplication 4711 resources: utime ~0s\n");

    assert_eq!(nodes.to_string(), "[12-13]");
}

#[test]
pub fn xtprocadmin_state_column() {
    let header = "NID    (HEX)    NODENAME     TYPE    STATUS        MODE\n";

    assert!(is_down_in_xtprocadmin(&format!(
        "{header}  12    0xc    c0-0c0s3n0  compute   down         batch\n"
    )));
    assert!(!is_down_in_xtprocadmin(&format!(
        "{header}  13    0xd    c0-0c0s3n1  compute     up         batch\n"
    )));
    assert!(!is_down_in_xtprocadmin(""));
}

#[test]
pub fn local_allocation_is_this_host() {
    let manager = LocalManager::default();
    let nodes = manager.job_nodes().unwrap().unwrap();

    assert_eq!(nodes.len(), 1);
    assert!(manager.down_nodes(&nodes).unwrap().is_empty());
}

#[test]
pub fn local_kill_rejects_non_pid_steps() {
    let manager = LocalManager::default();

    assert!(matches!(
        manager.kill_job_step("4711.0"),
        Err(ResourceManagerError::InvalidJobStep(_))
    ));
    assert!(matches!(
        manager.kill_job_step("0"),
        Err(ResourceManagerError::InvalidJobStep(_))
    ));
}

#[test]
pub fn local_kill_terminates_process() {
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();

    LocalManager::default()
        .kill_job_step(&child.id().to_string())
        .unwrap();

    let status = child.wait().unwrap();
    assert!(!status.success());
}
