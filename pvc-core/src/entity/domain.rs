//! Domain (VM) entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::placement::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DomainRunState {
    Start,
    Stop,
    Shutdown,
    Restart,
    Disable,
    Migrate,
    Unmigrate,
    Provision,
    Import,
    Restore,
    Mirror,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMethod {
    Live,
    Shutdown,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tag {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub protected: bool,
}

/// A point-in-time VM snapshot (libvirt XML + the RBD snapshot names it
/// depends on), nested under the owning domain — distinct from the
/// top-level storage [`crate::entity::storage::StorageSnapshot`] entity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DomainSnapshot {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub xml: String,
    pub rbd_snapshots: Vec<String>,
}

/// A virtual machine, identified by UUID. `node` and `last_node` carry
/// migration lineage: `last_node` is
/// non-empty iff a `migrate` lineage is currently held open.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Domain {
    pub uuid: String,
    pub name: String,
    pub xml: String,
    pub state: DomainRunState,
    pub node: String,
    pub last_node: Option<String>,
    pub failed_reason: Option<String>,
    pub node_limit: Vec<String>,
    pub node_selector: Selector,
    pub node_autostart: bool,
    pub migration_method: MigrationMethod,
    pub migration_max_downtime_ms: u64,
    pub profile: String,
    pub tags: Vec<Tag>,
    pub snapshots: Vec<DomainSnapshot>,
}

impl Domain {
    /// Invariant 2: non-empty `node_limit` must contain `node`.
    pub fn respects_node_limit(&self) -> bool {
        self.node_limit.is_empty() || self.node_limit.iter().any(|n| n == &self.node)
    }

    /// Invariant 4 precondition: `unmigrate` is well-defined only when
    /// lineage is held.
    pub fn has_migration_lineage(&self) -> bool {
        self.last_node.is_some()
    }
}

/// Open question (a): picks which of a VM's disk volumes get renamed
/// alongside the VM itself, and what each becomes. Preserves the
/// ambiguous source behavior exactly as observed rather than inventing a
/// cleaner rule: a volume is renamed only if its name contains the old
/// VM name as a substring, and only the first occurrence of that
/// substring is replaced. A volume that happens not to reference the old
/// VM name at all is left untouched even though it still belongs to the
/// VM — this is the documented surprising edge case, not a bug.
pub fn volume_renames_for_vm(old_vm_name: &str, new_vm_name: &str, volume_names: &[String]) -> Vec<(String, String)> {
    if old_vm_name.is_empty() {
        return Vec::new();
    }
    volume_names
        .iter()
        .filter_map(|name| {
            let idx = name.find(old_vm_name)?;
            let mut renamed = String::with_capacity(name.len() - old_vm_name.len() + new_vm_name.len());
            renamed.push_str(&name[..idx]);
            renamed.push_str(new_vm_name);
            renamed.push_str(&name[idx + old_vm_name.len()..]);
            Some((name.clone(), renamed))
        })
        .collect()
}

#[cfg(test)]
mod rename_tests {
    use super::volume_renames_for_vm;

    #[test]
    fn renames_only_volumes_containing_old_name() {
        let volumes = vec!["vm1_disk0".to_string(), "vm1_disk1".to_string(), "scratch".to_string()];
        let renames = volume_renames_for_vm("vm1", "vm2", &volumes);
        assert_eq!(
            renames,
            vec![
                ("vm1_disk0".to_string(), "vm2_disk0".to_string()),
                ("vm1_disk1".to_string(), "vm2_disk1".to_string()),
            ]
        );
    }

    #[test]
    fn unrelated_volume_name_is_left_untouched() {
        let volumes = vec!["scratch".to_string()];
        assert!(volume_renames_for_vm("vm1", "vm2", &volumes).is_empty());
    }

    #[test]
    fn only_the_first_occurrence_is_replaced() {
        let volumes = vec!["vm1-vm1-data".to_string()];
        let renames = volume_renames_for_vm("vm1", "db", &volumes);
        assert_eq!(renames, vec![("vm1-vm1-data".to_string(), "db-vm1-data".to_string())]);
    }
}
