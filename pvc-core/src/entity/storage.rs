//! OSD / Pool / Volume / Snapshot entities. The internal Ceph
//! invariants of these are external; the core only requires the shared
//! view matches what the Storage Executor reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OsdStats {
    pub up: bool,
    #[serde(rename = "in")]
    pub in_cluster: bool,
    pub weight: f64,
    pub reweight: f64,
    pub pgs: u32,
    pub kb: u64,
    pub utilization: f64,
    pub var: f64,
    pub used: u64,
    pub avail: u64,
    pub wr_ops: u64,
    pub wr_data: u64,
    pub rd_ops: u64,
    pub rd_data: u64,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Osd {
    pub id: u32,
    pub node: String,
    pub data_device: String,
    pub db_device: Option<String>,
    pub vg_name: Option<String>,
    pub lv_name: Option<String>,
    pub split_count: Option<u32>,
    pub stats: OsdStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PoolStats {
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub num_objects: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pool {
    pub name: String,
    pub pgs: u32,
    pub tier: String,
    pub replication: String,
    pub stats: PoolStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct VolumeStats {
    pub format: String,
    pub features: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Volume {
    pub pool: String,
    pub name: String,
    pub size_bytes: u64,
    pub stats: VolumeStats,
}

/// A storage-layer (RBD) snapshot of a volume, distinct from a VM-level
/// [`crate::entity::domain::DomainSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StorageSnapshot {
    pub pool: String,
    pub volume: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}
