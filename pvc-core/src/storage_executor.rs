//! Storage Executor: the narrow interface the core consumes
//! for Ceph OSD/pool/volume/snapshot imperative operations. `pvc-noded`
//! supplies a shell-out implementation against `ceph`/`rbd`/`ceph-volume`;
//! tests supply a fake. Every mutating call returns `(ok, message)` plus
//! an updated stats blob that the *caller* (the task worker) writes back
//! into coordination state — the executor itself never touches the
//! coordination client.

use async_trait::async_trait;

use crate::entity::storage::{Osd, OsdStats, Pool, PoolStats, StorageSnapshot, Volume, VolumeStats};
use crate::error::PvcResult;

/// Outcome of a mutating Storage Executor call: whether the underlying
/// `ceph`/`rbd` invocation succeeded and a human-readable message,
/// independent of whether the state was ultimately left truthful in
/// coordination state by the caller.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub ok: bool,
    pub message: String,
}

impl ExecResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

#[async_trait]
pub trait StorageExecutor: Send + Sync {
    async fn list_osds(&self) -> PvcResult<Vec<Osd>>;
    async fn add_osd(
        &self,
        node: &str,
        data_device: &str,
        db_device: Option<&str>,
        split_count: Option<u32>,
    ) -> PvcResult<(ExecResult, Option<Osd>)>;
    async fn remove_osd(&self, osd_id: u32, force: bool) -> PvcResult<ExecResult>;
    async fn set_osd_option(&self, option: &str) -> PvcResult<ExecResult>;
    async fn unset_osd_option(&self, option: &str) -> PvcResult<ExecResult>;
    async fn osd_in(&self, osd_id: u32) -> PvcResult<ExecResult>;
    async fn osd_out(&self, osd_id: u32) -> PvcResult<ExecResult>;
    async fn osd_state(&self, osd_id: u32) -> PvcResult<OsdStats>;

    async fn list_pools(&self) -> PvcResult<Vec<Pool>>;
    async fn add_pool(&self, name: &str, pgs: u32, tier: &str, replication: &str) -> PvcResult<(ExecResult, Option<Pool>)>;
    async fn remove_pool(&self, name: &str) -> PvcResult<ExecResult>;

    async fn list_volumes(&self, pool: &str) -> PvcResult<Vec<Volume>>;
    async fn add_volume(&self, pool: &str, name: &str, size_bytes: u64) -> PvcResult<(ExecResult, Option<Volume>)>;
    async fn remove_volume(&self, pool: &str, name: &str) -> PvcResult<ExecResult>;
    async fn resize_volume(&self, pool: &str, name: &str, size_bytes: u64) -> PvcResult<(ExecResult, Option<VolumeStats>)>;
    async fn rename_volume(&self, pool: &str, name: &str, new_name: &str) -> PvcResult<ExecResult>;
    async fn clone_volume(&self, pool: &str, name: &str, new_name: &str) -> PvcResult<(ExecResult, Option<Volume>)>;

    async fn list_snapshots(&self, pool: &str, volume: &str) -> PvcResult<Vec<StorageSnapshot>>;
    async fn add_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<(ExecResult, Option<StorageSnapshot>)>;
    async fn rename_snapshot(&self, pool: &str, volume: &str, name: &str, new_name: &str) -> PvcResult<ExecResult>;
    async fn rollback_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<ExecResult>;
    async fn remove_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<ExecResult>;

    async fn get_status(&self) -> PvcResult<String>;
    async fn get_util(&self) -> PvcResult<PoolStats>;
}
