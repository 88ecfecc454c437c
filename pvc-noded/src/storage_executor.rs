//! Concrete [`StorageExecutor`] against the `ceph`/`rbd` CLIs. Each call
//! shells out, parses `--format json` where the tool supports it, and
//! folds non-zero exit into `ExecResult::failed` rather than an error —
//! executor failure is recorded with captured stderr and
//! left for the caller to write truthfully into coordination state, not
//! retried by the bus.

use async_trait::async_trait;
use pvc_core::entity::storage::{Osd, OsdStats, Pool, PoolStats, StorageSnapshot, Volume, VolumeStats};
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::storage_executor::{ExecResult, StorageExecutor};
use serde::Deserialize;
use tokio::process::Command;

pub struct CephStorageExecutor {
    node: String,
}

impl CephStorageExecutor {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    async fn run(&self, cmd: &str, args: &[&str]) -> PvcResult<(bool, String, String)> {
        let output = Command::new(cmd)
            .args(args)
            .output()
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "ceph", detail: e.to_string() })?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }

    async fn ceph_json(&self, args: &[&str]) -> PvcResult<serde_json::Value> {
        let mut full = args.to_vec();
        full.extend(["--format", "json"]);
        let (ok, stdout, stderr) = self.run("ceph", &full).await?;
        if !ok {
            return Err(PvcError::ExecutorFailure { executor: "ceph", detail: stderr });
        }
        serde_json::from_str(&stdout).map_err(|e| PvcError::ExecutorFailure {
            executor: "ceph",
            detail: format!("malformed json: {e}"),
        })
    }
}

#[derive(Deserialize)]
struct CephOsdDumpEntry {
    osd: u32,
    up: u8,
    #[serde(rename = "in")]
    in_cluster: u8,
    weight: f64,
    reweight: f64,
    state: Vec<String>,
}

#[async_trait]
impl StorageExecutor for CephStorageExecutor {
    async fn list_osds(&self) -> PvcResult<Vec<Osd>> {
        let doc = self.ceph_json(&["osd", "dump"]).await?;
        let entries: Vec<CephOsdDumpEntry> =
            serde_json::from_value(doc.get("osds").cloned().unwrap_or_default()).unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|e| Osd {
                id: e.osd,
                node: self.node.clone(),
                data_device: String::new(),
                db_device: None,
                vg_name: None,
                lv_name: None,
                split_count: None,
                stats: OsdStats {
                    up: e.up != 0,
                    in_cluster: e.in_cluster != 0,
                    weight: e.weight,
                    reweight: e.reweight,
                    state: e.state.join(","),
                    ..Default::default()
                },
            })
            .collect())
    }

    async fn add_osd(
        &self,
        node: &str,
        data_device: &str,
        db_device: Option<&str>,
        split_count: Option<u32>,
    ) -> PvcResult<(ExecResult, Option<Osd>)> {
        let mut args = vec!["lvm", "create", "--data", data_device];
        if let Some(db) = db_device {
            args.extend(["--db-devices", db]);
        }
        let count_str = split_count.map(|c| c.to_string());
        if let Some(ref c) = count_str {
            args.extend(["--osds-per-device", c.as_str()]);
        }
        let (ok, stdout, stderr) = self.run("ceph-volume", &args).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let osd = Osd {
            id: 0,
            node: node.to_string(),
            data_device: data_device.to_string(),
            db_device: db_device.map(str::to_string),
            vg_name: None,
            lv_name: None,
            split_count,
            stats: OsdStats::default(),
        };
        Ok((ExecResult::ok(stdout), Some(osd)))
    }

    async fn remove_osd(&self, osd_id: u32, force: bool) -> PvcResult<ExecResult> {
        let id = osd_id.to_string();
        if !force {
            self.run("ceph", &["osd", "safe-to-destroy", &id]).await?;
        }
        let (ok, _, stderr) = self.run("ceph", &["osd", "destroy", &id, "--yes-i-really-mean-it"]).await?;
        if !ok {
            return Ok(ExecResult::failed(stderr));
        }
        let (ok, _, stderr) = self.run("ceph", &["osd", "purge", &id, "--yes-i-really-mean-it"]).await?;
        Ok(if ok { ExecResult::ok(format!("osd.{osd_id} removed")) } else { ExecResult::failed(stderr) })
    }

    async fn set_osd_option(&self, option: &str) -> PvcResult<ExecResult> {
        let (ok, stdout, stderr) = self.run("ceph", &["osd", "set", option]).await?;
        Ok(if ok { ExecResult::ok(stdout) } else { ExecResult::failed(stderr) })
    }

    async fn unset_osd_option(&self, option: &str) -> PvcResult<ExecResult> {
        let (ok, stdout, stderr) = self.run("ceph", &["osd", "unset", option]).await?;
        Ok(if ok { ExecResult::ok(stdout) } else { ExecResult::failed(stderr) })
    }

    async fn osd_in(&self, osd_id: u32) -> PvcResult<ExecResult> {
        let id = osd_id.to_string();
        let (ok, stdout, stderr) = self.run("ceph", &["osd", "in", &id]).await?;
        Ok(if ok { ExecResult::ok(stdout) } else { ExecResult::failed(stderr) })
    }

    async fn osd_out(&self, osd_id: u32) -> PvcResult<ExecResult> {
        let id = osd_id.to_string();
        let (ok, stdout, stderr) = self.run("ceph", &["osd", "out", &id]).await?;
        Ok(if ok { ExecResult::ok(stdout) } else { ExecResult::failed(stderr) })
    }

    async fn osd_state(&self, osd_id: u32) -> PvcResult<OsdStats> {
        let doc = self.ceph_json(&["osd", "df"]).await?;
        let nodes = doc.get("nodes").and_then(|n| n.as_array()).cloned().unwrap_or_default();
        let entry = nodes.into_iter().find(|n| n.get("id").and_then(|v| v.as_u64()) == Some(osd_id as u64));
        Ok(entry
            .map(|n| OsdStats {
                kb: n.get("kb").and_then(|v| v.as_u64()).unwrap_or_default(),
                utilization: n.get("utilization").and_then(|v| v.as_f64()).unwrap_or_default(),
                var: n.get("var").and_then(|v| v.as_f64()).unwrap_or_default(),
                pgs: n.get("pgs").and_then(|v| v.as_u64()).unwrap_or_default() as u32,
                ..Default::default()
            })
            .unwrap_or_default())
    }

    async fn list_pools(&self) -> PvcResult<Vec<Pool>> {
        let doc = self.ceph_json(&["osd", "pool", "ls", "detail"]).await?;
        Ok(doc
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|p| Pool {
                name: p.get("pool_name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                pgs: p.get("pg_num").and_then(|v| v.as_u64()).unwrap_or_default() as u32,
                tier: String::new(),
                replication: p.get("size").and_then(|v| v.as_u64()).map(|s| s.to_string()).unwrap_or_default(),
                stats: PoolStats::default(),
            })
            .collect())
    }

    async fn add_pool(&self, name: &str, pgs: u32, _tier: &str, replication: &str) -> PvcResult<(ExecResult, Option<Pool>)> {
        let pgs_str = pgs.to_string();
        let (ok, _, stderr) = self.run("ceph", &["osd", "pool", "create", name, &pgs_str]).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let (ok, _, stderr) = self.run("ceph", &["osd", "pool", "set", name, "size", replication]).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let pool = Pool { name: name.to_string(), pgs, tier: String::new(), replication: replication.to_string(), stats: PoolStats::default() };
        Ok((ExecResult::ok(format!("pool {name} created")), Some(pool)))
    }

    async fn remove_pool(&self, name: &str) -> PvcResult<ExecResult> {
        let (ok, _, stderr) = self
            .run("ceph", &["osd", "pool", "delete", name, name, "--yes-i-really-really-mean-it"])
            .await?;
        Ok(if ok { ExecResult::ok(format!("pool {name} removed")) } else { ExecResult::failed(stderr) })
    }

    async fn list_volumes(&self, pool: &str) -> PvcResult<Vec<Volume>> {
        let doc = self.run("rbd", &["ls", "-l", "--pool", pool, "--format", "json"]).await?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&doc.1).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .map(|v| Volume {
                pool: pool.to_string(),
                name: v.get("image").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                size_bytes: v.get("size").and_then(|x| x.as_u64()).unwrap_or_default(),
                stats: VolumeStats {
                    format: v.get("format").and_then(|x| x.as_u64()).map(|f| f.to_string()).unwrap_or_default(),
                    ..Default::default()
                },
            })
            .collect())
    }

    async fn add_volume(&self, pool: &str, name: &str, size_bytes: u64) -> PvcResult<(ExecResult, Option<Volume>)> {
        let image = format!("{pool}/{name}");
        let size = size_bytes.to_string();
        let (ok, _, stderr) = self.run("rbd", &["create", "--size", &size, "-b", &image]).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let vol = Volume { pool: pool.to_string(), name: name.to_string(), size_bytes, stats: VolumeStats::default() };
        Ok((ExecResult::ok(format!("volume {image} created")), Some(vol)))
    }

    async fn remove_volume(&self, pool: &str, name: &str) -> PvcResult<ExecResult> {
        let image = format!("{pool}/{name}");
        let (ok, _, stderr) = self.run("rbd", &["rm", &image]).await?;
        Ok(if ok { ExecResult::ok(format!("volume {image} removed")) } else { ExecResult::failed(stderr) })
    }

    async fn resize_volume(&self, pool: &str, name: &str, size_bytes: u64) -> PvcResult<(ExecResult, Option<VolumeStats>)> {
        let image = format!("{pool}/{name}");
        let size = size_bytes.to_string();
        let (ok, _, stderr) = self.run("rbd", &["resize", "--size", &size, &image]).await?;
        Ok(if ok { (ExecResult::ok(format!("volume {image} resized")), Some(VolumeStats::default())) } else { (ExecResult::failed(stderr), None) })
    }

    async fn rename_volume(&self, pool: &str, name: &str, new_name: &str) -> PvcResult<ExecResult> {
        let from = format!("{pool}/{name}");
        let to = format!("{pool}/{new_name}");
        let (ok, _, stderr) = self.run("rbd", &["rename", &from, &to]).await?;
        Ok(if ok { ExecResult::ok(format!("volume {from} renamed to {to}")) } else { ExecResult::failed(stderr) })
    }

    async fn clone_volume(&self, pool: &str, name: &str, new_name: &str) -> PvcResult<(ExecResult, Option<Volume>)> {
        let from = format!("{pool}/{name}");
        let to = format!("{pool}/{new_name}");
        let (ok, _, stderr) = self.run("rbd", &["copy", &from, &to]).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let vol = Volume { pool: pool.to_string(), name: new_name.to_string(), size_bytes: 0, stats: VolumeStats::default() };
        Ok((ExecResult::ok(format!("volume {from} cloned to {to}")), Some(vol)))
    }

    async fn list_snapshots(&self, pool: &str, volume: &str) -> PvcResult<Vec<StorageSnapshot>> {
        let image = format!("{pool}/{volume}");
        let (_, stdout, _) = self.run("rbd", &["snap", "ls", &image, "--format", "json"]).await?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .map(|s| StorageSnapshot {
                pool: pool.to_string(),
                volume: volume.to_string(),
                name: s.get("name").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                timestamp: chrono::Utc::now(),
            })
            .collect())
    }

    async fn add_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<(ExecResult, Option<StorageSnapshot>)> {
        let image = format!("{pool}/{volume}");
        let spec = format!("{image}@{name}");
        let (ok, _, stderr) = self.run("rbd", &["snap", "create", &spec]).await?;
        if !ok {
            return Ok((ExecResult::failed(stderr), None));
        }
        let snap = StorageSnapshot { pool: pool.to_string(), volume: volume.to_string(), name: name.to_string(), timestamp: chrono::Utc::now() };
        Ok((ExecResult::ok(format!("snapshot {spec} created")), Some(snap)))
    }

    async fn rename_snapshot(&self, pool: &str, volume: &str, name: &str, new_name: &str) -> PvcResult<ExecResult> {
        let image = format!("{pool}/{volume}");
        let (ok, _, stderr) = self.run("rbd", &["snap", "rename", &format!("{image}@{name}"), &format!("{image}@{new_name}")]).await?;
        Ok(if ok { ExecResult::ok(format!("snapshot {image}@{name} renamed")) } else { ExecResult::failed(stderr) })
    }

    async fn rollback_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<ExecResult> {
        let spec = format!("{pool}/{volume}@{name}");
        let (ok, _, stderr) = self.run("rbd", &["snap", "rollback", &spec]).await?;
        Ok(if ok { ExecResult::ok(format!("rolled back to {spec}")) } else { ExecResult::failed(stderr) })
    }

    async fn remove_snapshot(&self, pool: &str, volume: &str, name: &str) -> PvcResult<ExecResult> {
        let spec = format!("{pool}/{volume}@{name}");
        let (ok, _, stderr) = self.run("rbd", &["snap", "rm", &spec]).await?;
        Ok(if ok { ExecResult::ok(format!("snapshot {spec} removed")) } else { ExecResult::failed(stderr) })
    }

    async fn get_status(&self) -> PvcResult<String> {
        let (_, stdout, _) = self.run("ceph", &["status"]).await?;
        Ok(stdout)
    }

    async fn get_util(&self) -> PvcResult<PoolStats> {
        let doc = self.ceph_json(&["df"]).await?;
        let stats = doc.get("stats").cloned().unwrap_or_default();
        Ok(PoolStats {
            used_bytes: stats.get("total_used_bytes").and_then(|v| v.as_u64()).unwrap_or_default(),
            free_bytes: stats.get("total_avail_bytes").and_then(|v| v.as_u64()).unwrap_or_default(),
            num_objects: stats.get("total_objects").and_then(|v| v.as_u64()).unwrap_or_default(),
        })
    }
}
