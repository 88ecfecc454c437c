//! Periodic heartbeat/resources/health reporting. Samples the host the same way the libvirt/rbd/ipmi
//! collaborators do — by shelling out to a small, well-known CLI — rather
//! than linking a system-info crate the teacher's stack doesn't carry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pvc_core::entity::node::{HealthEntry, NodeResources};
use pvc_core::health::plugins::{DiskFreePlugin, LoadAveragePlugin, TimeSyncPlugin};
use pvc_core::health::HealthPlugin;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::view::NodeView;

pub struct HeartbeatReporter {
    node: String,
    view: Arc<NodeView>,
    watched_mountpoint: String,
}

impl HeartbeatReporter {
    pub fn new(node: impl Into<String>, view: Arc<NodeView>, watched_mountpoint: impl Into<String>) -> Self {
        Self { node: node.into(), view, watched_mountpoint: watched_mountpoint.into() }
    }

    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(node = %self.node, error = %e, "heartbeat tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> pvc_core::PvcResult<()> {
        self.view.write_heartbeat(&self.node).await?;

        let resources = sample_resources().await;
        self.view.write_resources(&self.node, &resources).await?;

        let running: Vec<String> = self
            .view
            .domains_owned_by(&self.node)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.state == pvc_core::entity::domain::DomainRunState::Start)
            .map(|d| d.uuid)
            .collect();
        self.view.write_running_domains(&self.node, &running).await?;

        let health = self.run_plugins(&resources).await;
        self.view.write_health(&self.node, &health).await?;

        Ok(())
    }

    async fn run_plugins(&self, resources: &NodeResources) -> BTreeMap<String, HealthEntry> {
        let load_plugin = LoadAveragePlugin { load_5m: resources.load_5m, vcpu_total: resources.vcpu_total };
        let disk_plugin = DiskFreePlugin {
            mountpoint: self.watched_mountpoint.clone(),
            free_percent: sample_disk_free_percent(&self.watched_mountpoint).await,
        };
        let time_plugin = TimeSyncPlugin { skew_ms: sample_clock_skew_ms().await };

        let mut health = BTreeMap::new();
        for (name, reading) in [
            (load_plugin.name().to_string(), load_plugin.run().await),
            (disk_plugin.name().to_string(), disk_plugin.run().await),
            (time_plugin.name().to_string(), time_plugin.run().await),
        ] {
            health.insert(
                name.clone(),
                HealthEntry { name, last_run: Utc::now(), health_delta: reading.delta, message: reading.message },
            );
        }
        health
    }
}

async fn sample_resources() -> NodeResources {
    let load_5m = sample_load_5m().await;
    let vcpu_total = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
    let (memory_total_mb, memory_free_mb) = sample_meminfo_mb().await;
    NodeResources {
        load_5m,
        vcpu_total,
        vcpu_allocated: 0,
        memory_total_mb,
        memory_used_mb: memory_total_mb.saturating_sub(memory_free_mb),
        memory_free_mb,
        memory_allocated_mb: 0,
        memory_provisioned_mb: 0,
    }
}

async fn sample_load_5m() -> f64 {
    match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(raw) => raw.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        Err(_) => 0.0,
    }
}

async fn sample_meminfo_mb() -> (u64, u64) {
    let raw = match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(raw) => raw,
        Err(_) => return (0, 0),
    };
    let mut total_kb = 0u64;
    let mut available_kb = 0u64;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.trim().split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.trim().split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0);
        }
    }
    (total_kb / 1024, available_kb / 1024)
}

async fn sample_disk_free_percent(mountpoint: &str) -> f64 {
    let output = match Command::new("df").args(["--output=pcent", mountpoint]).output().await {
        Ok(output) if output.status.success() => output,
        _ => return 100.0,
    };
    let raw = String::from_utf8_lossy(&output.stdout);
    let used_pct = raw
        .lines()
        .nth(1)
        .and_then(|line| line.trim().trim_end_matches('%').parse::<f64>().ok())
        .unwrap_or(0.0);
    (100.0 - used_pct).max(0.0)
}

async fn sample_clock_skew_ms() -> i64 {
    let output = match Command::new("chronyc").arg("tracking").output().await {
        Ok(output) if output.status.success() => output,
        _ => return 0,
    };
    let raw = String::from_utf8_lossy(&output.stdout);
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("System time") {
            if let Some(seconds) = rest.split_whitespace().next() {
                if let Ok(secs) = seconds.parse::<f64>() {
                    return (secs * 1000.0) as i64;
                }
            }
        }
    }
    0
}
