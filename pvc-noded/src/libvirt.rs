//! Libvirt consumer: define, undefine, start, shutdown,
//! destroy, migrate (with `max-downtime`/`live` flags), domain stats.
//! Shells out to `virsh`, the same "wrap a synchronous foreign call in a
//! process boundary" idiom `pvc-coordinatord::ipmi::IpmiToolFencer` uses
//! for IPMI.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pvc_core::entity::domain::Domain;
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::migration::LibvirtDriver;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct VirshDriver {
    connect_uri: String,
}

impl VirshDriver {
    pub fn new(connect_uri: impl Into<String>) -> Self {
        Self { connect_uri: connect_uri.into() }
    }

    async fn virsh(&self, args: &[&str]) -> PvcResult<String> {
        let output = Command::new("virsh")
            .args(["-c", &self.connect_uri])
            .args(args)
            .output()
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "libvirt", detail: e.to_string() })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PvcError::ExecutorFailure { executor: "libvirt", detail: stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn virsh_on(&self, remote: &str, args: &[&str]) -> PvcResult<String> {
        let uri = format!("qemu+ssh://{remote}/system");
        let output = Command::new("virsh")
            .args(["-c", &uri])
            .args(args)
            .output()
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "libvirt", detail: e.to_string() })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PvcError::ExecutorFailure { executor: "libvirt", detail: stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl LibvirtDriver for VirshDriver {
    async fn live_migrate(&self, domain: &Domain, target: &str, max_downtime_ms: u64) -> PvcResult<()> {
        let dest = format!("qemu+ssh://{target}/system");
        self.virsh(&[
            "migrate",
            "--live",
            "--persistent",
            "--undefinesource",
            "--migrate-disks",
            "--copy-storage-inc",
            &domain.name,
            &dest,
        ])
        .await?;
        self.virsh_on(target, &["migrate-setmaxdowntime", &domain.name, &max_downtime_ms.to_string()])
            .await
            .ok();
        info!(vm = %domain.uuid, target, "live migration issued");
        Ok(())
    }

    async fn guest_shutdown(&self, domain: &Domain) -> PvcResult<()> {
        self.virsh(&["shutdown", &domain.name]).await.map(|_| ())
    }

    async fn wait_stopped(&self, domain: &Domain, timeout: Duration) -> PvcResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self.virsh(&["domstate", &domain.name]).await.unwrap_or_default();
            if state.trim() == "shut off" {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(vm = %domain.uuid, "guest did not reach shut off before timeout");
                return Ok(false);
            }
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn redefine_on(&self, domain: &Domain, target: &str) -> PvcResult<()> {
        let uri = format!("qemu+ssh://{target}/system");
        let mut child = Command::new("virsh")
            .args(["-c", &uri, "define", "/dev/stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PvcError::ExecutorFailure { executor: "libvirt", detail: e.to_string() })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PvcError::ExecutorFailure { executor: "libvirt", detail: "no stdin".to_string() })?;
        stdin
            .write_all(domain.xml.as_bytes())
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "libvirt", detail: e.to_string() })?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "libvirt", detail: e.to_string() })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PvcError::ExecutorFailure { executor: "libvirt", detail: stderr });
        }
        info!(vm = %domain.uuid, target, "redefined on target");
        Ok(())
    }

    async fn start(&self, domain: &Domain) -> PvcResult<()> {
        self.virsh(&["start", &domain.name]).await.map(|_| ())
    }
}
