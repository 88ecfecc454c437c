//! IPMI/BMC power control, the external collaborator behind
//! `pvc_core::fencing::IpmiFencer`. Each node's `bmc_host`/`bmc_user`/
//! `bmc_pass` are read from cluster config; only `power status`,
//! `power off`, and `power on` are ever issued.
//!
//! Shells out to `ipmitool`, mirroring the teacher's habit of treating
//! every hardware-facing operation as a thin process boundary
//! (`mvirt-node::clients` wraps gRPC calls the same way this wraps a
//! subprocess).

use std::collections::HashMap;

use async_trait::async_trait;
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::fencing::{IpmiFencer, PowerStatus};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmcConfig {
    pub bmc_host: String,
    pub bmc_user: String,
    pub bmc_pass: String,
}

pub struct IpmiToolFencer {
    bmcs: HashMap<String, BmcConfig>,
}

impl IpmiToolFencer {
    pub fn new(bmcs: HashMap<String, BmcConfig>) -> Self {
        Self { bmcs }
    }

    fn bmc_for(&self, node: &str) -> PvcResult<&BmcConfig> {
        self.bmcs
            .get(node)
            .ok_or_else(|| PvcError::Validation(format!("no BMC configured for node {node}")))
    }

    async fn run(&self, bmc: &BmcConfig, args: &[&str]) -> PvcResult<String> {
        let output = Command::new("ipmitool")
            .args(["-I", "lanplus", "-H", &bmc.bmc_host, "-U", &bmc.bmc_user, "-P", &bmc.bmc_pass])
            .args(args)
            .output()
            .await
            .map_err(|e| PvcError::ExecutorFailure { executor: "ipmi", detail: e.to_string() })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PvcError::ExecutorFailure { executor: "ipmi", detail: stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl IpmiFencer for IpmiToolFencer {
    async fn power_status(&self, node: &str) -> PvcResult<PowerStatus> {
        let bmc = self.bmc_for(node)?;
        match self.run(bmc, &["power", "status"]).await {
            Ok(out) if out.to_lowercase().contains("is on") => Ok(PowerStatus::On),
            Ok(out) if out.to_lowercase().contains("is off") => Ok(PowerStatus::Off),
            Ok(out) => {
                warn!(node, output = %out, "unrecognized ipmitool power status output");
                Ok(PowerStatus::Unreachable)
            }
            Err(_) => Ok(PowerStatus::Unreachable),
        }
    }

    async fn power_off(&self, node: &str) -> PvcResult<()> {
        let bmc = self.bmc_for(node)?;
        self.run(bmc, &["power", "off"]).await.map(|_| ())
    }

    async fn power_on(&self, node: &str) -> PvcResult<()> {
        let bmc = self.bmc_for(node)?;
        self.run(bmc, &["power", "on"]).await.map(|_| ())
    }
}
