//! Health / Fault Aggregator. Each node periodically runs a
//! configured set of named health plugins, each returning `(delta,
//! message)`. Node overall health is `max(0, 100 - sum(delta))`. Cluster
//! health is the minimum node health, union'd with active faults.
//!
//! Supplement from `original_source`: the original ships a fixed
//! catalogue of plugins (`psql`, `dpkg`, `nics`, `load`, ad-hoc
//! `health.sh` hooks); `plugins` below defines the trait plus three
//! concrete built-ins so the aggregator has real, testable input instead
//! of only a trait stub. The distilled spec's Non-goals exclude the
//! Ceph/OSD plugin roster specifically, not built-in plugins generally.

use async_trait::async_trait;

use crate::entity::fault::{fault_id, Fault, FaultStatus};
use crate::entity::node::Node;

/// One plugin's reading: how much to subtract from 100, and a
/// human-readable explanation.
#[derive(Debug, Clone)]
pub struct HealthReading {
    pub delta: u8,
    pub message: String,
}

#[async_trait]
pub trait HealthPlugin: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> HealthReading;
}

/// Overall health for one node, given its plugins' last readings
///)`).
pub fn node_overall_health(deltas: &[u8]) -> u8 {
    let total: u32 = deltas.iter().map(|d| *d as u32).sum();
    (100u32.saturating_sub(total)).min(100) as u8
}

/// Cluster health: the minimum of every node's overall health
///`"). `None` when there are no nodes.
pub fn cluster_health(nodes: &[Node]) -> Option<u8> {
    nodes.iter().map(|n| n.overall_health).min()
}

/// Sort key used by fault listing, default descending by
/// `last_reported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FaultSortKey {
    FirstReported,
    LastReported,
    AcknowledgedAt,
    Status,
    HealthDelta,
    Message,
}

/// Sort `faults` by `key`. `descending` flips the natural order; the
/// spec's default listing is `last_reported` descending.
pub fn sort_faults(faults: &mut [Fault], key: FaultSortKey, descending: bool) {
    faults.sort_by(|a, b| {
        let ord = match key {
            FaultSortKey::FirstReported => a.first_reported.cmp(&b.first_reported),
            FaultSortKey::LastReported => a.last_reported.cmp(&b.last_reported),
            FaultSortKey::AcknowledgedAt => a.acknowledged_at.cmp(&b.acknowledged_at),
            FaultSortKey::Status => fault_status_rank(a.status).cmp(&fault_status_rank(b.status)),
            FaultSortKey::HealthDelta => a.health_delta.cmp(&b.health_delta),
            FaultSortKey::Message => a.message.cmp(&b.message),
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

fn fault_status_rank(status: FaultStatus) -> u8 {
    match status {
        FaultStatus::New => 0,
        FaultStatus::Ack => 1,
    }
}

/// Applies one plugin reading to the cluster's fault table, per spec
/// §4.10/§3 "Fault" lifecycle: a health predicate becoming true creates
/// a fault (or bumps `last_reported` if the same content-hash id
/// already exists); `delta == 0` means "no longer faulted" and produces
/// no fault at all (the caller is expected to separately expire faults
/// whose underlying plugin has stopped reporting them — see
/// [`reap_stale`]).
pub fn apply_reading(
    existing: Option<Fault>,
    kind: &str,
    subject: &str,
    message_template: &str,
    reading: &HealthReading,
) -> Option<Fault> {
    if reading.delta == 0 {
        return None;
    }
    match existing {
        Some(mut fault) => {
            fault.re_report(reading.delta, reading.message.clone());
            Some(fault)
        }
        None => Some(Fault::new(kind, subject, message_template, reading.delta, reading.message.clone())),
    }
}

/// Faults are keyed off a content hash, not off any externally-observed
/// liveness signal. `reap_stale` removes any fault in `current` whose id
/// didn't reappear in `detected_ids` this round, so that a condition
/// which stops recurring eventually clears instead of living forever.
pub fn reap_stale(current: Vec<Fault>, detected_ids: &[String]) -> Vec<Fault> {
    current
        .into_iter()
        .filter(|f| detected_ids.iter().any(|id| id == &f.id))
        .collect()
}

/// Built-in health plugins (supplement from `original_source`'s fixed
/// plugin catalogue).
pub mod plugins {
    use super::*;

    /// Flags high 5-minute load average relative to vCPU count.
    pub struct LoadAveragePlugin {
        pub load_5m: f64,
        pub vcpu_total: u32,
    }

    #[async_trait]
    impl HealthPlugin for LoadAveragePlugin {
        fn name(&self) -> &str {
            "load"
        }

        async fn run(&self) -> HealthReading {
            if self.vcpu_total == 0 {
                return HealthReading { delta: 0, message: "no vcpus reported".to_string() };
            }
            let ratio = self.load_5m / self.vcpu_total as f64;
            let delta = if ratio > 2.0 {
                20
            } else if ratio > 1.5 {
                10
            } else if ratio > 1.0 {
                5
            } else {
                0
            };
            HealthReading {
                delta,
                message: format!("5m load {:.2} across {} vcpus", self.load_5m, self.vcpu_total),
            }
        }
    }

    /// Flags low free disk space on a watched mountpoint.
    pub struct DiskFreePlugin {
        pub mountpoint: String,
        pub free_percent: f64,
    }

    #[async_trait]
    impl HealthPlugin for DiskFreePlugin {
        fn name(&self) -> &str {
            "disk_free"
        }

        async fn run(&self) -> HealthReading {
            let delta = if self.free_percent < 5.0 {
                30
            } else if self.free_percent < 10.0 {
                15
            } else if self.free_percent < 20.0 {
                5
            } else {
                0
            };
            HealthReading {
                delta,
                message: format!("{} at {:.1}% free", self.mountpoint, self.free_percent),
            }
        }
    }

    /// Flags clock skew against the cluster's NTP reference.
    pub struct TimeSyncPlugin {
        pub skew_ms: i64,
    }

    #[async_trait]
    impl HealthPlugin for TimeSyncPlugin {
        fn name(&self) -> &str {
            "time_sync"
        }

        async fn run(&self) -> HealthReading {
            let abs_skew = self.skew_ms.unsigned_abs();
            let delta = if abs_skew > 5000 {
                25
            } else if abs_skew > 1000 {
                10
            } else if abs_skew > 200 {
                3
            } else {
                0
            };
            HealthReading {
                delta,
                message: format!("clock skew {}ms", self.skew_ms),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn overall_health_floors_at_zero() {
        assert_eq!(node_overall_health(&[60, 60]), 0);
        assert_eq!(node_overall_health(&[10, 20]), 70);
        assert_eq!(node_overall_health(&[]), 100);
    }

    #[test]
    fn cluster_health_is_the_minimum_node_health() {
        let mut a = Node::new("hvA");
        a.overall_health = 80;
        let mut b = Node::new("hvB");
        b.overall_health = 40;
        assert_eq!(cluster_health(&[a, b]), Some(40));
        assert_eq!(cluster_health(&[]), None);
    }

    #[test]
    fn recurring_condition_bumps_last_reported_not_a_new_id() {
        let first = apply_reading(None, "disk_free", "hvA:/var", "tpl", &HealthReading { delta: 10, message: "12% free".into() }).unwrap();
        let id1 = first.id.clone();
        let second = apply_reading(Some(first), "disk_free", "hvA:/var", "tpl", &HealthReading { delta: 20, message: "3% free".into() }).unwrap();
        assert_eq!(second.id, id1);
        assert_eq!(second.health_delta, 20);
        assert!(second.last_reported >= second.first_reported);
    }

    #[test]
    fn zero_delta_produces_no_fault() {
        assert!(apply_reading(None, "load", "hvA", "tpl", &HealthReading { delta: 0, message: "fine".into() }).is_none());
    }

    #[test]
    fn stale_faults_are_reaped() {
        let f1 = Fault::new("load", "hvA", "tpl", 10, "m".into());
        let f2 = Fault::new("disk_free", "hvB", "tpl", 10, "m".into());
        let id1 = f1.id.clone();
        let remaining = reap_stale(vec![f1, f2], &[id1.clone()]);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, id1);
    }

    #[test]
    fn default_sort_is_last_reported_descending() {
        let mut f1 = Fault::new("a", "s1", "tpl", 1, "m".into());
        let mut f2 = Fault::new("b", "s2", "tpl", 1, "m".into());
        f1.last_reported = Utc::now() - chrono::Duration::seconds(10);
        f2.last_reported = Utc::now();
        let mut faults = vec![f1.clone(), f2.clone()];
        sort_faults(&mut faults, FaultSortKey::LastReported, true);
        assert_eq!(faults[0].id, f2.id);
    }

    #[test]
    fn sorts_by_acknowledged_at_with_unacked_first() {
        let mut f1 = Fault::new("a", "s1", "tpl", 1, "m".into());
        let f2 = Fault::new("b", "s2", "tpl", 1, "m".into());
        f1.acknowledge();
        let mut faults = vec![f1.clone(), f2.clone()];
        sort_faults(&mut faults, FaultSortKey::AcknowledgedAt, false);
        assert_eq!(faults[0].id, f2.id);
        assert_eq!(faults[1].id, f1.id);
    }
}
