//! `GET /metrics`: unauthenticated Prometheus text exposition, per spec
//! §6. The core's scope deliberately stops at the coordination-tree
//! surface (§1 lists "the Prometheus scraping endpoints" among the
//! external collaborators), so this stays a thin render of what the
//! registry already tracks rather than a metrics-collection subsystem —
//! no `metrics`/`prometheus` crate, just the text format by hand.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use pvc_core::entity::node::{CoordinatorState, DaemonState};

use crate::rest::AppState;

pub async fn render(State(state): State<Arc<AppState>>) -> Response {
    let mut out = String::new();

    let nodes = state.registry.list_nodes().await.unwrap_or_default();
    let _ = writeln!(out, "# HELP pvc_node_up Node daemon_state == run (1) or not (0).");
    let _ = writeln!(out, "# TYPE pvc_node_up gauge");
    for node in &nodes {
        let up = if node.daemon_state == DaemonState::Run { 1 } else { 0 };
        let _ = writeln!(out, "pvc_node_up{{node=\"{}\"}} {up}", node.name);
    }

    let _ = writeln!(out, "# HELP pvc_node_health_percent Node overall health percentage.");
    let _ = writeln!(out, "# TYPE pvc_node_health_percent gauge");
    for node in &nodes {
        let _ = writeln!(out, "pvc_node_health_percent{{node=\"{}\"}} {}", node.name, node.overall_health);
    }

    let _ = writeln!(out, "# HELP pvc_node_running_domains Domains currently running on the node.");
    let _ = writeln!(out, "# TYPE pvc_node_running_domains gauge");
    for node in &nodes {
        let _ = writeln!(
            out,
            "pvc_node_running_domains{{node=\"{}\"}} {}",
            node.name,
            node.running_domains.len()
        );
    }

    let primary_count = nodes.iter().filter(|n| n.coordinator_state == CoordinatorState::Primary).count();
    let _ = writeln!(out, "# HELP pvc_cluster_has_primary Whether a primary coordinator is currently held.");
    let _ = writeln!(out, "# TYPE pvc_cluster_has_primary gauge");
    let _ = writeln!(out, "pvc_cluster_has_primary {}", if primary_count > 0 { 1 } else { 0 });

    let domains = state.registry.list_domains().await.unwrap_or_default();
    let _ = writeln!(out, "# HELP pvc_domains_total Defined VM domains.");
    let _ = writeln!(out, "# TYPE pvc_domains_total gauge");
    let _ = writeln!(out, "pvc_domains_total {}", domains.len());

    let faults = state.registry.list_faults().await.unwrap_or_default();
    let new_faults = faults.iter().filter(|f| f.status == pvc_core::entity::fault::FaultStatus::New).count();
    let _ = writeln!(out, "# HELP pvc_faults_total Active faults by status.");
    let _ = writeln!(out, "# TYPE pvc_faults_total gauge");
    let _ = writeln!(out, "pvc_faults_total{{status=\"new\"}} {new_faults}");
    let _ = writeln!(out, "pvc_faults_total{{status=\"ack\"}} {}", faults.len() - new_faults);

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out).into_response()
}
