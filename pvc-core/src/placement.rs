//! Placement Engine. A pure function: given the same inputs
//! it always returns the same decision, which is
//! what makes it safe to re-run unmodified from the fencing recovery path
//! as from an ordinary `define`/`migrate`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::node::Node;
use crate::error::{PvcError, PvcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Mem,
    MemProv,
    Vcpus,
    Load,
    Vms,
    None,
}

/// Candidate node set and the request being placed. `forbidden_node` is
/// the node the VM must *not* land on (its current node, on migrate; the
/// fenced node, on fence recovery).
pub struct PlacementRequest<'a> {
    pub node_limit: &'a [String],
    pub selector: Selector,
    pub forbidden_node: Option<&'a str>,
}

/// Choose a target node from `candidates` for `request`. Pure: no I/O, no
/// clock reads, no randomness.
pub fn place(
    candidates: &[Node],
    request: &PlacementRequest<'_>,
    default_selector: Selector,
) -> PvcResult<String> {
    let selector = match request.selector {
        Selector::None => default_selector,
        other => other,
    };

    let mut pool: Vec<&Node> = candidates
        .iter()
        .filter(|n| n.is_placement_candidate())
        .filter(|n| Some(n.name.as_str()) != request.forbidden_node)
        .collect();

    if !request.node_limit.is_empty() {
        pool.retain(|n| request.node_limit.iter().any(|l| l == &n.name));
        if pool.is_empty() {
            return Err(PvcError::PlacementFailed(format!(
                "no candidate node within node_limit {:?}",
                request.node_limit
            )));
        }
    }

    if pool.is_empty() {
        return Err(PvcError::PlacementFailed(
            "no eligible candidate nodes".to_string(),
        ));
    }

    // Lower score wins; ties broken by node name ascending.
    pool.sort_by(|a, b| {
        score(a, selector)
            .partial_cmp(&score(b, selector))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(pool[0].name.clone())
}

fn score(node: &Node, selector: Selector) -> f64 {
    match selector {
        Selector::Mem => -(node.resources.memory_free_mb as f64),
        Selector::MemProv => node.resources.memory_provisioned_mb as f64,
        Selector::Vcpus => node.resources.vcpu_allocated as f64,
        Selector::Load => node.resources.load_5m,
        Selector::Vms => node.running_domains.len() as f64,
        Selector::None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::node::{DaemonState, DomainState, NodeResources};

    fn candidate(name: &str, free_mb: u64, load: f64) -> Node {
        let mut n = Node::new(name);
        n.daemon_state = DaemonState::Run;
        n.domain_state_observed = DomainState::Ready;
        n.resources = NodeResources {
            memory_free_mb: free_mb,
            load_5m: load,
            ..Default::default()
        };
        n
    }

    #[test]
    fn mem_selector_prefers_most_free_memory() {
        let nodes = vec![candidate("hvA", 1000, 0.1), candidate("hvB", 4000, 0.1)];
        let req = PlacementRequest { node_limit: &[], selector: Selector::Mem, forbidden_node: None };
        assert_eq!(place(&nodes, &req, Selector::Mem).unwrap(), "hvB");
    }

    #[test]
    fn ties_break_by_node_name() {
        let nodes = vec![candidate("hvB", 1000, 0.1), candidate("hvA", 1000, 0.1)];
        let req = PlacementRequest { node_limit: &[], selector: Selector::Mem, forbidden_node: None };
        assert_eq!(place(&nodes, &req, Selector::Mem).unwrap(), "hvA");
    }

    #[test]
    fn empty_node_limit_intersection_is_fatal() {
        let nodes = vec![candidate("hvA", 1000, 0.1)];
        let req = PlacementRequest {
            node_limit: &["hvZ".to_string()],
            selector: Selector::Mem,
            forbidden_node: None,
        };
        assert!(place(&nodes, &req, Selector::Mem).is_err());
    }

    #[test]
    fn forbidden_node_is_excluded() {
        let nodes = vec![candidate("hvA", 1000, 0.1)];
        let req = PlacementRequest { node_limit: &[], selector: Selector::Mem, forbidden_node: Some("hvA") };
        assert!(place(&nodes, &req, Selector::Mem).is_err());
    }

    #[test]
    fn deterministic_given_same_inputs() {
        let nodes = vec![candidate("hvA", 2000, 0.2), candidate("hvB", 3000, 0.1)];
        let req = PlacementRequest { node_limit: &[], selector: Selector::Load, forbidden_node: None };
        let a = place(&nodes, &req, Selector::Mem).unwrap();
        let b = place(&nodes, &req, Selector::Mem).unwrap();
        assert_eq!(a, b);
    }
}
