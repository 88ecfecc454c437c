//! Property tests for the invariants enumerated in spec §8: placement
//! determinism, the node_limit containment rule, and fault id stability.
//! Colocated `#[test]`s already cover the example-based cases per
//! module; these drive the same contracts over generated inputs.

use proptest::prelude::*;

use pvc_core::entity::fault::fault_id;
use pvc_core::entity::node::{DaemonState, DomainState, Node, NodeResources};
use pvc_core::placement::{place, PlacementRequest, Selector};

fn arb_node_name() -> impl Strategy<Value = String> {
    "hv[a-f]".prop_map(|s| s.to_string())
}

fn arb_candidate() -> impl Strategy<Value = (String, u64, u32, f64, usize)> {
    (arb_node_name(), 0u64..65536, 0u32..128, 0.0f64..64.0, 0usize..32)
}

fn build_node((name, free_mb, vcpus, load, vms): (String, u64, u32, f64, usize)) -> Node {
    let mut n = Node::new(name);
    n.daemon_state = DaemonState::Run;
    n.domain_state_observed = DomainState::Ready;
    n.resources = NodeResources {
        memory_free_mb: free_mb,
        vcpu_allocated: vcpus,
        load_5m: load,
        ..Default::default()
    };
    n.running_domains = (0..vms).map(|i| format!("vm-{i}")).collect();
    n
}

proptest! {
    /// Spec §8 invariant 6: the placement engine is deterministic — same
    /// inputs always produce the same chosen node.
    #[test]
    fn placement_is_deterministic(
        candidates in prop::collection::vec(arb_candidate(), 1..8),
        selector_idx in 0usize..5,
    ) {
        let selectors = [Selector::Mem, Selector::MemProv, Selector::Vcpus, Selector::Load, Selector::Vms];
        let selector = selectors[selector_idx];
        let nodes: Vec<Node> = candidates.into_iter().map(build_node).collect();
        let req = PlacementRequest { node_limit: &[], selector, forbidden_node: None };

        let first = place(&nodes, &req, Selector::Mem);
        let second = place(&nodes, &req, Selector::Mem);
        prop_assert_eq!(first.ok(), second.ok());
    }

    /// Spec §8 invariant 2: for a VM with a non-empty node_limit, the
    /// placement engine either returns a node inside that limit or
    /// rejects outright — it never returns one outside it.
    #[test]
    fn placement_honors_node_limit(
        candidates in prop::collection::vec(arb_candidate(), 1..8),
        limit_idx in 0usize..6,
    ) {
        let nodes: Vec<Node> = candidates.into_iter().map(build_node).collect();
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        let mut limit: Vec<String> = names.iter().take(limit_idx.min(names.len())).cloned().collect();
        limit.dedup();
        if limit.is_empty() {
            limit.push("hv-unreachable".to_string());
        }

        let req = PlacementRequest { node_limit: &limit, selector: Selector::Mem, forbidden_node: None };
        if let Ok(chosen) = place(&nodes, &req, Selector::Mem) {
            prop_assert!(limit.contains(&chosen));
        }
    }

    /// Spec §8 invariant 5: fault ids are a stable content hash of
    /// `(kind, subject, template)` — identical inputs always yield the
    /// identical id, independent of process state.
    #[test]
    fn fault_id_is_a_pure_function_of_its_inputs(
        kind in "[a-z_]{1,16}",
        subject in "[a-zA-Z0-9:/._-]{1,32}",
        template in ".{0,64}",
    ) {
        let a = fault_id(&kind, &subject, &template);
        let b = fault_id(&kind, &subject, &template);
        prop_assert_eq!(a, b);
    }

    /// Distinct subjects must not collide onto the same truncated
    /// digest for any of the sampled inputs (spec §8 item 5's
    /// uniqueness half).
    #[test]
    fn fault_id_differs_for_distinct_subjects(
        kind in "[a-z_]{1,16}",
        subject_a in "[a-zA-Z0-9]{1,16}",
        subject_b in "[a-zA-Z0-9]{1,16}",
    ) {
        prop_assume!(subject_a != subject_b);
        let a = fault_id(&kind, &subject_a, "tpl");
        let b = fault_id(&kind, &subject_b, "tpl");
        prop_assert_ne!(a, b);
    }
}
