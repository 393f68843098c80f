//! ns-2 provisioning-script generation.
//!
//! The testbed's experiment engine consumes an ns-2 script describing the
//! requested nodes and links. Generation is a pure function of the
//! topology and configuration; the emitted text is a serialization target
//! only and never parsed back.

use crate::config::WallConfig;
use crate::topology::Topology;

/// Link bandwidth requested for every duplex link.
const LINK_BANDWIDTH: &str = "1000Mb";

/// Link delay requested for every duplex link.
const LINK_DELAY: &str = "0ms";

/// Queueing discipline requested for every duplex link.
const LINK_QUEUE: &str = "DropTail";

/// Generates the ns-2 script for a topology.
///
/// Emits the simulator preamble, a node declaration plus an OS-image
/// assignment per node (using `config.image`), a duplex-link declaration
/// per link, and the trailing run directive. Output is deterministic:
/// nodes and links are emitted in the order the topology supplies them.
pub fn generate_ns_script(topology: &Topology, config: &WallConfig) -> String {
    let mut script = String::new();
    script.push_str("set ns [new Simulator]\n");
    script.push_str("source tb_compat.tcl\n\n");

    for node in &topology.nodes {
        script.push_str(&format!("set {} [$ns node]\n", node.name));
        script.push_str(&format!(
            "tb-set-node-os ${} {}\n",
            node.name, config.image
        ));
    }

    for link in &topology.links {
        script.push_str(&format!(
            "set {} [$ns duplex-link ${} ${} {} {} {}]\n",
            link.id, link.node_a, link.node_b, LINK_BANDWIDTH, LINK_DELAY, LINK_QUEUE
        ));
    }

    script.push_str("\n$ns run\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Link, Node};

    fn config() -> WallConfig {
        WallConfig::builder("wall1.example.net")
            .credentials("alice", "pw")
            .project("rina")
            .experiment("demo")
            .image("UBUNTU18-64-STD")
            .build()
    }

    fn topology() -> Topology {
        Topology::builder()
            .node(Node::new("r2b1"))
            .node(Node::new("r3b2"))
            .node(Node::new("r1a1"))
            .link(Link::new("link7", "r2b1", "r3b2").unwrap())
            .link(Link::new("link6", "r1a1", "r2b1").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_line_counts_match_topology() {
        let script = generate_ns_script(&topology(), &config());

        let node_decls = script
            .lines()
            .filter(|l| l.ends_with("[$ns node]"))
            .count();
        let os_lines = script
            .lines()
            .filter(|l| l.starts_with("tb-set-node-os"))
            .count();
        let link_decls = script.lines().filter(|l| l.contains("duplex-link")).count();

        assert_eq!(node_decls, 3);
        assert_eq!(os_lines, 3);
        assert_eq!(link_decls, 2);
    }

    #[test]
    fn test_script_shape() {
        let script = generate_ns_script(&topology(), &config());

        assert!(script.starts_with("set ns [new Simulator]\nsource tb_compat.tcl\n"));
        assert!(script.ends_with("$ns run\n"));
        assert!(script.contains("tb-set-node-os $r2b1 UBUNTU18-64-STD"));
        assert!(script.contains("set link7 [$ns duplex-link $r2b1 $r3b2 1000Mb 0ms DropTail]"));
    }

    #[test]
    fn test_deterministic() {
        let topology = topology();
        let config = config();
        let first = generate_ns_script(&topology, &config);
        let second = generate_ns_script(&topology, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_topology() {
        let script = generate_ns_script(&Topology::default(), &config());
        assert!(script.contains("set ns [new Simulator]"));
        assert!(script.ends_with("$ns run\n"));
        assert!(!script.contains("duplex-link"));
    }
}
