//! Logical topology model.
//!
//! The topology is supplied by the caller before provisioning and returned
//! with physical details filled in after discovery. Nodes own their
//! interfaces; links reference nodes by name and carry one [`Interface`]
//! per endpoint, which discovery populates with the IP address and local
//! device name observed on the provisioned hardware.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WallError};

/// A network interface on one side of a link.
///
/// Both fields start empty and are filled in by discovery: the IP address
/// by the topology-map pass, the device name by the interface-map pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Local device name, e.g. `eth2`.
    pub name: Option<String>,

    /// IP address assigned by the testbed, e.g. `10.1.6.3`.
    pub ip: Option<String>,
}

impl Interface {
    /// Returns true once both the device name and the IP are known.
    pub fn is_resolved(&self) -> bool {
        self.name.is_some() && self.ip.is_some()
    }
}

/// A node in the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name, unique within the topology.
    pub name: String,

    /// Interfaces owned by this node, in declaration order.
    pub interfaces: Vec<Interface>,

    /// Application descriptors associated with the node. Opaque to this
    /// crate; consumed by the protocol-stack configuration generator.
    pub apps: Vec<String>,
}

impl Node {
    /// Creates a node with no interfaces or applications.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            apps: Vec::new(),
        }
    }

    /// Adds an application descriptor.
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.apps.push(app.into());
        self
    }
}

/// A duplex link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Link identifier, unique within the topology.
    pub id: String,

    /// Name of the node on the `a` side.
    pub node_a: String,

    /// Name of the node on the `b` side.
    pub node_b: String,

    /// Endpoint on the `a` side.
    pub int_a: Interface,

    /// Endpoint on the `b` side.
    pub int_b: Interface,
}

impl Link {
    /// Creates a link between two distinct nodes.
    ///
    /// # Errors
    ///
    /// Returns a validation error if both endpoints name the same node.
    pub fn new(
        id: impl Into<String>,
        node_a: impl Into<String>,
        node_b: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        let node_a = node_a.into();
        let node_b = node_b.into();

        if node_a == node_b {
            return Err(WallError::validation(format!(
                "link {id} connects node {node_a} to itself"
            )));
        }

        Ok(Self {
            id,
            node_a,
            node_b,
            int_a: Interface::default(),
            int_b: Interface::default(),
        })
    }

    /// Returns the endpoint belonging to `node`, if this link touches it.
    pub fn endpoint(&self, node: &str) -> Option<&Interface> {
        if self.node_a == node {
            Some(&self.int_a)
        } else if self.node_b == node {
            Some(&self.int_b)
        } else {
            None
        }
    }

    /// Mutable variant of [`Link::endpoint`].
    pub fn endpoint_mut(&mut self, node: &str) -> Option<&mut Interface> {
        if self.node_a == node {
            Some(&mut self.int_a)
        } else if self.node_b == node {
            Some(&mut self.int_b)
        } else {
            None
        }
    }

    /// Returns true once both endpoints carry a device name and an IP.
    pub fn is_resolved(&self) -> bool {
        self.int_a.is_resolved() && self.int_b.is_resolved()
    }
}

/// A caller-owned topology of nodes and links.
///
/// Iteration order over nodes and links is the order they were supplied in;
/// the script generator relies on this for deterministic output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Nodes, in declaration order.
    pub nodes: Vec<Node>,

    /// Links, in declaration order.
    pub links: Vec<Link>,
}

impl Topology {
    /// Creates a new topology builder.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Looks up a link by identifier.
    pub fn link(&self, id: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Mutable variant of [`Topology::link`].
    pub fn link_mut(&mut self, id: &str) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.id == id)
    }

    /// Returns the links that have an endpoint on `node`.
    pub fn links_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links
            .iter()
            .filter(move |l| l.node_a == node || l.node_b == node)
    }

    /// Returns the identifiers of links that are not yet fully resolved.
    pub fn unresolved_links(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| !l.is_resolved())
            .map(|l| l.id.as_str())
            .collect()
    }
}

/// Builder for [`Topology`].
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl TopologyBuilder {
    /// Adds a node.
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds a link between two already-added nodes.
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Builds the topology.
    ///
    /// # Errors
    ///
    /// Returns a validation error if node names or link identifiers are
    /// duplicated, or if a link references a node that was never added.
    pub fn build(self) -> Result<Topology> {
        let mut seen_nodes = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen_nodes.insert(node.name.as_str()) {
                return Err(WallError::validation(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
        }

        let mut seen_links = std::collections::HashSet::new();
        for link in &self.links {
            if !seen_links.insert(link.id.as_str()) {
                return Err(WallError::validation(format!(
                    "duplicate link id: {}",
                    link.id
                )));
            }
            for node in [&link.node_a, &link.node_b] {
                if !seen_nodes.contains(node.as_str()) {
                    return Err(WallError::validation(format!(
                        "link {} references unknown node {}",
                        link.id, node
                    )));
                }
            }
        }

        Ok(Topology {
            nodes: self.nodes,
            links: self.links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn two_router_topology() -> Topology {
        Topology::builder()
            .node(Node::new("r2b1"))
            .node(Node::new("r3b2"))
            .link(Link::new("link7", "r2b1", "r3b2").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_link_rejects_self_loop() {
        let err = Link::new("link1", "r1", "r1").unwrap_err();
        assert!(err.to_string().contains("connects node r1 to itself"));
    }

    #[test]
    fn test_endpoint_lookup() {
        let mut link = Link::new("link7", "r2b1", "r3b2").unwrap();
        link.endpoint_mut("r2b1").unwrap().ip = Some("10.1.6.3".to_string());

        assert_eq!(
            link.endpoint("r2b1").unwrap().ip.as_deref(),
            Some("10.1.6.3")
        );
        assert_eq!(link.endpoint("r3b2").unwrap().ip, None);
        assert!(link.endpoint("other").is_none());
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let err = Topology::builder()
            .node(Node::new("a"))
            .node(Node::new("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node name"));

        let err = Topology::builder()
            .node(Node::new("a"))
            .node(Node::new("b"))
            .link(Link::new("l", "a", "b").unwrap())
            .link(Link::new("l", "b", "a").unwrap())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate link id"));
    }

    #[test]
    fn test_builder_rejects_dangling_link() {
        let err = Topology::builder()
            .node(Node::new("a"))
            .node(Node::new("b"))
            .link(Link::new("l", "a", "c").unwrap())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown node c"));
    }

    #[test]
    fn test_links_of() {
        let topology = two_router_topology();
        assert_eq!(topology.links_of("r2b1").count(), 1);
        assert_eq!(topology.links_of("absent").count(), 0);
    }

    #[test]
    fn test_unresolved_links() {
        let mut topology = two_router_topology();
        assert_eq!(topology.unresolved_links(), vec!["link7"]);

        let link = topology.link_mut("link7").unwrap();
        link.int_a = Interface {
            name: Some("eth2".to_string()),
            ip: Some("10.1.6.3".to_string()),
        };
        link.int_b = Interface {
            name: Some("eth1".to_string()),
            ip: Some("10.1.6.2".to_string()),
        };
        assert!(topology.unresolved_links().is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let topology = two_router_topology();
        let json = serde_json::to_string(&topology).unwrap();
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_count(), 2);
        assert_eq!(back.link("link7").unwrap().node_b, "r3b2");
    }
}
