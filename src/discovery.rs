//! Physical topology discovery.
//!
//! Once an experiment is active, the provisioned nodes know things the
//! logical topology does not: which IP the testbed assigned to each end of
//! each link, and which local device carries it. Discovery reconciles two
//! node-local reports against the logical link list:
//!
//! 1. the **topology map**, read from one representative node, names every
//!    `link:ip` pair per physical node and yields the endpoint IPs;
//! 2. the **interface map**, read from every node, lists `device ip`
//!    lines and yields the endpoint device names, keyed by the IPs the
//!    first pass produced.
//!
//! Pass order matters: an interface-map IP that the topology map never
//! assigned resolves to nothing. Discovery is a pure function of the
//! remote output, so rerunning it against unchanged nodes reproduces the
//! same assignments. Per-entry and per-node failures are skipped and
//! collected into the report; only losing the representative node's
//! topology map aborts the sweep.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WallConfig;
use crate::error::{Result, WallError};
use crate::executor::SharedExecutor;
use crate::parse::{self, InterfaceMap, ParseOutcome, TopologyMap};
use crate::topology::Topology;

/// Node-local file correlating logical links with assigned IPs.
pub const TOPOLOGY_MAP_PATH: &str = "/var/emulab/boot/topomap";

/// Node-local file correlating devices with configured IPs.
pub const INTERFACE_MAP_PATH: &str = "/var/emulab/boot/ifmap";

/// A link endpoint that discovery could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedEndpoint {
    /// The logical link identifier.
    pub link: String,

    /// The node the entry referred to.
    pub node: String,

    /// Why the endpoint stayed unresolved.
    pub reason: String,
}

/// A node whose interface map could not be retrieved or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// The node name.
    pub node: String,

    /// Why the node was skipped.
    pub reason: String,
}

/// Outcome of a discovery sweep.
///
/// Discovery is best-effort across nodes; the report names everything
/// that did not resolve so the caller can decide whether the topology is
/// usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Topology-map entries that could not be matched to a link endpoint.
    pub unresolved: Vec<UnresolvedEndpoint>,

    /// Nodes whose interface map was unavailable or unparsable.
    pub failed_nodes: Vec<NodeFailure>,

    /// Raw fragments the parsers skipped.
    pub skipped_fragments: Vec<String>,

    /// Links that still lack an IP or device name on either endpoint
    /// after the sweep.
    pub unresolved_links: Vec<String>,
}

impl DiscoveryReport {
    /// Returns true if every link resolved on both endpoints and no node
    /// was skipped.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && self.failed_nodes.is_empty() && self.unresolved_links.is_empty()
    }

    /// Converts the report into an error naming the first unresolved
    /// link, for callers that require a fully resolved topology.
    pub fn require_complete(self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        if let Some(endpoint) = self.unresolved.first() {
            return Err(WallError::unresolved(&endpoint.link, &endpoint.node));
        }
        if let Some(link) = self.unresolved_links.first() {
            return Err(WallError::unresolved(link, "?"));
        }
        match self.failed_nodes.first() {
            Some(failure) => Err(WallError::remote_command(&failure.node, &failure.reason)),
            None => Ok(()),
        }
    }
}

/// Discovers physical interface assignments for an active experiment.
pub struct TopologyDiscoverer {
    executor: SharedExecutor,
    config: WallConfig,
}

impl TopologyDiscoverer {
    /// Creates a discoverer reading through `executor`.
    pub fn new(executor: SharedExecutor, config: WallConfig) -> Self {
        Self { executor, config }
    }

    /// Runs both discovery passes, mutating the links in `topology`.
    ///
    /// # Errors
    ///
    /// Fails if the topology has no nodes, or if the representative
    /// node's topology map cannot be retrieved or parsed at all.
    /// Everything else is collected into the [`DiscoveryReport`].
    pub async fn discover(&self, topology: &mut Topology) -> Result<DiscoveryReport> {
        let representative = topology
            .nodes
            .first()
            .map(|n| n.name.clone())
            .ok_or_else(|| WallError::validation("cannot discover an empty topology"))?;

        let mut report = DiscoveryReport::default();

        let map = self.fetch_topology_map(&representative).await?;
        self.apply_topology_map(topology, map, &mut report);

        self.apply_interface_maps(topology, &mut report).await;

        report.unresolved_links = topology
            .unresolved_links()
            .into_iter()
            .map(str::to_string)
            .collect();
        report.unresolved.sort_by(|a, b| (&a.link, &a.node).cmp(&(&b.link, &b.node)));
        report.failed_nodes.sort_by(|a, b| a.node.cmp(&b.node));

        info!(
            links = topology.link_count(),
            unresolved = report.unresolved_links.len(),
            failed_nodes = report.failed_nodes.len(),
            "Discovery sweep finished"
        );

        Ok(report)
    }

    /// Reads the topology map from the representative node.
    async fn fetch_topology_map(&self, node: &str) -> Result<TopologyMap> {
        let host = self.config.node_host(node);
        let output = self
            .executor
            .execute(
                &host,
                &format!("cat {TOPOLOGY_MAP_PATH}"),
                Some(self.config.command_timeout),
            )
            .await?;

        match parse::parse_topology_map(&output.stdout) {
            ParseOutcome::Parsed(map) => Ok(map),
            ParseOutcome::Malformed { raw } => Err(WallError::parse("topology map", raw)),
        }
    }

    /// Pass 1: assign endpoint IPs from the topology map.
    fn apply_topology_map(
        &self,
        topology: &mut Topology,
        map: TopologyMap,
        report: &mut DiscoveryReport,
    ) {
        report.skipped_fragments.extend(map.malformed);

        for entry in map.entries {
            for address in entry.links {
                let Some(link) = topology.link_mut(&address.link) else {
                    debug!(link = %address.link, node = %entry.node, "No matching link");
                    report.unresolved.push(UnresolvedEndpoint {
                        link: address.link,
                        node: entry.node.clone(),
                        reason: "no link with this identifier".to_string(),
                    });
                    continue;
                };

                let Some(endpoint) = link.endpoint_mut(&entry.node) else {
                    report.unresolved.push(UnresolvedEndpoint {
                        link: address.link,
                        node: entry.node.clone(),
                        reason: "node is not an endpoint of this link".to_string(),
                    });
                    continue;
                };

                debug!(link = %address.link, node = %entry.node, ip = %address.ip, "Assigned IP");
                endpoint.ip = Some(address.ip);
            }
        }
    }

    /// Pass 2: assign device names from each node's interface map.
    ///
    /// Workers fetch and parse concurrently (bounded by
    /// `config.max_sessions`); only this coordinator touches the
    /// topology, so assignment never races.
    async fn apply_interface_maps(&self, topology: &mut Topology, report: &mut DiscoveryReport) {
        let nodes: Vec<String> = topology.nodes.iter().map(|n| n.name.clone()).collect();

        let results: Vec<(String, Result<InterfaceMap>)> = stream::iter(nodes)
            .map(|node| {
                let host = self.config.node_host(&node);
                let executor = self.executor.clone();
                let timeout = self.config.command_timeout;
                async move {
                    let outcome = executor
                        .execute(&host, &format!("cat {INTERFACE_MAP_PATH}"), Some(timeout))
                        .await
                        .and_then(|output| match parse::parse_interface_map(&output.stdout) {
                            ParseOutcome::Parsed(map) => Ok(map),
                            ParseOutcome::Malformed { raw } => {
                                Err(WallError::parse("interface map", raw))
                            }
                        });
                    (node, outcome)
                }
            })
            .buffer_unordered(self.config.max_sessions)
            .collect()
            .await;

        for (node, outcome) in results {
            let map = match outcome {
                Ok(map) => map,
                Err(e) => {
                    warn!(node = %node, error = %e, "Skipping node in interface discovery");
                    report.failed_nodes.push(NodeFailure {
                        node,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            report.skipped_fragments.extend(map.malformed);

            for link in topology.links.iter_mut() {
                let link_id = link.id.clone();
                let Some(endpoint) = link.endpoint_mut(&node) else {
                    continue;
                };
                let Some(ip) = endpoint.ip.clone() else {
                    // Pass 1 never assigned an IP here; without the key we
                    // must not guess a device.
                    continue;
                };
                if let Some(entry) = map.entries.iter().find(|e| e.ip == ip) {
                    debug!(
                        link = %link_id,
                        node = %node,
                        device = %entry.device,
                        "Assigned device name"
                    );
                    endpoint.name = Some(entry.device.clone());
                }
            }
        }
    }
}
