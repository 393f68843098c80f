//! Post-provisioning node configuration.
//!
//! After discovery the links are resolved down to physical devices and the
//! nodes can be prepared for the protocol stack: a tagged VLAN
//! sub-interface per link endpoint, and the kernel modules the stack
//! needs. Both are best-effort sequences of independent remote commands.
//! A failed step is recorded and the sequence continues; the caller reads
//! the per-step outcomes off the returned report instead of a single
//! pass/fail.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::WallConfig;
use crate::error::Result;
use crate::executor::SharedExecutor;

/// Kernel modules required by the protocol stack, in load order. The shim
/// must be present before the normal process module, which in turn must
/// precede the policy plugin.
pub const KERNEL_MODULES: [&str; 3] = ["shim-eth-vlan", "normal-ipcp", "rina-default-plugin"];

/// Outcome of one remote configuration command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// The command that was issued.
    pub command: String,

    /// The transport-level failure, if any.
    pub error: Option<String>,
}

impl StepReport {
    /// Returns true if the step completed without a transport failure.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated outcome of a configuration sequence on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// The node the sequence ran against.
    pub node: String,

    /// Per-command outcomes, in issue order.
    pub steps: Vec<StepReport>,
}

impl NodeReport {
    fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            steps: Vec::new(),
        }
    }

    /// Returns true if every step on this node succeeded.
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(StepReport::succeeded)
    }

    /// Returns the steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.succeeded())
    }
}

/// Issues VLAN and kernel-module configuration against provisioned nodes.
pub struct Provisioner {
    executor: SharedExecutor,
    config: WallConfig,
}

impl Provisioner {
    /// Creates a provisioner issuing commands through `executor`.
    pub fn new(executor: SharedExecutor, config: WallConfig) -> Self {
        Self { executor, config }
    }

    /// Creates and enables a tagged VLAN sub-interface on `node`.
    ///
    /// Issues four commands in order: add `device.vlan_id` as a VLAN
    /// sub-interface of `device`, bring it up, and disable hardware VLAN
    /// offload on `device` in both directions. Every command is issued
    /// even when an earlier one failed; the per-step outcomes land in the
    /// returned report.
    pub async fn setup_vlan(&self, node: &str, vlan_id: u16, device: &str) -> NodeReport {
        let tagged = format!("{device}.{vlan_id}");
        let commands = [
            format!("ip link add link {device} name {tagged} type vlan id {vlan_id}"),
            format!("ip link set dev {tagged} up"),
            format!("ethtool -K {device} rxvlan off"),
            format!("ethtool -K {device} txvlan off"),
        ];

        info!(node = %node, vlan = vlan_id, device = %device, "Setting up VLAN sub-interface");
        self.run_sequence(node, &commands).await
    }

    /// Loads the kernel modules on every node in `nodes`.
    ///
    /// Nodes are configured concurrently, bounded by
    /// `config.max_sessions`; within a node the modules load strictly in
    /// [`KERNEL_MODULES`] order. A failed node does not stop the others.
    /// Reports come back in the order of `nodes`.
    pub async fn insert_modules(&self, nodes: &[String]) -> Vec<NodeReport> {
        let commands: Vec<String> = KERNEL_MODULES
            .iter()
            .map(|module| format!("modprobe {module}"))
            .collect();

        let reports: Vec<NodeReport> = stream::iter(nodes.iter().cloned())
            .map(|node| {
                let commands = commands.clone();
                async move {
                    info!(node = %node, "Loading kernel modules");
                    self.run_sequence(&node, &commands).await
                }
            })
            .buffered(self.config.max_sessions)
            .collect()
            .await;

        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        if failed > 0 {
            warn!(
                nodes = reports.len(),
                failed, "Module insertion finished with failures"
            );
        }

        reports
    }

    /// Runs `commands` on `node` in order, continuing past failures.
    async fn run_sequence(&self, node: &str, commands: &[String]) -> NodeReport {
        let host = self.config.node_host(node);
        let mut report = NodeReport::new(node);

        for command in commands {
            let outcome: Result<_> = self
                .executor
                .execute(&host, command, Some(self.config.command_timeout))
                .await;

            let error = match outcome {
                Ok(_) => None,
                Err(e) => {
                    warn!(node = %node, command = %command, error = %e, "Configuration step failed");
                    Some(e.to_string())
                }
            };

            report.steps.push(StepReport {
                command: command.clone(),
                error,
            });
        }

        report
    }
}
