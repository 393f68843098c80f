//! Testbed orchestration for RINA experiments on an Emulab-style wall.
//!
//! The crate takes a caller-supplied logical topology and drives it onto a
//! remote testbed end to end: it generates the provisioning script, creates
//! and swaps in the experiment, waits for the nodes to come up, discovers
//! the physical interface assignments, and finally prepares each node for
//! the protocol stack (VLAN sub-interfaces, kernel modules).
//!
//! The pieces compose around two seams:
//!
//! - [`RemoteExecutor`] abstracts the command channel to the ops server
//!   and the nodes; [`SshExecutor`] is the production transport and tests
//!   substitute scripted ones.
//! - [`WallConfig`] carries the testbed coordinates and tunables and is
//!   threaded explicitly through every operation.
//!
//! A typical provisioning run:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vwall_orchestrator::{
//!     ExperimentManager, Link, Node, Provisioner, SshExecutor, Topology,
//!     TopologyDiscoverer, WallConfig,
//! };
//!
//! # async fn run() -> vwall_orchestrator::Result<()> {
//! let config = WallConfig::builder("wall1.ilabt.iminds.be")
//!     .credentials("alice", "secret")
//!     .project("rina")
//!     .experiment("demo")
//!     .image("UBUNTU18-64-STD")
//!     .build();
//!
//! let mut topology = Topology::builder()
//!     .node(Node::new("r2b1"))
//!     .node(Node::new("r3b2"))
//!     .link(Link::new("link7", "r2b1", "r3b2")?)
//!     .build()?;
//!
//! let executor = Arc::new(SshExecutor::new(&config));
//!
//! let manager = ExperimentManager::new(executor.clone(), config.clone());
//! manager.create_experiment(&topology).await?;
//! manager.swap_in().await?;
//! manager
//!     .wait_until_active(Some(100), &CancellationToken::new())
//!     .await?;
//!
//! let discoverer = TopologyDiscoverer::new(executor.clone(), config.clone());
//! discoverer.discover(&mut topology).await?.require_complete()?;
//!
//! let provisioner = Provisioner::new(executor, config);
//! let nodes: Vec<String> = topology.nodes.iter().map(|n| n.name.clone()).collect();
//! provisioner.insert_modules(&nodes).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod experiment;
pub mod parse;
pub mod provision;
pub mod script;
pub mod topology;

pub use config::{WallConfig, WallConfigBuilder};
pub use discovery::{DiscoveryReport, TopologyDiscoverer};
pub use error::{Result, WallError};
pub use executor::{ExecOutput, RemoteExecutor, SharedExecutor, SshExecutor};
pub use experiment::{ExperimentListing, ExperimentManager, ExperimentState};
pub use provision::{NodeReport, Provisioner, StepReport};
pub use script::generate_ns_script;
pub use topology::{Interface, Link, Node, Topology};
