//! Testbed connection configuration.
//!
//! All operations in this crate borrow a [`WallConfig`]; nothing reads
//! ambient or global state. Loading credentials from files or the
//! environment is the caller's concern.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection parameters for a Virtual Wall style testbed.
///
/// Immutable once built. The configuration identifies the wall itself,
/// the credentials used for every SSH session, the project/experiment pair
/// being driven, and the OS image assigned to provisioned nodes.
///
/// # Examples
///
/// ```
/// use vwall_orchestrator::config::WallConfig;
///
/// let config = WallConfig::builder("wall1.ilabt.iminds.be")
///     .credentials("alice", "secret")
///     .project("rina")
///     .experiment("two-routers")
///     .image("UBUNTU18-64-STD")
///     .build();
///
/// assert_eq!(config.ops_server(), "ops.wall1.ilabt.iminds.be");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct WallConfig {
    /// Hostname of the wall, e.g. `wall1.ilabt.iminds.be`.
    pub wall: String,

    /// Username for SSH sessions on the ops server and the nodes.
    pub username: String,

    /// Password for SSH sessions.
    pub password: String,

    /// Project the experiment belongs to.
    pub project: String,

    /// Experiment name.
    pub experiment: String,

    /// OS image assigned to every node in the generated script.
    pub image: String,

    /// Deadline applied to ordinary remote commands.
    pub command_timeout: Duration,

    /// Interval between experiment status polls.
    pub poll_interval: Duration,

    /// Maximum number of concurrent per-node SSH sessions during
    /// discovery and post-provisioning.
    pub max_sessions: usize,
}

impl WallConfig {
    /// Creates a new configuration builder for the given wall.
    pub fn builder(wall: impl Into<String>) -> WallConfigBuilder {
        WallConfigBuilder::new(wall)
    }

    /// Returns the ops-server name for this wall.
    pub fn ops_server(&self) -> String {
        format!("ops.{}", self.wall)
    }

    /// Returns the fully qualified hostname of a provisioned node.
    ///
    /// The testbed names nodes `<node>.<experiment>.<project>.<wall>` once
    /// the experiment is swapped in.
    pub fn node_host(&self, node: &str) -> String {
        format!("{}.{}.{}.{}", node, self.experiment, self.project, self.wall)
    }
}

impl fmt::Debug for WallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WallConfig")
            .field("wall", &self.wall)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project", &self.project)
            .field("experiment", &self.experiment)
            .field("image", &self.image)
            .field("command_timeout", &self.command_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

/// Builder for [`WallConfig`].
#[derive(Debug)]
pub struct WallConfigBuilder {
    wall: String,
    username: String,
    password: String,
    project: String,
    experiment: String,
    image: String,
    command_timeout: Duration,
    poll_interval: Duration,
    max_sessions: usize,
}

impl WallConfigBuilder {
    /// Creates a new builder with default timeouts.
    pub fn new(wall: impl Into<String>) -> Self {
        Self {
            wall: wall.into(),
            username: String::new(),
            password: String::new(),
            project: String::new(),
            experiment: String::new(),
            image: String::new(),
            command_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(3),
            max_sessions: 8,
        }
    }

    /// Sets the SSH credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the project name.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Sets the experiment name.
    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    /// Sets the default node OS image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets the deadline for ordinary remote commands.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the interval between experiment status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum number of concurrent per-node sessions.
    pub fn max_sessions(mut self, limit: usize) -> Self {
        self.max_sessions = limit.max(1);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> WallConfig {
        WallConfig {
            wall: self.wall,
            username: self.username,
            password: self.password,
            project: self.project,
            experiment: self.experiment,
            image: self.image,
            command_timeout: self.command_timeout,
            poll_interval: self.poll_interval,
            max_sessions: self.max_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WallConfig {
        WallConfig::builder("wall2.ilabt.iminds.be")
            .credentials("alice", "hunter2")
            .project("rina")
            .experiment("demo")
            .image("UBUNTU18-64-STD")
            .build()
    }

    #[test]
    fn test_ops_server() {
        assert_eq!(config().ops_server(), "ops.wall2.ilabt.iminds.be");
    }

    #[test]
    fn test_node_host() {
        assert_eq!(
            config().node_host("r2b1"),
            "r2b1.demo.rina.wall2.ilabt.iminds.be"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", config());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_max_sessions_floor() {
        let config = WallConfig::builder("w").max_sessions(0).build();
        assert_eq!(config.max_sessions, 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = config();
        let json = serde_json::to_string(&config).unwrap();
        let back: WallConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.wall, config.wall);
        assert_eq!(back.password, config.password);
        assert_eq!(back.poll_interval, config.poll_interval);
    }
}
