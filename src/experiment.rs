//! Experiment lifecycle management.
//!
//! Drives the testbed's experiment engine through its control commands on
//! the ops server: listing, creation, swap-in, and polling the reported
//! state until the experiment is active. The state machine is
//! `Absent -> Created -> SwappingIn -> Active`; state is never stored,
//! only derived from the remote status query, and a regression after
//! `Active` means someone changed the experiment behind our back.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WallConfig;
use crate::error::{Result, WallError};
use crate::executor::SharedExecutor;
use crate::parse::{self, ListingMap, ParseOutcome};
use crate::script::generate_ns_script;
use crate::topology::Topology;

/// XML-RPC client the testbed exposes on the ops server.
const TESTBED_CLIENT: &str = "/usr/testbed/bin/sslxmlrpc_client.py";

/// Wrapper for the informational testbed scripts.
const SCRIPT_WRAPPER: &str = "/usr/testbed/bin/script_wrapper.py";

/// Lifecycle state of an experiment, derived by querying the testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    /// The experiment does not exist under the project.
    Absent,

    /// Created but swapped out; no resources allocated.
    Created,

    /// Swap-in is in progress.
    SwappingIn,

    /// All nodes are provisioned and booted.
    Active,
}

impl ExperimentState {
    /// Maps a `State` field value from the status query.
    ///
    /// Returns `None` for states this crate does not model; the wait loop
    /// treats those as "not yet active".
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "activating" | "swapping" => Some(Self::SwappingIn),
            "new" | "created" | "swapped" => Some(Self::Created),
            _ => None,
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Created => "created",
            Self::SwappingIn => "swapping-in",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// Experiments visible to the configured credentials, grouped
/// project -> group -> names, as the listing command reports them.
///
/// A malformed listing degrades to an empty value scoped to the requested
/// project; an empty listing therefore does not prove that no experiments
/// exist. Callers deciding anything destructive should check
/// [`ExperimentListing::is_empty`] and treat emptiness with suspicion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentListing {
    map: ListingMap,
}

impl ExperimentListing {
    /// Wraps a parsed listing map.
    pub fn from_map(map: ListingMap) -> Self {
        Self { map }
    }

    /// An empty listing scoped to one project, the degraded shape used
    /// when the listing output cannot be parsed.
    pub fn empty_for(project: &str) -> Self {
        let mut map = ListingMap::new();
        map.insert(
            project.to_string(),
            [(project.to_string(), Vec::new())].into_iter().collect(),
        );
        Self { map }
    }

    /// Returns true if `experiment` exists under `project` in any group.
    pub fn contains(&self, project: &str, experiment: &str) -> bool {
        self.map
            .get(project)
            .map(|groups| {
                groups
                    .values()
                    .any(|names| names.iter().any(|n| n == experiment))
            })
            .unwrap_or(false)
    }

    /// Experiment names under `project`, across all groups.
    pub fn names(&self, project: &str) -> Vec<&str> {
        self.map
            .get(project)
            .into_iter()
            .flat_map(|groups| groups.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Returns true if no experiment names are present at all.
    pub fn is_empty(&self) -> bool {
        self.map.values().all(|groups| groups.values().all(Vec::is_empty))
    }
}

/// Creates, swaps in, and watches experiments on the testbed.
pub struct ExperimentManager {
    executor: SharedExecutor,
    config: WallConfig,
}

impl ExperimentManager {
    /// Creates a manager issuing commands through `executor`.
    pub fn new(executor: SharedExecutor, config: WallConfig) -> Self {
        Self { executor, config }
    }

    /// Lists the experiments visible to the configured credentials.
    ///
    /// Malformed listing output degrades to an empty listing scoped to the
    /// configured project (with a warning); transport failures propagate.
    pub async fn list_experiments(&self) -> Result<ExperimentListing> {
        let command = format!("{TESTBED_CLIENT} -m experiment getlist");
        let output = self
            .executor
            .execute(
                &self.config.ops_server(),
                &command,
                Some(self.config.command_timeout),
            )
            .await?;

        match parse::parse_experiment_listing(&output.stdout) {
            ParseOutcome::Parsed(map) => Ok(ExperimentListing::from_map(map)),
            ParseOutcome::Malformed { raw } => {
                warn!(
                    project = %self.config.project,
                    raw_len = raw.len(),
                    "Experiment listing did not parse; degrading to an empty listing"
                );
                Ok(ExperimentListing::empty_for(&self.config.project))
            }
        }
    }

    /// Creates the configured experiment from a topology.
    ///
    /// Serializes the topology to an ns-2 script, stages it in the user's
    /// home directory under a per-process name, and starts the experiment
    /// without swapping it in. Success means the start command's remote
    /// execution succeeded; reaching `Active` is verified separately by
    /// [`ExperimentManager::wait_until_active`].
    ///
    /// # Errors
    ///
    /// Returns [`WallError::AlreadyExists`] if the experiment name is
    /// already taken under the project; the start command is not issued in
    /// that case.
    pub async fn create_experiment(&self, topology: &Topology) -> Result<()> {
        let listing = self.list_experiments().await?;
        if listing.contains(&self.config.project, &self.config.experiment) {
            return Err(WallError::AlreadyExists(self.config.experiment.clone()));
        }

        let ops = self.config.ops_server();
        let script = generate_ns_script(topology, &self.config);
        let script_path = format!(
            "/users/{}/temp_ns_file.{}.ns",
            self.config.username,
            std::process::id()
        );

        self.executor
            .write_file(&ops, &script_path, &script)
            .await?;

        info!(
            project = %self.config.project,
            experiment = %self.config.experiment,
            nodes = topology.node_count(),
            links = topology.link_count(),
            "Starting experiment"
        );

        let start = format!(
            "{TESTBED_CLIENT} startexp batch=false wait=true proj=\"{}\" exp=\"{}\" \
             noswapin=true nsfilepath=\"{}\"",
            self.config.project, self.config.experiment, script_path
        );

        // Experiment creation can take minutes; this is the one command
        // that runs without a deadline.
        self.executor.execute(&ops, &start, None).await?;

        if let Err(e) = self
            .executor
            .execute(
                &ops,
                &format!("rm {script_path}"),
                Some(self.config.command_timeout),
            )
            .await
        {
            warn!(path = %script_path, error = %e, "Failed to remove staged script");
        }

        Ok(())
    }

    /// Requests a swap-in of the configured experiment.
    ///
    /// The swap itself is asynchronous on the testbed side; progress is
    /// observed by polling [`ExperimentManager::status`].
    pub async fn swap_in(&self) -> Result<()> {
        let command = format!(
            "{TESTBED_CLIENT} swapexp proj={} exp={} direction=in",
            self.config.project, self.config.experiment
        );

        info!(
            project = %self.config.project,
            experiment = %self.config.experiment,
            "Swapping experiment in"
        );

        self.executor
            .execute(
                &self.config.ops_server(),
                &command,
                Some(self.config.command_timeout),
            )
            .await?;
        Ok(())
    }

    /// Queries the experiment's current state.
    pub async fn status(&self) -> Result<ExperimentState> {
        let command = format!(
            "{SCRIPT_WRAPPER} expinfo -e{},{} -a",
            self.config.project, self.config.experiment
        );
        let output = self
            .executor
            .execute(
                &self.config.ops_server(),
                &command,
                Some(self.config.command_timeout),
            )
            .await?;

        let value = match parse::parse_status_field(&output.stdout, "State") {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Malformed { raw } => {
                return Err(WallError::parse("experiment status", raw))
            }
        };

        ExperimentState::parse(&value)
            .ok_or_else(|| WallError::parse("experiment state", value))
    }

    /// Queries state, treating an unlisted experiment as [`ExperimentState::Absent`].
    pub async fn current_state(&self) -> Result<ExperimentState> {
        let listing = self.list_experiments().await?;
        if !listing.contains(&self.config.project, &self.config.experiment) {
            return Ok(ExperimentState::Absent);
        }
        self.status().await
    }

    /// Polls until the experiment reports `active`.
    ///
    /// One failed poll (transport or parse) never terminates the wait; it
    /// counts as "not yet active" and the next attempt runs after the
    /// configured poll interval. The wait ends by reaching `Active`, by
    /// cancellation (within one poll interval, with no further remote
    /// calls), or by exhausting `max_attempts`.
    ///
    /// `max_attempts == None` polls until cancelled; pass a bound when the
    /// testbed may never converge (hardware failure, quota exhaustion).
    pub async fn wait_until_active(
        &self,
        max_attempts: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config.poll_interval;
        let mut attempt = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(WallError::Cancelled);
            }

            attempt += 1;
            match self.status().await {
                Ok(ExperimentState::Active) => {
                    info!(attempt, "Experiment is active");
                    return Ok(());
                }
                Ok(state) => {
                    debug!(attempt, state = %state, "Experiment not active yet");
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Status poll failed; treating as not active");
                }
            }

            if let Some(max) = max_attempts {
                if attempt >= max {
                    return Err(WallError::timeout(
                        self.config.ops_server(),
                        "wait until experiment active",
                        (interval.as_millis() as u64).saturating_mul(attempt as u64),
                    ));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(WallError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::executor::testing::{Call, ScriptedExecutor};
    use crate::topology::{Link, Node};

    fn config() -> WallConfig {
        WallConfig::builder("wall1.example.net")
            .credentials("alice", "pw")
            .project("rina")
            .experiment("demo")
            .image("UBUNTU18-64-STD")
            .poll_interval(Duration::from_millis(50))
            .build()
    }

    fn topology() -> Topology {
        Topology::builder()
            .node(Node::new("r2b1"))
            .node(Node::new("r3b2"))
            .link(Link::new("link7", "r2b1", "r3b2").unwrap())
            .build()
            .unwrap()
    }

    fn manager(exec: Arc<ScriptedExecutor>) -> ExperimentManager {
        ExperimentManager::new(exec, config())
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(ExperimentState::parse("active"), Some(ExperimentState::Active));
        assert_eq!(
            ExperimentState::parse("  Activating "),
            Some(ExperimentState::SwappingIn)
        );
        assert_eq!(
            ExperimentState::parse("swapped"),
            Some(ExperimentState::Created)
        );
        assert_eq!(ExperimentState::parse("panicked"), None);
    }

    #[test]
    fn test_listing_contains_across_groups() {
        let listing = ExperimentListing::from_map(
            [(
                "rina".to_string(),
                [
                    ("rina".to_string(), vec!["demo".to_string()]),
                    ("sub".to_string(), vec!["other".to_string()]),
                ]
                .into_iter()
                .collect(),
            )]
            .into_iter()
            .collect(),
        );

        assert!(listing.contains("rina", "demo"));
        assert!(listing.contains("rina", "other"));
        assert!(!listing.contains("rina", "absent"));
        assert!(!listing.contains("elsewhere", "demo"));
        assert!(!listing.is_empty());

        let mut names = listing.names("rina");
        names.sort_unstable();
        assert_eq!(names, vec!["demo", "other"]);
    }

    #[tokio::test]
    async fn test_list_experiments_parses_output() {
        let exec = Arc::new(
            ScriptedExecutor::new().on("getlist", "{'rina': {'rina': ['demo', 'staging']}}"),
        );
        let listing = manager(exec).list_experiments().await.unwrap();

        assert!(listing.contains("rina", "staging"));
    }

    #[tokio::test]
    async fn test_list_experiments_degrades_on_malformed_output() {
        let exec = Arc::new(ScriptedExecutor::new().on("getlist", "Traceback (most recent...)"));
        let listing = manager(exec).list_experiments().await.unwrap();

        assert!(listing.is_empty());
        assert!(!listing.contains("rina", "demo"));
        // The degraded listing is still scoped to the project.
        assert!(listing.names("rina").is_empty());
    }

    #[tokio::test]
    async fn test_create_experiment_stages_script_then_starts() {
        let exec = Arc::new(ScriptedExecutor::new().on("getlist", "{'rina': {'rina': []}}"));
        manager(exec.clone())
            .create_experiment(&topology())
            .await
            .unwrap();

        let calls = exec.calls();
        let expected_path = format!("/users/alice/temp_ns_file.{}.ns", std::process::id());

        assert!(matches!(
            &calls[1],
            Call::WriteFile { host, path }
                if host == "ops.wall1.example.net" && *path == expected_path
        ));
        assert!(matches!(
            &calls[2],
            Call::Execute { command, .. }
                if command.contains("startexp")
                    && command.contains("proj=\"rina\"")
                    && command.contains("exp=\"demo\"")
                    && command.contains(&expected_path)
        ));
        assert!(matches!(
            &calls[3],
            Call::Execute { command, .. } if command.starts_with("rm ")
        ));
    }

    #[tokio::test]
    async fn test_create_experiment_already_exists_skips_start() {
        let exec = Arc::new(ScriptedExecutor::new().on("getlist", "{'rina': {'rina': ['demo']}}"));
        let err = manager(exec.clone())
            .create_experiment(&topology())
            .await
            .unwrap_err();

        assert!(matches!(err, WallError::AlreadyExists(name) if name == "demo"));
        assert_eq!(exec.count_matching("startexp"), 0);
    }

    #[tokio::test]
    async fn test_current_state_absent_when_unlisted() {
        let exec = Arc::new(ScriptedExecutor::new().on("getlist", "{'rina': {'rina': []}}"));
        let state = manager(exec).current_state().await.unwrap();
        assert_eq!(state, ExperimentState::Absent);
    }

    #[tokio::test]
    async fn test_status_maps_state_field() {
        let exec = Arc::new(
            ScriptedExecutor::new().on("expinfo", "Experiment: rina/demo\nState: swapping\n"),
        );
        let state = manager(exec).status().await.unwrap();
        assert_eq!(state, ExperimentState::SwappingIn);
    }

    #[tokio::test]
    async fn test_status_malformed_is_parse_error() {
        let exec = Arc::new(ScriptedExecutor::new().on("expinfo", "no such experiment"));
        let err = manager(exec).status().await.unwrap_err();
        assert!(matches!(err, WallError::Parse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_polls_until_active() {
        let exec = Arc::new(ScriptedExecutor::new().on_sequence(
            "expinfo",
            &["State: swapping\n", "State: swapping\n", "State: active\n"],
        ));
        let cancel = CancellationToken::new();

        manager(exec.clone())
            .wait_until_active(Some(10), &cancel)
            .await
            .unwrap();

        assert_eq!(exec.count_matching("expinfo"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_tolerates_failed_polls() {
        let exec = Arc::new(ScriptedExecutor::new().on_sequence(
            "expinfo",
            &["garbage", "State: active\n"],
        ));
        let cancel = CancellationToken::new();

        manager(exec.clone())
            .wait_until_active(Some(10), &cancel)
            .await
            .unwrap();

        assert_eq!(exec.count_matching("expinfo"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_exhausts_attempts() {
        let exec = Arc::new(ScriptedExecutor::new().on("expinfo", "State: swapping\n"));
        let cancel = CancellationToken::new();

        let err = manager(exec.clone())
            .wait_until_active(Some(3), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, WallError::Timeout { .. }));
        assert_eq!(exec.count_matching("expinfo"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_cancelled_before_start() {
        let exec = Arc::new(ScriptedExecutor::new().on("expinfo", "State: swapping\n"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager(exec.clone())
            .wait_until_active(None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, WallError::Cancelled));
        assert_eq!(exec.count_matching("expinfo"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_cancelled_mid_wait() {
        let exec = Arc::new(ScriptedExecutor::new().on("expinfo", "State: swapping\n"));
        let cancel = CancellationToken::new();

        let task = {
            let exec = exec.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                manager(exec).wait_until_active(None, &cancel).await
            })
        };

        // Let a few polls happen, then cancel.
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, WallError::Cancelled));

        // No further remote calls after cancellation.
        let after_cancel = exec.count_matching("expinfo");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exec.count_matching("expinfo"), after_cancel);
    }
}
