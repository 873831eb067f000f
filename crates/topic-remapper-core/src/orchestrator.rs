//! Remapping run driver.
//!
//! A live run reads every broker's view of the topic, checks it, writes it
//! to disk, plans the move onto the requested brokers, writes the plan to
//! disk and pushes it. A file run pushes a previously written (or hand
//! edited) snapshot as-is.
//!
//! ```text
//! live: RESOLVE_TARGETS -> FETCH_SNAPSHOT -> CHECK_CONSISTENCY -> PERSIST_BEFORE
//!       -> PLAN -> PERSIST_AFTER -> APPLY -> DONE
//! file: LOAD_FILE -> CHECK_CONSISTENCY -> APPLY -> DONE
//! ```
//!
//! Any error before `APPLY` leaves every broker untouched. Nothing is retried.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::apply::{Applicator, ApplyReport};
use crate::artifact::ArtifactStore;
use crate::cluster::{BrokerAdmin, ClusterTopology};
use crate::config::RemapperConfig;
use crate::error::{ConsistencyError, PlanError, RemapError, Result};
use crate::mapping::{self, BrokerTopicView, MappingSnapshot, Planner};
use crate::metrics::RemapMetrics;

/// Longest accepted topic name.
const MAX_TOPIC_LEN: usize = 127;

/// Steps of a run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveTargets,
    FetchSnapshot,
    CheckConsistency,
    PersistBefore,
    Plan,
    PersistAfter,
    LoadFile,
    Apply,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveTargets => "RESOLVE_TARGETS",
            Self::FetchSnapshot => "FETCH_SNAPSHOT",
            Self::CheckConsistency => "CHECK_CONSISTENCY",
            Self::PersistBefore => "PERSIST_BEFORE",
            Self::Plan => "PLAN",
            Self::PersistAfter => "PERSIST_AFTER",
            Self::LoadFile => "LOAD_FILE",
            Self::Apply => "APPLY",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How the operator names the target brokers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Explicit broker names.
    Brokers(Vec<String>),
    /// Every broker of the named clusters.
    Clusters(Vec<String>),
}

/// One operator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapRequest {
    pub topic: String,
    /// Required for a live run; ignored when `map_file` is set.
    pub targets: Option<TargetSelector>,
    /// Let brokers replace whatever epoch they hold.
    pub force: bool,
    /// Apply this snapshot instead of planning one.
    pub map_file: Option<PathBuf>,
}

impl RemapRequest {
    /// A live run moving `topic` onto `targets`.
    #[must_use]
    pub fn live(topic: impl Into<String>, targets: TargetSelector) -> Self {
        Self {
            topic: topic.into(),
            targets: Some(targets),
            force: false,
            map_file: None,
        }
    }

    /// A run applying the snapshot stored at `path`.
    #[must_use]
    pub fn from_file(topic: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            targets: None,
            force: false,
            map_file: Some(path.into()),
        }
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What a completed run did.
#[derive(Debug)]
pub struct RunReport {
    pub topic: String,
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    /// Snapshot read from the cluster (live runs only).
    pub before_artifact: Option<PathBuf>,
    /// Plan written before applying (live runs only).
    pub after_artifact: Option<PathBuf>,
    /// The snapshot that was pushed.
    pub plan: MappingSnapshot,
    pub apply: ApplyReport,
}

impl RunReport {
    /// Whether every broker accepted the plan.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.apply.is_success()
    }
}

/// Drives remapping runs against a cluster.
pub struct Orchestrator<T, A> {
    topology: Arc<T>,
    admin: Arc<A>,
    store: ArtifactStore,
    planner: Planner,
    apply_timeout: Duration,
    metrics: Option<Arc<RemapMetrics>>,
}

impl<T: ClusterTopology, A: BrokerAdmin> Orchestrator<T, A> {
    /// Create a driver using the `admin` and `remap` config sections.
    #[must_use]
    pub fn new(topology: Arc<T>, admin: Arc<A>, config: &RemapperConfig) -> Self {
        Self {
            topology,
            admin,
            store: ArtifactStore::new(config.remap.artifact_dir()),
            planner: Planner::new(config.remap.block_seq_size),
            apply_timeout: config.admin.request_timeout(),
            metrics: None,
        }
    }

    /// Record run and apply metrics in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RemapMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Artifact store used by live runs.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Execute one request.
    ///
    /// The admin client is shut down when the run ends, whatever the outcome.
    /// A partially applied plan is not an error; check
    /// [`RunReport::is_success`].
    ///
    /// # Errors
    ///
    /// Returns [`RemapError`] for any failure before the apply stage,
    /// including [`PlanError::NoOp`] when there is nothing to do.
    pub async fn run(&self, request: &RemapRequest) -> Result<RunReport> {
        let mut stages = Vec::new();
        let result = match &request.map_file {
            Some(path) => self.run_from_file(request, path, &mut stages).await,
            None => self.run_live(request, &mut stages).await,
        };
        self.admin.shutdown().await;

        match result {
            Ok(report) => {
                let outcome = if report.is_success() { "success" } else { "partial" };
                self.record_run(outcome);
                Ok(report)
            }
            Err(e) => {
                let failed_in = stages.last().copied().unwrap_or(Stage::ResolveTargets);
                stages.push(Stage::Failed);
                if matches!(e, RemapError::Plan(PlanError::NoOp { .. })) {
                    info!(topic = %request.topic, stage = %failed_in, "{e}");
                    self.record_run("noop");
                } else {
                    error!(
                        topic = %request.topic,
                        stage = %failed_in,
                        stages = ?stages,
                        error = %e,
                        "remapping failed"
                    );
                    self.record_run("failed");
                }
                Err(e)
            }
        }
    }

    async fn run_live(&self, request: &RemapRequest, stages: &mut Vec<Stage>) -> Result<RunReport> {
        let topic = request.topic.as_str();

        enter(stages, Stage::ResolveTargets, topic);
        validate_topic(topic)?;
        let selector = request.targets.as_ref().ok_or_else(|| {
            RemapError::InvalidRequest("a broker or cluster selection is required unless a map file is given".to_string())
        })?;
        let mut addresses = BTreeMap::new();
        let targets = self.resolve_targets(topic, selector, &mut addresses).await?;
        info!(topic, targets = ?targets, "resolved target brokers");

        enter(stages, Stage::FetchSnapshot, topic);
        let views = self.fetch_views(topic, &mut addresses).await?;

        enter(stages, Stage::CheckConsistency, topic);
        let (epoch, total) = mapping::check(topic, &views)?;
        let snapshot = MappingSnapshot::current(topic, epoch, views);
        info!(
            topic,
            epoch,
            queues = total,
            hosting = ?snapshot.hosting_brokers(),
            "cluster views are consistent"
        );
        Planner::check_request(&snapshot, &targets)?;

        enter(stages, Stage::PersistBefore, topic);
        let before_artifact = self.store.write_artifact(&snapshot, "before")?;

        enter(stages, Stage::Plan, topic);
        let plan = self.planner.plan(topic, &snapshot, &targets)?;
        let moved = moved_queues(&snapshot, &plan)?;
        info!(
            topic,
            epoch = plan.epoch,
            queues_moved = moved,
            map_in = ?plan.map_in,
            map_out = ?plan.map_out,
            "computed remapping plan"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_plan(topic, plan.epoch, moved);
        }

        enter(stages, Stage::PersistAfter, topic);
        let after_artifact = self.store.write_artifact(&plan, "after")?;

        enter(stages, Stage::Apply, topic);
        self.resolve_all(plan.brokers.keys(), &mut addresses).await?;
        let apply = self.applicator().apply(&plan, &addresses, self.apply_timeout, request.force).await;

        enter(stages, Stage::Done, topic);
        Ok(RunReport {
            topic: topic.to_string(),
            stages: std::mem::take(stages),
            before_artifact: Some(before_artifact),
            after_artifact: Some(after_artifact),
            plan,
            apply,
        })
    }

    async fn run_from_file(&self, request: &RemapRequest, path: &Path, stages: &mut Vec<Stage>) -> Result<RunReport> {
        let topic = request.topic.as_str();

        enter(stages, Stage::LoadFile, topic);
        validate_topic(topic)?;
        if request.targets.is_some() {
            warn!(topic, "target selection is ignored when applying a map file");
        }
        let plan = ArtifactStore::read_artifact(path)?;
        if plan.topic != topic {
            return Err(RemapError::InvalidRequest(format!(
                "map file '{}' is for topic '{}', not '{topic}'",
                path.display(),
                plan.topic
            )));
        }
        info!(topic, epoch = plan.epoch, kind = ?plan.kind, path = %path.display(), "loaded mapping file");

        enter(stages, Stage::CheckConsistency, topic);
        let (epoch, _) = mapping::check(topic, &plan.brokers)?;
        if epoch != plan.epoch {
            let broker = plan.brokers.keys().next().cloned().unwrap_or_default();
            return Err(ConsistencyError::EpochMismatch {
                broker,
                expected: plan.epoch,
                found: epoch,
            }
            .into());
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_plan(topic, plan.epoch, 0);
        }

        enter(stages, Stage::Apply, topic);
        let mut addresses = BTreeMap::new();
        self.resolve_all(plan.brokers.keys(), &mut addresses).await?;
        let apply = self.applicator().apply(&plan, &addresses, self.apply_timeout, request.force).await;

        enter(stages, Stage::Done, topic);
        Ok(RunReport {
            topic: topic.to_string(),
            stages: std::mem::take(stages),
            before_artifact: None,
            after_artifact: None,
            plan,
            apply,
        })
    }

    fn applicator(&self) -> Applicator<A> {
        let applicator = Applicator::new(Arc::clone(&self.admin));
        match &self.metrics {
            Some(metrics) => applicator.with_metrics(Arc::clone(metrics)),
            None => applicator,
        }
    }

    /// Expand the selector into broker names, resolving each one.
    async fn resolve_targets(
        &self,
        topic: &str,
        selector: &TargetSelector,
        addresses: &mut BTreeMap<String, String>,
    ) -> Result<BTreeSet<String>> {
        let targets: BTreeSet<String> = match selector {
            TargetSelector::Brokers(names) => names
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            TargetSelector::Clusters(clusters) => {
                let table = self
                    .topology
                    .cluster_address_table()
                    .await
                    .map_err(RemapError::Topology)?;
                let mut brokers = BTreeSet::new();
                for cluster in clusters.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
                    match table.get(cluster) {
                        Some(members) => brokers.extend(members.iter().cloned()),
                        None => warn!(topic, cluster, "skipping unknown cluster"),
                    }
                }
                brokers
            }
        };

        if targets.is_empty() {
            return Err(RemapError::EmptyTarget {
                topic: topic.to_string(),
            });
        }
        self.resolve_all(targets.iter(), addresses).await?;
        Ok(targets)
    }

    /// Fetch the view of every broker that may host `topic`.
    async fn fetch_views(
        &self,
        topic: &str,
        addresses: &mut BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, BrokerTopicView>> {
        let brokers = self
            .topology
            .topic_brokers(topic)
            .await
            .map_err(RemapError::Topology)?;
        self.resolve_all(brokers.iter(), addresses).await?;

        let mut views = BTreeMap::new();
        for broker in brokers {
            let address = addresses.get(&broker).cloned().unwrap_or_default();
            match self.admin.fetch_topic_view(&address, topic).await {
                Ok(Some(view)) => {
                    debug!(broker = %broker, epoch = view.epoch, "fetched topic view");
                    views.insert(broker, view);
                }
                Ok(None) => debug!(broker = %broker, "broker does not host topic"),
                Err(source) => return Err(RemapError::Fetch { broker, source }),
            }
        }
        Ok(views)
    }

    async fn resolve_all<'a>(
        &self,
        brokers: impl Iterator<Item = &'a String>,
        addresses: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        for broker in brokers {
            if addresses.contains_key(broker) {
                continue;
            }
            let address = self
                .topology
                .resolve_master_address(broker)
                .await
                .ok_or_else(|| RemapError::BrokerUnresolved {
                    broker: broker.clone(),
                })?;
            addresses.insert(broker.clone(), address);
        }
        Ok(())
    }

    fn record_run(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_run(outcome);
        }
    }
}

fn enter(stages: &mut Vec<Stage>, stage: Stage, topic: &str) {
    info!(topic, stage = %stage, "entering stage");
    stages.push(stage);
}

/// Number of logical queues whose leader differs between two snapshots.
fn moved_queues(before: &MappingSnapshot, after: &MappingSnapshot) -> Result<usize> {
    let before = mapping::build_assignments(&before.brokers)?;
    let after = mapping::build_assignments(&after.brokers)?;
    Ok(after
        .iter()
        .filter(|(queue, a)| before.get(queue).map_or(true, |b| b.leader != a.leader))
        .count())
}

fn topic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[%|a-zA-Z0-9_-]+$").expect("topic pattern should compile"))
}

/// Check a topic name against the broker's naming rules.
///
/// # Errors
///
/// Returns [`RemapError::InvalidTopic`] for empty, overlong or
/// badly-charactered names.
pub fn validate_topic(topic: &str) -> Result<()> {
    let invalid = |reason: &str| RemapError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };
    if topic.is_empty() {
        return Err(invalid("topic name is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("topic name is longer than 127 characters"));
    }
    if !topic_pattern().is_match(topic) {
        return Err(invalid("only letters, digits, '%', '|', '-' and '_' are allowed"));
    }
    Ok(())
}
