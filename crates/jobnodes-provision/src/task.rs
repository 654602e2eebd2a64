//! Node creation — builds a worker node for a label and registers it.
//!
//! The [`Provisioner`] hands each request to a [`NodeCreationTask`] on the
//! bounded [`WorkerPool`] and immediately returns the [`PlannedCapacity`]
//! backed by the task's future. The task:
//!
//! ```text
//! name      = <label>-<6 hex chars>
//! launcher  = configured templates resolved for the label
//! retention = on demand, idle delay random in [0, max_idle_time)
//! complete future            (observers may see the node before the host)
//! register with retry        (10 attempts, linear backoff)
//! settle registration        (the ledger stops counting the promise)
//! on error: fail open cells, take the slot offline, report
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info};
use uuid::Uuid;

use jobnodes_core::*;

use crate::error::{ProvisionError, ProvisionResult};
use crate::future::NodeOutcome;
use crate::planned::{CreationSignals, PlannedCapacity};
use crate::pool::WorkerPool;
use crate::retry::{register_with_retry, RetryPolicy};

/// Something that can start building a node for a label.
pub trait NodeRequester: Send + Sync {
    /// Start creating a node and return the capacity it promises. Must not
    /// wait for the node itself.
    fn request_node(
        &self,
        label: &Label,
        config: &Arc<ProvisionerConfig>,
        executors: u32,
    ) -> ProvisionResult<PlannedCapacity>;
}

/// Submits node creation tasks to a worker pool.
pub struct Provisioner {
    pool: WorkerPool,
    jobs: Arc<dyn JobRunner>,
    inventory: Arc<dyn NodeInventory>,
    retry: RetryPolicy,
}

impl Provisioner {
    pub fn new(pool: WorkerPool, jobs: Arc<dyn JobRunner>, inventory: Arc<dyn NodeInventory>) -> Self {
        Self {
            pool,
            jobs,
            inventory,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the registration retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl NodeRequester for Provisioner {
    fn request_node(
        &self,
        label: &Label,
        config: &Arc<ProvisionerConfig>,
        executors: u32,
    ) -> ProvisionResult<PlannedCapacity> {
        if executors == 0 {
            return Err(ProvisionError::InvalidConfig(
                "executors_per_new_node must be greater than zero".to_string(),
            ));
        }
        info!(%label, executors, "asked to provision node");

        let (signals, planned) = PlannedCapacity::pending(label.clone(), executors);
        let task = NodeCreationTask {
            label: label.clone(),
            config: Arc::clone(config),
            executors,
            jobs: Arc::clone(&self.jobs),
            inventory: Arc::clone(&self.inventory),
            retry: self.retry,
            signals,
        };
        // Detached: the task reports its own outcome through the future.
        drop(self.pool.submit(task.run()));
        Ok(planned)
    }
}

/// One asynchronous node build.
pub struct NodeCreationTask {
    label: Label,
    config: Arc<ProvisionerConfig>,
    executors: u32,
    jobs: Arc<dyn JobRunner>,
    inventory: Arc<dyn NodeInventory>,
    retry: RetryPolicy,
    signals: CreationSignals,
}

impl NodeCreationTask {
    pub fn new(
        label: Label,
        config: Arc<ProvisionerConfig>,
        executors: u32,
        jobs: Arc<dyn JobRunner>,
        inventory: Arc<dyn NodeInventory>,
        signals: CreationSignals,
    ) -> Self {
        Self {
            label,
            config,
            executors,
            jobs,
            inventory,
            retry: RetryPolicy::default(),
            signals,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build, publish and register the node.
    pub async fn run(self) -> NodeOutcome {
        let mut created = None;
        match self.create(&mut created).await {
            Ok(node) => Ok(node),
            Err(e) => {
                let e = Arc::new(e);
                error!(label = %self.label, node = ?created, error = %e, "error in provisioning");
                self.signals.fail(Arc::clone(&e));
                if let Some(name) = created.as_deref()
                    && let Some(slot) = self.inventory.compute_slot(name).await
                {
                    slot.disconnect(OfflineCause::LaunchFailed);
                }
                Err(e)
            }
        }
    }

    async fn create(&self, created: &mut Option<String>) -> ProvisionResult<NodeDescriptor> {
        let node =
            build_descriptor(&self.label, &self.config, self.executors, self.jobs.as_ref()).await?;
        *created = Some(node.name.clone());

        // Publish before registering so the scheduler can count the node now.
        self.signals.published.complete(node.clone());

        register_with_retry(self.inventory.as_ref(), &node, &self.retry).await?;
        self.signals.registered.complete(node.clone());
        info!(label = %self.label, node = %node.name, executors = node.num_executors, "node registered");
        Ok(node)
    }
}

/// Build the descriptor of a new node for `label`.
pub async fn build_descriptor(
    label: &Label,
    config: &ProvisionerConfig,
    executors: u32,
    jobs: &dyn JobRunner,
) -> ProvisionResult<NodeDescriptor> {
    let idle_delay = random_idle_delay(config.max_idle_time)?;
    let launcher = build_launcher(label, config, jobs).await;

    Ok(NodeDescriptor {
        name: generate_node_name(label),
        description: format!("Agent [{label}]"),
        label: label.clone(),
        mode: NodeMode::Exclusive,
        num_executors: executors,
        remote_fs: config.agent_work_dir.clone(),
        retention: RetentionPolicy::Demand {
            in_demand_delay: Duration::ZERO,
            idle_delay,
        },
        launcher,
    })
}

/// Resolve the launcher settings for `label`.
///
/// The provision job is the label-specific name when such a job exists,
/// otherwise the configured name as-is.
pub async fn build_launcher(label: &Label, config: &ProvisionerConfig, jobs: &dyn JobRunner) -> LauncherSpec {
    let mut provision_job = config.to_provision_job(label);
    if jobs.find_job(&provision_job).await.is_none() {
        debug!(%label, job = %provision_job, fallback = %config.agent_provision_job, "label-specific provision job not found");
        provision_job = config.agent_provision_job.clone();
    }

    LauncherSpec {
        git_url: config.to_git_url(label),
        revision: config.revision.clone(),
        label: label.to_string(),
        image: config.to_agent_image(label),
        provision_job,
        decommission_job: config.to_decommission_job(label),
        git_revision: config.git_revision.clone(),
    }
}

/// `<label>-<6 hex chars>`.
pub fn generate_node_name(label: &Label) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{label}-{}", &id[..6])
}

fn random_idle_delay(max_idle_secs: u32) -> ProvisionResult<Duration> {
    if max_idle_secs == 0 {
        return Err(ProvisionError::InvalidConfig(
            "max_idle_time must be greater than zero".to_string(),
        ));
    }
    let secs = rand::rng().random_range(0..max_idle_secs);
    Ok(Duration::from_secs(u64::from(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Job runner that only answers lookups.
    struct KnownJobs(HashSet<String>);

    #[async_trait]
    impl JobRunner for KnownJobs {
        async fn find_job(&self, name: &str) -> Option<JobRef> {
            self.0.contains(name).then(|| JobRef {
                name: name.to_string(),
                display_name: name.to_string(),
            })
        }

        async fn schedule(
            &self,
            _job: &JobRef,
            _parameters: &[JobParameter],
        ) -> HostResult<Option<Arc<dyn JobRun>>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct Slot {
        cause: Mutex<Option<OfflineCause>>,
        accepting: AtomicBool,
    }

    impl ComputeSlot for Slot {
        fn name(&self) -> &str {
            "slot"
        }
        fn is_accepting_tasks(&self) -> bool {
            self.accepting.load(Ordering::SeqCst)
        }
        fn set_accepting_tasks(&self, accepting: bool) {
            self.accepting.store(accepting, Ordering::SeqCst);
        }
        fn record_termination(&self) {}
        fn disconnect(&self, cause: OfflineCause) {
            *self.cause.lock().unwrap() = Some(cause);
        }
    }

    /// Inventory that either accepts or rejects every registration.
    struct Inventory {
        fail: bool,
        calls: AtomicU32,
        added: Mutex<Vec<String>>,
        slot: Arc<Slot>,
    }

    impl Inventory {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicU32::new(0),
                added: Mutex::new(Vec::new()),
                slot: Arc::new(Slot::default()),
            }
        }
    }

    #[async_trait]
    impl NodeInventory for Inventory {
        async fn add_node(&self, node: &NodeDescriptor) -> HostResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HostError::Registration("duplicate entry".to_string()));
            }
            self.added.lock().unwrap().push(node.name.clone());
            Ok(())
        }

        async fn remove_node(&self, _name: &str) -> HostResult<()> {
            Ok(())
        }

        async fn compute_slot(&self, _name: &str) -> Option<Arc<dyn ComputeSlot>> {
            let slot: Arc<dyn ComputeSlot> = self.slot.clone();
            Some(slot)
        }
    }

    fn test_config() -> ProvisionerConfig {
        ProvisionerConfig {
            enabled: true,
            agent_provision_job: "AgentProvision{_:label}".to_string(),
            agent_decommission_job: "AgentDecommission".to_string(),
            agent_image: "registry.local/agent-{label}".to_string(),
            agent_work_dir: "/home/agent".to_string(),
            git_url: "https://git.local/{label}.git".to_string(),
            git_revision: "main".to_string(),
            revision: "42".to_string(),
            max_idle_time: 30,
            ..ProvisionerConfig::default()
        }
    }

    #[test]
    fn node_names_are_label_prefixed_and_unique() {
        let label = Label::from("agent");
        let a = generate_node_name(&label);
        let b = generate_node_name(&label);
        assert!(a.starts_with("agent-"));
        assert_eq!(a.len(), "agent-".len() + 6);
        assert!(a["agent-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn idle_delay_is_bounded() {
        for _ in 0..100 {
            let d = random_idle_delay(5).unwrap();
            assert!(d < Duration::from_secs(5));
        }
        assert!(matches!(random_idle_delay(0), Err(ProvisionError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn launcher_prefers_label_specific_provision_job() {
        let config = test_config();
        let label = Label::from("linux");

        let jobs = KnownJobs(HashSet::from(["AgentProvision_linux".to_string()]));
        let launcher = build_launcher(&label, &config, &jobs).await;
        assert_eq!(launcher.provision_job, "AgentProvision_linux");
        assert_eq!(launcher.decommission_job, "AgentDecommission");
        assert_eq!(launcher.image, "registry.local/agent-linux");
        assert_eq!(launcher.git_url, "https://git.local/linux.git");
        assert_eq!(launcher.revision, "42");
        assert_eq!(launcher.git_revision, "main");
        assert_eq!(launcher.label, "linux");

        let jobs = KnownJobs(HashSet::new());
        let launcher = build_launcher(&label, &config, &jobs).await;
        assert_eq!(launcher.provision_job, "AgentProvision{_:label}");
    }

    #[tokio::test]
    async fn descriptor_is_exclusive_with_demand_retention() {
        let config = test_config();
        let jobs = KnownJobs(HashSet::new());
        let node = build_descriptor(&Label::from("agent"), &config, 2, &jobs)
            .await
            .unwrap();

        assert_eq!(node.description, "Agent [agent]");
        assert_eq!(node.mode, NodeMode::Exclusive);
        assert_eq!(node.num_executors, 2);
        assert_eq!(node.remote_fs, "/home/agent");
        match node.retention {
            RetentionPolicy::Demand { in_demand_delay, idle_delay } => {
                assert_eq!(in_demand_delay, Duration::ZERO);
                assert!(idle_delay < Duration::from_secs(30));
            }
            other => panic!("unexpected retention {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_completes_future_and_registers() {
        let inventory = Arc::new(Inventory::new(false));
        let (signals, planned) = PlannedCapacity::pending(Label::from("agent"), 1);
        let task = NodeCreationTask::new(
            Label::from("agent"),
            Arc::new(test_config()),
            1,
            Arc::new(KnownJobs(HashSet::new())),
            inventory.clone(),
            signals,
        );

        let node = task.run().await.unwrap();
        assert_eq!(planned.future.wait().await.unwrap(), node);
        assert_eq!(planned.registration.wait().await.unwrap(), node);
        assert!(planned.is_settled());
        assert_eq!(*inventory.added.lock().unwrap(), vec![node.name.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_failure_takes_slot_offline() {
        let inventory = Arc::new(Inventory::new(true));
        let (signals, planned) = PlannedCapacity::pending(Label::from("agent"), 1);
        let task = NodeCreationTask::new(
            Label::from("agent"),
            Arc::new(test_config()),
            1,
            Arc::new(KnownJobs(HashSet::new())),
            inventory.clone(),
            signals,
        );

        let err = task.run().await.unwrap_err();
        assert!(matches!(*err, ProvisionError::Registration { attempts: 10, .. }));
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 10);
        // The future was already completed before registration failed.
        assert!(planned.future.wait().await.is_ok());
        let err = planned.registration.wait().await.unwrap_err();
        assert!(matches!(*err, ProvisionError::Registration { .. }));
        assert_eq!(
            *inventory.slot.cause.lock().unwrap(),
            Some(OfflineCause::LaunchFailed)
        );
    }

    #[tokio::test]
    async fn construction_failure_fails_future() {
        let inventory = Arc::new(Inventory::new(false));
        let (signals, planned) = PlannedCapacity::pending(Label::from("agent"), 1);
        let config = ProvisionerConfig {
            max_idle_time: 0,
            ..test_config()
        };
        let task = NodeCreationTask::new(
            Label::from("agent"),
            Arc::new(config),
            1,
            Arc::new(KnownJobs(HashSet::new())),
            inventory.clone(),
            signals,
        );

        assert!(task.run().await.is_err());
        let err = planned.future.wait().await.unwrap_err();
        assert!(matches!(*err, ProvisionError::InvalidConfig(_)));
        assert!(planned.registration.wait().await.is_err());
        assert!(inventory.added.lock().unwrap().is_empty());
        // No descriptor was built, so no slot was touched.
        assert!(inventory.slot.cause.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn provisioner_returns_planned_capacity_immediately() {
        let inventory = Arc::new(Inventory::new(false));
        let provisioner = Provisioner::new(
            WorkerPool::new(2).unwrap(),
            Arc::new(KnownJobs(HashSet::new())),
            inventory.clone(),
        );
        let config = Arc::new(test_config());

        let planned = provisioner
            .request_node(&Label::from("agent"), &config, 1)
            .unwrap();
        assert_eq!(planned.label, Label::from("agent"));
        assert_eq!(planned.executors, 1);

        let node = planned.future.wait().await.unwrap();
        assert!(node.name.starts_with("agent-"));
        assert_eq!(planned.registration.wait().await.unwrap(), node);
        assert_eq!(*inventory.added.lock().unwrap(), vec![node.name.clone()]);

        let err = provisioner
            .request_node(&Label::from("agent"), &config, 0)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
    }
}
