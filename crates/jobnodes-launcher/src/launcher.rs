//! Job-backed node lifecycle.
//!
//! A [`JobLauncher`] materializes a node by running its provision job and
//! tears it down by running its decommission job. Both jobs receive the
//! node's identity as string parameters and their logs are copied into the
//! caller's [`TaskListener`].
//!
//! ```text
//! launch:          node, label, revision, gitUrl, image, gitRevision
//!                  find job ─▶ schedule ─▶ wait ─▶ stream log ─▶ check result
//!
//! after_disconnect (only while the slot still accepts tasks):
//!                  stop accepting, record termination
//!                  node, label, revision
//!                  find job ─▶ schedule ─▶ wait ─▶ stream log ─▶ check result
//!                  remove node from inventory
//!                  on job error: accept tasks again
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobnodes_core::*;

use crate::error::{LaunchError, LaunchResult};

/// Pause before re-reading a job log after a failed read.
const LOG_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Host dispatch for node state transitions.
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Bring the node behind `slot` online.
    async fn launch(&self, slot: &dyn ComputeSlot, listener: &dyn TaskListener) -> LaunchResult<()>;

    /// Tear the node down after its connection ended.
    async fn after_disconnect(&self, slot: &dyn ComputeSlot, listener: &dyn TaskListener) -> LaunchResult<()>;
}

pub struct JobLauncher {
    spec: LauncherSpec,
    jobs: Arc<dyn JobRunner>,
    inventory: Arc<dyn NodeInventory>,
    log_retry_delay: Duration,
}

impl JobLauncher {
    pub fn new(spec: LauncherSpec, jobs: Arc<dyn JobRunner>, inventory: Arc<dyn NodeInventory>) -> Self {
        Self {
            spec,
            jobs,
            inventory,
            log_retry_delay: LOG_RETRY_DELAY,
        }
    }

    /// Launcher for a node created by the provisioner.
    pub fn for_node(node: &NodeDescriptor, jobs: Arc<dyn JobRunner>, inventory: Arc<dyn NodeInventory>) -> Self {
        Self::new(node.launcher.clone(), jobs, inventory)
    }

    pub fn with_log_retry_delay(mut self, delay: Duration) -> Self {
        self.log_retry_delay = delay;
        self
    }

    pub fn spec(&self) -> &LauncherSpec {
        &self.spec
    }

    /// Parameters of the provision job. Empty values are omitted.
    pub fn launch_parameters(&self, node: &str) -> Vec<JobParameter> {
        let spec = &self.spec;
        parameters(&[
            ("node", node),
            ("label", spec.label.as_str()),
            ("revision", spec.revision.as_str()),
            ("gitUrl", spec.git_url.as_str()),
            ("image", spec.image.as_str()),
            ("gitRevision", spec.git_revision.as_str()),
        ])
    }

    /// Parameters of the decommission job. Empty values are omitted.
    pub fn teardown_parameters(&self, node: &str) -> Vec<JobParameter> {
        parameters(&[
            ("node", node),
            ("label", self.spec.label.as_str()),
            ("revision", self.spec.revision.as_str()),
        ])
    }

    /// Run `job_name` to completion, streaming its log into `listener`.
    async fn run_job(
        &self,
        job_name: &str,
        node: &str,
        params: &[JobParameter],
        listener: &dyn TaskListener,
    ) -> LaunchResult<()> {
        let job = self
            .jobs
            .find_job(job_name)
            .await
            .ok_or_else(|| LaunchError::JobNotFound {
                job: job_name.to_string(),
            })?;

        info!(%node, job = %job.display_name, "triggering job");
        listener.info(&format!("Trigger job {} for agent {node}.", job.display_name));

        let scheduled = self
            .jobs
            .schedule(&job, params)
            .await
            .map_err(|source| LaunchError::Schedule {
                job: job.name.clone(),
                source,
            })?;
        let Some(run) = scheduled else {
            debug!(%node, job = %job.name, "host did not schedule a run");
            return Ok(());
        };

        let url = run.url();
        listener.info(&format!("Triggered build: {url}"));

        let result = run.wait().await.map_err(|source| LaunchError::Wait {
            job: job.name.clone(),
            source,
        })?;
        stream_log(run.as_ref(), listener, self.log_retry_delay).await;

        if !result.is_success() {
            return Err(LaunchError::JobFailed {
                job: job.name,
                url,
                result,
            });
        }
        info!(%node, job = %job.name, %result, "job finished");
        Ok(())
    }

    async fn decommission(&self, slot: &dyn ComputeSlot, listener: &dyn TaskListener) -> LaunchResult<()> {
        let node = slot.name();
        let params = self.teardown_parameters(node);
        self.run_job(&self.spec.decommission_job, node, &params, listener)
            .await
    }
}

#[async_trait]
impl NodeLifecycle for JobLauncher {
    async fn launch(&self, slot: &dyn ComputeSlot, listener: &dyn TaskListener) -> LaunchResult<()> {
        let node = slot.name();
        info!(%node, label = %self.spec.label, "launching agent");
        listener.info(&format!("Launch agent {node}."));

        let params = self.launch_parameters(node);
        let result = self
            .run_job(&self.spec.provision_job, node, &params, listener)
            .await;
        if let Err(e) = &result {
            warn!(%node, error = %e, "launch failed");
            listener.error(&e.to_string());
        }
        result
    }

    async fn after_disconnect(&self, slot: &dyn ComputeSlot, listener: &dyn TaskListener) -> LaunchResult<()> {
        let node = slot.name();
        if !slot.is_accepting_tasks() {
            info!(%node, "decommission already in progress");
            return Ok(());
        }

        info!(%node, label = %self.spec.label, "stopping agent");
        slot.set_accepting_tasks(false);
        slot.record_termination();

        if let Err(e) = self.decommission(slot, listener).await {
            slot.set_accepting_tasks(true);
            warn!(%node, error = %e, "decommission failed, node accepts tasks again");
            listener.error(&e.to_string());
            return Err(e);
        }

        if let Err(source) = self.inventory.remove_node(node).await {
            let e = LaunchError::RemoveNode {
                node: node.to_string(),
                source,
            };
            warn!(%node, error = %e, "node removal failed");
            listener.error(&e.to_string());
            return Err(e);
        }
        info!(%node, "agent removed");
        Ok(())
    }
}

fn parameters(values: &[(&str, &str)]) -> Vec<JobParameter> {
    values
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| JobParameter {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Copy the whole log of `run` into `listener`.
///
/// Failed reads are retried after `retry_delay` until the log is consumed.
async fn stream_log(run: &dyn JobRun, listener: &dyn TaskListener, retry_delay: Duration) {
    let length = loop {
        match run.log_length().await {
            Ok(length) => break length,
            Err(e) => {
                warn!(url = %run.url(), error = %e, "reading log length failed, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    };

    let mut offset = 0;
    while offset < length {
        match run.write_log(offset, listener).await {
            Ok(next) if next > offset => offset = next,
            Ok(_) => {
                warn!(url = %run.url(), offset, length, "log stopped advancing");
                break;
            }
            Err(e) => {
                warn!(url = %run.url(), offset, error = %e, "reading log failed, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
