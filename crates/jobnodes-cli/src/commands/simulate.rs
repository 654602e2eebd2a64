//! `jobnodes simulate` — run the provisioner against the in-memory host.
//!
//! The provision and decommission jobs the label resolves to are defined
//! as succeeding scripted jobs. Each round ticks the label's provisioner,
//! waits for the requested nodes to register and launches them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{info, warn};

use jobnodes_core::{Label, Severity, SharedConfig, SlotState, TracingListener};
use jobnodes_host::{HostPlatform, JobScript};
use jobnodes_provision::{NodeProvisioner, OnDemandStrategy, Provisioner, ProvisionerRegistry, WorkerPool};
use jobnodes_trigger::FastReviewTrigger;

use super::config::load;

/// How long to wait for requested nodes to register.
const REGISTRATION_WAIT: Duration = Duration::from_secs(5);

pub struct SimulateOptions {
    pub label: String,
    pub queue: u32,
    pub ticks: u32,
    pub workers: usize,
}

pub async fn run(path: &Path, options: SimulateOptions) -> Result<()> {
    let config = load(path)?;
    if let Some(error) = config.validate().into_iter().find(|f| f.severity == Severity::Error) {
        bail!("invalid configuration: {}: {}", error.field, error.message);
    }
    let label = Label::from(options.label.as_str());

    let platform = HostPlatform::new();
    platform.define_job(
        config.to_provision_job(&label),
        JobScript::succeeding("provision", format!("provisioned node for {label}\n")),
    );
    platform.define_job(
        config.agent_provision_job.clone(),
        JobScript::succeeding("provision", format!("provisioned node for {label}\n")),
    );
    platform.define_job(
        config.to_decommission_job(&label),
        JobScript::succeeding("decommission", format!("released node for {label}\n")),
    );

    let provisioner = Provisioner::new(WorkerPool::new(options.workers)?, platform.clone(), platform.clone());
    let registry = Arc::new(ProvisionerRegistry::new(
        platform.clone(),
        vec![Arc::new(OnDemandStrategy::new(Arc::new(provisioner)))],
        SharedConfig::new(config),
        Duration::from_secs(3600),
    ));
    platform.add_queue_listener(Arc::new(FastReviewTrigger::new(registry.clone())));

    for n in 0..options.queue {
        platform.enqueue(format!("job #{n}"), Some(label.clone())).await;
    }

    let provisioner = registry.provisioner_for(Some(&label)).await;
    for round in 1..=options.ticks {
        let report = provisioner.tick().await;
        println!(
            "tick {round}: {:?} queue={} existing={} planned={} launched={} failed={}",
            report.decision,
            report.snapshot.queue_length,
            report.snapshot.existing_capacity(),
            report.planned_capacity,
            report.launched,
            report.failed,
        );
        wait_for_registrations(&platform, &provisioner).await;
        connect_new_nodes(&platform).await;
    }
    // Nodes that registered after the last round.
    connect_new_nodes(&platform).await;

    let nodes = platform.nodes();
    println!("{} node(s) online for {label}", nodes.len());
    for entry in &nodes {
        println!("  {} ({} executor(s))", entry.descriptor.name, entry.descriptor.num_executors);
    }

    for entry in nodes {
        let name = entry.descriptor.name;
        if let Err(e) = platform.disconnect_node(&name, &TracingListener::new(name.as_str())).await {
            warn!(node = %name, error = %e, "teardown failed");
        }
    }
    info!(remaining = platform.nodes().len(), "simulation finished");
    Ok(())
}

/// Wait until every node requested for the label is registered or has
/// given up.
async fn wait_for_registrations(platform: &HostPlatform, provisioner: &NodeProvisioner) {
    let label = provisioner.label().cloned();
    let waited = tokio::time::timeout(REGISTRATION_WAIT, async {
        while label
            .as_ref()
            .is_some_and(|l| provisioner.ledger().planned_capacity(l) > 0)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if waited.is_err() {
        warn!(nodes = platform.nodes().len(), "node creation still pending");
    }
}

async fn connect_new_nodes(platform: &Arc<HostPlatform>) {
    for entry in platform.nodes() {
        if entry.computer.state() != SlotState::Created {
            continue;
        }
        let name = entry.descriptor.name;
        let listener = TracingListener::new(name.as_str());
        if let Err(e) = platform.connect_node(&name, &listener).await {
            warn!(node = %name, error = %e, "launch failed");
        }
    }
}
