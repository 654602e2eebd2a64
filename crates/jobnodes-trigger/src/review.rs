//! Queue listener that suggests provisioner reviews.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use jobnodes_core::Label;
use jobnodes_provision::{NodeProvisioner, ProvisionerRegistry};

/// A queued unit of work as seen by queue listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub task: String,
    /// Label the item must run on, if any.
    pub assigned_label: Option<Label>,
}

/// Receives queue transitions from the host.
#[async_trait]
pub trait QueueListener: Send + Sync {
    /// `item` can run as soon as an executor is free.
    async fn on_enter_buildable(&self, item: &QueueItem);

    /// `item` entered the queue and waits for its quiet period.
    async fn on_enter_waiting(&self, item: &QueueItem);
}

/// Something that can be asked to re-evaluate capacity now.
pub trait ReviewTarget: Send + Sync {
    fn suggest_review_now(&self);
}

impl ReviewTarget for NodeProvisioner {
    fn suggest_review_now(&self) {
        NodeProvisioner::suggest_review_now(self);
    }
}

/// Finds the review target responsible for a label.
#[async_trait]
pub trait ProvisionerLookup: Send + Sync {
    /// `None` selects the provisioner of unlabeled work.
    async fn review_target(&self, label: Option<&Label>) -> Arc<dyn ReviewTarget>;
}

#[async_trait]
impl ProvisionerLookup for ProvisionerRegistry {
    async fn review_target(&self, label: Option<&Label>) -> Arc<dyn ReviewTarget> {
        self.provisioner_for(label).await
    }
}

/// Forwards every buildable or waiting item to its provisioner.
pub struct FastReviewTrigger {
    lookup: Arc<dyn ProvisionerLookup>,
}

impl FastReviewTrigger {
    pub fn new(lookup: Arc<dyn ProvisionerLookup>) -> Self {
        Self { lookup }
    }

    async fn review(&self, item: &QueueItem, event: &str) {
        debug!(item = item.id, task = %item.task, label = ?item.assigned_label, event, "suggesting review");
        self.lookup
            .review_target(item.assigned_label.as_ref())
            .await
            .suggest_review_now();
    }
}

#[async_trait]
impl QueueListener for FastReviewTrigger {
    async fn on_enter_buildable(&self, item: &QueueItem) {
        self.review(item, "buildable").await;
    }

    async fn on_enter_waiting(&self, item: &QueueItem) {
        self.review(item, "waiting").await;
    }
}
