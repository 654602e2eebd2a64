//! Single-assignment result cell for an in-flight node creation.
//!
//! A [`NodeCompleter`] settles the cell exactly once; any number of
//! [`NodeFuture`] handles observe the outcome. Settling is linearizable:
//! the first `complete`/`fail` wins and every observer sees the same
//! result afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use jobnodes_core::NodeDescriptor;

use crate::error::ProvisionError;

/// Outcome of a node creation as seen by observers.
pub type NodeOutcome = Result<NodeDescriptor, Arc<ProvisionError>>;

/// Create an empty cell, returning its writer and a reader.
pub fn node_future() -> (NodeCompleter, NodeFuture) {
    let (tx, rx) = watch::channel(None);
    (NodeCompleter { tx: Arc::new(tx) }, NodeFuture { rx })
}

/// Writer side. Cloning shares the same cell.
#[derive(Clone)]
pub struct NodeCompleter {
    tx: Arc<watch::Sender<Option<NodeOutcome>>>,
}

impl NodeCompleter {
    /// Settle with a node. Returns `false` if the cell was already settled.
    pub fn complete(&self, node: NodeDescriptor) -> bool {
        self.settle(Ok(node))
    }

    /// Settle with an error. Returns `false` if the cell was already settled.
    pub fn fail(&self, error: ProvisionError) -> bool {
        self.fail_shared(Arc::new(error))
    }

    /// Settle with an error the caller keeps a handle to.
    pub fn fail_shared(&self, error: Arc<ProvisionError>) -> bool {
        self.settle(Err(error))
    }

    pub fn is_done(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn settle(&self, outcome: NodeOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }
}

impl fmt::Debug for NodeCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCompleter")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Reader side. Cheap to clone; every clone observes the same outcome.
#[derive(Clone)]
pub struct NodeFuture {
    rx: watch::Receiver<Option<NodeOutcome>>,
}

impl NodeFuture {
    /// Wait until the cell is settled.
    ///
    /// Resolves to [`ProvisionError::Abandoned`] if every completer is
    /// dropped without settling.
    pub async fn wait(&self) -> NodeOutcome {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(Arc::new(ProvisionError::Abandoned)))
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<NodeOutcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// The outcome, if already settled.
    pub fn try_result(&self) -> Option<NodeOutcome> {
        self.rx.borrow().clone()
    }

    /// Whether the cell is settled, or can never be.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some() || self.rx.has_changed().is_err()
    }
}

impl fmt::Debug for NodeFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
