//! HostPlatform — in-memory host implementing every engine interface.
//!
//! Holds the node inventory, the scripted job catalog, the build queue and
//! the quiet-down flag. Load statistics are derived from the inventory and
//! the queue on every call, so a snapshot always reflects the latest
//! registrations and slot states.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobnodes_core::*;
use jobnodes_launcher::{JobLauncher, NodeLifecycle};
use jobnodes_provision::LoadStatistics;
use jobnodes_trigger::{QueueItem, QueueListener};

use crate::computer::Computer;
use crate::error::{PlatformError, PlatformResult};
use crate::jobs::{Invocation, JobScript, ScriptedRun};

/// A registered node and its compute slot.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub descriptor: NodeDescriptor,
    pub computer: Arc<Computer>,
}

#[derive(Default)]
pub struct HostPlatform {
    nodes: RwLock<BTreeMap<String, NodeEntry>>,
    jobs: RwLock<HashMap<String, JobScript>>,
    invocations: Mutex<Vec<Invocation>>,
    next_run: AtomicU64,
    queue: Mutex<Vec<QueueItem>>,
    next_item: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn QueueListener>>>,
    quieting_down: AtomicBool,
    registration_failures: AtomicU32,
}

impl HostPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Define (or replace) the job `name`.
    pub fn define_job(&self, name: impl Into<String>, script: JobScript) {
        let name = name.into();
        debug!(job = %name, result = %script.result, "job defined");
        write(&self.jobs).insert(name, script);
    }

    /// Every scheduling request so far, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    // ── Queue ──────────────────────────────────────────────────────

    pub fn add_queue_listener(&self, listener: Arc<dyn QueueListener>) {
        write(&self.listeners).push(listener);
    }

    /// Queue `task`, notifying listeners that it is waiting and then
    /// buildable.
    pub async fn enqueue(&self, task: impl Into<String>, label: Option<Label>) -> QueueItem {
        let item = QueueItem {
            id: self.next_item.fetch_add(1, Ordering::SeqCst) + 1,
            task: task.into(),
            assigned_label: label,
        };
        lock(&self.queue).push(item.clone());
        info!(item = item.id, task = %item.task, label = ?item.assigned_label, "item queued");

        let listeners = read(&self.listeners).clone();
        for listener in &listeners {
            listener.on_enter_waiting(&item).await;
        }
        for listener in &listeners {
            listener.on_enter_buildable(&item).await;
        }
        item
    }

    /// Remove a queued item. Returns `false` if it was not queued.
    pub fn dequeue(&self, id: u64) -> bool {
        let mut queue = lock(&self.queue);
        let before = queue.len();
        queue.retain(|item| item.id != id);
        before != queue.len()
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        lock(&self.queue).clone()
    }

    pub fn set_quieting_down(&self, quieting_down: bool) {
        self.quieting_down.store(quieting_down, Ordering::SeqCst);
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Make the next `count` registrations fail spuriously.
    pub fn fail_next_registrations(&self, count: u32) {
        self.registration_failures.store(count, Ordering::SeqCst);
    }

    pub fn nodes(&self) -> Vec<NodeEntry> {
        read(&self.nodes).values().cloned().collect()
    }

    pub fn node(&self, name: &str) -> Option<NodeEntry> {
        read(&self.nodes).get(name).cloned()
    }

    pub fn computer(&self, name: &str) -> Option<Arc<Computer>> {
        read(&self.nodes).get(name).map(|entry| Arc::clone(&entry.computer))
    }

    /// Launch a registered node through its job launcher.
    ///
    /// A failed launch leaves the slot `Failed` and offline.
    pub async fn connect_node(self: &Arc<Self>, name: &str, listener: &dyn TaskListener) -> PlatformResult<()> {
        let entry = self
            .node(name)
            .ok_or_else(|| PlatformError::UnknownNode(name.to_string()))?;
        let computer = entry.computer;
        computer.transition(SlotState::Launching)?;

        match self.lifecycle(&entry.descriptor).launch(computer.as_ref(), listener).await {
            Ok(()) => {
                computer.transition(SlotState::Online)?;
                info!(node = %name, "node online");
                Ok(())
            }
            Err(e) => {
                computer.disconnect(OfflineCause::LaunchFailed);
                Err(e.into())
            }
        }
    }

    /// Disconnect a node and run its teardown.
    ///
    /// A failed decommission job puts the slot back online.
    pub async fn disconnect_node(self: &Arc<Self>, name: &str, listener: &dyn TaskListener) -> PlatformResult<()> {
        let entry = self
            .node(name)
            .ok_or_else(|| PlatformError::UnknownNode(name.to_string()))?;
        let computer = entry.computer;
        if computer.state() != SlotState::Disconnecting {
            computer.transition(SlotState::Disconnecting)?;
        }

        let result = self
            .lifecycle(&entry.descriptor)
            .after_disconnect(computer.as_ref(), listener)
            .await;
        match result {
            Ok(()) if self.node(name).is_none() => {
                computer.transition(SlotState::Removed)?;
                Ok(())
            }
            Ok(()) => Ok(()),
            Err(e) => {
                if computer.is_accepting_tasks() {
                    computer.transition(SlotState::Online)?;
                }
                Err(e.into())
            }
        }
    }

    fn lifecycle(self: &Arc<Self>, node: &NodeDescriptor) -> JobLauncher {
        let jobs: Arc<dyn JobRunner> = Arc::clone(self) as Arc<dyn JobRunner>;
        let inventory: Arc<dyn NodeInventory> = Arc::clone(self) as Arc<dyn NodeInventory>;
        JobLauncher::for_node(node, jobs, inventory)
    }

    fn entries_for(&self, label: Option<&Label>) -> Vec<NodeEntry> {
        read(&self.nodes)
            .values()
            .filter(|entry| match label {
                Some(label) => &entry.descriptor.label == label,
                // Unlabeled work only runs on nodes that take any work.
                None => entry.descriptor.mode == NodeMode::Normal,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NodeInventory for HostPlatform {
    async fn add_node(&self, node: &NodeDescriptor) -> HostResult<()> {
        let injected = self
            .registration_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!(node = %node.name, "injected registration failure");
            return Err(HostError::Registration(format!(
                "concurrent modification while adding {}",
                node.name
            )));
        }

        let mut nodes = write(&self.nodes);
        if nodes.contains_key(&node.name) {
            return Err(HostError::Registration(format!("node {} already exists", node.name)));
        }
        nodes.insert(
            node.name.clone(),
            NodeEntry {
                descriptor: node.clone(),
                computer: Arc::new(Computer::new(node.name.clone(), node.num_executors)),
            },
        );
        info!(node = %node.name, label = %node.label, executors = node.num_executors, "node added");
        Ok(())
    }

    async fn remove_node(&self, name: &str) -> HostResult<()> {
        match write(&self.nodes).remove(name) {
            Some(_) => {
                info!(node = %name, "node removed");
                Ok(())
            }
            None => Err(HostError::NodeNotFound(name.to_string())),
        }
    }

    async fn compute_slot(&self, name: &str) -> Option<Arc<dyn ComputeSlot>> {
        self.computer(name).map(|c| c as Arc<dyn ComputeSlot>)
    }
}

#[async_trait]
impl JobRunner for HostPlatform {
    async fn find_job(&self, name: &str) -> Option<JobRef> {
        read(&self.jobs).get(name).map(|script| JobRef {
            name: name.to_string(),
            display_name: script.display_name.clone(),
        })
    }

    async fn schedule(&self, job: &JobRef, parameters: &[JobParameter]) -> HostResult<Option<Arc<dyn JobRun>>> {
        let script = read(&self.jobs)
            .get(&job.name)
            .cloned()
            .ok_or_else(|| HostError::Schedule(format!("job {} is not defined", job.name)))?;

        lock(&self.invocations).push(Invocation {
            job: job.name.clone(),
            parameters: parameters.to_vec(),
        });
        if !script.schedules {
            return Ok(None);
        }

        let number = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        let run = ScriptedRun::new(format!("job/{}/{number}/", job.name), &script);
        Ok(Some(Arc::new(run)))
    }
}

#[async_trait]
impl LoadStatistics for HostPlatform {
    async fn snapshot(&self, label: Option<&Label>) -> LoadSnapshot {
        let mut snapshot = LoadSnapshot::default();
        for entry in self.entries_for(label) {
            let executors = entry.computer.executors();
            snapshot.defined_executors += executors;
            match entry.computer.state() {
                SlotState::Online if entry.computer.is_accepting_tasks() => {
                    snapshot.available_executors += executors;
                }
                SlotState::Created | SlotState::Launching => {
                    snapshot.connecting_executors += executors;
                }
                _ => {}
            }
        }
        snapshot.queue_length = lock(&self.queue)
            .iter()
            .filter(|item| item.assigned_label.as_ref() == label)
            .count() as u32;
        snapshot
    }

    async fn label_has_accepting_node(&self, label: &Label) -> bool {
        self.entries_for(Some(label))
            .iter()
            .any(|entry| entry.computer.is_online() && entry.computer.is_accepting_tasks())
    }

    async fn is_quieting_down(&self) -> bool {
        self.quieting_down.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
