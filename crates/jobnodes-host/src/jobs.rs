//! Scripted parameterized jobs.
//!
//! Jobs are defined up front with the result and log each run produces.
//! Every scheduling request is recorded as an [`Invocation`] so callers can
//! check which job ran with which parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jobnodes_core::{HostError, HostResult, JobParameter, JobRun, RunResult, TaskListener};

/// How a job behaves when scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScript {
    pub display_name: String,
    /// `false` makes the host decline to schedule a run.
    pub schedules: bool,
    pub result: RunResult,
    pub log: String,
}

impl JobScript {
    /// A job whose runs succeed with `log` as output.
    pub fn succeeding(display_name: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            schedules: true,
            result: RunResult::Success,
            log: log.into(),
        }
    }

    pub fn with_result(mut self, result: RunResult) -> Self {
        self.result = result;
        self
    }

    pub fn unscheduled(mut self) -> Self {
        self.schedules = false;
        self
    }
}

/// One scheduling request seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub job: String,
    pub parameters: Vec<JobParameter>,
}

impl Invocation {
    /// Value of the parameter `name`, if it was passed.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// A finished run of a scripted job.
#[derive(Debug)]
pub struct ScriptedRun {
    url: String,
    result: RunResult,
    log: Vec<u8>,
}

/// Bytes handed out per log read.
const LOG_CHUNK: usize = 64;

impl ScriptedRun {
    pub fn new(url: String, script: &JobScript) -> Self {
        Self {
            url,
            result: script.result,
            log: script.log.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl JobRun for ScriptedRun {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn wait(&self) -> HostResult<RunResult> {
        Ok(self.result)
    }

    async fn log_length(&self) -> HostResult<u64> {
        Ok(self.log.len() as u64)
    }

    async fn write_log(&self, offset: u64, listener: &dyn TaskListener) -> HostResult<u64> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|start| *start <= self.log.len())
            .ok_or_else(|| HostError::Io(format!("offset {offset} past end of log")))?;
        let end = (start + LOG_CHUNK).min(self.log.len());
        listener.write_log(&self.log[start..end]);
        Ok(end as u64)
    }
}
