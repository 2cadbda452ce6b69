//! Run records: the hierarchical experiment-tracking tree.
//!
//! ```text
//! search run (parent = None)
//!   ├── trial-0 (parent = search run)
//!   ├── trial-1
//!   └── ...
//! ```
//!
//! A record is created open (`Running`) and sealed exactly once. Every write
//! method refuses to touch a sealed record, so a sealed record can be cloned
//! and shared without further coordination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{RunError, RunResult};
use crate::params::{Configuration, ParameterValue};

/// Unique run identifier.
pub type RunId = Uuid;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// The search run was stopped before its budget was exhausted.
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One logged metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    #[serde(with = "crate::float")]
    pub value: f64,
    pub step: u64,
    pub timestamp: DateTime<Utc>,
}

/// Handle to an artifact held by an external store. Runs never hold bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Store-specific location, e.g. `file:///...` or `memory://...`.
    pub uri: String,
    pub media_type: String,
    pub size_bytes: u64,
}

/// A single node of the run tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    id: RunId,
    parent_id: Option<RunId>,
    name: String,
    status: RunStatus,
    params: BTreeMap<String, ParameterValue>,
    metrics: Vec<MetricEntry>,
    artifacts: BTreeMap<String, ArtifactRef>,
    tags: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Open a new record in `Running` state.
    pub fn open(parent_id: Option<RunId>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            name: name.into(),
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: Vec::new(),
            artifacts: BTreeMap::new(),
            tags: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn parent_id(&self) -> Option<RunId> {
        self.parent_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_sealed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn params(&self) -> &BTreeMap<String, ParameterValue> {
        &self.params
    }

    pub fn metrics(&self) -> &[MetricEntry] {
        &self.metrics
    }

    pub fn artifacts(&self) -> &BTreeMap<String, ArtifactRef> {
        &self.artifacts
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Entries for one metric, ordered by step.
    pub fn metric_history(&self, name: &str) -> Vec<&MetricEntry> {
        let mut entries: Vec<&MetricEntry> =
            self.metrics.iter().filter(|m| m.name == name).collect();
        entries.sort_by_key(|m| m.step);
        entries
    }

    /// Most recently logged value of a metric.
    pub fn latest_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|m| m.name == name)
            .map(|m| m.value)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    fn ensure_open(&self) -> RunResult<()> {
        if self.is_sealed() {
            return Err(RunError::sealed(self.id));
        }
        Ok(())
    }

    /// Record parameters. Keys are write-once: re-logging a key with a
    /// different value is rejected, re-logging the same value is a no-op.
    pub fn record_params(&mut self, params: &Configuration) -> RunResult<()> {
        self.ensure_open()?;
        for (name, value) in params {
            if let Some(existing) = self.params.get(name) {
                if existing != value {
                    return Err(RunError::InvalidRun {
                        run_id: self.id,
                        reason: format!(
                            "parameter {name} already logged as {existing}, refusing {value}"
                        ),
                    });
                }
            }
        }
        self.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    pub fn record_metric(&mut self, name: &str, value: f64, step: u64) -> RunResult<()> {
        self.ensure_open()?;
        self.metrics.push(MetricEntry {
            name: name.to_string(),
            value,
            step,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn record_artifact(&mut self, name: &str, artifact: ArtifactRef) -> RunResult<()> {
        self.ensure_open()?;
        self.artifacts.insert(name.to_string(), artifact);
        Ok(())
    }

    pub fn record_tag(&mut self, key: &str, value: &str) -> RunResult<()> {
        self.ensure_open()?;
        self.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Seal the record with a terminal status.
    pub fn seal(&mut self, status: RunStatus) -> RunResult<()> {
        if self.is_sealed() {
            return Err(RunError::AlreadySealed { run_id: self.id });
        }
        if !status.is_terminal() {
            return Err(RunError::InvalidRun {
                run_id: self.id,
                reason: "cannot seal a run with status running".to_string(),
            });
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}
