//! Settings management

use crate::sweep::ReachabilityProbe;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine-instance settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub executor: ExecutorSettings,
    pub reclamation: ReclamationSettings,
}

/// What happens when a worker's work closure panics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPanicPolicy {
    /// Reject the task's promise with the panic message.
    #[default]
    Reject,
    /// Let the panic escape to the thread's owner; the promise stays pending.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub worker_name_prefix: String,
    pub worker_stack_size: Option<usize>,
    /// Drain the engine's job queue at the end of `pump_default`.
    pub drain_engine_jobs: bool,
    pub on_worker_panic: WorkerPanicPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclamationSettings {
    pub probe: ReachabilityProbe,
    /// Run an engine collection pass before each sweep.
    pub collect_before_sweep: bool,
    pub sweep_after_pump: bool,
    /// Final sweep when the host is dropped.
    pub sweep_on_drop: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            worker_name_prefix: "ferry-worker".to_string(),
            worker_stack_size: None,
            drain_engine_jobs: true,
            on_worker_panic: WorkerPanicPolicy::Reject,
        }
    }
}

impl Default for ReclamationSettings {
    fn default() -> Self {
        Self {
            probe: ReachabilityProbe::WeakCount,
            collect_before_sweep: true,
            sweep_after_pump: false,
            sweep_on_drop: true,
        }
    }
}

impl Settings {
    pub fn from_json_str(source: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_json_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = Settings::from_json_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.executor.worker_name_prefix, "ferry-worker");
        assert!(settings.executor.drain_engine_jobs);
        assert!(settings.reclamation.sweep_on_drop);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::from_json_str(
            r#"{
                "executor": { "on_worker_panic": "propagate", "worker_stack_size": 65536 },
                "reclamation": { "probe": "queue_only" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            settings.executor.on_worker_panic,
            WorkerPanicPolicy::Propagate
        );
        assert_eq!(settings.executor.worker_stack_size, Some(65536));
        assert_eq!(settings.executor.worker_name_prefix, "ferry-worker");
        assert_eq!(settings.reclamation.probe, ReachabilityProbe::QueueOnly);
        assert!(settings.reclamation.collect_before_sweep);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = Settings::from_json_str(r#"{"executor": {"on_worker_panic": "ignore"}}"#)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reclamation": {{"sweep_after_pump": true}}}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.reclamation.sweep_after_pump);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
