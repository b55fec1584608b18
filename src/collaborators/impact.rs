//! Include-file impact analysis
//!
//! The analysis script writes one impacted file name per line into an
//! output file named after the requesting session.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ImpactConfig;
use crate::core_types::SessionId;
use crate::error::QarsError;

#[async_trait]
pub trait ImpactAnalyzer: Send + Sync {
    /// Names of the files impacted by `file_name`
    async fn impacted_files(&self, session: SessionId, file_name: &str) -> Result<Vec<String>, QarsError>;
}

/// Runs the site's `check-impact` script
#[derive(Debug, Clone)]
pub struct ScriptImpactAnalyzer {
    script: PathBuf,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl ScriptImpactAnalyzer {
    pub fn new(script: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            temp_dir: temp_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ImpactConfig) -> Self {
        Self::new(config.script(), &config.temp_dir, config.timeout())
    }
}

#[async_trait]
impl ImpactAnalyzer for ScriptImpactAnalyzer {
    async fn impacted_files(&self, session: SessionId, file_name: &str) -> Result<Vec<String>, QarsError> {
        let output = self.temp_dir.join(format!("{}.impact", session));
        let mut child = Command::new(&self.script)
            .arg(file_name)
            .arg(&output)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QarsError::Collaborator(format!("{}: {}", self.script.display(), e)))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(session, file = file_name, %status, "Impact script finished"),
            Ok(Err(e)) => warn!(session, file = file_name, error = %e, "Impact script wait failed"),
            Err(_) => {
                warn!(session, file = file_name, "Impact script timed out");
                let _ = child.kill().await;
            }
        }

        // whatever the script managed to write is the answer
        let text = tokio::fs::read_to_string(&output)
            .await
            .map_err(|e| QarsError::Collaborator(format!("Could not read {}: {}", output.display(), e)))?;
        if let Err(e) = tokio::fs::remove_file(&output).await {
            warn!(path = %output.display(), error = %e, "Impact output not removed");
        }
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Fixed impact table, for deployments without the analysis script
#[derive(Debug, Default, Clone)]
pub struct StaticImpactAnalyzer {
    table: HashMap<String, Vec<String>>,
}

impl StaticImpactAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, include: &str, impacted: &[&str]) -> Self {
        self.table
            .insert(include.to_string(), impacted.iter().map(|s| s.to_string()).collect());
        self
    }
}

#[async_trait]
impl ImpactAnalyzer for StaticImpactAnalyzer {
    async fn impacted_files(&self, _session: SessionId, file_name: &str) -> Result<Vec<String>, QarsError> {
        self.table
            .get(file_name)
            .cloned()
            .ok_or_else(|| QarsError::Collaborator(format!("No impact data for {}", file_name)))
    }
}
