//! JSON exporter for simulation runs.
//!
//! Wraps the execution summary with the knobs that produced it, so a failing
//! run can be replayed from the export alone.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use trellis_core::{ConsistencyMode, ExecutionSummary};

/// Run settings recorded alongside the results.
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    /// Master seed
    pub seed: u64,

    /// How consistency was satisfied
    pub consistency: ConsistencyMode,

    /// Link latency in milliseconds
    pub latency_ms: u64,

    /// Link loss rate
    pub loss_rate: f64,

    /// Whether players were forced onto the local transport
    pub local_only: bool,
}

/// Complete export of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Format version
    pub version: String,

    /// Settings the run used
    pub settings: RunSettings,

    /// Virtual time at the end of the run, in milliseconds
    pub virtual_time_ms: u64,

    /// Per-scenario results
    pub summary: ExecutionSummary,
}

impl SimExport {
    /// Creates an export for a finished run.
    pub fn new(settings: RunSettings, virtual_time_ms: u64, summary: ExecutionSummary) -> Self {
        Self {
            version: "1.0".to_string(),
            settings,
            virtual_time_ms,
            summary,
        }
    }

    /// Writes the export to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_serializes_settings() {
        let export = SimExport::new(
            RunSettings {
                seed: 42,
                consistency: ConsistencyMode::Native,
                latency_ms: 50,
                loss_rate: 0.0,
                local_only: true,
            },
            150,
            ExecutionSummary::default(),
        );

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["settings"]["seed"], 42);
        assert_eq!(json["settings"]["consistency"], "native");
        assert_eq!(json["summary"]["scenarios"], serde_json::json!([]));
    }
}
