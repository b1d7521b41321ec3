/// rrdtool-backed time-series storage
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::process::Command;

use crate::error::StoreError;
use crate::logging::LogContext;
use crate::models::{Column, FlushPayload, Measurement};
use crate::storage::{Schema, TimeSeriesStore};

pub const DEFAULT_RRDTOOL: &str = "rrdtool";

// Round-robin archives kept in every file
const ARCHIVES: [&str; 6] = [
    "RRA:AVERAGE:0.50:1:1h",   // each min, 1 hour
    "RRA:AVERAGE:0.50:5:1y",   // 5 min, 1 year
    "RRA:AVERAGE:0.50:60:10y", // 1 hour, 10 years
    "RRA:MIN:0.50:1440:10y",   // 1 day, 10 years
    "RRA:MAX:0.50:1440:10y",   // 1 day, 10 years
    "RRA:LAST:0.50:1:10",      // each min, 10 minutes
];

/// Runs the `rrdtool` executable against a single RRD file
#[derive(Debug, Clone)]
pub struct RrdTool {
    program: String,
    path: PathBuf,
    schema: Schema,
    log: LogContext,
}

impl RrdTool {
    pub fn new(program: impl Into<String>, path: impl Into<PathBuf>, schema: Schema, log: LogContext) -> Self {
        Self {
            program: program.into(),
            path: path.into(),
            schema,
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the RRD file unless it already exists
    ///
    /// Missing parent directories are created first.
    ///
    /// # Returns
    /// true when a new file was created
    pub async fn ensure_created(&self) -> Result<bool, StoreError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(false);
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StoreError::Directory {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        warn!(target: self.log.target(), "Creating RRD file {}", name);

        self.create(&self.schema).await?;
        Ok(true)
    }

    fn create_args(&self, schema: &Schema) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            self.path.display().to_string(),
            "--start".to_string(),
            format!("-{}", schema.step),
            "--step".to_string(),
            schema.step.to_string(),
        ];
        args.extend(
            schema
                .columns
                .iter()
                .map(|column| data_source(column, schema.heartbeat)),
        );
        args.extend(ARCHIVES.iter().map(|a| a.to_string()));
        args
    }

    fn update_args(&self, payload: &FlushPayload) -> Vec<String> {
        vec![
            "update".to_string(),
            self.path.display().to_string(),
            payload.to_update_arg(),
        ]
    }

    async fn run(&self, operation: &'static str, args: Vec<String>) -> Result<(), StoreError> {
        debug!(target: self.log.target(), "Args: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| StoreError::Io {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StoreError::CommandFailed {
                program: self.program.clone(),
                operation,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl TimeSeriesStore for RrdTool {
    async fn create(&self, schema: &Schema) -> Result<(), StoreError> {
        self.run("create", self.create_args(schema)).await
    }

    /// The file is created on demand, so removing it while running starts a new one
    async fn update(&self, payload: &FlushPayload) -> Result<(), StoreError> {
        self.ensure_created().await?;
        self.run("update", self.update_args(payload)).await
    }
}

/// Data source definition with a value range suited to the measurement
fn data_source(column: &Column, heartbeat: u32) -> String {
    let (kind, min, max) = match column.measurement {
        Measurement::Temperature => ("GAUGE", "-20", "50"),
        Measurement::Humidity => ("GAUGE", "0", "100"),
        Measurement::Rain => ("DERIVE", "0", "100"),
        Measurement::Battery => ("GAUGE", "0", "1"),
    };
    format!("DS:{}:{}:{}:{}:{}", column, kind, heartbeat, min, max)
}
