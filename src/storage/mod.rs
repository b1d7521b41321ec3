pub mod rrd;

use std::future::Future;

use crate::error::StoreError;
use crate::models::{Column, FlushPayload};

pub use rrd::RrdTool;

/// Layout of the backing store, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub step: u32,
    pub heartbeat: u32,
}

impl Schema {
    /// A data source turns unknown after four missed steps
    pub fn new(columns: Vec<Column>, step: u32) -> Self {
        Self {
            columns,
            step,
            heartbeat: step.saturating_mul(4),
        }
    }
}

/// Sink for flushed windows
///
/// Failures are reported to the caller, which logs them and keeps ingesting;
/// the next window simply tries again.
pub trait TimeSeriesStore {
    /// Create the backing storage with one data source per schema column
    fn create(&self, schema: &Schema) -> impl Future<Output = Result<(), StoreError>>;

    /// Append one window
    fn update(&self, payload: &FlushPayload) -> impl Future<Output = Result<(), StoreError>>;
}
