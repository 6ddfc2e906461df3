use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use crate::index::{Device, IndexInfo, QueryVector, SearchHit, SparseIndex};
use crate::loader::load_matrix;
use crate::store::RecordStore;

/// Recognized construction parameters for a search engine.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexOptions {
    /// Glob-style pattern for shard files (required).
    pub index_pattern: String,
    /// Downcast matrix values to f16 before placement. On by default;
    /// opt out for exact scores.
    #[serde(default = "default_reduced_precision")]
    pub reduced_precision: bool,
    /// Leading columns to drop from every shard (reserved tokens).
    #[serde(default)]
    pub column_offset: usize,
    /// Initial device placement, e.g. "cpu" or "accel:0".
    #[serde(default = "default_device")]
    pub device: String,
    /// Optional line-delimited JSON record file, row i per line i.
    #[serde(default)]
    pub record_file: Option<PathBuf>,
}

fn default_reduced_precision() -> bool {
    true
}

fn default_device() -> String {
    "cpu".to_string()
}

impl IndexOptions {
    pub fn new(index_pattern: impl Into<String>) -> Self {
        Self {
            index_pattern: index_pattern.into(),
            reduced_precision: default_reduced_precision(),
            column_offset: 0,
            device: default_device(),
            record_file: None,
        }
    }
}

/// Facade over index construction and search: shard load and merge,
/// optional precision cast, device placement, record lookup.
#[derive(Debug)]
pub struct SearchEngine {
    index: SparseIndex,
    records: RecordStore,
}

impl SearchEngine {
    /// Build the engine from construction parameters. Any failure is
    /// fatal; no partially built engine is returned.
    pub fn open(options: &IndexOptions) -> Result<Self> {
        let device: Device = options.device.parse()?;
        let mut matrix = load_matrix(&options.index_pattern, options.column_offset)?;
        if options.reduced_precision {
            matrix = matrix.to_f16();
        }
        let index = SparseIndex::new(matrix, device)?;
        let records = match &options.record_file {
            Some(path) => RecordStore::load(path)?,
            None => RecordStore::default(),
        };
        tracing::info!(info = %index.describe(), "engine ready");
        Ok(Self { index, records })
    }

    pub fn search(&self, query: &QueryVector, k: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, k)
    }

    pub fn search_batch(&self, queries: &[QueryVector], k: usize) -> Result<Vec<Vec<SearchHit>>> {
        self.index.search_batch(queries, k)
    }

    pub fn move_to(&mut self, device: Device) -> Result<()> {
        self.index.move_to(device)
    }

    pub fn describe(&self) -> IndexInfo {
        self.index.describe()
    }

    /// Record for a result row, when a record file was supplied.
    pub fn record_for(&self, doc_id: usize) -> Result<&serde_json::Value> {
        self.records.get(doc_id)
    }

    pub fn record_count(&self) -> usize {
        self.records.count()
    }
}
