use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Ordered store of per-document JSON records, line i of the record
/// file mapping to document row i. Loaded independently of the matrix;
/// the index never touches these.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<serde_json::Value>,
}

impl RecordStore {
    /// Load a line-delimited JSON record file. Any unparsable line
    /// fails the whole load; there is no partial store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path.as_ref())?;
        let reader = BufReader::new(f);
        let mut records = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let record =
                serde_json::from_str(&line).map_err(|source| Error::MalformedRecord {
                    line: n + 1,
                    source,
                })?;
            records.push(record);
        }
        tracing::info!(records = records.len(), path = %path.as_ref().display(), "loaded records");
        Ok(Self { records })
    }

    pub fn get(&self, index: usize) -> Result<&serde_json::Value> {
        self.records.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
