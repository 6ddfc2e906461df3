use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use half::f16;
use serde::Serialize;

use crate::csr::CsrMatrix;
use crate::error::{Error, Result};

/// Where the matrix values logically reside. Placement selects the
/// search strategy: `Cpu` runs the memory-bound sparse-sparse multiply,
/// `Accelerator` runs the dense-query sparse-dense multiply.
///
/// A single-process build exposes exactly one accelerator slot
/// (`accel:0`); any other id is unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator(u32),
}

impl Device {
    pub fn is_available(self) -> bool {
        match self {
            Device::Cpu => true,
            Device::Accelerator(id) => id == 0,
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "accel" | "accelerator" => Ok(Device::Accelerator(0)),
            other => {
                if let Some(id) = other.strip_prefix("accel:") {
                    if let Ok(id) = id.parse() {
                        return Ok(Device::Accelerator(id));
                    }
                }
                Err(Error::UnsupportedDevice {
                    requested: other.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(id) => write!(f, "accel:{id}"),
        }
    }
}

/// Per-call query vector. Sparse queries map token id to weight; dense
/// queries cover the whole vocabulary. Either form must match the
/// index's column count (after any construction-time offset).
#[derive(Debug, Clone)]
pub enum QueryVector {
    Sparse { indices: Vec<u32>, weights: Vec<f32> },
    Dense(Vec<f32>),
}

impl QueryVector {
    /// Sparse view, sorted by token id. Densifies nothing.
    fn to_sparse(&self, cols: usize) -> Result<(Vec<u32>, Vec<f32>)> {
        match self {
            QueryVector::Sparse { indices, weights } => {
                if indices.len() != weights.len() {
                    return Err(Error::DimensionMismatch {
                        expected: indices.len(),
                        found: weights.len(),
                    });
                }
                if let Some(&max) = indices.iter().max() {
                    if max as usize >= cols {
                        return Err(Error::DimensionMismatch {
                            expected: cols,
                            found: max as usize + 1,
                        });
                    }
                }
                let mut pairs: Vec<(u32, f32)> =
                    indices.iter().copied().zip(weights.iter().copied()).collect();
                pairs.sort_by_key(|&(i, _)| i);
                // Duplicate token ids collapse to the last occurrence,
                // matching the dense view where later writes win.
                pairs.dedup_by(|later, kept| {
                    if later.0 == kept.0 {
                        *kept = *later;
                        true
                    } else {
                        false
                    }
                });
                Ok(pairs.into_iter().unzip())
            }
            QueryVector::Dense(dense) => {
                if dense.len() != cols {
                    return Err(Error::DimensionMismatch {
                        expected: cols,
                        found: dense.len(),
                    });
                }
                let mut indices = Vec::new();
                let mut weights = Vec::new();
                for (i, &w) in dense.iter().enumerate() {
                    if w != 0.0 {
                        indices.push(i as u32);
                        weights.push(w);
                    }
                }
                Ok((indices, weights))
            }
        }
    }

    /// Dense view over the full vocabulary.
    fn to_dense(&self, cols: usize) -> Result<Vec<f32>> {
        match self {
            QueryVector::Dense(dense) => {
                if dense.len() != cols {
                    return Err(Error::DimensionMismatch {
                        expected: cols,
                        found: dense.len(),
                    });
                }
                Ok(dense.clone())
            }
            QueryVector::Sparse { .. } => {
                let (indices, weights) = self.to_sparse(cols)?;
                let mut dense = vec![0.0f32; cols];
                for (i, w) in indices.into_iter().zip(weights) {
                    dense[i as usize] = w;
                }
                Ok(dense)
            }
        }
    }
}

/// One ranked search result: document row id and dot-product score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub score: f32,
}

/// Read-only index diagnostics for logging.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub value_type: &'static str,
    pub rows: usize,
    pub cols: usize,
    pub device: String,
}

impl fmt::Display for IndexInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} index, {} x {}, on {}",
            self.value_type, self.rows, self.cols, self.device
        )
    }
}

/// Device-resident sparse index over the token weight matrix.
///
/// Built once, immutable except for `move_to`. No internal locking:
/// callers that move the index between devices while searching must
/// serialize externally (the expected lifecycle is build once, move
/// rarely, search many times).
#[derive(Debug)]
pub struct SparseIndex {
    matrix: CsrMatrix,
    device: Device,
}

impl SparseIndex {
    pub fn new(matrix: CsrMatrix, device: Device) -> Result<Self> {
        if !device.is_available() {
            return Err(Error::UnsupportedDevice {
                requested: device.to_string(),
            });
        }
        Ok(Self { matrix, device })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Transfer the matrix to `device`. No-op when already resident.
    ///
    /// The transfer is atomic: an unsupported target leaves placement
    /// and data untouched.
    pub fn move_to(&mut self, device: Device) -> Result<()> {
        if device == self.device {
            return Ok(());
        }
        if !device.is_available() {
            return Err(Error::UnsupportedDevice {
                requested: device.to_string(),
            });
        }
        tracing::info!(from = %self.device, to = %device, "moving index");
        self.device = device;
        Ok(())
    }

    /// Top-k search, dispatching on current placement. Result length is
    /// min(k, rows), sorted by descending score; equal scores break
    /// toward the lower doc id within one call.
    pub fn search(&self, query: &QueryVector, k: usize) -> Result<Vec<SearchHit>> {
        let scores = match self.device {
            Device::Cpu => self.cpu_scores(query)?,
            Device::Accelerator(_) => self.accelerated_scores(query)?,
        };
        Ok(top_k(&scores, k))
    }

    /// Batched search. The accelerator path favors batches; on CPU this
    /// simply loops.
    pub fn search_batch(&self, queries: &[QueryVector], k: usize) -> Result<Vec<Vec<SearchHit>>> {
        queries.iter().map(|q| self.search(q, k)).collect()
    }

    pub fn describe(&self) -> IndexInfo {
        IndexInfo {
            value_type: self.matrix.value_type(),
            rows: self.matrix.rows(),
            cols: self.matrix.cols(),
            device: self.device.to_string(),
        }
    }

    /// Sparse-sparse strategy: merge-join the query against each row,
    /// densifying only the score row.
    fn cpu_scores(&self, query: &QueryVector) -> Result<Vec<f32>> {
        let (indices, weights) = query.to_sparse(self.matrix.cols())?;
        Ok(self.matrix.scores_sparse(&indices, &weights))
    }

    /// Sparse-dense strategy: cast the query to the index value type
    /// and gather against the stored rows.
    fn accelerated_scores(&self, query: &QueryVector) -> Result<Vec<f32>> {
        let mut dense = query.to_dense(self.matrix.cols())?;
        if self.matrix.value_type() == "f16" {
            for w in &mut dense {
                *w = f16::from_f32(*w).to_f32();
            }
        }
        Ok(self.matrix.scores_dense(&dense))
    }
}

#[derive(PartialEq)]
struct Candidate {
    score: f32,
    doc_id: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score wins; on ties the lower doc id wins.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Partial top-k selection over a dense score row.
///
/// Keeps a min-heap of at most k candidates so selection is
/// O(n log k) rather than a full sort. k is silently capped at the
/// number of documents.
fn top_k(scores: &[f32], k: usize) -> Vec<SearchHit> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
    for (doc_id, &score) in scores.iter().enumerate() {
        let candidate = Candidate {
            score,
            doc_id: doc_id as u32,
        };
        if heap.len() < k {
            heap.push(std::cmp::Reverse(candidate));
        } else if let Some(std::cmp::Reverse(worst)) = heap.peek() {
            if candidate > *worst {
                heap.pop();
                heap.push(std::cmp::Reverse(candidate));
            }
        }
    }
    let mut hits: Vec<SearchHit> = heap
        .into_iter()
        .map(|std::cmp::Reverse(c)| SearchHit {
            doc_id: c.doc_id,
            score: c.score,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    hits
}
