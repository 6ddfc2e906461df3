//! Sparse token retrieval index.
//!
//! Documents are rows of a compressed-row sparse matrix over a fixed
//! token vocabulary; queries are sparse or dense weight vectors scored
//! by exact dot product. Shards on disk are merged into one matrix at
//! construction, optionally downcast to f16, and searched with either a
//! sparse-sparse (cpu) or sparse-dense (accelerator) strategy.

pub mod csr;
pub mod engine;
pub mod error;
pub mod index;
pub mod loader;
pub mod store;

pub use csr::CsrMatrix;
pub use engine::{IndexOptions, SearchEngine};
pub use error::{Error, Result};
pub use index::{Device, IndexInfo, QueryVector, SearchHit, SparseIndex};
pub use store::RecordStore;
