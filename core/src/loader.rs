use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::csr::CsrMatrix;
use crate::error::{Error, Result};

/// On-disk CSR shard: one bincode-encoded chunk of the full matrix.
/// Values are always stored at full precision; reduced precision is a
/// load-time decision, not a storage format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardFile {
    pub rows: u64,
    pub cols: u64,
    pub indptr: Vec<u64>,
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// Write a matrix as a single shard file.
pub fn save_shard<P: AsRef<Path>>(path: P, matrix: &CsrMatrix) -> Result<()> {
    let shard = ShardFile::from(matrix);
    let bytes = bincode::serialize(&shard).map_err(|source| Error::Decode {
        shard: path.as_ref().to_path_buf(),
        source,
    })?;
    let mut f = File::create(path)?;
    f.write_all(&bytes)?;
    Ok(())
}

/// Read one shard file back into a full-precision matrix.
pub fn load_shard<P: AsRef<Path>>(path: P) -> Result<CsrMatrix> {
    let mut f = File::open(path.as_ref())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let shard: ShardFile = bincode::deserialize(&buf).map_err(|source| Error::Decode {
        shard: path.as_ref().to_path_buf(),
        source,
    })?;
    shard.into_matrix(path.as_ref())
}

impl From<&CsrMatrix> for ShardFile {
    fn from(matrix: &CsrMatrix) -> Self {
        let mut indptr = Vec::new();
        let mut indices = Vec::new();
        let mut values = Vec::new();
        matrix.export_parts(&mut indptr, &mut indices, &mut values);
        Self {
            rows: matrix.rows() as u64,
            cols: matrix.cols() as u64,
            indptr,
            indices,
            values,
        }
    }
}

impl ShardFile {
    fn into_matrix(self, path: &Path) -> Result<CsrMatrix> {
        let rows = self.rows as usize;
        let cols = self.cols as usize;
        if self.indptr.len() != rows + 1
            || self.indices.len() != self.values.len()
            || self.indptr.last().copied().unwrap_or(0) as usize != self.indices.len()
        {
            return Err(Error::Configuration(format!(
                "shard {} has inconsistent CSR arrays",
                path.display()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&c| c as usize >= cols) {
            return Err(Error::Configuration(format!(
                "shard {} references column {bad} beyond {cols} columns",
                path.display()
            )));
        }
        // Row pointers must be non-decreasing and every row's column
        // indices strictly ascending; the merge-join multiply depends
        // on both.
        for i in 0..rows {
            let start = self.indptr[i] as usize;
            let end = self.indptr[i + 1] as usize;
            if end < start || end > self.indices.len() {
                return Err(Error::Configuration(format!(
                    "shard {} has non-monotonic row pointers at row {i}",
                    path.display()
                )));
            }
            let row = &self.indices[start..end];
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::Configuration(format!(
                    "shard {} has unsorted or duplicate column indices in row {i}",
                    path.display()
                )));
            }
        }
        let indptr = self.indptr.into_iter().map(|p| p as usize).collect();
        Ok(CsrMatrix::from_parts(
            rows,
            cols,
            indptr,
            self.indices,
            self.values,
        ))
    }
}

/// Enumerate shard files matching a glob-style pattern and sort them
/// lexicographically by path.
///
/// The sort is correctness-critical, not cosmetic: concatenation order
/// assigns the row-id range of each shard, so document ids are only
/// stable because the order is deterministic.
///
/// The directory part of the pattern is taken literally; `*` and `?`
/// wildcards apply to the file name.
pub fn discover_shards(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Configuration(format!("bad shard pattern: {pattern}")))?;
    let matcher = glob_to_regex(name)
        .map_err(|_| Error::Configuration(format!("bad shard pattern: {pattern}")))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&dir).max_depth(1).into_iter() {
        let entry =
            entry.map_err(|e| Error::Configuration(format!("cannot read {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(fname) = entry.file_name().to_str() {
            if matcher.is_match(fname) {
                files.push(entry.into_path());
            }
        }
    }
    if files.is_empty() {
        return Err(Error::Configuration(format!(
            "no shard files match pattern: {pattern}"
        )));
    }
    files.sort();
    Ok(files)
}

fn glob_to_regex(glob: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::with_capacity(glob.len() + 8);
    re.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// Load all shards matching `pattern`, drop the first `column_offset`
/// columns of each, and row-concatenate them in sorted-file order.
///
/// Fails with `ShapeMismatch` (and returns no partial matrix) when the
/// shards disagree on column count after truncation.
pub fn load_matrix(pattern: &str, column_offset: usize) -> Result<CsrMatrix> {
    let files = discover_shards(pattern)?;
    tracing::info!(shards = files.len(), pattern, "loading index");

    let mut shards = Vec::with_capacity(files.len());
    let mut expected_cols: Option<usize> = None;
    for file in &files {
        let shard = load_shard(file)?.truncate_columns(column_offset);
        match expected_cols {
            None => expected_cols = Some(shard.cols()),
            Some(expected) if expected != shard.cols() => {
                return Err(Error::ShapeMismatch {
                    shard: file.clone(),
                    expected,
                    found: shard.cols(),
                });
            }
            Some(_) => {}
        }
        shards.push(shard);
    }

    let matrix = CsrMatrix::vstack(shards);
    tracing::info!(
        rows = matrix.rows(),
        cols = matrix.cols(),
        nnz = matrix.nnz(),
        "index assembled"
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shard_a() -> CsrMatrix {
        CsrMatrix::from_dense(&[vec![1.0, 0.0, 0.0, 2.0], vec![0.0, 1.0, 1.0, 0.0]])
    }

    fn shard_b() -> CsrMatrix {
        CsrMatrix::from_dense(&[vec![2.0, 2.0, 0.0, 0.0]])
    }

    #[test]
    fn shard_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard-0000.csr");
        save_shard(&path, &shard_a()).unwrap();
        let loaded = load_shard(&path).unwrap();
        assert_eq!(loaded.rows(), 2);
        assert_eq!(loaded.cols(), 4);
        assert_eq!(loaded.scores_dense(&[1.0, 1.0, 1.0, 1.0]), vec![3.0, 2.0]);
    }

    #[test]
    fn discovery_sorts_lexicographically() {
        let dir = tempdir().unwrap();
        // Written out of order on purpose.
        save_shard(dir.path().join("shard-0001.csr"), &shard_b()).unwrap();
        save_shard(dir.path().join("shard-0000.csr"), &shard_a()).unwrap();
        let pattern = dir.path().join("shard-*.csr");
        let files = discover_shards(pattern.to_str().unwrap()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("shard-0000.csr"));
        assert!(files[1].ends_with("shard-0001.csr"));
    }

    #[test]
    fn merge_assigns_row_ids_in_file_order() {
        let dir = tempdir().unwrap();
        save_shard(dir.path().join("shard-0000.csr"), &shard_a()).unwrap();
        save_shard(dir.path().join("shard-0001.csr"), &shard_b()).unwrap();
        let pattern = dir.path().join("shard-*.csr");
        let m = load_matrix(pattern.to_str().unwrap(), 0).unwrap();
        assert_eq!(m.rows(), 3);
        // Row 2 must be shard_b's single row.
        assert_eq!(m.scores_dense(&[1.0, 1.0, 0.0, 0.0]), vec![1.0, 1.0, 4.0]);
    }

    #[test]
    fn no_matches_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("missing-*.csr");
        let err = load_matrix(pattern.to_str().unwrap(), 0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn mismatched_columns_fail_with_shape_error() {
        let dir = tempdir().unwrap();
        save_shard(dir.path().join("shard-0000.csr"), &shard_a()).unwrap();
        let narrow = CsrMatrix::from_dense(&[vec![1.0, 1.0]]);
        save_shard(dir.path().join("shard-0001.csr"), &narrow).unwrap();
        let pattern = dir.path().join("shard-*.csr");
        let err = load_matrix(pattern.to_str().unwrap(), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: 4,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn column_offset_applies_to_every_shard() {
        let dir = tempdir().unwrap();
        save_shard(dir.path().join("shard-0000.csr"), &shard_a()).unwrap();
        save_shard(dir.path().join("shard-0001.csr"), &shard_b()).unwrap();
        let pattern = dir.path().join("shard-*.csr");
        let m = load_matrix(pattern.to_str().unwrap(), 1).unwrap();
        assert_eq!(m.cols(), 3);
        assert_eq!(m.rows(), 3);
        // Original column 0 dropped: shard_b's row keeps only weight 2.0 at new column 0.
        assert_eq!(m.scores_dense(&[1.0, 0.0, 0.0]), vec![0.0, 1.0, 2.0]);
    }

    fn write_raw_shard(path: &std::path::Path, shard: &ShardFile) {
        std::fs::write(path, bincode::serialize(shard).unwrap()).unwrap();
    }

    #[test]
    fn non_monotonic_row_pointers_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard-0000.csr");
        write_raw_shard(
            &path,
            &ShardFile {
                rows: 2,
                cols: 4,
                indptr: vec![0, 3, 1],
                indices: vec![2],
                values: vec![1.0],
            },
        );
        let err = load_shard(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("row pointers"));
    }

    #[test]
    fn unsorted_row_indices_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard-0000.csr");
        write_raw_shard(
            &path,
            &ShardFile {
                rows: 1,
                cols: 4,
                indptr: vec![0, 2],
                indices: vec![3, 0],
                values: vec![2.0, 1.0],
            },
        );
        let err = load_shard(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("unsorted"));
    }

    #[test]
    fn duplicate_row_indices_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard-0000.csr");
        write_raw_shard(
            &path,
            &ShardFile {
                rows: 1,
                cols: 4,
                indptr: vec![0, 2],
                indices: vec![1, 1],
                values: vec![1.0, 1.0],
            },
        );
        let err = load_shard(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn corrupt_shard_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard-0000.csr");
        std::fs::write(&path, b"not a shard").unwrap();
        let err = load_shard(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. } | Error::Configuration(_)));
    }
}
