use half::f16;
use serde::{Deserialize, Serialize};

/// Value storage for a CSR matrix: full or reduced precision.
///
/// Reduced precision halves the memory footprint of the value array at
/// the cost of f16 rounding in scores. Row pointers and column indices
/// are unaffected by the choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsrValues {
    F32(Vec<f32>),
    F16(Vec<f16>),
}

impl CsrValues {
    pub fn len(&self) -> usize {
        match self {
            CsrValues::F32(v) => v.len(),
            CsrValues::F16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at position `k`, widened to f32.
    #[inline]
    pub fn get(&self, k: usize) -> f32 {
        match self {
            CsrValues::F32(v) => v[k],
            CsrValues::F16(v) => v[k].to_f32(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CsrValues::F32(_) => "f32",
            CsrValues::F16(_) => "f16",
        }
    }
}

/// Compressed-row sparse matrix of non-negative token weights.
///
/// Shape is (rows x cols) where the row index is the document id and
/// the column index is the token id. `indptr` has `rows + 1` entries;
/// row `i` occupies `indices[indptr[i]..indptr[i+1]]` with matching
/// `values`. Column indices are sorted ascending within each row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    values: CsrValues,
}

impl CsrMatrix {
    /// Assemble a matrix from raw CSR arrays. Invariants (indptr length,
    /// sorted per-row indices, index bounds) are the caller's to uphold;
    /// the shard loader validates them at the file boundary.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        indptr: Vec<usize>,
        indices: Vec<u32>,
        values: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(indptr.len(), rows + 1);
        debug_assert_eq!(indices.len(), values.len());
        Self {
            rows,
            cols,
            indptr,
            indices,
            values: CsrValues::F32(values),
        }
    }

    /// Build from dense rows; zeros are dropped. Column count is taken
    /// from the first row (0 x 0 when `rows` is empty).
    pub fn from_dense(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for row in rows {
            for (col, &w) in row.iter().enumerate() {
                if w != 0.0 {
                    indices.push(col as u32);
                    values.push(w);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            rows: rows.len(),
            cols,
            indptr,
            indices,
            values: CsrValues::F32(values),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored (non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn value_type(&self) -> &'static str {
        self.values.type_name()
    }

    /// Column indices and value offsets for row `i`.
    #[inline]
    fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.indptr[i]..self.indptr[i + 1]
    }

    /// Drop the first `offset` columns, remapping the remaining column
    /// indices down by `offset`. Used to skip reserved placeholder token
    /// columns at the front of the vocabulary.
    pub fn truncate_columns(self, offset: usize) -> Self {
        if offset == 0 {
            return self;
        }
        let cut = offset as u32;
        let mut indptr = Vec::with_capacity(self.rows + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for i in 0..self.rows {
            for k in self.row_range(i) {
                let col = self.indices[k];
                if col >= cut {
                    indices.push(col - cut);
                    values.push(self.values.get(k));
                }
            }
            indptr.push(indices.len());
        }
        Self {
            rows: self.rows,
            cols: self.cols.saturating_sub(offset),
            indptr,
            indices,
            values: CsrValues::F32(values),
        }
    }

    /// Row-concatenate shards in order. All shards must share a column
    /// count; the loader enforces this before calling.
    pub fn vstack(shards: Vec<CsrMatrix>) -> Self {
        let mut iter = shards.into_iter();
        let mut out = match iter.next() {
            Some(first) => first,
            None => return Self::from_dense(&[]),
        };
        for shard in iter {
            debug_assert_eq!(shard.cols, out.cols);
            let base = out.nnz();
            out.rows += shard.rows;
            out.indptr
                .extend(shard.indptr[1..].iter().map(|p| p + base));
            out.indices.extend_from_slice(&shard.indices);
            match (&mut out.values, shard.values) {
                (CsrValues::F32(dst), CsrValues::F32(src)) => dst.extend_from_slice(&src),
                (CsrValues::F16(dst), CsrValues::F16(src)) => dst.extend_from_slice(&src),
                (CsrValues::F32(dst), CsrValues::F16(src)) => {
                    dst.extend(src.iter().map(|v| v.to_f32()));
                }
                (CsrValues::F16(dst), CsrValues::F32(src)) => {
                    dst.extend(src.iter().map(|&v| f16::from_f32(v)));
                }
            }
        }
        out
    }

    /// Downcast values to f16. Pure value transform: row pointers and
    /// column indices are untouched. No-op when already reduced.
    pub fn to_f16(self) -> Self {
        let values = match self.values {
            CsrValues::F32(v) => CsrValues::F16(v.into_iter().map(f16::from_f32).collect()),
            reduced @ CsrValues::F16(_) => reduced,
        };
        Self { values, ..self }
    }

    /// Copy the raw CSR arrays out, widening values to f32. Used by the
    /// shard writer.
    pub(crate) fn export_parts(
        &self,
        indptr: &mut Vec<u64>,
        indices: &mut Vec<u32>,
        values: &mut Vec<f32>,
    ) {
        indptr.extend(self.indptr.iter().map(|&p| p as u64));
        indices.extend_from_slice(&self.indices);
        values.extend((0..self.nnz()).map(|k| self.values.get(k)));
    }

    /// Sparse-sparse multiply: score row of the query against every
    /// document row, by merge-joining sorted column indices. Only the
    /// resulting score row (length `rows`) is densified, never the
    /// matrix itself.
    ///
    /// `q_indices` must be sorted ascending with weights aligned.
    pub fn scores_sparse(&self, q_indices: &[u32], q_weights: &[f32]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.rows];
        if q_indices.is_empty() {
            return scores;
        }
        for (i, score) in scores.iter_mut().enumerate() {
            let range = self.row_range(i);
            let row_indices = &self.indices[range.clone()];
            let mut acc = 0.0f32;
            let mut a = range.start;
            let mut b = 0usize;
            while a < range.end && b < q_indices.len() {
                let col = row_indices[a - range.start];
                match col.cmp(&q_indices[b]) {
                    std::cmp::Ordering::Less => a += 1,
                    std::cmp::Ordering::Greater => b += 1,
                    std::cmp::Ordering::Equal => {
                        acc += self.values.get(a) * q_weights[b];
                        a += 1;
                        b += 1;
                    }
                }
            }
            *score = acc;
        }
        scores
    }

    /// Sparse-dense multiply: gather the dense query at each stored
    /// column index. `dense` length must equal `cols`.
    pub fn scores_dense(&self, dense: &[f32]) -> Vec<f32> {
        debug_assert_eq!(dense.len(), self.cols);
        let mut scores = vec![0.0f32; self.rows];
        for (i, score) in scores.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for k in self.row_range(i) {
                acc += self.values.get(k) * dense[self.indices[k] as usize];
            }
            *score = acc;
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrMatrix {
        CsrMatrix::from_dense(&[
            vec![1.0, 0.0, 0.0, 2.0],
            vec![0.0, 1.0, 1.0, 0.0],
            vec![2.0, 2.0, 0.0, 0.0],
        ])
    }

    #[test]
    fn from_dense_drops_zeros() {
        let m = sample();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 4);
        assert_eq!(m.nnz(), 6);
        assert_eq!(m.value_type(), "f32");
    }

    #[test]
    fn sparse_and_dense_scores_agree() {
        let m = sample();
        let dense = vec![1.0, 0.0, 0.0, 1.0];
        let sparse = m.scores_sparse(&[0, 3], &[1.0, 1.0]);
        assert_eq!(sparse, vec![3.0, 0.0, 2.0]);
        assert_eq!(m.scores_dense(&dense), sparse);
    }

    #[test]
    fn empty_query_scores_zero() {
        let m = sample();
        assert_eq!(m.scores_sparse(&[], &[]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn truncate_columns_remaps_indices() {
        let m = sample().truncate_columns(1);
        assert_eq!(m.cols(), 3);
        // Row 0 loses nothing but column 3 becomes column 2.
        assert_eq!(m.scores_sparse(&[2], &[1.0]), vec![2.0, 0.0, 0.0]);
        // Column 0 of the original is gone entirely.
        assert_eq!(m.scores_sparse(&[0], &[1.0]), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn vstack_preserves_row_order() {
        let a = CsrMatrix::from_dense(&[vec![1.0, 0.0], vec![0.0, 2.0]]);
        let b = CsrMatrix::from_dense(&[vec![3.0, 3.0]]);
        let m = CsrMatrix::vstack(vec![a, b]);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.scores_dense(&[1.0, 1.0]), vec![1.0, 2.0, 6.0]);
    }

    #[test]
    fn f16_cast_keeps_structure_and_bounds_drift() {
        let m = sample();
        let exact = m.scores_dense(&[0.3, 0.7, 0.0, 0.5]);
        let reduced = m.to_f16();
        assert_eq!(reduced.value_type(), "f16");
        assert_eq!(reduced.nnz(), 6);
        let approx = reduced.scores_dense(&[0.3, 0.7, 0.0, 0.5]);
        for (e, a) in exact.iter().zip(&approx) {
            assert!((e - a).abs() < 0.01, "exact={e}, reduced={a}");
        }
    }

    #[test]
    fn to_f16_is_idempotent() {
        let m = sample().to_f16().to_f16();
        assert_eq!(m.value_type(), "f16");
    }
}
