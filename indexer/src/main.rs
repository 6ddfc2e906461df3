use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sparsev_core::loader::save_shard;
use sparsev_core::CsrMatrix;
use tracing_subscriber::{fmt, EnvFilter};

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One input document: a sparse weight vector plus whatever extra
/// fields the caller wants carried through to the record file.
#[derive(Debug, Deserialize)]
struct InputVector {
    indices: Vec<u32>,
    weights: Vec<f32>,
}

#[derive(Parser)]
#[command(name = "sparsev-indexer")]
#[command(about = "Build CSR shard files for the sparse retrieval index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a JSONL sparse-vector dump into shard files
    Build {
        /// Input JSONL file, one {"indices": [...], "weights": [...]} per line
        #[arg(long)]
        input: String,
        /// Output directory for shard files and records.jsonl
        #[arg(long)]
        output: String,
        /// Vocabulary size; inferred from the data when omitted
        #[arg(long)]
        cols: Option<usize>,
        /// Number of shard files to split rows across
        #[arg(long, default_value_t = 1)]
        shards: usize,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            cols,
            shards,
        } => build_shards(&input, &output, cols, shards),
    }
}

fn build_shards(input: &str, output: &str, cols: Option<usize>, shards: usize) -> Result<()> {
    if shards == 0 {
        bail!("--shards must be at least 1");
    }
    let out_dir = Path::new(output);
    fs::create_dir_all(out_dir)?;

    let f = File::open(input).with_context(|| format!("cannot open input {input}"))?;
    let reader = BufReader::new(f);

    let mut vectors: Vec<InputVector> = Vec::new();
    let mut records = File::create(out_dir.join("records.jsonl"))?;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let vector: InputVector = serde_json::from_str(&line)
            .with_context(|| format!("bad vector at line {}", n + 1))?;
        if vector.indices.len() != vector.weights.len() {
            bail!(
                "line {}: {} indices but {} weights",
                n + 1,
                vector.indices.len(),
                vector.weights.len()
            );
        }
        // Pass the full line through so row i of the shards lines up
        // with line i of the record file.
        writeln!(records, "{line}")?;
        vectors.push(vector);
    }
    if vectors.is_empty() {
        bail!("no vectors found in {input}");
    }

    let max_index = vectors
        .iter()
        .flat_map(|v| v.indices.iter())
        .max()
        .copied()
        .unwrap_or(0) as usize;
    let cols = match cols {
        Some(c) if c > max_index => c,
        Some(c) => bail!("--cols {c} is too small for max token id {max_index}"),
        None => max_index + 1,
    };
    tracing::info!(rows = vectors.len(), cols, shards, "building shards");

    let per_shard = vectors.len().div_ceil(shards);
    for (shard_id, chunk) in vectors.chunks(per_shard).enumerate() {
        let matrix = matrix_from_vectors(cols, chunk);
        // Zero-padded names so lexicographic order equals build order.
        let path = out_dir.join(format!("shard-{shard_id:04}.csr"));
        save_shard(&path, &matrix)?;
        tracing::info!(shard = %path.display(), rows = matrix.rows(), "wrote shard");
    }

    tracing::info!(output, "shard build complete");
    Ok(())
}

fn matrix_from_vectors(cols: usize, vectors: &[InputVector]) -> CsrMatrix {
    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        let mut row = vec![0.0f32; cols];
        for (&i, &w) in v.indices.iter().zip(&v.weights) {
            row[i as usize] = w;
        }
        rows.push(row);
    }
    CsrMatrix::from_dense(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsev_core::loader::load_matrix;
    use tempfile::tempdir;

    #[test]
    fn builds_shards_and_records() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("vectors.jsonl");
        fs::write(
            &input,
            concat!(
                r#"{"indices": [0, 3], "weights": [1.0, 2.0], "title": "a"}"#,
                "\n",
                r#"{"indices": [1, 2], "weights": [1.0, 1.0], "title": "b"}"#,
                "\n",
                r#"{"indices": [0, 1], "weights": [2.0, 2.0], "title": "c"}"#,
                "\n",
            ),
        )
        .unwrap();
        let out = dir.path().join("index");
        build_shards(input.to_str().unwrap(), out.to_str().unwrap(), None, 2).unwrap();

        let pattern = out.join("shard-*.csr");
        let matrix = load_matrix(pattern.to_str().unwrap(), 0).unwrap();
        assert_eq!(matrix.rows(), 3);
        assert_eq!(matrix.cols(), 4);
        assert_eq!(
            matrix.scores_dense(&[1.0, 0.0, 0.0, 1.0]),
            vec![3.0, 0.0, 2.0]
        );

        let records = fs::read_to_string(out.join("records.jsonl")).unwrap();
        assert_eq!(records.lines().count(), 3);
    }

    #[test]
    fn rejects_undersized_cols() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("vectors.jsonl");
        fs::write(&input, r#"{"indices": [7], "weights": [1.0]}"#).unwrap();
        let out = dir.path().join("index");
        let err = build_shards(input.to_str().unwrap(), out.to_str().unwrap(), Some(4), 1)
            .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("vectors.jsonl");
        fs::write(&input, r#"{"indices": [1, 2], "weights": [1.0]}"#).unwrap();
        let out = dir.path().join("index");
        let err = build_shards(input.to_str().unwrap(), out.to_str().unwrap(), None, 1)
            .unwrap_err();
        assert!(err.to_string().contains("indices"));
    }
}
