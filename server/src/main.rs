use anyhow::Result;
use axum::Router;
use clap::Parser;
use sparsev_core::IndexOptions;
use sparsev_server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Glob-style pattern for shard files
    #[arg(long)]
    pattern: String,
    /// Leading columns to drop from each shard
    #[arg(long, default_value_t = 0)]
    shift: usize,
    /// Device placement: cpu or accel:0
    #[arg(long, default_value = "cpu")]
    device: String,
    /// Keep full f32 precision instead of casting to f16
    #[arg(long, default_value_t = false)]
    fp32: bool,
    /// Optional line-delimited JSON record file
    #[arg(long)]
    records: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut options = IndexOptions::new(&args.pattern);
    options.column_offset = args.shift;
    options.device = args.device;
    options.reduced_precision = !args.fp32;
    options.record_file = args.records;

    let app: Router = build_app(&options)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
