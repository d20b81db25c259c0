use anyhow::Result;
use clap::Parser;
use detection_serving::{config::Config, web::serve};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "detection-serving")]
#[command(about = "Object-detection and OCR inference service")]
struct Args {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:4343")]
    bind: String,

    /// Number of worker threads
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Detection models directory (one sub-folder per model)
    #[arg(long, env = "MODELS_DIR", default_value = "models")]
    models_dir: String,

    /// OCR recognition model directory (rec.onnx + dict.txt)
    #[arg(long, env = "OCR_MODELS_DIR")]
    ocr_models_dir: Option<PathBuf>,

    /// Load every model at startup
    #[arg(long, env = "PRELOAD")]
    preload: bool,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting detection service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Models directory: {}", args.models_dir);

    // 创建配置
    let config = Config::new(
        args.bind,
        args.models_dir,
        args.ocr_models_dir,
        args.workers,
        args.dev,
    )?
    .with_preload(args.preload);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    // 启动服务器
    runtime.block_on(serve(config))?;

    Ok(())
}
