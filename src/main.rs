use clap::Parser;
use coldsync::logging::{LogConfig, SizeRotatingWriter};
use coldsync::BackupConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "coldsync")]
#[command(about = "Archive local photo trees to cold object storage")]
#[command(version)]
struct Cli {
    /// Show what would be uploaded or deleted without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Config file path
    #[arg(long, env = "COLDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Bucket name (overrides config file)
    #[arg(long, env = "S3_BUCKET")]
    bucket: Option<String>,

    /// Bucket region (overrides config file)
    #[arg(long, env = "S3_REGION")]
    region: Option<String>,
}

/// 初始化日志系统：文件 + 控制台
fn init_logging(config: &LogConfig) {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy()
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("sqlx=warn".parse().expect("static directive"))
        .add_directive("opendal=warn".parse().expect("static directive"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_writer = if config.enabled {
        match SizeRotatingWriter::new(&config.log_dir(), config.max_size_bytes()) {
            Ok(w) => Some(w),
            Err(e) => {
                eprintln!("无法创建日志文件，只输出到控制台: {}", e);
                None
            }
        }
    } else {
        None
    };

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(BackupConfig::default_path);
    let mut config = match BackupConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("加载配置失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(bucket) = cli.bucket {
        config.store.bucket = Some(bucket);
    }
    if let Some(region) = cli.region {
        config.store.region = region;
    }

    init_logging(&config.log);

    match coldsync::run_backup(&config, cli.dry_run).await {
        Ok(report) => {
            tracing::debug!("运行报告: {}", serde_json::to_string(&report).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("致命错误: {}", e);
            ExitCode::FAILURE
        }
    }
}
