// Cloud Sync 命令行入口

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, UploadArgs};
use cloudsync::config::default_config_dir;
use cloudsync::uploader::{listen_for_sys_interruption, shutdown_signal, ShutdownOutcome};
use cloudsync::{new_blob_storage, AppConfig, BlobStoreType, Scanner};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 初始化日志系统：RUST_LOG 优先，否则 info（--verbose 时 debug）
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let result = match &cli.command {
        Commands::Upload(args) => run_upload(&cli, args).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// 执行一次上传，返回是否正常完成（未被中断）
async fn run_upload(cli: &Cli, args: &UploadArgs) -> Result<bool> {
    let config_dir = match &cli.config_path {
        Some(dir) => dir.clone(),
        None => default_config_dir().context("无法确定用户主目录，请使用 --config-path")?,
    };
    let store_type: BlobStoreType = args.driver.parse()?;

    AppConfig::save_if_not_exists(&config_dir, &cli.config_file).await?;
    let config = AppConfig::load(&config_dir, &cli.config_file, absolute(&args.path)).await?;
    info!("已加载配置: {}", config_dir.join(&cli.config_file).display());

    let storage = new_blob_storage(&config, store_type).await?;
    let grace = Duration::from_secs(args.shutdown_timeout);
    let scanner = Scanner::new(Arc::new(config), storage).with_drain_timeout(grace);

    let interruption = listen_for_sys_interruption(
        shutdown_signal(),
        scanner.cancellation_token(),
        scanner.shutdown_tracker(),
        grace,
        scanner.stats(),
    );

    // 中断或致命错误后最多等待 grace，超时的上传活动被放弃
    let run = scanner.start().await;

    // 运行已结束，只需让中断监听退出
    scanner.cancellation_token().cancel();
    match interruption.await {
        Ok(Some(ShutdownOutcome::TimedOut)) => warn!("中断后仍有上传活动未结束"),
        Ok(_) => {}
        Err(e) => warn!("中断监听任务异常退出: {}", e),
    }

    let summary = run?;
    if !summary.drained {
        warn!("等待上传活动结束超时 ({:?})，强制退出", grace);
    }
    Ok(!summary.interrupted && summary.drained)
}

/// 扫描路径转为绝对路径，失败时保持原样
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
