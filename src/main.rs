use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use gauge_harvester::app::{build_registry, Application};
use harvester_config::AppConfig;
use harvester_core::StringSet;
use harvester_dispatcher::{harvest_now, list_gauges_now};
use harvester_infrastructure::logging::init_logging;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "harvester", version, about = "定时采集水文测站数据的调度服务")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别, 覆盖配置文件
    #[arg(short = 'l', long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式, 覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty", "text"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动调度服务 (默认)
    Run,
    /// 列出所有可用脚本
    Scripts,
    /// 列出脚本在上游的所有测站
    Gauges {
        script: String,
        /// 脚本参数 (JSON)
        #[arg(long, default_value = "null")]
        options: String,
    },
    /// 立即从上游采集一次, 不写入存储
    Harvest {
        script: String,
        #[arg(long, default_value = "null")]
        options: String,
        /// 测站代码, 可重复
        #[arg(long = "code")]
        codes: Vec<String>,
        /// 只采集此时间戳 (Unix 秒) 之后的数据
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.to_string());
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.log.format.to_string());
    init_logging(&log_level, &log_format)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Scripts => {
            let registry = build_registry(&config)?;
            print_json(&registry.list())
        }
        Commands::Gauges { script, options } => {
            let registry = build_registry(&config)?;
            let options = parse_options(&options)?;
            let gauges = list_gauges_now(&registry, &script, &options).await?;
            print_json(&gauges)
        }
        Commands::Harvest {
            script,
            options,
            codes,
            since,
        } => {
            let registry = build_registry(&config)?;
            let options = parse_options(&options)?;
            let codes: StringSet = codes.into_iter().collect();
            let measurements = harvest_now(
                &registry,
                &script,
                &options,
                codes,
                since,
                config.scheduler.harvest_timeout(),
            )
            .await?;
            print_json(&measurements)
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("启动测站数据采集服务");

    let app = Application::new(config).await?;
    app.start().await?;

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, app.shutdown())
        .await
        .is_err()
    {
        warn!("等待采集任务结束超时，强制退出");
    }

    info!("测站数据采集服务已退出");
    Ok(())
}

fn parse_options(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("无法解析脚本参数: {raw}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
