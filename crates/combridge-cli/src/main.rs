//! Combridge CLI
//!
//! 解析参数、初始化日志、安装信号处理，然后运行一个桥接会话。
//! 启动失败以一行错误信息退出（状态码 1）；正常结束或收到信号退出码为 0。

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use combridge_core::{BridgeConfig, BridgeMode, BridgeReport, ShutdownReason, ShutdownSignal};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    // 桥接 log crate（combridge-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = if verbose > 0 {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,combridge_core=debug"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config =
        BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mode = match cli.command {
        #[cfg(feature = "bluetooth")]
        Commands::BtSerial {
            bluetooth,
            serial,
            bridge,
        } => {
            bluetooth.apply(&mut config.bluetooth);
            serial.apply(&mut config.serial);
            bridge.apply(&mut config.bridge);
            BridgeMode::BluetoothSerial
        }
        Commands::SerialTcp {
            serial,
            tcp,
            bridge,
        } => {
            serial.apply(&mut config.serial);
            tcp.apply(&mut config.tcp);
            bridge.apply(&mut config.bridge);
            BridgeMode::SerialTcp
        }
        #[cfg(feature = "bluetooth")]
        Commands::BtTcp {
            bluetooth,
            tcp,
            bridge,
        } => {
            bluetooth.apply(&mut config.bluetooth);
            tcp.apply(&mut config.tcp);
            bridge.apply(&mut config.bridge);
            BridgeMode::BluetoothTcp
        }
        #[cfg(feature = "bluetooth")]
        Commands::Scan { timeout } => {
            return scan::run(&config, scan::seconds(timeout, &config)).await;
        }
    };

    config.validate(mode.needs_bluetooth())?;

    let shutdown = ShutdownSignal::new();
    tokio::spawn(listen_for_signals(shutdown.clone()));

    match combridge_core::session::run(mode, &config, &shutdown).await {
        Ok(report) => {
            log_report(&report);
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            tracing::info!("Startup interrupted, exiting");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn log_report(report: &BridgeReport) {
    let reason = report
        .reason
        .map_or_else(|| "unknown".to_string(), |r| r.to_string());
    tracing::info!(
        "Session ended ({}): {} bytes forwarded in total",
        reason,
        report.total_bytes()
    );
    for flow in report.flows.iter().filter(|f| f.exit.is_error()) {
        tracing::warn!("{}: {}", flow.label, flow.exit);
    }
}

/// SIGINT / SIGTERM 只请求关闭，拆除由桥接自己完成
async fn listen_for_signals(shutdown: ShutdownSignal) {
    loop {
        if let Err(e) = wait_for_signal().await {
            tracing::error!("Failed to listen for signals: {}", e);
            return;
        }
        if shutdown.request_shutdown(ShutdownReason::Signal) {
            tracing::info!("Termination signal received");
        } else {
            tracing::debug!("Shutdown already in progress");
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(feature = "bluetooth")]
mod scan {
    use anyhow::Result;
    use combridge_core::{BluezScanner, BridgeConfig, DeviceScanner};
    use std::time::Duration;

    /// 命令行未指定时使用配置中的扫描时长
    pub fn seconds(flag: Option<u64>, config: &BridgeConfig) -> u64 {
        flag.unwrap_or(config.bluetooth.scan_timeout_secs)
    }

    /// 扫描一次并列出设备，标出与候选名称匹配的条目
    pub async fn run(config: &BridgeConfig, timeout: u64) -> Result<()> {
        let names = config.bluetooth.candidate_names();
        println!("🔍 扫描设备 ({}s)...", timeout);

        let scanner = BluezScanner::new().await?;
        let devices = scanner.scan(Duration::from_secs(timeout)).await?;

        if devices.is_empty() {
            println!("   未发现设备");
            return Ok(());
        }
        for (i, dev) in devices.iter().enumerate() {
            let name = dev.name.as_deref().unwrap_or("(unknown)");
            match names.matching(name) {
                Some(candidate) => {
                    println!("   [{}] {} ({})  ✓ {}", i, name, dev.address, candidate);
                }
                None => println!("   [{}] {} ({})", i, name, dev.address),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_scan_seconds_follow_config() {
            let mut config = BridgeConfig::default();
            config.bluetooth.scan_timeout_secs = 25;
            assert_eq!(seconds(None, &config), 25);
            assert_eq!(seconds(Some(3), &config), 3);
        }
    }
}
