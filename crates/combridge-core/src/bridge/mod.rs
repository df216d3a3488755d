//! 桥接 - 双向字节中继
//!
//! 给定两个已打开的端点，启动两个独立的转发任务（A→B、B→A），
//! 直到会话结束才返回。
//!
//! # 会话结束条件
//!
//! 任一方向终止，或关闭信号置位。此后通过 [`ShutdownSignal::teardown`]
//! 统一拆除：等待两个方向退出，并关闭两个端点各一次。
//! 单边断开会使整个桥接失效，因此对端也会被关闭。

mod flow;

pub use flow::{Direction, FlowExit, FlowReport, ForwardingFlow};

use log::{info, warn};
use std::time::Duration;
use tokio::task::JoinSet;

use crate::endpoint::Endpoint;
use crate::logging::TraceFormat;
use crate::shutdown::{ShutdownReason, ShutdownSignal};

/// 转发参数
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// 读超时，即观察关闭信号的最长间隔
    pub poll_interval: Duration,
    /// 单次读的最大字节数
    pub max_chunk: usize,
    /// 空读后的等待时间
    pub idle_backoff: Duration,
    /// 拆除时等待转发任务退出的上限
    pub teardown_grace: Duration,
    pub trace: TraceFormat,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_chunk: 1024,
            idle_backoff: Duration::from_millis(10),
            teardown_grace: Duration::from_secs(2),
            trace: TraceFormat::Hex,
        }
    }
}

/// 会话结束后的报告
#[derive(Debug)]
pub struct BridgeReport {
    pub flows: Vec<FlowReport>,
    pub reason: Option<ShutdownReason>,
}

impl BridgeReport {
    pub fn flow(&self, direction: Direction) -> Option<&FlowReport> {
        self.flows.iter().find(|f| f.direction == direction)
    }

    pub fn total_bytes(&self) -> u64 {
        self.flows.iter().map(|f| f.bytes).sum()
    }
}

pub struct Bridge {
    options: BridgeOptions,
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// 运行一个桥接会话，阻塞直到两个方向都已退出且两个端点都已关闭
    pub async fn run(&self, a: Endpoint, b: Endpoint, shutdown: &ShutdownSignal) -> BridgeReport {
        let handles = [a.handle(), b.handle()];
        info!("Bridging {} <-> {}", a.label(), b.label());

        let (a_reader, a_writer) = a.into_split();
        let (b_reader, b_writer) = b.into_split();

        let mut flows = JoinSet::new();
        flows.spawn(
            ForwardingFlow::new(Direction::AToB, a_reader, b_writer)
                .run(shutdown.clone(), self.options.clone()),
        );
        flows.spawn(
            ForwardingFlow::new(Direction::BToA, b_reader, a_writer)
                .run(shutdown.clone(), self.options.clone()),
        );

        let mut reports = Vec::with_capacity(2);
        tokio::select! {
            Some(joined) = flows.join_next() => match joined {
                Ok(report) => {
                    shutdown.request_shutdown(ShutdownReason::FlowEnded(report.direction));
                    reports.push(report);
                }
                Err(e) => {
                    warn!("Forwarding task failed: {e}");
                    shutdown.request_shutdown(ShutdownReason::Fatal);
                }
            },
            () = shutdown.cancelled() => {}
        }

        match shutdown
            .teardown(&mut flows, &handles, self.options.teardown_grace)
            .await
        {
            Some(rest) => reports.extend(rest),
            None => {
                // 其他调用者已完成拆除，这里只回收自己的任务
                for handle in &handles {
                    handle.close();
                }
                while let Some(joined) = flows.join_next().await {
                    match joined {
                        Ok(report) => reports.push(report),
                        Err(e) => warn!("Forwarding task failed: {e}"),
                    }
                }
            }
        }

        reports.sort_by_key(|r| r.direction);
        for report in &reports {
            info!(
                "{}: {} bytes in {} chunks ({})",
                report.label, report.bytes, report.chunks, report.exit
            );
        }

        BridgeReport {
            flows: reports,
            reason: shutdown.reason(),
        }
    }
}
