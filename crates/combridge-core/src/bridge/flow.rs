//! 单方向转发
//!
//! 循环：读（有超时上限） → 非空则写到对端。超时只用于让阻塞的读能及时观察到关闭信号。

use log::{debug, warn};
use std::fmt;

use super::BridgeOptions;
use crate::endpoint::{EndpointError, EndpointReader, EndpointWriter, ReadOutcome};
use crate::logging;
use crate::shutdown::ShutdownSignal;

/// 转发方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    AToB,
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => f.write_str("A→B"),
            Direction::BToA => f.write_str("B→A"),
        }
    }
}

/// 转发方向终止的原因
#[derive(Debug)]
pub enum FlowExit {
    /// 观察到关闭信号
    Shutdown,
    ReadFailed(EndpointError),
    WriteFailed(EndpointError),
}

impl FlowExit {
    pub fn is_error(&self) -> bool {
        !matches!(self, FlowExit::Shutdown)
    }
}

impl fmt::Display for FlowExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowExit::Shutdown => f.write_str("shutdown"),
            FlowExit::ReadFailed(e) => write!(f, "read failed: {e}"),
            FlowExit::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// 一个方向结束后的统计
#[derive(Debug)]
pub struct FlowReport {
    pub direction: Direction,
    /// 例如 `bluetooth 00:11:22:33:44:55 → serial /dev/ttyUSB0`
    pub label: String,
    pub bytes: u64,
    pub chunks: u64,
    pub exit: FlowExit,
}

/// 一个转发方向：源端点的读半部 + 目的端点的写半部
pub struct ForwardingFlow {
    direction: Direction,
    label: String,
    source: EndpointReader,
    destination: EndpointWriter,
}

impl ForwardingFlow {
    pub fn new(direction: Direction, source: EndpointReader, destination: EndpointWriter) -> Self {
        let label = format!("{} → {}", source.label(), destination.label());
        Self {
            direction,
            label,
            source,
            destination,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 运行直到关闭信号置位或出现致命错误
    pub async fn run(mut self, shutdown: ShutdownSignal, options: BridgeOptions) -> FlowReport {
        let mut buf = vec![0u8; options.max_chunk.max(1)];
        let mut bytes = 0u64;
        let mut chunks = 0u64;

        debug!("Flow {} ({}) started", self.direction, self.label);

        let exit = loop {
            if shutdown.is_shutdown_requested() {
                break FlowExit::Shutdown;
            }

            match self.source.read_timeout(&mut buf, options.poll_interval).await {
                Ok(ReadOutcome::TimedOut) => {}
                Ok(ReadOutcome::Empty) => {
                    // 防止空读时空转占满一个核
                    tokio::time::sleep(options.idle_backoff).await;
                }
                Ok(ReadOutcome::Data(n)) => {
                    let chunk = &buf[..n];
                    logging::trace_chunk(&self.label, chunk, options.trace);
                    if let Err(e) = self.destination.write(chunk).await {
                        break exit_for(&shutdown, e, FlowExit::WriteFailed);
                    }
                    bytes += n as u64;
                    chunks += 1;
                }
                Err(e) => break exit_for(&shutdown, e, FlowExit::ReadFailed),
            }
        };

        match &exit {
            FlowExit::Shutdown => debug!("Flow {} stopped by shutdown", self.label),
            other => warn!("Error forwarding {}: {other}", self.label),
        }

        self.destination.finish().await;

        FlowReport {
            direction: self.direction,
            label: self.label,
            bytes,
            chunks,
            exit,
        }
    }
}

/// 关闭过程中端点被关闭而产生的错误属于正常退出
fn exit_for(
    shutdown: &ShutdownSignal,
    error: EndpointError,
    wrap: fn(EndpointError) -> FlowExit,
) -> FlowExit {
    if error.is_closed() && shutdown.is_shutdown_requested() {
        FlowExit::Shutdown
    } else {
        wrap(error)
    }
}
