//! 关闭协调
//!
//! 进程范围的取消信号，以及有序的拆除流程：
//! 置位信号 → 等待转发任务退出（有上限） → 每个端点恰好关闭一次 → 交还调用者退出。
//!
//! 信号通过克隆的 [`ShutdownSignal`] 句柄传入每个任务，不使用全局变量。

use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bridge::Direction;
use crate::endpoint::EndpointHandle;

/// 触发关闭的原因（只记录第一次）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM
    Signal,
    /// 某个转发方向已终止
    FlowEnded(Direction),
    /// 内部致命错误
    Fatal,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "termination signal"),
            ShutdownReason::FlowEnded(direction) => write!(f, "flow {direction} ended"),
            ShutdownReason::Fatal => write!(f, "fatal error"),
        }
    }
}

#[derive(Default)]
struct Inner {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
    torn_down: AtomicBool,
}

/// 单调的关闭信号：只会从未置位变为置位，永不复位。
///
/// 克隆开销很小，所有克隆共享同一状态。
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求关闭。可从信号处理器或任意任务并发调用。
    ///
    /// 返回 `true` 表示这是第一次请求。
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        if first {
            info!("Shutdown requested: {reason}");
        } else {
            debug!("Shutdown already requested, ignoring {reason}");
        }
        self.inner.token.cancel();
        first
    }

    /// 非阻塞查询
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 第一次请求关闭时记录的原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.get().copied()
    }

    /// 等待信号置位
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// 有序拆除会话。
    ///
    /// 只有第一个调用者真正执行；之后的调用（包括并发调用）立即返回 `None`。
    /// 执行者返回在期限内结束的任务结果。
    pub async fn teardown<T: 'static>(
        &self,
        flows: &mut JoinSet<T>,
        endpoints: &[EndpointHandle],
        grace: Duration,
    ) -> Option<Vec<T>> {
        self.inner.token.cancel();
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            debug!("Teardown already performed");
            return None;
        }

        info!("Shutting down gracefully...");
        let mut finished = Vec::with_capacity(flows.len());
        drain(flows, &mut finished, grace).await;

        for endpoint in endpoints {
            if endpoint.close() {
                info!("{} closed", endpoint.label());
            }
        }

        // 关闭端点会唤醒仍阻塞在读写上的任务
        if !flows.is_empty() {
            drain(flows, &mut finished, grace).await;
        }
        if !flows.is_empty() {
            warn!(
                "{} forwarding task(s) did not stop within {:?}, aborting",
                flows.len(),
                grace
            );
            flows.abort_all();
            while flows.join_next().await.is_some() {}
        }

        Some(finished)
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_shutdown_requested())
            .field("reason", &self.reason())
            .finish()
    }
}

async fn drain<T: 'static>(flows: &mut JoinSet<T>, out: &mut Vec<T>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !flows.is_empty() {
        match tokio::time::timeout_at(deadline, flows.join_next()).await {
            Ok(Some(Ok(value))) => out.push(value),
            Ok(Some(Err(e))) => warn!("Forwarding task failed: {e}"),
            Ok(None) | Err(_) => break,
        }
    }
}
