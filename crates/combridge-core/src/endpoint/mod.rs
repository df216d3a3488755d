//! 端点 - 桥接的一侧
//!
//! 端点是一个双向字节通道，支持有超时上限的读、写和关闭。
//! 具体传输（RFCOMM、串口、TCP）只需提供 `AsyncRead` / `AsyncWrite`，
//! 见 [`crate::transport`]。
//!
//! # 所有权
//!
//! 桥接运行时端点被拆成读半部和写半部，分别由两个方向的转发任务独占：
//! 每个端点恰好有一个读者和一个写者，数据路径上不需要锁。
//! 只有关闭是共享的，由 [`EndpointHandle`] 完成。
//!
//! # 关闭语义
//!
//! - 关闭是幂等的，`close()` 只有第一次返回 `true`
//! - 关闭之后所有读写都以 [`EndpointError::Closed`] 失败
//! - 关闭会唤醒正在进行中的读写，使其立即失败

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

/// 端点所使用的传输种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Bluetooth,
    Serial,
    Tcp,
}

impl EndpointKind {
    /// 写方向能否单独关闭。串口的 `poll_shutdown` 会阻塞等待发送缓冲排空。
    pub fn supports_half_close(self) -> bool {
        matches!(self, EndpointKind::Bluetooth | EndpointKind::Tcp)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::Bluetooth => "bluetooth",
            EndpointKind::Serial => "serial",
            EndpointKind::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// 端点错误。除 `Closed` 外都会终止所属的转发方向。
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("{0} is closed")]
    Closed(String),

    #[error("{0} disconnected")]
    Disconnected(String),

    #[error("I/O error on {label}: {source}")]
    Io {
        label: String,
        #[source]
        source: io::Error,
    },
}

impl EndpointError {
    pub fn is_closed(&self) -> bool {
        matches!(self, EndpointError::Closed(_))
    }
}

/// 一次有超时上限的读的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 读到 n 个字节（n > 0）
    Data(usize),
    /// 超时内没有数据，正常的轮询结果
    TimedOut,
    /// 没有错误但也没有数据（零长度缓冲区或被中断的读），不视为数据
    Empty,
}

struct Shared {
    label: String,
    kind: EndpointKind,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl Shared {
    fn closed_error(&self) -> EndpointError {
        EndpointError::Closed(self.label.clone())
    }

    fn io_error(&self, source: io::Error) -> EndpointError {
        EndpointError::Io {
            label: self.label.clone(),
            source,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 端点的共享句柄，用于标识和关闭
#[derive(Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
}

impl EndpointHandle {
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn kind(&self) -> EndpointKind {
        self.shared.kind
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// 关闭端点。返回 `true` 表示本次调用执行了关闭。
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.close_token.cancel();
        true
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("label", &self.shared.label)
            .field("kind", &self.shared.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 端点的读半部
pub struct EndpointReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    shared: Arc<Shared>,
}

impl EndpointReader {
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// 最多读 `buf.len()` 字节，最多等待 `timeout`。
    pub async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, EndpointError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(shared.closed_error());
        }

        let inner = &mut self.inner;
        let result = tokio::select! {
            biased;
            () = shared.close_token.cancelled() => return Err(shared.closed_error()),
            res = tokio::time::timeout(timeout, inner.read(buf)) => res,
        };

        match result {
            Err(_elapsed) => Ok(ReadOutcome::TimedOut),
            Ok(Ok(0)) if buf.is_empty() => Ok(ReadOutcome::Empty),
            // 任何传输读到 0 字节都是 EOF：套接字对端关闭，或串口挂断（设备拔出）
            Ok(Ok(0)) => Err(EndpointError::Disconnected(shared.label.clone())),
            Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
            // 串口驱动可能以 TimedOut 报告空闲
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(ReadOutcome::TimedOut),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Empty),
            Ok(Err(e)) => Err(shared.io_error(e)),
        }
    }
}

/// 端点的写半部
pub struct EndpointWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    shared: Arc<Shared>,
}

impl EndpointWriter {
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// 写入全部字节。空切片不会产生写操作。
    ///
    /// 不调用 `flush`：串口的 flush 是阻塞的 `tcdrain`，套接字的 flush 是空操作。
    pub async fn write(&mut self, data: &[u8]) -> Result<(), EndpointError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(shared.closed_error());
        }
        if data.is_empty() {
            return Ok(());
        }

        let inner = &mut self.inner;
        let result = tokio::select! {
            biased;
            () = shared.close_token.cancelled() => return Err(shared.closed_error()),
            res = inner.write_all(data) => res,
        };
        result.map_err(|e| shared.io_error(e))
    }

    /// 尽力关闭写方向（TCP 发送 FIN）。端点已关闭或是串口时跳过。
    pub async fn finish(&mut self) {
        let shared = &self.shared;
        if shared.is_closed() || !shared.kind.supports_half_close() {
            return;
        }
        let inner = &mut self.inner;
        tokio::select! {
            biased;
            () = shared.close_token.cancelled() => {}
            res = inner.shutdown() => {
                if let Err(e) = res {
                    log::debug!("{}: shutdown of write side failed: {e}", shared.label);
                }
            }
        }
    }
}

/// 一个已打开的端点
pub struct Endpoint {
    reader: EndpointReader,
    writer: EndpointWriter,
}

impl Endpoint {
    /// 由独立的读写两半构造
    pub fn new<R, W>(label: impl Into<String>, kind: EndpointKind, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            label: label.into(),
            kind,
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
        });
        Self {
            reader: EndpointReader {
                inner: Box::new(reader),
                shared: shared.clone(),
            },
            writer: EndpointWriter {
                inner: Box::new(writer),
                shared,
            },
        }
    }

    /// 由一个双向流构造
    pub fn from_stream<S>(label: impl Into<String>, kind: EndpointKind, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(label, kind, reader, writer)
    }

    pub fn label(&self) -> &str {
        &self.reader.shared.label
    }

    pub fn kind(&self) -> EndpointKind {
        self.reader.shared.kind
    }

    pub fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            shared: self.reader.shared.clone(),
        }
    }

    pub async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, EndpointError> {
        self.reader.read_timeout(buf, timeout).await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), EndpointError> {
        self.writer.write(data).await
    }

    pub fn close(&self) -> bool {
        self.handle().close()
    }

    pub fn into_split(self) -> (EndpointReader, EndpointWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.handle()).finish()
    }
}
